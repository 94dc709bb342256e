//! Worker pool management with structured concurrency.
//!
//! Spawns and supervises the delivery workers, and performs graceful
//! shutdown with a bounded timeout. A dropped pool force-cancels its
//! workers so no task is orphaned.

use std::{sync::Arc, time::Duration};

use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::{
    error::{DeliveryError, Result},
    worker::DeliveryWorker,
};

/// Supervised pool of delivery workers.
pub struct WorkerPool {
    cancel: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns the given workers and begins processing.
    ///
    /// Workers run until the cancellation token fires or the queue closes.
    pub fn spawn(workers: Vec<DeliveryWorker>, cancel: CancellationToken) -> Self {
        info!(worker_count = workers.len(), "spawning delivery workers");

        let handles = workers
            .into_iter()
            .map(|worker| {
                let worker = Arc::new(worker);
                tokio::spawn(async move { worker.run().await })
            })
            .collect();

        Self { cancel, handles }
    }

    /// Waits for every worker to finish, bounded by `timeout`.
    ///
    /// Cancellation must already have been signalled (or the queue closed);
    /// this only joins the tasks and surfaces panics.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::ShutdownTimeout`] if workers are still
    /// running when the timeout expires, or [`DeliveryError::WorkerPanic`]
    /// for the first worker that panicked.
    pub async fn shutdown_graceful(mut self, timeout: Duration) -> Result<()> {
        info!(
            worker_count = self.handles.len(),
            timeout_seconds = timeout.as_secs(),
            "waiting for delivery workers to stop"
        );

        let handles = std::mem::take(&mut self.handles);

        let join_all = async {
            let mut first_panic = None;
            for (worker_id, handle) in handles.into_iter().enumerate() {
                if let Err(join_error) = handle.await {
                    error!(worker_id, error = %join_error, "worker task panicked");
                    first_panic.get_or_insert(DeliveryError::WorkerPanic {
                        worker_id,
                        message: join_error.to_string(),
                    });
                }
            }
            first_panic
        };

        match tokio::time::timeout(timeout, join_all).await {
            Ok(None) => {
                info!("worker pool shutdown completed");
                Ok(())
            },
            Ok(Some(panic)) => Err(panic),
            Err(_elapsed) => {
                error!(
                    timeout_seconds = timeout.as_secs(),
                    "worker shutdown timed out, some workers may still be running"
                );
                Err(DeliveryError::ShutdownTimeout { timeout })
            },
        }
    }

    /// Whether any worker task is still running.
    pub fn has_active_workers(&self) -> bool {
        self.handles.iter().any(|h| !h.is_finished())
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        let active = self.handles.iter().filter(|h| !h.is_finished()).count();

        if active > 0 && !self.cancel.is_cancelled() {
            self.cancel.cancel();
            warn!(
                active_workers = active,
                "worker pool dropped without graceful shutdown, cancelling workers"
            );
        }
    }
}
