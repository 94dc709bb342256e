//! Delivery engine: pipeline assembly and lifecycle.
//!
//! Owns the bounded queue, the retry scheduler, and the worker pool, and
//! coordinates graceful shutdown so that every envelope is reported before
//! the process exits.
//!
//! ```text
//! ┌──────────────┐   ┌───────────────┐   ┌──────────────┐
//! │ Inbound      │──▶│ Bounded Queue │──▶│ Worker Pool  │──▶ HTTP sink
//! │ Adapter      │   │ (fresh+retry) │   └──────────────┘
//! └──────────────┘   └───────▲───────┘          │
//!                            │            ┌─────▼────────┐
//!                            └────────────│ Retry        │
//!                                         │ Scheduler    │
//!                                         └──────────────┘
//! ```

use std::{sync::Arc, time::Duration};

use chrono::{DateTime, Utc};
use ponte_core::{Clock, Envelope, PipelineMetrics, RealClock};
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::info;

use crate::{
    client::{SinkClient, SinkConfig},
    error::Result,
    outcome::{
        AbandonReason, DeadLetterRecord, DeliveryOutcome, OutcomeSink, PendingRecord,
    },
    queue::{BoundedQueue, OverflowPolicy},
    retry::RetryPolicy,
    scheduler::RetryScheduler,
    worker::DeliveryWorker,
    worker_pool::WorkerPool,
};

/// How envelopes interrupted by shutdown are reported.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ShutdownDisposition {
    /// Report as abandoned with a shutdown reason (the default).
    Abandon,
    /// Report as pending-retry for operator visibility.
    ReportPending,
}

impl Default for ShutdownDisposition {
    fn default() -> Self {
        Self::Abandon
    }
}

/// Configuration for the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Number of concurrent delivery workers.
    pub worker_count: usize,

    /// Capacity of the bounded queue's fresh lane.
    pub queue_capacity: usize,

    /// Rule applied when a fresh envelope arrives at a full queue.
    pub overflow_policy: OverflowPolicy,

    /// HTTP sink client configuration.
    pub sink: SinkConfig,

    /// Retry policy applied to every envelope.
    pub retry_policy: RetryPolicy,

    /// Maximum time to wait for workers during shutdown.
    pub shutdown_timeout: Duration,

    /// How interrupted envelopes are reported at shutdown.
    pub shutdown_disposition: ShutdownDisposition,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            worker_count: crate::DEFAULT_WORKER_COUNT,
            queue_capacity: crate::DEFAULT_QUEUE_CAPACITY,
            overflow_policy: OverflowPolicy::Block,
            sink: SinkConfig::default(),
            retry_policy: RetryPolicy::default(),
            shutdown_timeout: Duration::from_secs(30),
            shutdown_disposition: ShutdownDisposition::Abandon,
        }
    }
}

/// Producer-side handle used by the inbound adapter.
#[derive(Debug, Clone)]
pub struct PipelineHandle {
    queue: Arc<BoundedQueue>,
}

impl PipelineHandle {
    /// Pushes a fresh envelope into the pipeline.
    ///
    /// Suspends under the `block` overflow policy while the queue is full.
    ///
    /// # Errors
    ///
    /// Returns [`crate::DeliveryError::QueueClosed`] once the pipeline is
    /// shutting down.
    pub async fn enqueue(&self, envelope: Envelope) -> Result<()> {
        self.queue.push(envelope).await
    }
}

/// Main engine coordinating the delivery pipeline.
pub struct DeliveryEngine {
    config: DeliveryConfig,
    queue: Arc<BoundedQueue>,
    client: Arc<SinkClient>,
    scheduler: Arc<RetryScheduler>,
    outcome: Arc<dyn OutcomeSink>,
    metrics: Arc<PipelineMetrics>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    pool: Option<WorkerPool>,
}

impl DeliveryEngine {
    /// Creates an engine with the real clock.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink client cannot be built (invalid URL or
    /// TLS configuration).
    pub fn new(
        config: DeliveryConfig,
        outcome: Arc<dyn OutcomeSink>,
        metrics: Arc<PipelineMetrics>,
    ) -> Result<Self> {
        Self::with_clock(config, outcome, metrics, Arc::new(RealClock::new()))
    }

    /// Creates an engine with an injected clock for deterministic tests.
    ///
    /// # Errors
    ///
    /// Returns an error if the sink client cannot be built.
    pub fn with_clock(
        config: DeliveryConfig,
        outcome: Arc<dyn OutcomeSink>,
        metrics: Arc<PipelineMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let client = Arc::new(SinkClient::new(config.sink.clone())?);
        let queue = Arc::new(BoundedQueue::new(
            config.queue_capacity,
            config.overflow_policy,
            metrics.clone(),
        ));
        let cancel = CancellationToken::new();
        let scheduler = Arc::new(RetryScheduler::new(
            queue.clone(),
            clock.clone(),
            cancel.clone(),
            outcome.clone(),
            metrics.clone(),
            config.shutdown_disposition,
        ));

        Ok(Self {
            config,
            queue,
            client,
            scheduler,
            outcome,
            metrics,
            clock,
            cancel,
            pool: None,
        })
    }

    /// Returns the producer-side handle for the inbound adapter.
    pub fn handle(&self) -> PipelineHandle {
        PipelineHandle { queue: self.queue.clone() }
    }

    /// Returns the shared pipeline metrics.
    pub fn metrics(&self) -> Arc<PipelineMetrics> {
        self.metrics.clone()
    }

    /// Spawns the configured worker pool.
    ///
    /// Returns immediately; use [`Self::shutdown`] to stop gracefully.
    pub fn start(&mut self) {
        info!(
            worker_count = self.config.worker_count,
            queue_capacity = self.config.queue_capacity,
            sink_url = %self.config.sink.url,
            "starting delivery engine"
        );

        let workers = (0..self.config.worker_count)
            .map(|id| {
                DeliveryWorker::new(
                    id,
                    self.queue.clone(),
                    self.client.clone(),
                    self.config.retry_policy.clone(),
                    self.scheduler.clone(),
                    self.outcome.clone(),
                    self.metrics.clone(),
                    self.cancel.clone(),
                    self.clock.clone(),
                )
            })
            .collect();

        self.pool = Some(WorkerPool::spawn(workers, self.cancel.clone()));
        info!("delivery engine started");
    }

    /// Gracefully shuts down the pipeline.
    ///
    /// Stops admitting new envelopes, lets in-flight deliveries complete up
    /// to their timeout, resolves pending backoff waits into shutdown
    /// reports, and reports every envelope still sitting in the queue. No
    /// envelope is left unreported.
    ///
    /// # Errors
    ///
    /// Returns an error if the worker pool exceeds the shutdown timeout or
    /// a worker panicked.
    pub async fn shutdown(mut self) -> Result<()> {
        info!("shutting down delivery engine");

        self.queue.close();
        self.cancel.cancel();

        let pool_result = match self.pool.take() {
            Some(pool) => pool.shutdown_graceful(self.config.shutdown_timeout).await,
            None => Ok(()),
        };

        // Workers are done scheduling by now; resolve pending backoffs.
        self.scheduler.drain().await;

        // Report whatever never reached a worker.
        let leftovers = self.queue.drain();
        if !leftovers.is_empty() {
            info!(count = leftovers.len(), "reporting envelopes left in queue at shutdown");
        }
        for envelope in leftovers {
            report_interrupted(
                self.outcome.as_ref(),
                &self.metrics,
                self.config.shutdown_disposition,
                envelope,
                self.clock.now_utc(),
            )
            .await;
        }

        info!("delivery engine shutdown complete");
        pool_result
    }
}

/// Reports an envelope interrupted by shutdown, per the configured
/// disposition. Shared by the scheduler's cancel path and the engine's
/// queue drain.
pub(crate) async fn report_interrupted(
    outcome: &dyn OutcomeSink,
    metrics: &PipelineMetrics,
    disposition: ShutdownDisposition,
    mut envelope: Envelope,
    now: DateTime<Utc>,
) {
    match disposition {
        ShutdownDisposition::Abandon => {
            envelope.abandon();
            metrics.record_abandon();
            outcome
                .record(DeliveryOutcome::Abandoned(DeadLetterRecord {
                    envelope_id: envelope.id,
                    topic: envelope.topic,
                    reason: AbandonReason::Shutdown,
                    status_code: None,
                    attempt: envelope.attempt,
                    last_error: None,
                    abandoned_at: now,
                }))
                .await;
        },
        ShutdownDisposition::ReportPending => {
            outcome
                .record(DeliveryOutcome::ShutdownPending(PendingRecord {
                    envelope_id: envelope.id,
                    topic: envelope.topic,
                    attempt: envelope.attempt,
                }))
                .await;
        },
    }
}
