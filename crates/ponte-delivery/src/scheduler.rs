//! Deferred retry scheduling.
//!
//! A retry wait is modeled as a spawned continuation rather than a blocked
//! worker: the task sleeps out the backoff on the injected clock, then
//! re-inserts the envelope into the queue's retry lane. Cancellation turns
//! pending continuations into shutdown reports instead of re-insertions,
//! so no envelope is left unreported at exit.

use std::{
    sync::{Arc, Mutex},
    time::Duration,
};

use ponte_core::{Clock, Envelope, PipelineMetrics};
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::{
    engine::{report_interrupted, ShutdownDisposition},
    outcome::OutcomeSink,
    queue::BoundedQueue,
};

/// Schedules backoff waits for retry-scheduled envelopes.
#[derive(Debug)]
pub struct RetryScheduler {
    queue: Arc<BoundedQueue>,
    clock: Arc<dyn Clock>,
    cancel: CancellationToken,
    outcome: Arc<dyn OutcomeSink>,
    metrics: Arc<PipelineMetrics>,
    disposition: ShutdownDisposition,
    tasks: Mutex<JoinSet<()>>,
}

impl RetryScheduler {
    /// Creates a scheduler feeding retries back into the given queue.
    pub fn new(
        queue: Arc<BoundedQueue>,
        clock: Arc<dyn Clock>,
        cancel: CancellationToken,
        outcome: Arc<dyn OutcomeSink>,
        metrics: Arc<PipelineMetrics>,
        disposition: ShutdownDisposition,
    ) -> Self {
        Self {
            queue,
            clock,
            cancel,
            outcome,
            metrics,
            disposition,
            tasks: Mutex::new(JoinSet::new()),
        }
    }

    /// Spawns the backoff continuation for one retry-scheduled envelope.
    ///
    /// After `delay` elapses the envelope re-enters the queue's retry lane.
    /// If the pipeline shuts down first, the envelope is reported per the
    /// configured shutdown disposition.
    pub fn schedule(&self, envelope: Envelope, delay: Duration) {
        let queue = self.queue.clone();
        let clock = self.clock.clone();
        let cancel = self.cancel.clone();
        let outcome = self.outcome.clone();
        let metrics = self.metrics.clone();
        let disposition = self.disposition;

        let mut tasks = self.tasks.lock().expect("scheduler lock poisoned");
        tasks.spawn(async move {
            tokio::select! {
                () = clock.sleep(delay) => {
                    debug!(
                        envelope_id = %envelope.id,
                        attempt = envelope.attempt,
                        delay_ms = delay.as_millis(),
                        "backoff elapsed, re-queueing envelope"
                    );
                    if let Err(_closed) = queue.push_retry(envelope.clone()) {
                        // Lost the race with shutdown; report instead.
                        report_interrupted(
                            outcome.as_ref(),
                            &metrics,
                            disposition,
                            envelope,
                            clock.now_utc(),
                        )
                        .await;
                    }
                }
                () = cancel.cancelled() => {
                    report_interrupted(
                        outcome.as_ref(),
                        &metrics,
                        disposition,
                        envelope,
                        clock.now_utc(),
                    )
                    .await;
                }
            }
        });
    }

    /// Number of continuations not yet finished. Completed tasks linger
    /// until the next `drain`, so this is an upper bound.
    pub fn pending(&self) -> usize {
        self.tasks.lock().expect("scheduler lock poisoned").len()
    }

    /// Waits for every spawned continuation to finish.
    ///
    /// Called during shutdown after cancellation, so pending backoff waits
    /// resolve immediately into shutdown reports.
    pub async fn drain(&self) {
        let mut tasks = {
            let mut guard = self.tasks.lock().expect("scheduler lock poisoned");
            std::mem::take(&mut *guard)
        };

        while let Some(result) = tasks.join_next().await {
            if let Err(e) = result {
                tracing::error!(error = %e, "retry continuation panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use bytes::Bytes;
    use chrono::Utc;
    use ponte_core::{Qos, TestClock};

    use super::*;
    use crate::{outcome::MemoryOutcomeSink, queue::OverflowPolicy};

    fn retry_envelope() -> Envelope {
        let mut envelope =
            Envelope::new("data/sensor", Bytes::from_static(b"{}"), Qos::AtMostOnce, Utc::now());
        envelope.begin_attempt();
        envelope.count_failure();
        envelope.schedule_retry();
        envelope
    }

    fn scheduler_parts(
        cancel: CancellationToken,
    ) -> (Arc<BoundedQueue>, Arc<MemoryOutcomeSink>, RetryScheduler) {
        let metrics = Arc::new(PipelineMetrics::new());
        let queue = Arc::new(BoundedQueue::new(8, OverflowPolicy::Block, metrics.clone()));
        let outcome = Arc::new(MemoryOutcomeSink::new());
        let scheduler = RetryScheduler::new(
            queue.clone(),
            Arc::new(TestClock::new()),
            cancel,
            outcome.clone(),
            metrics,
            ShutdownDisposition::Abandon,
        );
        (queue, outcome, scheduler)
    }

    #[tokio::test]
    async fn expired_backoff_requeues_into_retry_lane() {
        let (queue, outcome, scheduler) = scheduler_parts(CancellationToken::new());

        scheduler.schedule(retry_envelope(), Duration::from_secs(30));
        scheduler.drain().await;

        assert_eq!(queue.len(), 1);
        assert!(outcome.is_empty());

        let requeued = queue.pop().await.unwrap();
        assert_eq!(requeued.attempt, 1);
    }

    #[tokio::test]
    async fn cancellation_reports_pending_retries_as_shutdown() {
        let cancel = CancellationToken::new();
        let (queue, outcome, scheduler) = scheduler_parts(cancel.clone());

        cancel.cancel();
        scheduler.schedule(retry_envelope(), Duration::from_secs(30));
        scheduler.drain().await;

        assert!(queue.is_empty());
        assert_eq!(outcome.len(), 1);
    }

    #[tokio::test]
    async fn closed_queue_turns_requeue_into_report() {
        let (queue, outcome, scheduler) = scheduler_parts(CancellationToken::new());

        queue.close();
        scheduler.schedule(retry_envelope(), Duration::from_millis(10));
        scheduler.drain().await;

        assert_eq!(outcome.len(), 1);
    }
}
