//! Delivery worker: drives envelopes from the queue to a terminal state.
//!
//! Each worker pops the next envelope, issues exactly one delivery attempt,
//! and classifies the result. Retryable failures are handed to the retry
//! scheduler so the worker moves on immediately; backoff waits never hold
//! the worker's main path.

use std::sync::Arc;

use ponte_core::{Clock, Envelope, PipelineMetrics};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    client::{SinkClient, SinkResponse},
    error::DeliveryError,
    outcome::{
        AbandonReason, DeadLetterRecord, DeliveredRecord, DeliveryOutcome, OutcomeSink,
    },
    queue::BoundedQueue,
    retry::{RetryDecision, RetryPolicy},
    scheduler::RetryScheduler,
};

/// One delivery worker of the pool.
pub struct DeliveryWorker {
    id: usize,
    queue: Arc<BoundedQueue>,
    client: Arc<SinkClient>,
    policy: RetryPolicy,
    scheduler: Arc<RetryScheduler>,
    outcome: Arc<dyn OutcomeSink>,
    metrics: Arc<PipelineMetrics>,
    cancel: CancellationToken,
    clock: Arc<dyn Clock>,
}

impl DeliveryWorker {
    /// Creates a worker wired into the shared pipeline components.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        id: usize,
        queue: Arc<BoundedQueue>,
        client: Arc<SinkClient>,
        policy: RetryPolicy,
        scheduler: Arc<RetryScheduler>,
        outcome: Arc<dyn OutcomeSink>,
        metrics: Arc<PipelineMetrics>,
        cancel: CancellationToken,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { id, queue, client, policy, scheduler, outcome, metrics, cancel, clock }
    }

    /// Main worker loop - pops and processes envelopes until cancelled or
    /// the queue is closed and drained.
    ///
    /// An envelope already being processed is always driven to its next
    /// state before the worker exits; cancellation only interrupts the
    /// idle wait on the queue.
    pub async fn run(&self) {
        info!(worker_id = self.id, "delivery worker starting");

        loop {
            tokio::select! {
                maybe = self.queue.pop() => {
                    match maybe {
                        Some(envelope) => self.process_envelope(envelope).await,
                        None => {
                            debug!(worker_id = self.id, "queue closed and drained");
                            break;
                        },
                    }
                }
                () = self.cancel.cancelled() => {
                    debug!(worker_id = self.id, "delivery worker received shutdown signal");
                    break;
                }
            }
        }

        info!(worker_id = self.id, "delivery worker stopped");
    }

    /// Issues one delivery attempt and routes the envelope onward.
    async fn process_envelope(&self, mut envelope: Envelope) {
        envelope.begin_attempt();
        self.metrics.attempt_started();
        let result = self.client.deliver(&envelope).await;
        self.metrics.attempt_finished();

        let error = match result {
            Ok(response) if response.is_success => {
                self.report_delivered(envelope, &response).await;
                return;
            },
            Ok(response) => status_error(&response),
            Err(error) => error,
        };

        self.handle_failure(envelope, error).await;
    }

    async fn report_delivered(&self, mut envelope: Envelope, response: &SinkResponse) {
        envelope.mark_delivered();
        self.metrics.record_delivery();

        info!(
            worker_id = self.id,
            envelope_id = %envelope.id,
            status = response.status_code,
            duration_ms = response.duration.as_millis(),
            attempt = envelope.attempt,
            "envelope delivered"
        );

        self.outcome
            .record(DeliveryOutcome::Delivered(DeliveredRecord {
                envelope_id: envelope.id,
                topic: envelope.topic,
                status_code: response.status_code,
                attempt: envelope.attempt,
                delivered_at: self.clock.now_utc(),
            }))
            .await;
    }

    /// Classifies a failed attempt into retry or dead-letter.
    async fn handle_failure(&self, mut envelope: Envelope, error: DeliveryError) {
        if !error.is_retryable() {
            // Non-retryable responses abandon at the current attempt count.
            self.abandon(envelope, AbandonReason::NonRetryable, &error).await;
            return;
        }

        envelope.count_failure();

        match self.policy.decide(envelope.attempt, &error) {
            RetryDecision::Retry { delay } => {
                envelope.schedule_retry();
                self.metrics.record_retry_scheduled();

                warn!(
                    worker_id = self.id,
                    envelope_id = %envelope.id,
                    attempt = envelope.attempt,
                    delay_ms = delay.as_millis(),
                    error = %error,
                    "delivery failed, retry scheduled"
                );

                self.scheduler.schedule(envelope, delay);
            },
            RetryDecision::GiveUp { .. } => {
                self.abandon(envelope, AbandonReason::AttemptsExhausted, &error).await;
            },
        }
    }

    async fn abandon(&self, mut envelope: Envelope, reason: AbandonReason, error: &DeliveryError) {
        envelope.abandon();
        self.metrics.record_abandon();

        error!(
            worker_id = self.id,
            envelope_id = %envelope.id,
            reason = %reason,
            attempt = envelope.attempt,
            error = %error,
            "delivery permanently failed"
        );

        self.outcome
            .record(DeliveryOutcome::Abandoned(DeadLetterRecord {
                envelope_id: envelope.id,
                topic: envelope.topic,
                reason,
                status_code: error.status_code(),
                attempt: envelope.attempt,
                last_error: Some(error.to_string()),
                abandoned_at: self.clock.now_utc(),
            }))
            .await;
    }
}

/// Maps a non-2xx sink response to its delivery error.
fn status_error(response: &SinkResponse) -> DeliveryError {
    match response.status_code {
        429 => DeliveryError::rate_limited(response.retry_after_seconds),
        400..=499 => DeliveryError::client_status(response.status_code, response.body.clone()),
        _ => DeliveryError::server_status(response.status_code, response.body.clone()),
    }
}
