//! Terminal outcome reporting.
//!
//! Every envelope leaves the pipeline through exactly one outcome record:
//! delivered, abandoned (dead-letter), or pending at shutdown. The
//! [`OutcomeSink`] trait is the boundary to whatever consumes these
//! records; the pipeline only requires that recording never blocks or
//! fails delivery processing.

use chrono::{DateTime, Utc};
use ponte_core::EnvelopeId;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

/// Terminal outcome of one envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum DeliveryOutcome {
    /// The sink accepted the envelope.
    Delivered(DeliveredRecord),
    /// Delivery gave up; the envelope is dead-lettered.
    Abandoned(DeadLetterRecord),
    /// Shutdown interrupted the envelope before a terminal state; reported
    /// for operator visibility when the pending disposition is configured.
    ShutdownPending(PendingRecord),
}

/// Record of a successful delivery.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveredRecord {
    /// Envelope that was delivered.
    pub envelope_id: EnvelopeId,
    /// Source topic.
    pub topic: String,
    /// HTTP status returned by the sink.
    pub status_code: u16,
    /// Retryable failures before success (0 = first attempt).
    pub attempt: u32,
    /// When the delivery completed.
    pub delivered_at: DateTime<Utc>,
}

/// Dead-letter record for an abandoned envelope.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeadLetterRecord {
    /// Envelope that was abandoned.
    pub envelope_id: EnvelopeId,
    /// Source topic.
    pub topic: String,
    /// Why delivery gave up.
    pub reason: AbandonReason,
    /// HTTP status observed on the final attempt, when the sink responded.
    pub status_code: Option<u16>,
    /// Retryable failures recorded before abandonment.
    pub attempt: u32,
    /// Last observed delivery error, when one exists.
    pub last_error: Option<String>,
    /// When the envelope was abandoned.
    pub abandoned_at: DateTime<Utc>,
}

/// Record of an envelope interrupted by shutdown.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PendingRecord {
    /// Envelope that was interrupted.
    pub envelope_id: EnvelopeId,
    /// Source topic.
    pub topic: String,
    /// Retryable failures recorded so far.
    pub attempt: u32,
}

/// Why an envelope was abandoned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AbandonReason {
    /// The sink returned a non-retryable status.
    NonRetryable,
    /// The attempt budget was exhausted by retryable failures.
    AttemptsExhausted,
    /// The pipeline shut down before delivery completed.
    Shutdown,
}

impl std::fmt::Display for AbandonReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::NonRetryable => "non_retryable",
            Self::AttemptsExhausted => "attempts_exhausted",
            Self::Shutdown => "shutdown",
        };
        f.write_str(s)
    }
}

/// Consumer of terminal outcome records.
///
/// Implementations must not propagate failures back into the pipeline;
/// recording problems are logged, not raised.
#[async_trait::async_trait]
pub trait OutcomeSink: Send + Sync + std::fmt::Debug {
    /// Records one terminal outcome.
    async fn record(&self, outcome: DeliveryOutcome);
}

/// Default outcome sink that writes structured log records.
#[derive(Debug, Default)]
pub struct LogOutcomeSink;

impl LogOutcomeSink {
    /// Creates a new logging outcome sink.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait::async_trait]
impl OutcomeSink for LogOutcomeSink {
    async fn record(&self, outcome: DeliveryOutcome) {
        match outcome {
            DeliveryOutcome::Delivered(record) => {
                info!(
                    envelope_id = %record.envelope_id,
                    topic = %record.topic,
                    status = record.status_code,
                    attempt = record.attempt,
                    "envelope delivered"
                );
            },
            DeliveryOutcome::Abandoned(record) => {
                error!(
                    envelope_id = %record.envelope_id,
                    topic = %record.topic,
                    reason = %record.reason,
                    attempt = record.attempt,
                    last_error = record.last_error.as_deref().unwrap_or("none"),
                    "envelope dead-lettered"
                );
            },
            DeliveryOutcome::ShutdownPending(record) => {
                warn!(
                    envelope_id = %record.envelope_id,
                    topic = %record.topic,
                    attempt = record.attempt,
                    "envelope pending at shutdown"
                );
            },
        }
    }
}

/// Outcome sink collecting records in memory for test assertions.
#[derive(Debug, Default)]
pub struct MemoryOutcomeSink {
    records: std::sync::Mutex<Vec<DeliveryOutcome>>,
}

impl MemoryOutcomeSink {
    /// Creates an empty collector.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of all recorded outcomes.
    pub fn records(&self) -> Vec<DeliveryOutcome> {
        self.records.lock().expect("outcome lock poisoned").clone()
    }

    /// Number of recorded outcomes.
    pub fn len(&self) -> usize {
        self.records.lock().expect("outcome lock poisoned").len()
    }

    /// Whether no outcome has been recorded yet.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[async_trait::async_trait]
impl OutcomeSink for MemoryOutcomeSink {
    async fn record(&self, outcome: DeliveryOutcome) {
        self.records.lock().expect("outcome lock poisoned").push(outcome);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn delivered() -> DeliveryOutcome {
        DeliveryOutcome::Delivered(DeliveredRecord {
            envelope_id: EnvelopeId::new(),
            topic: "data/sensor".to_string(),
            status_code: 200,
            attempt: 0,
            delivered_at: Utc::now(),
        })
    }

    #[tokio::test]
    async fn memory_sink_collects_outcomes_in_order() {
        let sink = MemoryOutcomeSink::new();

        sink.record(delivered()).await;
        sink.record(DeliveryOutcome::Abandoned(DeadLetterRecord {
            envelope_id: EnvelopeId::new(),
            topic: "data/sensor".to_string(),
            reason: AbandonReason::NonRetryable,
            status_code: Some(400),
            attempt: 0,
            last_error: Some("client error: HTTP 400".to_string()),
            abandoned_at: Utc::now(),
        }))
        .await;

        let records = sink.records();
        assert_eq!(records.len(), 2);
        assert!(matches!(records[0], DeliveryOutcome::Delivered(_)));
        assert!(matches!(records[1], DeliveryOutcome::Abandoned(_)));
    }

    #[tokio::test]
    async fn log_sink_accepts_all_variants() {
        let sink = LogOutcomeSink::new();

        // Must not panic or block.
        sink.record(delivered()).await;
        sink.record(DeliveryOutcome::ShutdownPending(PendingRecord {
            envelope_id: EnvelopeId::new(),
            topic: "data/sensor".to_string(),
            attempt: 1,
        }))
        .await;
    }

    #[test]
    fn dead_letter_record_serializes_reason_as_snake_case() {
        let record = DeadLetterRecord {
            envelope_id: EnvelopeId::new(),
            topic: "t".to_string(),
            reason: AbandonReason::AttemptsExhausted,
            status_code: Some(503),
            attempt: 5,
            last_error: None,
            abandoned_at: Utc::now(),
        };

        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains("attempts_exhausted"));
    }
}
