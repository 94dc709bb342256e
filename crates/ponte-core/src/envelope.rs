//! Envelope model and wire-body derivation.
//!
//! An [`Envelope`] is the unit flowing through the delivery pipeline: one
//! MQTT message, normalized at ingest and carried unchanged until it reaches
//! a terminal state. The wire body is computed exactly once at construction
//! so that every retry posts bytes identical to the first attempt.

use std::fmt;

use bytes::Bytes;
use chrono::{DateTime, SecondsFormat, Utc};
use serde_json::{json, Map, Value};
use uuid::Uuid;

/// Strongly-typed envelope identifier.
///
/// Wraps a UUID to prevent mixing with other id types. Assigned once at
/// ingest and carried through logs and outcome records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct EnvelopeId(pub Uuid);

impl EnvelopeId {
    /// Creates a new random envelope id.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for EnvelopeId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for EnvelopeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// MQTT quality-of-service level of the originating publish.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Qos {
    /// QoS 0 - fire and forget.
    AtMostOnce,
    /// QoS 1 - acknowledged delivery.
    AtLeastOnce,
    /// QoS 2 - assured delivery.
    ExactlyOnce,
}

impl Qos {
    /// Maps a raw MQTT QoS byte to a level. Values above 2 are clamped to
    /// QoS 2, matching broker behavior for malformed packets.
    pub fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::AtMostOnce,
            1 => Self::AtLeastOnce,
            _ => Self::ExactlyOnce,
        }
    }
}

/// Envelope lifecycle state.
///
/// Transitions are strictly controlled:
///
/// ```text
/// Queued ──▶ InFlight ──▶ Delivered
///    ▲           │
///    │           ├──▶ RetryScheduled ──▶ InFlight (after backoff)
///    │           │
///    └───────────┴──▶ Abandoned
/// ```
///
/// `Delivered` and `Abandoned` are terminal. `Queued -> Abandoned` covers
/// shutdown of envelopes that never got a delivery attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EnvelopeState {
    /// Waiting in the bounded queue for a worker.
    Queued,
    /// A delivery attempt is outstanding against the sink.
    InFlight,
    /// A retryable failure occurred; waiting out the backoff delay.
    RetryScheduled,
    /// The sink accepted the envelope (2xx).
    Delivered,
    /// Delivery gave up: non-retryable response, attempt budget exhausted,
    /// or pipeline shutdown.
    Abandoned,
}

impl EnvelopeState {
    /// Whether a transition from `self` to `next` is legal.
    pub fn can_transition_to(self, next: Self) -> bool {
        matches!(
            (self, next),
            (Self::Queued, Self::InFlight)
                | (Self::Queued, Self::Abandoned)
                | (Self::InFlight, Self::Delivered)
                | (Self::InFlight, Self::RetryScheduled)
                | (Self::InFlight, Self::Abandoned)
                | (Self::RetryScheduled, Self::InFlight)
                | (Self::RetryScheduled, Self::Abandoned)
        )
    }

    /// Whether this state ends the envelope's lifecycle.
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Delivered | Self::Abandoned)
    }
}

impl fmt::Display for EnvelopeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Queued => "queued",
            Self::InFlight => "in_flight",
            Self::RetryScheduled => "retry_scheduled",
            Self::Delivered => "delivered",
            Self::Abandoned => "abandoned",
        };
        f.write_str(s)
    }
}

/// One message moving through the delivery pipeline.
///
/// `topic`, `payload`, `received_at`, and `body` never change after
/// construction; only `state` and `attempt` advance, and only through the
/// mutators below.
#[derive(Debug, Clone)]
pub struct Envelope {
    /// Unique id for log correlation and outcome records.
    pub id: EnvelopeId,
    /// Source topic path, immutable.
    pub topic: String,
    /// Raw payload bytes as received, immutable.
    pub payload: Bytes,
    /// QoS of the originating publish.
    pub qos: Qos,
    /// When the inbound adapter accepted the message.
    pub received_at: DateTime<Utc>,
    /// Wire JSON document, derived once at construction.
    pub body: Bytes,
    /// Number of retryable failures so far. Starts at 0.
    pub attempt: u32,
    /// Current lifecycle state.
    pub state: EnvelopeState,
}

impl Envelope {
    /// Builds a new queued envelope, deriving the wire body immediately.
    pub fn new(topic: impl Into<String>, payload: Bytes, qos: Qos, received_at: DateTime<Utc>) -> Self {
        let topic = topic.into();
        let body = wire_body(&topic, received_at, &payload);

        Self {
            id: EnvelopeId::new(),
            topic,
            payload,
            qos,
            received_at,
            body,
            attempt: 0,
            state: EnvelopeState::Queued,
        }
    }

    /// Marks the envelope in flight at the start of a delivery attempt.
    pub fn begin_attempt(&mut self) {
        debug_assert!(self.state.can_transition_to(EnvelopeState::InFlight));
        self.state = EnvelopeState::InFlight;
    }

    /// Marks the envelope delivered after a 2xx sink response.
    pub fn mark_delivered(&mut self) {
        debug_assert!(self.state.can_transition_to(EnvelopeState::Delivered));
        self.state = EnvelopeState::Delivered;
    }

    /// Counts a retryable failure against the attempt budget.
    ///
    /// The retry engine then decides whether the envelope is scheduled for
    /// retry or abandoned at the new count.
    pub fn count_failure(&mut self) {
        debug_assert!(self.state == EnvelopeState::InFlight);
        self.attempt += 1;
    }

    /// Moves the envelope into its backoff wait after a counted failure.
    pub fn schedule_retry(&mut self) {
        debug_assert!(self.state.can_transition_to(EnvelopeState::RetryScheduled));
        self.state = EnvelopeState::RetryScheduled;
    }

    /// Abandons the envelope; it will never be retried again.
    pub fn abandon(&mut self) {
        debug_assert!(self.state.can_transition_to(EnvelopeState::Abandoned));
        self.state = EnvelopeState::Abandoned;
    }
}

/// Derives a JSON value from raw payload bytes.
///
/// A payload that parses to a JSON object is passed through unchanged.
/// Anything else (non-object JSON, invalid JSON, non-UTF-8 bytes) is
/// wrapped as `{"raw": <lossy UTF-8 string>}`. This is a pure function of
/// the payload and never fails.
pub fn payload_value(payload: &[u8]) -> Value {
    match serde_json::from_slice::<Value>(payload) {
        Ok(Value::Object(map)) => Value::Object(map),
        _ => json!({ "raw": String::from_utf8_lossy(payload) }),
    }
}

/// Builds the wire body posted to the sink.
///
/// The payload's JSON object (or its raw wrap) is augmented with `topic`
/// and `receivedAt` metadata fields. Metadata fields win on key conflict;
/// this is a fixed contract of the bridge. Serialization is deterministic,
/// so the same inputs always yield byte-identical output.
pub fn wire_body(topic: &str, received_at: DateTime<Utc>, payload: &[u8]) -> Bytes {
    let mut map = match payload_value(payload) {
        Value::Object(map) => map,
        _ => Map::new(),
    };

    map.insert("topic".to_string(), Value::String(topic.to_string()));
    map.insert(
        "receivedAt".to_string(),
        Value::String(received_at.to_rfc3339_opts(SecondsFormat::Millis, true)),
    );

    // Serialization of a Map cannot fail; fall back to the bare metadata
    // object if it somehow does.
    let doc = Value::Object(map);
    Bytes::from(serde_json::to_vec(&doc).unwrap_or_else(|_| b"{}".to_vec()))
}
