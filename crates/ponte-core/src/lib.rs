//! Core domain types for the ponte delivery bridge.
//!
//! Provides the envelope model and its state machine, the JSON wire-body
//! derivation, pipeline metrics, and the clock abstraction. The ingest and
//! delivery crates both depend on these foundational types.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod envelope;
pub mod metrics;
pub mod time;

pub use envelope::{payload_value, wire_body, Envelope, EnvelopeId, EnvelopeState, Qos};
pub use metrics::{MetricsSnapshot, PipelineMetrics};
pub use time::{Clock, RealClock, TestClock};
