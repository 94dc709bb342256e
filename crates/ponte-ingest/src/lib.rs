//! MQTT subscription and inbound adaptation.
//!
//! Bridges the broker to the delivery pipeline: the subscriber maintains
//! the MQTT session and feeds every inbound publish to the inbound
//! adapter, which normalizes it into an envelope and enqueues it. No
//! business logic lives here; backpressure and retries are the delivery
//! crate's concern.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod adapter;
pub mod subscriber;

pub use adapter::InboundAdapter;
pub use subscriber::{MqttConfig, MqttSubscriber};

use thiserror::Error;

/// Errors raised by the ingest layer.
#[derive(Debug, Error)]
pub enum IngestError {
    /// The pipeline rejected the message; it is shutting down.
    #[error("pipeline rejected message: {0}")]
    Enqueue(#[from] ponte_delivery::DeliveryError),

    /// The MQTT client failed to issue a request to the broker.
    #[error("mqtt client error: {0}")]
    Mqtt(String),
}
