//! Inbound adapter: message event to envelope.
//!
//! Pure translation and enqueue. The adapter stamps the arrival time,
//! derives the wire body (malformed payloads degrade to a raw wrap and
//! never fail), and pushes into the pipeline. Under the `block` overflow
//! policy the push suspends the caller, backpressuring the subscription
//! stream.

use std::sync::Arc;

use bytes::Bytes;
use ponte_core::{Clock, Envelope, PipelineMetrics, Qos};
use ponte_delivery::PipelineHandle;
use tracing::debug;

use crate::IngestError;

/// Translates subscription events into queued envelopes.
#[derive(Debug, Clone)]
pub struct InboundAdapter {
    handle: PipelineHandle,
    metrics: Arc<PipelineMetrics>,
    clock: Arc<dyn Clock>,
}

impl InboundAdapter {
    /// Creates an adapter feeding the given pipeline.
    pub fn new(
        handle: PipelineHandle,
        metrics: Arc<PipelineMetrics>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self { handle, metrics, clock }
    }

    /// Accepts one inbound message and enqueues its envelope.
    ///
    /// Suspends while the queue is full under the `block` policy.
    ///
    /// # Errors
    ///
    /// Returns [`IngestError::Enqueue`] once the pipeline is shutting down;
    /// payload content never causes an error.
    pub async fn on_message(&self, topic: &str, payload: Bytes, qos: Qos) -> Result<(), IngestError> {
        let envelope = Envelope::new(topic, payload, qos, self.clock.now_utc());
        self.metrics.record_arrival();

        debug!(
            envelope_id = %envelope.id,
            topic = %envelope.topic,
            payload_bytes = envelope.payload.len(),
            "message accepted"
        );

        self.handle.enqueue(envelope).await?;
        Ok(())
    }
}
