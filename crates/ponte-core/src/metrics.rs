//! Pipeline counters shared across components.
//!
//! An explicitly owned metrics structure passed by `Arc` to the adapter,
//! queue, and workers. Counters are updated atomically and reset only by
//! process restart.

use std::sync::atomic::{AtomicU64, Ordering};

/// Aggregate counters for the delivery pipeline.
#[derive(Debug, Default)]
pub struct PipelineMetrics {
    arrivals: AtomicU64,
    dropped: AtomicU64,
    delivered: AtomicU64,
    abandoned: AtomicU64,
    retries_scheduled: AtomicU64,
    in_flight: AtomicU64,
}

impl PipelineMetrics {
    /// Creates a zeroed metrics structure.
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a message accepted by the inbound adapter.
    pub fn record_arrival(&self) {
        self.arrivals.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an envelope evicted by the drop-oldest overflow policy.
    pub fn record_drop(&self) {
        self.dropped.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a successful delivery.
    pub fn record_delivery(&self) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
    }

    /// Records an abandoned envelope.
    pub fn record_abandon(&self) {
        self.abandoned.fetch_add(1, Ordering::Relaxed);
    }

    /// Records a retry handed to the backoff scheduler.
    pub fn record_retry_scheduled(&self) {
        self.retries_scheduled.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks a delivery attempt as outstanding.
    pub fn attempt_started(&self) {
        self.in_flight.fetch_add(1, Ordering::Relaxed);
    }

    /// Marks a delivery attempt as finished.
    pub fn attempt_finished(&self) {
        self.in_flight.fetch_sub(1, Ordering::Relaxed);
    }

    /// Returns a point-in-time copy of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            arrivals: self.arrivals.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            delivered: self.delivered.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
            retries_scheduled: self.retries_scheduled.load(Ordering::Relaxed),
            in_flight: self.in_flight.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time view of the pipeline counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
pub struct MetricsSnapshot {
    /// Messages accepted by the inbound adapter.
    pub arrivals: u64,
    /// Envelopes evicted under the drop-oldest policy.
    pub dropped: u64,
    /// Envelopes delivered to the sink.
    pub delivered: u64,
    /// Envelopes abandoned.
    pub abandoned: u64,
    /// Retries handed to the backoff scheduler.
    pub retries_scheduled: u64,
    /// Delivery attempts currently outstanding.
    pub in_flight: u64,
}
