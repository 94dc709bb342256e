//! Delivery pipeline with at-least-once guarantees.
//!
//! This crate implements the core of the bridge: envelopes arriving from
//! the subscription layer are buffered in a bounded queue, popped by a pool
//! of async workers, and posted to the HTTP sink with exponential backoff
//! and retry classification. Terminal outcomes (delivered or dead-lettered)
//! are reported through the outcome sink.
//!
//! # Architecture
//!
//! 1. **Enqueue** - the inbound adapter pushes envelopes through the
//!    [`engine::PipelineHandle`], subject to the overflow policy
//! 2. **Deliver** - a worker pops the envelope and POSTs its wire body
//! 3. **Classify** - 2xx succeeds; timeouts, network errors, 5xx and 429
//!    retry; other statuses dead-letter immediately
//! 4. **Retry** - backoff waits run as deferred continuations that re-queue
//!    the envelope, never blocking a worker
//!
//! # Key Features
//!
//! - **Bounded buffering** with `block` or `drop-oldest` overflow policies
//! - **Exponential backoff** with cap and jitter, Retry-After aware
//! - **Graceful shutdown** that reports every envelope before exit
//!
//! # Example
//!
//! ```no_run
//! use std::sync::Arc;
//! use ponte_core::PipelineMetrics;
//! use ponte_delivery::{DeliveryConfig, DeliveryEngine, LogOutcomeSink};
//!
//! # fn example() -> ponte_delivery::Result<()> {
//! let metrics = Arc::new(PipelineMetrics::new());
//! let mut engine =
//!     DeliveryEngine::new(DeliveryConfig::default(), Arc::new(LogOutcomeSink::new()), metrics)?;
//! engine.start();
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod client;
pub mod engine;
pub mod error;
pub mod outcome;
pub mod queue;
pub mod retry;
pub mod scheduler;
mod worker;
mod worker_pool;

pub use client::{SinkClient, SinkConfig, SinkResponse};
pub use engine::{DeliveryConfig, DeliveryEngine, PipelineHandle, ShutdownDisposition};
pub use error::{DeliveryError, Result};
pub use outcome::{
    AbandonReason, DeadLetterRecord, DeliveredRecord, DeliveryOutcome, LogOutcomeSink,
    MemoryOutcomeSink, OutcomeSink, PendingRecord,
};
pub use queue::{BoundedQueue, OverflowPolicy};
pub use retry::{GiveUpReason, RetryDecision, RetryPolicy};

/// Default number of concurrent delivery workers.
pub const DEFAULT_WORKER_COUNT: usize = 2;

/// Default capacity of the bounded queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 256;
