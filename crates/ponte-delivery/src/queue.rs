//! Bounded FIFO queue decoupling arrival rate from delivery rate.
//!
//! Fresh envelopes enter through `push`, which enforces the configured
//! overflow policy. Envelopes whose backoff expired re-enter through
//! `push_retry` into a capacity-exempt lane that workers drain with
//! priority; the overflow policy applies only to fresh arrivals.

use std::{
    collections::VecDeque,
    sync::{Arc, Mutex},
};

use ponte_core::{Envelope, PipelineMetrics};
use serde::{Deserialize, Serialize};
use tokio::sync::Notify;
use tracing::debug;

use crate::error::{DeliveryError, Result};

/// Rule applied when a fresh envelope arrives at a full queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum OverflowPolicy {
    /// Suspend the producer until a worker frees space. The subscription
    /// stream is backpressured; the broker retains undelivered messages.
    Block,
    /// Evict the oldest queued envelope to admit the new one, counting the
    /// drop.
    DropOldest,
}

impl Default for OverflowPolicy {
    fn default() -> Self {
        Self::Block
    }
}

#[derive(Debug)]
struct QueueInner {
    fresh: VecDeque<Envelope>,
    retries: VecDeque<Envelope>,
    closed: bool,
}

/// Fixed-capacity producer/consumer queue for the delivery pipeline.
#[derive(Debug)]
pub struct BoundedQueue {
    inner: Mutex<QueueInner>,
    capacity: usize,
    policy: OverflowPolicy,
    metrics: Arc<PipelineMetrics>,
    /// Signalled when an item becomes available or the queue closes.
    items: Notify,
    /// Signalled when capacity frees up or the queue closes.
    space: Notify,
}

impl BoundedQueue {
    /// Creates a queue with the given capacity and overflow policy.
    pub fn new(capacity: usize, policy: OverflowPolicy, metrics: Arc<PipelineMetrics>) -> Self {
        Self {
            inner: Mutex::new(QueueInner {
                fresh: VecDeque::with_capacity(capacity),
                retries: VecDeque::new(),
                closed: false,
            }),
            capacity,
            policy,
            metrics,
            items: Notify::new(),
            space: Notify::new(),
        }
    }

    /// Pushes a fresh envelope, applying the overflow policy when full.
    ///
    /// Under [`OverflowPolicy::Block`] this suspends until a worker frees
    /// space or the queue closes.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::QueueClosed`] once the pipeline is shutting
    /// down.
    pub async fn push(&self, envelope: Envelope) -> Result<()> {
        let mut envelope = Some(envelope);

        loop {
            let notified = self.space.notified();

            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if inner.closed {
                    return Err(DeliveryError::QueueClosed);
                }

                if inner.fresh.len() < self.capacity {
                    inner.fresh.push_back(envelope.take().expect("envelope consumed once"));
                    drop(inner);
                    self.items.notify_one();
                    return Ok(());
                }

                if self.policy == OverflowPolicy::DropOldest {
                    let evicted = inner.fresh.pop_front();
                    inner.fresh.push_back(envelope.take().expect("envelope consumed once"));
                    drop(inner);

                    if let Some(evicted) = evicted {
                        self.metrics.record_drop();
                        debug!(
                            envelope_id = %evicted.id,
                            topic = %evicted.topic,
                            "queue full, evicted oldest envelope"
                        );
                    }
                    self.items.notify_one();
                    return Ok(());
                }
            }

            notified.await;
        }
    }

    /// Re-inserts an envelope whose backoff expired.
    ///
    /// The retry lane is exempt from capacity and popped before fresh
    /// arrivals, so a scheduled retry is never dropped by the overflow
    /// policy.
    ///
    /// # Errors
    ///
    /// Returns [`DeliveryError::QueueClosed`] once the pipeline is shutting
    /// down.
    pub fn push_retry(&self, envelope: Envelope) -> Result<()> {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            if inner.closed {
                return Err(DeliveryError::QueueClosed);
            }
            inner.retries.push_back(envelope);
        }
        self.items.notify_one();
        Ok(())
    }

    /// Removes the next envelope, retry lane first.
    ///
    /// Suspends while both lanes are empty. Returns `None` once the queue
    /// is closed and fully drained.
    pub async fn pop(&self) -> Option<Envelope> {
        loop {
            let notified = self.items.notified();

            {
                let mut inner = self.inner.lock().expect("queue lock poisoned");
                if let Some(envelope) =
                    inner.retries.pop_front().or_else(|| inner.fresh.pop_front())
                {
                    drop(inner);
                    self.space.notify_one();
                    return Some(envelope);
                }

                if inner.closed {
                    return None;
                }
            }

            notified.await;
        }
    }

    /// Closes the queue: further pushes fail fast, waiting producers and
    /// consumers wake, and `pop` drains what remains.
    pub fn close(&self) {
        {
            let mut inner = self.inner.lock().expect("queue lock poisoned");
            inner.closed = true;
        }
        self.items.notify_waiters();
        self.space.notify_waiters();
    }

    /// Empties both lanes, returning the leftover envelopes.
    ///
    /// Used at shutdown so every unprocessed envelope can be reported.
    pub fn drain(&self) -> Vec<Envelope> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let mut drained: Vec<Envelope> = inner.retries.drain(..).collect();
        drained.extend(inner.fresh.drain(..));
        drained
    }

    /// Total envelopes currently held in both lanes.
    pub fn len(&self) -> usize {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.fresh.len() + inner.retries.len()
    }

    /// Whether both lanes are empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use bytes::Bytes;
    use chrono::Utc;
    use ponte_core::Qos;

    use super::*;

    fn envelope(tag: &str) -> Envelope {
        Envelope::new(format!("test/{tag}"), Bytes::from(tag.to_string()), Qos::AtMostOnce, Utc::now())
    }

    fn queue(capacity: usize, policy: OverflowPolicy) -> BoundedQueue {
        BoundedQueue::new(capacity, policy, Arc::new(PipelineMetrics::new()))
    }

    #[tokio::test]
    async fn pops_in_fifo_order() {
        let queue = queue(8, OverflowPolicy::Block);

        for tag in ["a", "b", "c"] {
            queue.push(envelope(tag)).await.unwrap();
        }

        assert_eq!(queue.pop().await.unwrap().topic, "test/a");
        assert_eq!(queue.pop().await.unwrap().topic, "test/b");
        assert_eq!(queue.pop().await.unwrap().topic, "test/c");
    }

    #[tokio::test]
    async fn drop_oldest_keeps_most_recent_envelopes() {
        let queue = queue(3, OverflowPolicy::DropOldest);

        for tag in ["a", "b", "c", "d", "e"] {
            queue.push(envelope(tag)).await.unwrap();
        }

        assert_eq!(queue.len(), 3);
        assert_eq!(queue.pop().await.unwrap().topic, "test/c");
        assert_eq!(queue.pop().await.unwrap().topic, "test/d");
        assert_eq!(queue.pop().await.unwrap().topic, "test/e");
    }

    #[tokio::test]
    async fn drop_oldest_counts_evictions() {
        let metrics = Arc::new(PipelineMetrics::new());
        let queue = BoundedQueue::new(1, OverflowPolicy::DropOldest, metrics.clone());

        queue.push(envelope("a")).await.unwrap();
        queue.push(envelope("b")).await.unwrap();

        assert_eq!(metrics.snapshot().dropped, 1);
        assert_eq!(queue.pop().await.unwrap().topic, "test/b");
    }

    #[tokio::test]
    async fn blocked_push_completes_only_after_pop() {
        let queue = Arc::new(queue(1, OverflowPolicy::Block));
        queue.push(envelope("first")).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(envelope("second")).await })
        };

        // The producer must still be parked while the queue is full.
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.pop().await.unwrap().topic, "test/first");
        producer.await.unwrap().unwrap();
        assert_eq!(queue.pop().await.unwrap().topic, "test/second");
    }

    #[tokio::test]
    async fn retry_lane_is_popped_before_fresh_envelopes() {
        let queue = queue(8, OverflowPolicy::Block);

        queue.push(envelope("fresh")).await.unwrap();
        queue.push_retry(envelope("retry")).unwrap();

        assert_eq!(queue.pop().await.unwrap().topic, "test/retry");
        assert_eq!(queue.pop().await.unwrap().topic, "test/fresh");
    }

    #[tokio::test]
    async fn retry_lane_ignores_capacity() {
        let queue = queue(1, OverflowPolicy::Block);

        queue.push(envelope("fresh")).await.unwrap();
        queue.push_retry(envelope("r1")).unwrap();
        queue.push_retry(envelope("r2")).unwrap();

        assert_eq!(queue.len(), 3);
    }

    #[tokio::test]
    async fn push_fails_after_close() {
        let queue = queue(4, OverflowPolicy::Block);
        queue.close();

        assert!(matches!(queue.push(envelope("a")).await, Err(DeliveryError::QueueClosed)));
        assert!(matches!(queue.push_retry(envelope("b")), Err(DeliveryError::QueueClosed)));
    }

    #[tokio::test]
    async fn close_wakes_waiting_consumer_with_none() {
        let queue = Arc::new(queue(4, OverflowPolicy::Block));

        let consumer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.pop().await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        assert!(consumer.await.unwrap().is_none());
    }

    #[tokio::test]
    async fn close_wakes_blocked_producer_with_error() {
        let queue = Arc::new(queue(1, OverflowPolicy::Block));
        queue.push(envelope("full")).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.push(envelope("blocked")).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.close();

        assert!(matches!(producer.await.unwrap(), Err(DeliveryError::QueueClosed)));
    }

    #[tokio::test]
    async fn pop_drains_remaining_items_after_close() {
        let queue = queue(4, OverflowPolicy::Block);
        queue.push(envelope("a")).await.unwrap();
        queue.close();

        assert_eq!(queue.pop().await.unwrap().topic, "test/a");
        assert!(queue.pop().await.is_none());
    }

    #[tokio::test]
    async fn drain_returns_leftovers_from_both_lanes() {
        let queue = queue(4, OverflowPolicy::Block);
        queue.push(envelope("fresh")).await.unwrap();
        queue.push_retry(envelope("retry")).unwrap();

        let leftovers = queue.drain();
        assert_eq!(leftovers.len(), 2);
        assert!(queue.is_empty());
    }
}
