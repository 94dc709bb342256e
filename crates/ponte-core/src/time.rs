//! Clock abstraction for testable timing.
//!
//! Production code uses [`RealClock`]; tests inject [`TestClock`] so that
//! backoff waits and timestamps are deterministic.

use std::{
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{DateTime, Utc};

/// Time source for the pipeline.
pub trait Clock: Send + Sync + std::fmt::Debug {
    /// Current wall-clock time for envelope timestamps.
    fn now_utc(&self) -> DateTime<Utc>;

    /// Sleeps for the given duration.
    ///
    /// Maps to `tokio::time::sleep` in production; test clocks may advance
    /// virtual time instead.
    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>>;
}

/// System-time clock used in production.
#[derive(Debug, Clone, Copy, Default)]
pub struct RealClock;

impl RealClock {
    /// Creates a new real clock.
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn now_utc(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        Box::pin(tokio::time::sleep(duration))
    }
}

/// Controllable clock for deterministic tests.
///
/// Starts at a fixed epoch; `sleep` advances virtual time immediately and
/// yields, so backoff-heavy tests run without real waiting.
#[derive(Debug, Clone)]
pub struct TestClock {
    epoch_ns: Arc<AtomicU64>,
}

impl TestClock {
    /// Creates a test clock starting at 2024-01-01T00:00:00Z.
    pub fn new() -> Self {
        let start = DateTime::parse_from_rfc3339("2024-01-01T00:00:00Z")
            .expect("valid fixed epoch")
            .with_timezone(&Utc);
        Self::starting_at(start)
    }

    /// Creates a test clock starting at a specific instant.
    pub fn starting_at(start: DateTime<Utc>) -> Self {
        let ns = u64::try_from(start.timestamp_nanos_opt().unwrap_or(0)).unwrap_or(0);
        Self { epoch_ns: Arc::new(AtomicU64::new(ns)) }
    }

    /// Advances virtual time by the given duration.
    pub fn advance(&self, duration: Duration) {
        let ns = u64::try_from(duration.as_nanos().min(u128::from(u64::MAX))).unwrap_or(u64::MAX);
        self.epoch_ns.fetch_add(ns, Ordering::AcqRel);
    }
}

impl Default for TestClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for TestClock {
    fn now_utc(&self) -> DateTime<Utc> {
        let ns = self.epoch_ns.load(Ordering::Acquire);
        DateTime::from_timestamp_nanos(i64::try_from(ns).unwrap_or(i64::MAX))
    }

    fn sleep(&self, duration: Duration) -> Pin<Box<dyn Future<Output = ()> + Send + '_>> {
        self.advance(duration);
        Box::pin(tokio::task::yield_now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clock_advances_virtual_time() {
        let clock = TestClock::new();
        let start = clock.now_utc();

        clock.advance(Duration::from_secs(90));

        assert_eq!(clock.now_utc() - start, chrono::Duration::seconds(90));
    }

    #[tokio::test]
    async fn test_clock_sleep_returns_immediately() {
        let clock = TestClock::new();
        let start = clock.now_utc();

        clock.sleep(Duration::from_secs(3600)).await;

        assert_eq!(clock.now_utc() - start, chrono::Duration::seconds(3600));
    }

    #[test]
    fn clones_share_the_same_timeline() {
        let clock = TestClock::new();
        let other = clock.clone();

        clock.advance(Duration::from_secs(5));

        assert_eq!(clock.now_utc(), other.now_utc());
    }
}
