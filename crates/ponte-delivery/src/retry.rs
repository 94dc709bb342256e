//! Exponential backoff retry policy with jitter.
//!
//! Decides, for each failed delivery attempt, whether the envelope is
//! retried and how long to wait first. Delays grow geometrically from a
//! base delay, are capped, and optionally jittered to avoid thundering-herd
//! resubmission when many envelopes fail together.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy applied to every envelope in the pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of retryable failures before an envelope is abandoned.
    pub max_attempts: u32,

    /// Delay before the first retry.
    pub base_delay: Duration,

    /// Geometric growth factor applied per retry.
    pub multiplier: f64,

    /// Upper bound on the computed delay.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) applied to the capped delay.
    /// 0.0 disables jitter.
    pub jitter_factor: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_secs(1),
            multiplier: 2.0,
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.1,
        }
    }
}

/// Outcome of a retry decision for one failed attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Retry after the given delay.
    Retry {
        /// How long to wait before re-attempting.
        delay: Duration,
    },
    /// Do not retry; the envelope is abandoned.
    GiveUp {
        /// Why the envelope will not be retried.
        reason: GiveUpReason,
    },
}

/// Why the retry engine refused another attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GiveUpReason {
    /// The error is not transient; retrying cannot succeed.
    NonRetryable,
    /// The attempt budget is exhausted.
    AttemptsExhausted,
}

impl RetryPolicy {
    /// Decides whether to retry after a failed attempt.
    ///
    /// `attempt` is the envelope's failure count including the failure
    /// being decided (so the first retry is decided with `attempt == 1`).
    /// A sink-provided Retry-After overrides the computed backoff.
    pub fn decide(&self, attempt: u32, error: &DeliveryError) -> RetryDecision {
        if !error.is_retryable() {
            return RetryDecision::GiveUp { reason: GiveUpReason::NonRetryable };
        }

        if attempt >= self.max_attempts {
            return RetryDecision::GiveUp { reason: GiveUpReason::AttemptsExhausted };
        }

        let delay = match error.retry_after_seconds() {
            Some(seconds) => Duration::from_secs(seconds),
            None => self.delay_for(attempt),
        };

        RetryDecision::Retry { delay }
    }

    /// Computes the backoff delay for retry number `attempt` (1-based).
    ///
    /// `base * multiplier^(attempt-1)`, capped at `max_delay`, then
    /// jittered. Without jitter the sequence is monotonically
    /// non-decreasing up to the cap.
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(32);
        let factor = self.multiplier.max(1.0).powi(exponent as i32);
        let scaled = self.base_delay.as_secs_f64() * factor;

        let capped = if scaled.is_finite() {
            Duration::from_secs_f64(scaled.min(self.max_delay.as_secs_f64()))
        } else {
            self.max_delay
        };

        std::cmp::min(apply_jitter(capped, self.jitter_factor), self.max_delay)
    }
}

/// Randomizes a delay by ±`jitter_factor` percent.
///
/// With `jitter_factor = 0.25` a 10s delay lands anywhere in 7.5s..=12.5s.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 {
        return duration;
    }

    let clamped = jitter_factor.clamp(0.0, 1.0);
    let mut rng = rand::rng();
    let range = duration.as_secs_f64() * clamped;
    let offset = rng.random_range(-range..=range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}
