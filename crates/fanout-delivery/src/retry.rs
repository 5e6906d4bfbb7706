//! Retry decisions for failed delivery attempts.
//!
//! Applies one attempt budget to every retryable failure. Rate-limited
//! attempts wait for the server-supplied retry-after plus a small padding;
//! everything else uses exponential backoff with optional jitter.

use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::DeliveryError;

/// Retry policy applied to each payload on each endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum number of attempts per payload, including the first.
    pub max_attempts: u32,

    /// Base delay for backoff calculation.
    pub base_delay: Duration,

    /// Maximum delay of a single backoff sleep.
    pub max_delay: Duration,

    /// Jitter percentage (0.0 to 1.0) applied to backoff sleeps.
    pub jitter_factor: f64,

    /// Strategy for calculating backoff delays.
    pub backoff_strategy: BackoffStrategy,

    /// Extra wait added on top of every server-supplied retry-after.
    pub retry_after_padding: Duration,

    /// Optional ceiling on server-supplied retry-after values.
    ///
    /// `None` honours any value. A retry-after above the ceiling fails the
    /// payload instead of waiting inside its attempt loop.
    #[serde(default)]
    pub max_retry_after: Option<Duration>,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: crate::DEFAULT_MAX_ATTEMPTS,
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(60),
            jitter_factor: 0.0,
            backoff_strategy: BackoffStrategy::Exponential,
            retry_after_padding: Duration::from_millis(100),
            max_retry_after: None,
        }
    }
}

/// Strategy for calculating retry delays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackoffStrategy {
    /// Same delay before every retry.
    Fixed,
    /// Delay doubles each attempt: `base * 2^(attempt - 1)`.
    Exponential,
    /// Delay grows by `base` each attempt: `base * attempt`.
    Linear,
}

/// Retry decision context for a failed attempt.
#[derive(Debug, Clone)]
pub struct RetryContext<'a> {
    /// Attempt number that just failed (1-based).
    pub attempt_number: u32,
    /// Error that caused the failure.
    pub error: &'a DeliveryError,
    /// Retry policy to apply.
    pub policy: &'a RetryPolicy,
}

/// Result of a retry decision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RetryDecision {
    /// Sleep for `delay`, then attempt the same payload again.
    Retry {
        /// How long to wait before the next attempt
        delay: Duration,
        /// Whether the delay is a server-mandated retry-after
        mandated: bool,
    },
    /// Stop retrying; the payload failed on this endpoint.
    GiveUp {
        /// Reason why the payload should not be retried
        reason: String,
    },
}

impl<'a> RetryContext<'a> {
    /// Creates a new retry context for a failed attempt.
    pub fn new(attempt_number: u32, error: &'a DeliveryError, policy: &'a RetryPolicy) -> Self {
        Self { attempt_number, error, policy }
    }

    /// Determines if and when to retry.
    ///
    /// Gives up once the attempt budget is spent, for non-retryable errors,
    /// and for retry-after values above `max_retry_after` when it is set.
    pub fn decide_retry(&self) -> RetryDecision {
        if self.attempt_number >= self.policy.max_attempts {
            return RetryDecision::GiveUp {
                reason: format!(
                    "delivery failed after {} attempts: {}",
                    self.attempt_number, self.error
                ),
            };
        }

        if !self.error.is_retryable() {
            return RetryDecision::GiveUp {
                reason: format!("non-retryable error: {}", self.error),
            };
        }

        if let Some(retry_after) = self.error.retry_after() {
            if let Some(limit) = self.policy.max_retry_after.filter(|limit| retry_after > *limit) {
                return RetryDecision::GiveUp {
                    reason: format!(
                        "retry-after of {:.3}s exceeds limit of {:.3}s",
                        retry_after.as_secs_f64(),
                        limit.as_secs_f64()
                    ),
                };
            }

            return RetryDecision::Retry {
                delay: retry_after.saturating_add(self.policy.retry_after_padding),
                mandated: true,
            };
        }

        RetryDecision::Retry { delay: self.backoff_delay(), mandated: false }
    }

    /// Calculates the backoff delay before the next attempt.
    fn backoff_delay(&self) -> Duration {
        let base = self.policy.base_delay;
        let delay = match self.policy.backoff_strategy {
            BackoffStrategy::Fixed => base,
            BackoffStrategy::Linear => base.saturating_mul(self.attempt_number.max(1)),
            BackoffStrategy::Exponential => {
                let exponent = self.attempt_number.saturating_sub(1).min(20);
                base.saturating_mul(2_u32.saturating_pow(exponent))
            },
        };

        let capped = delay.min(self.policy.max_delay);
        apply_jitter(capped, self.policy.jitter_factor).min(self.policy.max_delay)
    }
}

/// Randomizes a duration by ±`jitter_factor`.
///
/// With `jitter_factor = 0.25` a 10s delay becomes anything from 7.5s to
/// 12.5s.
fn apply_jitter(duration: Duration, jitter_factor: f64) -> Duration {
    if jitter_factor <= 0.0 || duration.is_zero() {
        return duration;
    }

    let clamped = jitter_factor.clamp(0.0, 1.0);
    let range = duration.as_secs_f64() * clamped;
    let offset = rand::rng().random_range(-range..=range);

    Duration::from_secs_f64((duration.as_secs_f64() + offset).max(0.0))
}

/// Picks a uniformly random duration in `[min, max]`.
pub(crate) fn random_between(min: Duration, max: Duration) -> Duration {
    if max <= min {
        return min;
    }
    let nanos = rand::rng().random_range(0..=(max - min).as_nanos());
    min + Duration::from_nanos(u64::try_from(nanos).unwrap_or(u64::MAX))
}
