//! Retry strategies for retriable operation failures.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// How a retriable operation failure is retried.
///
/// Strategies are pure: given the number of failures already recorded for a
/// request, they return the delay before the next attempt, or `None` once
/// retries are exhausted. An exhausted failure is frozen into the workflow's
/// history as a non-retriable error.
///
/// The strategy travels with each [`OperationRequest`](super::OperationRequest)
/// so a request keeps the policy it was created with.
///
/// # Backoff Calculation
///
/// For [`RetryStrategy::Exponential`] the delay after `n` prior failures is
/// `min(base_delay * 2^n, max_delay)`.
///
/// With defaults (base=1s, max=300s, 4 retries):
/// - 1st failure: retry after 1s
/// - 2nd failure: retry after 2s
/// - 3rd failure: retry after 4s
/// - 4th failure: retry after 8s
/// - 5th failure: exhausted
///
/// # Example
///
/// ```
/// use std::time::Duration;
/// use replayflow::RetryStrategy;
///
/// let fixed = RetryStrategy::fixed(Duration::ZERO, 2);
/// assert_eq!(fixed.next_delay(0), Some(Duration::ZERO));
/// assert_eq!(fixed.next_delay(1), Some(Duration::ZERO));
/// assert_eq!(fixed.next_delay(2), None);
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RetryStrategy {
    /// Every failure is final.
    Never,

    /// Constant delay between attempts.
    Fixed { delay: Duration, max_retries: u32 },

    /// Doubling delay, capped at `max_delay`.
    Exponential {
        base_delay: Duration,
        max_delay: Duration,
        max_retries: u32,
    },
}

impl Default for RetryStrategy {
    fn default() -> Self {
        RetryStrategy::Exponential {
            base_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(300),
            max_retries: 4,
        }
    }
}

impl RetryStrategy {
    /// Constant-delay strategy allowing `max_retries` retries.
    pub fn fixed(delay: Duration, max_retries: u32) -> Self {
        RetryStrategy::Fixed { delay, max_retries }
    }

    /// Exponential backoff strategy allowing `max_retries` retries.
    pub fn exponential(base_delay: Duration, max_delay: Duration, max_retries: u32) -> Self {
        RetryStrategy::Exponential {
            base_delay,
            max_delay,
            max_retries,
        }
    }

    /// Delay before the next attempt, or `None` when exhausted.
    ///
    /// # Arguments
    ///
    /// * `failed_attempts` - Failures recorded before the one being handled
    pub fn next_delay(&self, failed_attempts: u32) -> Option<Duration> {
        match *self {
            RetryStrategy::Never => None,
            RetryStrategy::Fixed { delay, max_retries } => {
                (failed_attempts < max_retries).then_some(delay)
            }
            RetryStrategy::Exponential {
                base_delay,
                max_delay,
                max_retries,
            } => {
                if failed_attempts >= max_retries {
                    return None;
                }
                let multiplier = 2u32.saturating_pow(failed_attempts);
                Some(base_delay.saturating_mul(multiplier).min(max_delay))
            }
        }
    }

    /// Returns `true` if another retry is allowed.
    pub fn should_retry(&self, failed_attempts: u32) -> bool {
        self.next_delay(failed_attempts).is_some()
    }
}
