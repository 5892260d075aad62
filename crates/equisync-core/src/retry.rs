//! Declarative retry policy shared by every fetch.

use std::future::Future;
use std::time::Duration;

use crate::provider::{SourceError, SourceErrorKind};

/// Backoff strategy between attempts.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Backoff {
    /// Uses a fixed delay between retries.
    Fixed {
        /// Delay between retries.
        delay: Duration,
    },
    /// Picks a delay uniformly from `min..=max` on every retry.
    Uniform { min: Duration, max: Duration },
    /// Uses an exponential delay between retries.
    ///
    /// The delay is calculated as `base * (factor ^ attempt)`.
    Exponential {
        /// The initial backoff duration.
        base: Duration,
        /// The multiplicative factor for each subsequent retry.
        factor: f64,
        /// The maximum duration to wait between retries.
        max: Duration,
        /// Whether to apply random jitter (+/- 50%) to the delay.
        jitter: bool,
    },
}

impl Backoff {
    pub const NONE: Self = Self::Fixed {
        delay: Duration::ZERO,
    };

    /// Delay before the retry that follows attempt `attempt` (0-based).
    pub fn delay(self, attempt: u32) -> Duration {
        match self {
            Self::Fixed { delay } => delay,
            Self::Uniform { min, max } => {
                let low = min.as_millis() as u64;
                let high = (max.as_millis() as u64).max(low);
                Duration::from_millis(fastrand::u64(low..=high))
            }
            Self::Exponential {
                base,
                factor,
                max,
                jitter,
            } => {
                let scale = factor.powi(attempt as i32);
                let seconds = base.as_secs_f64() * scale;
                let capped_seconds = seconds.min(max.as_secs_f64());

                let mut delay = Duration::from_secs_f64(capped_seconds);

                if jitter {
                    let jitter_ms = (delay.as_millis() as f64 * 0.5) as u64;
                    let random_offset = fastrand::u64(0..=(jitter_ms * 2));
                    let total_ms =
                        delay.as_millis() as i64 + (random_offset as i64 - jitter_ms as i64);
                    delay = Duration::from_millis(total_ms.max(0) as u64);
                }

                delay
            }
        }
    }
}

/// What to do after a failed attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    RetryAfter(Duration),
    GiveUp,
}

/// Attempt budget plus backoff, with a separate, longer backoff for
/// rate-limit responses so the provider's block window can lapse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Total attempts including the first; `2` means one retry.
    pub max_attempts: u32,
    pub backoff: Backoff,
    pub rate_limit_backoff: Backoff,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 2,
            backoff: Backoff::Uniform {
                min: Duration::from_secs(2),
                max: Duration::from_secs(4),
            },
            rate_limit_backoff: Backoff::Uniform {
                min: Duration::from_secs(30),
                max: Duration::from_secs(60),
            },
        }
    }
}

impl RetryPolicy {
    /// Retries without sleeping; used by tests and dry runs.
    pub const fn immediate(max_attempts: u32) -> Self {
        Self {
            max_attempts,
            backoff: Backoff::NONE,
            rate_limit_backoff: Backoff::NONE,
        }
    }

    pub const fn no_retry() -> Self {
        Self::immediate(1)
    }

    /// Every failure gets the same attempt budget. Rate limits wait out the
    /// long backoff; anything else, retryable or not, takes the plain one.
    pub fn classify(&self, error: &SourceError, attempt: u32) -> RetryDecision {
        if attempt.saturating_add(1) >= self.max_attempts {
            return RetryDecision::GiveUp;
        }

        let backoff = match error.kind() {
            SourceErrorKind::RateLimited => self.rate_limit_backoff,
            _ => self.backoff,
        };
        RetryDecision::RetryAfter(backoff.delay(attempt))
    }

    /// Run `operation` until it succeeds or the policy gives up. The closure
    /// receives the 0-based attempt number.
    pub async fn execute<T, F, Fut>(&self, mut operation: F) -> Result<T, SourceError>
    where
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, SourceError>>,
    {
        let mut attempt = 0;
        loop {
            let error = match operation(attempt).await {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            match self.classify(&error, attempt) {
                RetryDecision::RetryAfter(delay) => {
                    tracing::debug!(
                        attempt,
                        code = error.code(),
                        delay_ms = delay.as_millis() as u64,
                        "retrying after failure"
                    );
                    if !delay.is_zero() {
                        tokio::time::sleep(delay).await;
                    }
                    attempt += 1;
                }
                RetryDecision::GiveUp => return Err(error),
            }
        }
    }
}
