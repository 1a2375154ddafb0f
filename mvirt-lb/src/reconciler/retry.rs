//! Bounded exponential backoff around single provider calls.

use std::future::Future;
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::remote::RemoteError;

/// Retry policy for one provider operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Attempt ceiling, including the first attempt.
    pub max_attempts: u32,
    /// Delay after the first failed attempt; doubles per attempt.
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(8),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration, max_delay: Duration) -> Self {
        Self {
            max_attempts,
            base_delay,
            max_delay,
        }
    }

    /// Delay before the attempt following failed attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .saturating_mul(1u32 << exp)
            .min(self.max_delay)
    }

    /// `delay_for` with 50-100% jitter, so parallel operations spread their retries.
    pub fn jittered_delay_for(&self, attempt: u32) -> Duration {
        let full = u64::try_from(self.delay_for(attempt).as_micros()).unwrap_or(u64::MAX);
        Duration::from_micros(rand::thread_rng().gen_range(full / 2..=full))
    }
}

/// Result of a retried call and how many attempts it took.
#[derive(Debug)]
pub struct Attempted<T> {
    pub result: Result<T, RemoteError>,
    pub attempts: u32,
}

/// Run `call` until it succeeds, fails permanently, or the attempt ceiling is hit.
///
/// Only transient errors are retried. Cancellation ends the backoff early and
/// returns the last error.
pub async fn with_retry<T, F, Fut>(
    policy: &RetryPolicy,
    cancel: &CancellationToken,
    what: &str,
    mut call: F,
) -> Attempted<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, RemoteError>>,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;
    loop {
        attempt += 1;
        match call().await {
            Ok(value) => {
                return Attempted {
                    result: Ok(value),
                    attempts: attempt,
                }
            }
            Err(e) if e.is_transient() && attempt < max_attempts => {
                let delay = policy.jittered_delay_for(attempt);
                warn!(
                    attempt,
                    max_attempts,
                    error = %e,
                    "{} failed, retrying in {:?}",
                    what,
                    delay
                );
                tokio::select! {
                    _ = tokio::time::sleep(delay) => {}
                    _ = cancel.cancelled() => {
                        return Attempted {
                            result: Err(e),
                            attempts: attempt,
                        };
                    }
                }
            }
            Err(e) => {
                return Attempted {
                    result: Err(e),
                    attempts: attempt,
                }
            }
        }
    }
}
