use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::error::Retryable;

/// No single wait exceeds this, whatever the attempt number or backoff.
pub const MAX_DELAY: Duration = Duration::from_secs(60);

/// Bounded retry with exponential backoff. Rate limits wait much longer than other failures.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetryPolicy {
    /// Extra attempts after the first one.
    pub max_retries: u32,
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 2,
            backoff: Duration::from_millis(1000),
        }
    }
}

impl RetryPolicy {
    pub fn new(max_retries: u32, backoff: Duration) -> Self {
        Self {
            max_retries,
            backoff,
        }
    }

    /// Delay before retry number `attempt + 1`, capped at [`MAX_DELAY`].
    pub fn delay(&self, attempt: u32, rate_limited: bool) -> Duration {
        let factor = if rate_limited {
            attempt.saturating_add(1).saturating_mul(15)
        } else {
            2_u32.saturating_pow(attempt)
        };
        self.backoff
            .checked_mul(factor)
            .map_or(MAX_DELAY, |delay| delay.min(MAX_DELAY))
    }

    /// Runs `op` until it succeeds, fails permanently, or the retry budget is spent.
    /// Cancellation interrupts both the call and the backoff sleep.
    pub async fn run<T, E, F, Fut>(
        &self,
        label: &str,
        cancel: &CancellationToken,
        mut op: F,
    ) -> Result<T, E>
    where
        E: Retryable + std::fmt::Display,
        F: FnMut(u32) -> Fut,
        Fut: Future<Output = Result<T, E>>,
    {
        let mut attempt = 0;
        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => return Err(E::cancelled()),
                result = op(attempt) => result,
            };

            let err = match result {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };

            if !err.is_retryable() || attempt >= self.max_retries {
                return Err(err);
            }

            let delay = self.delay(attempt, err.is_rate_limit());
            warn!(
                "{} failed (attempt {}/{}): {}; retrying in {:?}",
                label,
                attempt + 1,
                self.max_retries + 1,
                err,
                delay
            );

            tokio::select! {
                _ = cancel.cancelled() => return Err(E::cancelled()),
                _ = tokio::time::sleep(delay) => {}
            }
            attempt += 1;
        }
    }
}
