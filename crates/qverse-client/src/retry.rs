//! Exponential backoff for request retries and reconnects
//!
//! Both schedules double from a base delay:
//! - request retry `k` (1-indexed) waits `base * 2^(k-1)`
//! - reconnect attempt `n` (1-indexed) waits `base * 2^(n-1)`, up to a cap

use std::future::Future;
use std::time::Duration;

use tracing::debug;

/// Bounded retry budget for a single logical request
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Additional attempts after the first
    pub retries: u32,
    /// Delay before the first retry
    pub base_delay: Duration,
}

impl RetryPolicy {
    pub fn new(retries: u32, base_delay: Duration) -> Self {
        Self { retries, base_delay }
    }

    /// No retries at all
    pub fn none() -> Self {
        Self { retries: 0, base_delay: Duration::ZERO }
    }

    /// Delay before retry `k` (1-indexed)
    pub fn delay_for_attempt(&self, k: u32) -> Duration {
        exponential(self.base_delay, k)
    }

    /// Total attempts including the first
    pub fn max_attempts(&self) -> u32 {
        self.retries.saturating_add(1)
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self { retries: 3, base_delay: Duration::from_millis(1000) }
    }
}

/// Run `op` until it succeeds, the error is not retryable, or the budget is spent.
///
/// `op` receives the 1-based attempt number. The last error is returned
/// unchanged so callers never see intermediate failures.
pub async fn retry_async<T, E, Op, Fut, ShouldRetry>(
    policy: &RetryPolicy,
    mut op: Op,
    mut should_retry: ShouldRetry,
) -> Result<T, E>
where
    Op: FnMut(u32) -> Fut,
    Fut: Future<Output = Result<T, E>>,
    ShouldRetry: FnMut(&E) -> bool,
    E: std::fmt::Display,
{
    let max_attempts = policy.max_attempts();
    let mut attempt = 1;

    loop {
        match op(attempt).await {
            Ok(value) => return Ok(value),
            Err(error) => {
                if attempt >= max_attempts || !should_retry(&error) {
                    return Err(error);
                }

                let delay = policy.delay_for_attempt(attempt);
                debug!(
                    "Attempt {}/{} failed: {}, retrying in {}ms",
                    attempt,
                    max_attempts,
                    error,
                    delay.as_millis()
                );
                if !delay.is_zero() {
                    tokio::time::sleep(delay).await;
                }
                attempt += 1;
            }
        }
    }
}

/// Reconnect schedule with a hard attempt cap
#[derive(Clone, Debug)]
pub struct ReconnectBackoff {
    base_delay: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(base_delay: Duration, max_attempts: u32) -> Self {
        Self { base_delay, max_attempts, attempts: 0 }
    }

    /// Count the next attempt and return its delay, or `None` once the cap is reached
    pub fn next_delay(&mut self) -> Option<Duration> {
        if self.attempts >= self.max_attempts {
            return None;
        }
        self.attempts += 1;
        Some(exponential(self.base_delay, self.attempts))
    }

    /// Called on a successful open
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }
}

fn exponential(base: Duration, k: u32) -> Duration {
    let shift = k.saturating_sub(1).min(31);
    base.saturating_mul(1u32 << shift)
}
