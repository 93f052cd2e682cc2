//! Retry policies for handler execution.
//!
//! A policy answers one question: after attempt `n` failed, how long until
//! the next attempt, or `None` when no further attempts are allowed. The
//! worker sleeps the returned delay (respecting cancellation) between
//! attempts.

use std::time::Duration;

/// Decides whether and when a failed attempt is retried.
///
/// `attempt` is the 1-based number of the attempt that just failed.
pub trait RetryPolicy: Send + Sync {
    /// Delay before the next attempt, or `None` to stop retrying.
    fn next_delay(&self, attempt: u32) -> Option<Duration>;

    /// Upper bound on the number of attempts, when the policy knows one.
    fn max_attempts(&self) -> Option<u32> {
        None
    }
}

/// Fixed number of attempts with a constant delay between them.
#[derive(Debug, Clone)]
pub struct LinearRetryPolicy {
    attempts: u32,
    delay: Duration,
}

impl LinearRetryPolicy {
    /// A policy that allows `attempts` total attempts, `delay` apart.
    pub fn new(attempts: u32, delay: Duration) -> Self {
        Self { attempts, delay }
    }
}

impl Default for LinearRetryPolicy {
    fn default() -> Self {
        Self::new(3, Duration::from_millis(500))
    }
}

impl RetryPolicy for LinearRetryPolicy {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        (attempt < self.attempts).then_some(self.delay)
    }

    fn max_attempts(&self) -> Option<u32> {
        Some(self.attempts)
    }
}

/// Exponential back-off: `base * 2^(attempt-1)`, capped.
#[derive(Debug, Clone)]
pub struct ExponentialRetryPolicy {
    attempts: u32,
    base_delay: Duration,
    max_delay: Duration,
}

impl ExponentialRetryPolicy {
    pub fn new(attempts: u32, base_delay: Duration) -> Self {
        Self {
            attempts,
            base_delay,
            max_delay: Duration::from_secs(3600),
        }
    }

    /// Cap individual delays at `max_delay`.
    pub fn with_max_delay(mut self, max_delay: Duration) -> Self {
        self.max_delay = max_delay;
        self
    }
}

impl RetryPolicy for ExponentialRetryPolicy {
    fn next_delay(&self, attempt: u32) -> Option<Duration> {
        if attempt >= self.attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
        Some(self.base_delay.saturating_mul(factor).min(self.max_delay))
    }

    fn max_attempts(&self) -> Option<u32> {
        Some(self.attempts)
    }
}

/// A single attempt, never retried.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoRetryPolicy;

impl RetryPolicy for NoRetryPolicy {
    fn next_delay(&self, _attempt: u32) -> Option<Duration> {
        None
    }

    fn max_attempts(&self) -> Option<u32> {
        Some(1)
    }
}
