//! Pure retry schedule for the model request layer.
//!
//! The schedule is computed here and slept on by the session, so tests can
//! assert wait times without ever sleeping.

use std::time::Duration;

/// Bounds and wait schedule for retrying model requests.
///
/// Rate-limit waits grow linearly from `rate_limit_wait` by
/// `rate_limit_increment` per attempt, capped at `rate_limit_ceiling`.
/// Transient failures wait a fixed `transient_wait`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub rate_limit_wait: Duration,
    pub rate_limit_increment: Duration,
    pub rate_limit_ceiling: Duration,
    pub transient_wait: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            rate_limit_wait: Duration::from_secs(30),
            rate_limit_increment: Duration::from_secs(30),
            rate_limit_ceiling: Duration::from_secs(300),
            transient_wait: Duration::from_secs(5),
        }
    }
}

impl RetryPolicy {
    /// Wait before the retry that follows rate-limited attempt `attempt` (1-indexed).
    pub fn wait_after_rate_limit(&self, attempt: u32) -> Duration {
        let growth = self
            .rate_limit_increment
            .saturating_mul(attempt.saturating_sub(1));
        self.rate_limit_wait
            .saturating_add(growth)
            .min(self.rate_limit_ceiling)
    }

    /// Wait before the retry that follows a transient failure.
    pub fn wait_after_transient(&self) -> Duration {
        self.transient_wait
    }
}
