//! Bounded exponential backoff for store connection attempts.

use std::time::Duration;

/// Backoff schedule: `base * 2^attempt`, capped, for a fixed number of
/// attempts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total connection attempts before giving up.
    pub attempts: u32,
    /// Delay after the first failed attempt.
    pub base: Duration,
    /// Upper bound for any single delay.
    pub cap: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            attempts: 5,
            base: Duration::from_millis(100),
            cap: Duration::from_secs(1),
        }
    }
}

impl RetryPolicy {
    /// Delay to sleep after failed `attempt` (0-based).
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 2u32.saturating_pow(attempt.min(16));
        self.base.saturating_mul(factor).min(self.cap)
    }
}
