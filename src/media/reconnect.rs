//! Backoff policy for relay-initiated disconnects.

use std::time::Duration;

pub const DEFAULT_INITIAL_BACKOFF: Duration = Duration::from_millis(1000);
pub const DEFAULT_MAX_BACKOFF: Duration = Duration::from_millis(30_000);
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ReconnectPolicy {
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_backoff: DEFAULT_INITIAL_BACKOFF,
            max_backoff: DEFAULT_MAX_BACKOFF,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
        }
    }
}

impl ReconnectPolicy {
    /// Policy that never retries.
    pub fn disabled() -> Self {
        Self {
            max_attempts: 0,
            ..Self::default()
        }
    }

    /// Delay before the given attempt (1-based): 1s, 2s, 4s, ... capped.
    pub fn backoff_for(&self, attempt: u32) -> Duration {
        let exponent = attempt.saturating_sub(1).min(16);
        let delay = self.initial_backoff.saturating_mul(1u32 << exponent);
        delay.min(self.max_backoff)
    }
}
