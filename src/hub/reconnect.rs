//! Reconnect schedule
//!
//! Delays double from the base on every failed attempt and are not capped;
//! the attempt budget is what bounds them. Successful authentication resets
//! the counter.

use std::time::Duration;

use backoff::backoff::Backoff;

/// Exact `base * 2^attempts` schedule with an attempt budget
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    max_attempts: u32,
    attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            max_attempts,
            attempts: 0,
        }
    }

    /// Attempts scheduled since the last reset
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.max_attempts
    }

    /// Delay before attempt number `attempt` (zero based)
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base.saturating_mul(factor)
    }
}

impl Backoff for ReconnectBackoff {
    fn reset(&mut self) {
        self.attempts = 0;
    }

    fn next_backoff(&mut self) -> Option<Duration> {
        if self.is_exhausted() {
            return None;
        }
        let delay = self.delay_for(self.attempts);
        self.attempts += 1;
        Some(delay)
    }
}
