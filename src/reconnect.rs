//! Reconnect backoff

use std::time::Duration;

/// Exponential reconnect delay
///
/// Each consecutive failed attempt doubles the delay, starting at one
/// second and capped at the configured maximum. An attempt that got as far
/// as connecting resets the count, so the next delay is one second again.
#[derive(Debug, Clone)]
pub struct Backoff {
    failures: u32,
    max_delay: u64,
}

impl Backoff {
    pub fn new(max_delay: u64) -> Self {
        Self {
            failures: 0,
            max_delay: max_delay.max(1),
        }
    }

    /// Delay before the next attempt, given how the last one went
    pub fn next_delay(&mut self, connected: bool) -> Duration {
        if connected {
            self.failures = 0;
        }
        let secs = 2u64
            .checked_pow(self.failures)
            .unwrap_or(u64::MAX)
            .min(self.max_delay);
        if !connected {
            self.failures = self.failures.saturating_add(1);
        }
        Duration::from_secs(secs)
    }

    pub fn failures(&self) -> u32 {
        self.failures
    }
}
