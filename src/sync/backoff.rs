use std::time::Duration;

use crate::config::ChannelConfig;

/// Reconnect schedule for the event channel: exponential delays up to a
/// ceiling, and a hard cap on attempts.
#[derive(Clone, Debug, PartialEq)]
pub struct ReconnectPolicy {
    pub initial_delay: Duration,
    pub max_delay: Duration,
    pub max_attempts: u32,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            max_attempts: 5,
        }
    }
}

impl From<&ChannelConfig> for ReconnectPolicy {
    fn from(config: &ChannelConfig) -> Self {
        Self {
            initial_delay: Duration::from_millis(config.initial_backoff_ms),
            max_delay: Duration::from_millis(config.max_backoff_ms),
            max_attempts: config.max_attempts,
        }
    }
}

impl ReconnectPolicy {
    /// Delay before reconnect `attempt` (1-based), or `None` once attempts
    /// are exhausted.
    pub fn delay_for(&self, attempt: u32) -> Option<Duration> {
        if attempt == 0 || attempt > self.max_attempts {
            return None;
        }
        let factor = 2u32.saturating_pow(attempt - 1);
        Some(self.initial_delay.saturating_mul(factor).min(self.max_delay))
    }
}
