//! Attempt-scaled backoff for channel reconnection

use std::time::Duration;

use rand::Rng;

use crate::config::ChannelConfig;

/// Reconnection delay policy.
///
/// Attempt `n` (1-based) waits `base * n * 2`, plus up to `jitter` of random
/// slack when configured.
#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    base: Duration,
    jitter_ms: u64,
    max_attempts: u32,
}

impl ReconnectBackoff {
    pub fn new(base: Duration, max_attempts: u32) -> Self {
        Self {
            base,
            jitter_ms: 0,
            max_attempts,
        }
    }

    pub fn from_config(config: &ChannelConfig) -> Self {
        Self {
            base: config.base_reconnect_delay(),
            jitter_ms: config.reconnect_jitter_ms,
            max_attempts: config.max_reconnect_attempts,
        }
    }

    pub fn with_jitter(mut self, jitter_ms: u64) -> Self {
        self.jitter_ms = jitter_ms;
        self
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Whether another attempt may follow `attempts` completed ones
    pub fn allows(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }

    /// Delay to wait before attempt number `attempt`
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let scaled = self.base.saturating_mul(attempt.saturating_mul(2));
        if self.jitter_ms == 0 {
            return scaled;
        }
        let jitter = rand::rng().random_range(0..=self.jitter_ms);
        scaled.saturating_add(Duration::from_millis(jitter))
    }
}
