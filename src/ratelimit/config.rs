//! Rate limiting configuration

use std::time::Duration;

use serde::Deserialize;

/// Admission budget of one sliding-window limiter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct WindowConfig {
    /// Requests admitted per key within one window
    pub max_requests: u32,
    /// Window length in milliseconds
    pub window_ms: u64,
}

impl WindowConfig {
    pub fn new(max_requests: u32, window_ms: u64) -> Self {
        Self {
            max_requests,
            window_ms,
        }
    }

    pub fn window(&self) -> Duration {
        Duration::from_millis(self.window_ms)
    }
}
