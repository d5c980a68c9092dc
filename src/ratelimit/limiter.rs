//! Sliding-window rate limiter implementation

use std::collections::VecDeque;
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde::Serialize;
use tokio::time::Instant;

use crate::clock::{system_clock, Clock};
use crate::config::RateLimitSettings;
use crate::metrics::RateLimitMetrics;

use super::config::WindowConfig;

/// Result of a rate limit check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RateLimitResult {
    /// Request is admitted
    Allowed { remaining: u32, limit: u32 },
    /// Request is denied; the oldest admission leaves the window after `retry_after`
    Denied { retry_after: Duration, limit: u32 },
}

impl RateLimitResult {
    pub fn is_allowed(&self) -> bool {
        matches!(self, RateLimitResult::Allowed { .. })
    }
}

/// Drop admissions that are no longer inside the window ending at `now`
fn prune(admitted: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    while let Some(oldest) = admitted.front() {
        if now.saturating_duration_since(*oldest) >= window {
            admitted.pop_front();
        } else {
            break;
        }
    }
}

/// Strict sliding-window limiter.
///
/// Admission at instant `t` depends only on the admissions in `(t - window, t]`.
/// Keys are independent and a denied request leaves no trace.
pub struct SlidingWindowLimiter {
    /// Label used for metrics and logs
    name: String,
    config: WindowConfig,
    /// key -> admission instants, oldest first
    windows: DashMap<String, VecDeque<Instant>>,
    clock: Arc<dyn Clock>,
}

impl SlidingWindowLimiter {
    pub fn new(name: impl Into<String>, config: WindowConfig) -> Self {
        Self::with_clock(name, config, system_clock())
    }

    pub fn with_clock(name: impl Into<String>, config: WindowConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config,
            windows: DashMap::new(),
            clock,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &WindowConfig {
        &self.config
    }

    /// Admit one request for `key` if the window has room
    pub fn allow_request(&self, key: &str) -> bool {
        self.check(key).is_allowed()
    }

    /// Same admission rule as [`allow_request`](Self::allow_request), with details
    pub fn check(&self, key: &str) -> RateLimitResult {
        let now = self.clock.now();
        let window = self.config.window();
        let limit = self.config.max_requests;

        let mut entry = self.windows.entry(key.to_string()).or_default();
        let admitted = entry.value_mut();
        prune(admitted, now, window);

        if admitted.len() < limit as usize {
            admitted.push_back(now);
            let remaining = limit.saturating_sub(admitted.len() as u32);
            drop(entry);
            RateLimitMetrics::record_allowed(&self.name);
            return RateLimitResult::Allowed { remaining, limit };
        }

        let retry_after = admitted.front().map_or(window, |oldest| {
            window.saturating_sub(now.saturating_duration_since(*oldest))
        });
        drop(entry);

        RateLimitMetrics::record_denied(&self.name);
        tracing::debug!(
            limiter = %self.name,
            key = %key,
            limit = limit,
            retry_after_ms = retry_after.as_millis() as u64,
            "Rate limit exceeded"
        );
        RateLimitResult::Denied { retry_after, limit }
    }

    /// Requests `key` could still make in the current window, without consuming one
    pub fn remaining_requests(&self, key: &str) -> u32 {
        let limit = self.config.max_requests;
        let Some(mut entry) = self.windows.get_mut(key) else {
            return limit;
        };
        prune(entry.value_mut(), self.clock.now(), self.config.window());
        limit.saturating_sub(entry.len() as u32)
    }

    /// Forget every key
    pub fn clear(&self) {
        self.windows.clear();
    }

    /// Remove keys with no admission left inside the window
    pub fn cleanup_stale(&self) -> usize {
        let now = self.clock.now();
        let window = self.config.window();
        let before = self.windows.len();

        self.windows.retain(|_, admitted| {
            prune(admitted, now, window);
            !admitted.is_empty()
        });

        let removed = before.saturating_sub(self.windows.len());
        if removed > 0 {
            tracing::debug!(
                limiter = %self.name,
                removed = removed,
                keys = self.windows.len(),
                "Cleaned up stale rate limit windows"
            );
        }
        removed
    }

    /// Get statistics about the limiter
    pub fn stats(&self) -> RateLimiterStats {
        RateLimiterStats {
            name: self.name.clone(),
            keys: self.windows.len(),
            tracked_requests: self.windows.iter().map(|entry| entry.len()).sum(),
            max_requests: self.config.max_requests,
            window_ms: self.config.window_ms,
        }
    }
}

/// Statistics about a limiter
#[derive(Debug, Clone, Serialize)]
pub struct RateLimiterStats {
    pub name: String,
    pub keys: usize,
    pub tracked_requests: usize,
    pub max_requests: u32,
    pub window_ms: u64,
}

/// The two limiters callers use: one for generic calls, one for sensitive operations.
///
/// They are separate instances, so a key admitted by one never consumes the
/// budget of the other.
pub struct RateLimiters {
    pub general: SlidingWindowLimiter,
    pub sensitive: SlidingWindowLimiter,
}

impl RateLimiters {
    pub fn from_settings(settings: &RateLimitSettings) -> Self {
        Self::with_clock(settings, system_clock())
    }

    pub fn with_clock(settings: &RateLimitSettings, clock: Arc<dyn Clock>) -> Self {
        Self {
            general: SlidingWindowLimiter::with_clock("general", settings.general, clock.clone()),
            sensitive: SlidingWindowLimiter::with_clock("sensitive", settings.sensitive, clock),
        }
    }

    pub fn cleanup_stale(&self) -> usize {
        self.general.cleanup_stale() + self.sensitive.cleanup_stale()
    }
}
