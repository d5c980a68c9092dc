//! Per-key admission control.
//!
//! Each [`SlidingWindowLimiter`] remembers the instants of the requests it
//! admitted per key and lets a new one through only while fewer than
//! `max_requests` fall inside the trailing window.

mod config;
mod limiter;

pub use config::WindowConfig;
pub use limiter::{RateLimitResult, RateLimiterStats, RateLimiters, SlidingWindowLimiter};
