//! Prometheus metrics for the real-time core.
//!
//! - Channel metrics (live channels, opens, reconnects, abandons)
//! - Frame metrics (received, malformed, subscriber failures, outbound)
//! - Rate limiting metrics per limiter

mod helpers;

pub use helpers::{encode_metrics, ChannelMetrics, FrameMetrics, RateLimitMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_int_counter, register_int_counter_vec, register_int_gauge, IntCounter, IntCounterVec,
    IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "realtime";

lazy_static! {
    // ============================================================================
    // Channel Metrics
    // ============================================================================

    /// Number of channels currently in the live set
    pub static ref CHANNELS_ACTIVE: IntGauge = register_int_gauge!(
        format!("{}_channels_active", METRIC_PREFIX),
        "Number of channels in the live set"
    ).unwrap();

    /// Successful channel handshakes (initial and reconnect)
    pub static ref CHANNELS_OPENED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_channels_opened_total", METRIC_PREFIX),
        "Total successful channel handshakes"
    ).unwrap();

    /// Reconnection attempts started
    pub static ref CHANNEL_RECONNECTS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_channel_reconnects_total", METRIC_PREFIX),
        "Total channel reconnection attempts"
    ).unwrap();

    /// Channels dropped after exhausting reconnection attempts
    pub static ref CHANNELS_ABANDONED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_channels_abandoned_total", METRIC_PREFIX),
        "Total channels abandoned after exhausting reconnection attempts"
    ).unwrap();

    // ============================================================================
    // Frame Metrics
    // ============================================================================

    /// Inbound frames dispatched to subscribers
    pub static ref FRAMES_RECEIVED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_frames_received_total", METRIC_PREFIX),
        "Total well-formed inbound frames"
    ).unwrap();

    /// Inbound frames dropped because they could not be parsed
    pub static ref FRAMES_MALFORMED_TOTAL: IntCounter = register_int_counter!(
        format!("{}_frames_malformed_total", METRIC_PREFIX),
        "Total inbound frames dropped as malformed"
    ).unwrap();

    /// Subscriber callbacks that returned an error or panicked
    pub static ref SUBSCRIBER_ERRORS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_subscriber_errors_total", METRIC_PREFIX),
        "Total subscriber callback failures"
    ).unwrap();

    /// Outbound frames by result (sent, rejected)
    pub static ref FRAMES_OUTBOUND_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_frames_outbound_total", METRIC_PREFIX),
        "Total outbound send attempts",
        &["result"]
    ).unwrap();

    // ============================================================================
    // Rate Limiting Metrics
    // ============================================================================

    /// Admitted requests per limiter
    pub static ref RATELIMIT_ALLOWED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ratelimit_allowed_total", METRIC_PREFIX),
        "Total requests admitted by a rate limiter",
        &["limiter"]
    ).unwrap();

    /// Denied requests per limiter
    pub static ref RATELIMIT_DENIED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_ratelimit_denied_total", METRIC_PREFIX),
        "Total requests denied by a rate limiter",
        &["limiter"]
    ).unwrap();
}
