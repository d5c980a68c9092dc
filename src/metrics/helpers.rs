//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    CHANNELS_ABANDONED_TOTAL, CHANNELS_ACTIVE, CHANNELS_OPENED_TOTAL, CHANNEL_RECONNECTS_TOTAL,
    FRAMES_MALFORMED_TOTAL, FRAMES_OUTBOUND_TOTAL, FRAMES_RECEIVED_TOTAL,
    RATELIMIT_ALLOWED_TOTAL, RATELIMIT_DENIED_TOTAL, SUBSCRIBER_ERRORS_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording channel lifecycle metrics
pub struct ChannelMetrics;

impl ChannelMetrics {
    pub fn set_active(count: usize) {
        CHANNELS_ACTIVE.set(count as i64);
    }

    pub fn record_opened() {
        CHANNELS_OPENED_TOTAL.inc();
    }

    pub fn record_reconnect_attempt() {
        CHANNEL_RECONNECTS_TOTAL.inc();
    }

    pub fn record_abandoned() {
        CHANNELS_ABANDONED_TOTAL.inc();
    }
}

/// Helper struct for recording frame metrics
pub struct FrameMetrics;

impl FrameMetrics {
    pub fn record_received() {
        FRAMES_RECEIVED_TOTAL.inc();
    }

    pub fn record_malformed() {
        FRAMES_MALFORMED_TOTAL.inc();
    }

    pub fn record_subscriber_error() {
        SUBSCRIBER_ERRORS_TOTAL.inc();
    }

    pub fn record_sent() {
        FRAMES_OUTBOUND_TOTAL.with_label_values(&["sent"]).inc();
    }

    pub fn record_rejected() {
        FRAMES_OUTBOUND_TOTAL.with_label_values(&["rejected"]).inc();
    }
}

/// Helper struct for recording rate limit decisions
pub struct RateLimitMetrics;

impl RateLimitMetrics {
    pub fn record_allowed(limiter: &str) {
        RATELIMIT_ALLOWED_TOTAL.with_label_values(&[limiter]).inc();
    }

    pub fn record_denied(limiter: &str) {
        RATELIMIT_DENIED_TOTAL.with_label_values(&[limiter]).inc();
    }
}
