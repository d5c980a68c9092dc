use config::{Config, ConfigError, Environment, File};
use serde::Deserialize;
use std::env;
use std::time::Duration;

use crate::ratelimit::WindowConfig;

#[derive(Debug, Clone, Deserialize, Default)]
pub struct Settings {
    #[serde(default)]
    pub channels: ChannelConfig,
    #[serde(default)]
    pub rate_limit: RateLimitSettings,
    #[serde(default)]
    pub batch: BatchConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Channels the binary opens on startup
    #[serde(default)]
    pub targets: Vec<TargetConfig>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// Maximum number of live channels
    #[serde(default = "default_max_connections")]
    pub max_connections: usize,
    /// Reconnection attempts before a channel is abandoned
    #[serde(default = "default_max_reconnect_attempts")]
    pub max_reconnect_attempts: u32,
    /// Base delay for the attempt-scaled reconnection backoff (milliseconds)
    #[serde(default = "default_base_reconnect_delay_ms")]
    pub base_reconnect_delay_ms: u64,
    /// Upper bound of random jitter added to each reconnection delay (milliseconds)
    #[serde(default)]
    pub reconnect_jitter_ms: u64,
    /// Outbound frames buffered per channel before `send` starts rejecting
    #[serde(default = "default_outbound_buffer")]
    pub outbound_buffer: usize,
    /// Carry subscriber lists over to the channel created by a reconnection
    #[serde(default)]
    pub preserve_subscriptions_on_reconnect: bool,
}

fn default_max_connections() -> usize {
    500
}

fn default_max_reconnect_attempts() -> u32 {
    3
}

fn default_base_reconnect_delay_ms() -> u64 {
    1000
}

fn default_outbound_buffer() -> usize {
    256
}

impl ChannelConfig {
    pub fn base_reconnect_delay(&self) -> Duration {
        Duration::from_millis(self.base_reconnect_delay_ms)
    }
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            max_connections: default_max_connections(),
            max_reconnect_attempts: default_max_reconnect_attempts(),
            base_reconnect_delay_ms: default_base_reconnect_delay_ms(),
            reconnect_jitter_ms: 0,
            outbound_buffer: default_outbound_buffer(),
            preserve_subscriptions_on_reconnect: false,
        }
    }
}

/// One limiter for generic calls, one for sensitive operations.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitSettings {
    #[serde(default = "default_general_window")]
    pub general: WindowConfig,
    #[serde(default = "default_sensitive_window")]
    pub sensitive: WindowConfig,
}

fn default_general_window() -> WindowConfig {
    WindowConfig::new(20, 1000)
}

fn default_sensitive_window() -> WindowConfig {
    WindowConfig::new(5, 1000)
}

impl Default for RateLimitSettings {
    fn default() -> Self {
        Self {
            general: default_general_window(),
            sensitive: default_sensitive_window(),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct BatchConfig {
    /// Pause between consecutive chunks (milliseconds)
    #[serde(default = "default_inter_batch_delay_ms")]
    pub inter_batch_delay_ms: u64,
}

fn default_inter_batch_delay_ms() -> u64 {
    100
}

impl BatchConfig {
    pub fn inter_batch_delay(&self) -> Duration {
        Duration::from_millis(self.inter_batch_delay_ms)
    }
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self {
            inter_batch_delay_ms: default_inter_batch_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LoggingConfig {
    /// Filter used when RUST_LOG is not set
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub format: LogFormat,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

/// A named channel opened by the binary, plus the message types it logs.
#[derive(Debug, Clone, Deserialize)]
pub struct TargetConfig {
    pub name: String,
    pub url: String,
    #[serde(default)]
    pub message_types: Vec<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        // Load .env file if exists
        let _ = dotenvy::dotenv();

        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let builder = Config::builder()
            .set_default("channels.max_connections", 500)?
            .set_default("channels.max_reconnect_attempts", 3)?
            .set_default("channels.base_reconnect_delay_ms", 1000)?
            .set_default("rate_limit.general.max_requests", 20)?
            .set_default("rate_limit.general.window_ms", 1000)?
            .set_default("rate_limit.sensitive.max_requests", 5)?
            .set_default("rate_limit.sensitive.window_ms", 1000)?
            .set_default("batch.inter_batch_delay_ms", 100)?
            .set_default("logging.level", "info")?
            // Load config file if exists
            .add_source(File::with_name("config/default").required(false))
            .add_source(File::with_name(&format!("config/{}", run_mode)).required(false))
            // CHANNELS__MAX_CONNECTIONS, BATCH__INTER_BATCH_DELAY_MS, ...
            .add_source(
                Environment::default()
                    .separator("__")
                    .try_parsing(true),
            );

        builder.build()?.try_deserialize()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_values() {
        let channels = ChannelConfig::default();
        assert_eq!(channels.max_connections, 500);
        assert_eq!(channels.max_reconnect_attempts, 3);
        assert_eq!(channels.base_reconnect_delay(), Duration::from_millis(1000));
        assert!(!channels.preserve_subscriptions_on_reconnect);

        let limits = RateLimitSettings::default();
        assert_eq!(limits.general.max_requests, 20);
        assert_eq!(limits.sensitive.max_requests, 5);
        assert_eq!(limits.sensitive.window_ms, 1000);

        assert_eq!(BatchConfig::default().inter_batch_delay(), Duration::from_millis(100));
    }

    #[test]
    fn test_deserialize_partial_settings() {
        let settings: Settings = Config::builder()
            .set_default("channels.max_connections", 2)
            .unwrap()
            .set_default("logging.format", "json")
            .unwrap()
            .build()
            .unwrap()
            .try_deserialize()
            .unwrap();

        assert_eq!(settings.channels.max_connections, 2);
        assert_eq!(settings.channels.max_reconnect_attempts, 3);
        assert_eq!(settings.logging.format, LogFormat::Json);
        assert!(settings.targets.is_empty());
    }
}
