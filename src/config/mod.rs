mod settings;

pub use settings::{
    BatchConfig, ChannelConfig, LogFormat, LoggingConfig, RateLimitSettings, Settings,
    TargetConfig,
};
