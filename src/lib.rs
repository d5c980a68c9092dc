// Shared infrastructure
pub mod clock;
pub mod config;
pub mod error;
pub mod metrics;
pub mod telemetry;

// Channels and transports
pub mod connection_manager;
pub mod websocket;

// Flow control
pub mod ratelimit;
pub mod tasks;
pub mod timing;
