//! Channel state, status and lifecycle events

use serde::Serialize;

/// Lifecycle state of a channel entity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
#[repr(u8)]
pub enum ChannelState {
    Connecting = 0,
    Open = 1,
    Closing = 2,
    Closed = 3,
}

impl From<u8> for ChannelState {
    fn from(value: u8) -> Self {
        match value {
            0 => ChannelState::Connecting,
            1 => ChannelState::Open,
            2 => ChannelState::Closing,
            _ => ChannelState::Closed,
        }
    }
}

/// Caller-facing view of a channel name
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ConnectionStatus {
    Connected,
    Connecting,
    Disconnected,
}

impl From<ChannelState> for ConnectionStatus {
    fn from(state: ChannelState) -> Self {
        match state {
            ChannelState::Open => ConnectionStatus::Connected,
            ChannelState::Connecting => ConnectionStatus::Connecting,
            ChannelState::Closing | ChannelState::Closed => ConnectionStatus::Disconnected,
        }
    }
}

/// Lifecycle notifications published by the manager
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelEvent {
    Opened { name: String },
    Reconnecting { name: String, attempt: u32, delay_ms: u64 },
    Abandoned { name: String },
    Closed { name: String },
}

impl ChannelEvent {
    pub fn name(&self) -> &str {
        match self {
            ChannelEvent::Opened { name }
            | ChannelEvent::Reconnecting { name, .. }
            | ChannelEvent::Abandoned { name }
            | ChannelEvent::Closed { name } => name,
        }
    }
}
