//! Channel statistics and info structures

use chrono::{DateTime, Utc};
use serde::Serialize;

use super::channel::Channel;
use super::types::ChannelState;

/// Snapshot of the live channel set
#[derive(Debug, Clone, Serialize)]
pub struct ChannelStats {
    pub total_channels: usize,
    pub max_connections: usize,
    pub channels: Vec<ChannelInfo>,
}

impl ChannelStats {
    pub fn open_channels(&self) -> usize {
        self.channels
            .iter()
            .filter(|c| c.state == ChannelState::Open)
            .count()
    }
}

/// Channel information
#[derive(Debug, Clone, Serialize)]
pub struct ChannelInfo {
    pub name: String,
    pub target: String,
    pub state: ChannelState,
    pub reconnect_attempts: u32,
    pub subscriber_count: usize,
    pub message_types: Vec<String>,
    pub connected_at: Option<DateTime<Utc>>,
}

impl From<&Channel> for ChannelInfo {
    fn from(channel: &Channel) -> Self {
        Self {
            name: channel.name().to_string(),
            target: channel.target().to_string(),
            state: channel.state(),
            reconnect_attempts: channel.reconnect_attempts(),
            subscriber_count: channel.total_subscribers(),
            message_types: channel.message_types(),
            connected_at: channel.connected_at(),
        }
    }
}
