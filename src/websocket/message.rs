use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::error::FrameError;

/// Typed envelope carried by every frame: `{"type": ..., "payload": ...}`.
///
/// The payload is opaque to the core and handed to subscribers as-is.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Frame {
    #[serde(rename = "type")]
    pub message_type: String,
    #[serde(default)]
    pub payload: Value,
}

impl Frame {
    pub fn new(message_type: impl Into<String>, payload: Value) -> Self {
        Self {
            message_type: message_type.into(),
            payload,
        }
    }

    /// Parse an inbound text frame
    pub fn parse(raw: &str) -> Result<Self, FrameError> {
        Ok(serde_json::from_str(raw)?)
    }
}
