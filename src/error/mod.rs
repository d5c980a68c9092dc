use thiserror::Error;

/// Errors surfaced by the channel connection manager.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChannelError {
    #[error("Channel capacity exceeded ({current}/{max})")]
    CapacityExceeded { current: usize, max: usize },

    #[error("Connection failed for channel {name}: {reason}")]
    ConnectionFailed { name: String, reason: String },

    #[error("Channel not found: {0}")]
    NotFound(String),
}

impl ChannelError {
    pub fn connection_failed(name: impl Into<String>, reason: impl ToString) -> Self {
        Self::ConnectionFailed {
            name: name.into(),
            reason: reason.to_string(),
        }
    }
}

/// Errors raised by a transport while opening or driving a duplex connection.
#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Handshake failed: {0}")]
    Handshake(String),

    #[error("Transport closed")]
    Closed,

    #[error("WebSocket error: {0}")]
    WebSocket(#[from] tokio_tungstenite::tungstenite::Error),
}

/// An inbound frame that could not be turned into a `{type, payload}` envelope.
#[derive(Error, Debug)]
pub enum FrameError {
    #[error("Malformed frame: {0}")]
    Malformed(#[from] serde_json::Error),
}

/// Fail-fast errors of the bulk execution helpers.
#[derive(Error, Debug)]
pub enum BulkError<E> {
    #[error("{0} must be greater than zero")]
    ZeroLimit(&'static str),

    #[error("Item {index} failed: {source}")]
    ExecutorAbort {
        index: usize,
        #[source]
        source: E,
    },

    #[error("Chunk {chunk} failed: {source}")]
    BatchAbort {
        chunk: usize,
        #[source]
        source: E,
    },
}

impl<E> BulkError<E> {
    /// Unwrap the failure of the item or chunk that aborted the run.
    pub fn into_source(self) -> Option<E> {
        match self {
            Self::ExecutorAbort { source, .. } | Self::BatchAbort { source, .. } => Some(source),
            Self::ZeroLimit(_) => None,
        }
    }
}

/// Startup errors of the binary and the settings loader.
#[derive(Error, Debug)]
pub enum AppError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Telemetry error: {0}")]
    Telemetry(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_message() {
        let err = ChannelError::CapacityExceeded { current: 2, max: 2 };
        assert_eq!(err.to_string(), "Channel capacity exceeded (2/2)");
    }

    #[test]
    fn test_bulk_error_source() {
        let err: BulkError<String> = BulkError::BatchAbort {
            chunk: 3,
            source: "boom".to_string(),
        };
        assert_eq!(err.into_source().as_deref(), Some("boom"));

        let err: BulkError<String> = BulkError::ZeroLimit("chunk_size");
        assert!(err.into_source().is_none());
    }
}
