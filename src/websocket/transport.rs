//! Duplex transport seam used by the channel manager.

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::TransportError;

/// How a connection ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CloseKind {
    /// Closing handshake completed with a normal status
    Clean,
    /// Network failure, protocol error or abnormal close status
    Abnormal,
}

/// Events flowing from the remote peer to the channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    Frame(String),
    Closed(CloseKind),
}

/// An established duplex connection.
///
/// Dropping `outbound` asks the transport to close the connection cleanly.
#[derive(Debug)]
pub struct Connection {
    pub outbound: mpsc::Sender<String>,
    pub inbound: mpsc::Receiver<TransportEvent>,
}

/// Opens duplex connections to a target address.
#[async_trait]
pub trait Transport: Send + Sync + 'static {
    /// Perform the handshake with `target`.
    ///
    /// `outbound_buffer` bounds the number of frames queued for writing.
    async fn open(&self, target: &str, outbound_buffer: usize)
        -> Result<Connection, TransportError>;
}
