//! Duplex channel transports and the frame envelope they carry.

mod client;
mod memory;
mod message;
mod transport;

pub use client::WebSocketTransport;
pub use memory::{MemoryPeer, MemoryTransport};
pub use message::Frame;
pub use transport::{CloseKind, Connection, Transport, TransportEvent};
