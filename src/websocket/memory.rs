//! In-memory transport.
//!
//! Handshakes are scripted per target and every accepted connection hands its
//! remote end to the caller as a [`MemoryPeer`]. Nothing leaves the process.

use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio::time::Instant;

use crate::error::TransportError;

use super::transport::{CloseKind, Connection, Transport, TransportEvent};

const INBOUND_BUFFER_SIZE: usize = 64;

#[derive(Default)]
struct MemoryState {
    /// Remaining forced handshake failures per target
    failures: HashMap<String, u32>,
    /// Targets refusing every handshake
    refused: HashSet<String>,
    /// Handshake attempt instants per target
    attempts: HashMap<String, Vec<Instant>>,
    /// Accepted connections not yet claimed by the caller
    peers: HashMap<String, VecDeque<MemoryPeer>>,
}

/// Transport whose remote side lives in the same process.
#[derive(Clone, Default)]
pub struct MemoryTransport {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Fail the next `count` handshakes to `target`
    pub fn fail_next(&self, target: &str, count: u32) {
        *self.state().failures.entry(target.to_string()).or_default() += count;
    }

    /// Fail every handshake to `target` until [`accept`](Self::accept) is called
    pub fn refuse(&self, target: &str) {
        self.state().refused.insert(target.to_string());
    }

    pub fn accept(&self, target: &str) {
        self.state().refused.remove(target);
    }

    /// Number of handshakes attempted against `target`
    pub fn open_attempts(&self, target: &str) -> usize {
        self.state().attempts.get(target).map_or(0, Vec::len)
    }

    /// Instants at which handshakes against `target` were attempted
    pub fn attempt_times(&self, target: &str) -> Vec<Instant> {
        self.state().attempts.get(target).cloned().unwrap_or_default()
    }

    /// Claim the oldest unclaimed remote end connected to `target`
    pub fn take_peer(&self, target: &str) -> Option<MemoryPeer> {
        self.state().peers.get_mut(target)?.pop_front()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn open(
        &self,
        target: &str,
        outbound_buffer: usize,
    ) -> Result<Connection, TransportError> {
        let mut state = self.state();
        state
            .attempts
            .entry(target.to_string())
            .or_default()
            .push(Instant::now());

        if state.refused.contains(target) {
            return Err(TransportError::Handshake(format!("{target} refused connection")));
        }
        if let Some(remaining) = state.failures.get_mut(target) {
            if *remaining > 0 {
                *remaining -= 1;
                return Err(TransportError::Handshake(format!("{target} handshake failed")));
            }
        }

        let (out_tx, out_rx) = mpsc::channel(outbound_buffer.max(1));
        let (in_tx, in_rx) = mpsc::channel(INBOUND_BUFFER_SIZE);

        state
            .peers
            .entry(target.to_string())
            .or_default()
            .push_back(MemoryPeer {
                inbound: in_tx,
                outbound: out_rx,
            });

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

/// Remote end of an in-memory connection.
pub struct MemoryPeer {
    inbound: mpsc::Sender<TransportEvent>,
    outbound: mpsc::Receiver<String>,
}

impl MemoryPeer {
    /// Deliver a text frame to the channel
    pub async fn push_text(&self, text: impl Into<String>) -> Result<(), TransportError> {
        self.inbound
            .send(TransportEvent::Frame(text.into()))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Close the connection from the remote side
    pub async fn close(&self, kind: CloseKind) -> Result<(), TransportError> {
        self.inbound
            .send(TransportEvent::Closed(kind))
            .await
            .map_err(|_| TransportError::Closed)
    }

    /// Next frame written by the channel; `None` once the channel closed its side
    pub async fn recv_sent(&mut self) -> Option<String> {
        self.outbound.recv().await
    }

    /// Frame written by the channel, if one is already queued
    pub fn try_recv_sent(&mut self) -> Option<String> {
        self.outbound.try_recv().ok()
    }
}
