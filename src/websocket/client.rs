use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::sync::mpsc;
use tokio_tungstenite::connect_async;
use tokio_tungstenite::tungstenite::protocol::frame::coding::CloseCode;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message;

use crate::error::TransportError;
use crate::metrics::FrameMetrics;

use super::transport::{CloseKind, Connection, Transport, TransportEvent};

const INBOUND_BUFFER_SIZE: usize = 256;

/// WebSocket transport over `tokio-tungstenite`.
///
/// Each connection gets a writer task draining the outbound queue into the
/// socket and a reader task forwarding frames until the socket closes.
#[derive(Debug, Clone, Copy, Default)]
pub struct WebSocketTransport;

impl WebSocketTransport {
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl Transport for WebSocketTransport {
    async fn open(
        &self,
        target: &str,
        outbound_buffer: usize,
    ) -> Result<Connection, TransportError> {
        let (stream, _response) = connect_async(target).await?;

        tracing::debug!(url = %target, "WebSocket handshake completed");

        let (mut ws_sender, mut ws_receiver) = stream.split();
        let (out_tx, mut out_rx) = mpsc::channel::<String>(outbound_buffer.max(1));
        let (in_tx, in_rx) = mpsc::channel::<TransportEvent>(INBOUND_BUFFER_SIZE);

        // Writer: runs until the owner drops the outbound sender
        let writer_target = target.to_string();
        tokio::spawn(async move {
            while let Some(text) = out_rx.recv().await {
                if let Err(e) = ws_sender.send(Message::Text(text.into())).await {
                    tracing::warn!(url = %writer_target, error = %e, "WebSocket send failed");
                    return;
                }
            }
            if let Err(e) = ws_sender.close().await {
                tracing::debug!(url = %writer_target, error = %e, "WebSocket close failed");
            }
        });

        let reader_target = target.to_string();
        tokio::spawn(async move {
            let kind = loop {
                let event = match ws_receiver.next().await {
                    Some(Ok(Message::Text(text))) => TransportEvent::Frame(text.as_str().to_owned()),
                    Some(Ok(Message::Binary(bytes))) => match String::from_utf8(bytes.to_vec()) {
                        Ok(text) => TransportEvent::Frame(text),
                        Err(_) => {
                            FrameMetrics::record_malformed();
                            tracing::warn!(url = %reader_target, "Dropping non UTF-8 binary frame");
                            continue;
                        }
                    },
                    Some(Ok(Message::Close(frame))) => break close_kind(frame.as_ref()),
                    // Ping/pong are answered by tungstenite
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        tracing::warn!(url = %reader_target, error = %e, "WebSocket receive error");
                        break CloseKind::Abnormal;
                    }
                    None => break CloseKind::Abnormal,
                };

                if in_tx.send(event).await.is_err() {
                    // Channel side is gone
                    return;
                }
            };

            let _ = in_tx.send(TransportEvent::Closed(kind)).await;
        });

        Ok(Connection {
            outbound: out_tx,
            inbound: in_rx,
        })
    }
}

fn close_kind(frame: Option<&CloseFrame>) -> CloseKind {
    match frame.map(|f| f.code) {
        None | Some(CloseCode::Normal) => CloseKind::Clean,
        Some(_) => CloseKind::Abnormal,
    }
}
