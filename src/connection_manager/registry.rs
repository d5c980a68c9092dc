use std::sync::{Arc, Mutex, PoisonError};

use dashmap::DashMap;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::{broadcast, mpsc};

use crate::clock::{system_clock, Clock};
use crate::config::ChannelConfig;
use crate::error::ChannelError;
use crate::metrics::{ChannelMetrics, FrameMetrics};
use crate::websocket::{CloseKind, Frame, Transport, TransportEvent};

use super::backoff::ReconnectBackoff;
use super::channel::{Channel, SendOutcome};
use super::stats::{ChannelInfo, ChannelStats};
use super::subscriber::SubscriberRef;
use super::types::{ChannelEvent, ConnectionStatus};

const EVENT_BUFFER_SIZE: usize = 64;

/// Owns a bounded set of named channels.
///
/// Cloning is cheap and every clone operates on the same channel table.
/// Each open channel is driven by a background task that dispatches inbound
/// frames and runs the reconnection procedure after a non-clean close.
#[derive(Clone)]
pub struct ChannelManager {
    inner: Arc<ManagerInner>,
}

struct ManagerInner {
    /// name -> current channel entity
    channels: DashMap<String, Arc<Channel>>,
    config: ChannelConfig,
    backoff: ReconnectBackoff,
    transport: Arc<dyn Transport>,
    clock: Arc<dyn Clock>,
    events: broadcast::Sender<ChannelEvent>,
    /// Serializes the capacity check with insertion
    admission: Mutex<()>,
}

impl ChannelManager {
    pub fn new(config: ChannelConfig, transport: Arc<dyn Transport>) -> Self {
        Self::with_clock(config, transport, system_clock())
    }

    pub fn with_clock(
        config: ChannelConfig,
        transport: Arc<dyn Transport>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER_SIZE);
        Self {
            inner: Arc::new(ManagerInner {
                channels: DashMap::new(),
                backoff: ReconnectBackoff::from_config(&config),
                config,
                transport,
                clock,
                events,
                admission: Mutex::new(()),
            }),
        }
    }

    pub fn config(&self) -> &ChannelConfig {
        &self.inner.config
    }

    /// Open (or reuse) the channel registered under `name`.
    ///
    /// An already open channel is returned as-is. Otherwise a new connection
    /// to `target` is established and registered once the handshake succeeds.
    #[tracing::instrument(name = "channels.connect", skip(self))]
    pub async fn connect(&self, name: &str, target: &str) -> Result<Arc<Channel>, ChannelError> {
        if let Some(existing) = self.inner.live(name) {
            if existing.is_open() {
                tracing::debug!(channel_id = %existing.id(), "Channel already open");
                return Ok(existing);
            }
        }
        self.inner.check_capacity(name)?;

        let connection = self
            .inner
            .transport
            .open(target, self.inner.config.outbound_buffer)
            .await
            .map_err(|e| {
                tracing::warn!(error = %e, "Channel handshake failed");
                ChannelError::connection_failed(name, e)
            })?;

        let channel = Arc::new(Channel::opened(name, target, connection.outbound));
        self.inner.install(channel.clone())?;

        ChannelMetrics::record_opened();
        self.inner.emit(ChannelEvent::Opened {
            name: name.to_string(),
        });
        tracing::info!(channel_id = %channel.id(), "Channel opened");

        tokio::spawn(supervise(
            self.inner.clone(),
            channel.clone(),
            connection.inbound,
        ));

        Ok(channel)
    }

    /// Serialize `message` and queue it on the channel.
    ///
    /// Returns false when the channel is unknown, not open, or its outbound
    /// buffer is full. Never waits.
    pub fn send<M: Serialize + ?Sized>(&self, name: &str, message: &M) -> bool {
        match serde_json::to_string(message) {
            Ok(text) => self.inner.deliver(name, text),
            Err(e) => {
                FrameMetrics::record_rejected();
                tracing::error!(channel = %name, error = %e, "Failed to serialize outbound message");
                false
            }
        }
    }

    /// Queue a `{type, payload}` frame on the channel
    pub fn send_frame(&self, name: &str, message_type: &str, payload: Value) -> bool {
        self.send(name, &Frame::new(message_type, payload))
    }

    /// Register `subscriber` for `message_type` on channel `name`.
    ///
    /// Ignored (returns false) when no channel is registered under `name`.
    pub fn subscribe(&self, name: &str, message_type: &str, subscriber: SubscriberRef) -> bool {
        match self.inner.live(name) {
            Some(channel) => {
                channel.subscribe(message_type, subscriber);
                tracing::debug!(channel = %name, message_type = %message_type, "Subscribed");
                true
            }
            None => {
                tracing::debug!(channel = %name, message_type = %message_type, "Subscribe ignored, channel not found");
                false
            }
        }
    }

    /// Remove the first registration of `subscriber` for `message_type`
    pub fn unsubscribe(&self, name: &str, message_type: &str, subscriber: &SubscriberRef) -> bool {
        let removed = self
            .inner
            .live(name)
            .is_some_and(|channel| channel.unsubscribe(message_type, subscriber));
        if removed {
            tracing::debug!(channel = %name, message_type = %message_type, "Unsubscribed");
        }
        removed
    }

    /// Close the channel cleanly and forget it. No reconnection follows.
    ///
    /// Returns false if nothing was registered under `name`.
    #[tracing::instrument(name = "channels.disconnect", skip(self))]
    pub fn disconnect(&self, name: &str) -> bool {
        let Some((_, channel)) = self.inner.channels.remove(name) else {
            return false;
        };
        channel.close();
        self.inner.update_gauge();
        self.inner.emit(ChannelEvent::Closed {
            name: name.to_string(),
        });
        tracing::info!(channel_id = %channel.id(), "Channel disconnected");
        true
    }

    /// Close every channel; returns how many were closed
    pub fn disconnect_all(&self) -> usize {
        let names: Vec<String> = self.inner.channels.iter().map(|e| e.key().clone()).collect();
        let closed = names
            .iter()
            .filter(|name| self.disconnect(name))
            .count();
        tracing::info!(closed = closed, "All channels disconnected");
        closed
    }

    pub fn get_connection_status(&self, name: &str) -> ConnectionStatus {
        self.inner
            .live(name)
            .map_or(ConnectionStatus::Disconnected, |channel| channel.status())
    }

    pub fn get_channel(&self, name: &str) -> Option<Arc<Channel>> {
        self.inner.live(name)
    }

    /// Wait until the channel under `name` is open.
    ///
    /// Fails with `ConnectionFailed` if reconnection is abandoned while
    /// waiting, and with `NotFound` if no channel is registered.
    pub async fn wait_until_open(&self, name: &str) -> Result<Arc<Channel>, ChannelError> {
        let mut events = self.inner.events.subscribe();
        loop {
            match self.inner.live(name) {
                Some(channel) if channel.is_open() => return Ok(channel),
                Some(_) => {}
                None => return Err(missing_channel(&mut events, name)),
            }

            match events.recv().await {
                Ok(ChannelEvent::Abandoned { name: abandoned }) if abandoned == name => {
                    return Err(abandoned_error(name));
                }
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(broadcast::error::RecvError::Closed) => {
                    return Err(ChannelError::NotFound(name.to_string()));
                }
            }
        }
    }

    /// Subscribe to channel lifecycle events
    pub fn events(&self) -> broadcast::Receiver<ChannelEvent> {
        self.inner.events.subscribe()
    }

    /// Number of channels in the live set
    pub fn live_count(&self) -> usize {
        self.inner.channels.len()
    }

    pub fn stats(&self) -> ChannelStats {
        let mut channels: Vec<ChannelInfo> = self
            .inner
            .channels
            .iter()
            .map(|entry| ChannelInfo::from(entry.value().as_ref()))
            .collect();
        channels.sort_by(|a, b| a.name.cmp(&b.name));

        ChannelStats {
            total_channels: channels.len(),
            max_connections: self.inner.config.max_connections,
            channels,
        }
    }
}

fn abandoned_error(name: &str) -> ChannelError {
    ChannelError::connection_failed(name, "reconnection attempts exhausted")
}

/// Tell an abandoned channel apart from one that never existed
fn missing_channel(events: &mut broadcast::Receiver<ChannelEvent>, name: &str) -> ChannelError {
    loop {
        match events.try_recv() {
            Ok(ChannelEvent::Abandoned { name: abandoned }) if abandoned == name => {
                return abandoned_error(name);
            }
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => return ChannelError::NotFound(name.to_string()),
        }
    }
}

impl ManagerInner {
    fn deliver(&self, name: &str, text: String) -> bool {
        let Some(channel) = self.live(name) else {
            FrameMetrics::record_rejected();
            tracing::debug!(channel = %name, "Send to unknown channel");
            return false;
        };

        match channel.send_text(text) {
            SendOutcome::Sent => {
                FrameMetrics::record_sent();
                true
            }
            SendOutcome::NotOpen => {
                FrameMetrics::record_rejected();
                tracing::debug!(channel = %name, state = ?channel.state(), "Channel not open, message dropped");
                false
            }
            SendOutcome::BufferFull => {
                FrameMetrics::record_rejected();
                tracing::warn!(channel = %name, "Outbound buffer full, message dropped");
                false
            }
        }
    }

    fn live(&self, name: &str) -> Option<Arc<Channel>> {
        self.channels.get(name).map(|entry| entry.value().clone())
    }

    fn is_current(&self, channel: &Channel) -> bool {
        self.channels
            .get(channel.name())
            .is_some_and(|entry| entry.id() == channel.id())
    }

    fn check_capacity(&self, name: &str) -> Result<(), ChannelError> {
        let current = self.channels.len();
        let max = self.config.max_connections;
        if current >= max && !self.channels.contains_key(name) {
            tracing::warn!(channel = %name, current = current, max = max, "Channel capacity exceeded");
            return Err(ChannelError::CapacityExceeded { current, max });
        }
        Ok(())
    }

    /// Register a freshly opened channel, closing any entity it supersedes
    fn install(&self, channel: Arc<Channel>) -> Result<(), ChannelError> {
        let previous = {
            let _admission = self.admission.lock().unwrap_or_else(PoisonError::into_inner);
            self.check_capacity(channel.name())?;
            self.channels
                .insert(channel.name().to_string(), channel.clone())
        };

        if let Some(previous) = previous {
            tracing::debug!(
                channel = %channel.name(),
                previous_id = %previous.id(),
                "Superseding previous channel entity"
            );
            previous.close();
        }
        self.update_gauge();
        Ok(())
    }

    /// Swap `lost` for `fresh` if `lost` is still the registered entity
    fn replace_current(&self, lost: &Channel, fresh: Arc<Channel>) -> bool {
        match self.channels.get_mut(lost.name()) {
            Some(mut entry) if entry.id() == lost.id() => {
                *entry = fresh;
                true
            }
            _ => false,
        }
    }

    fn remove_current(&self, channel: &Channel) -> bool {
        let removed = self
            .channels
            .remove_if(channel.name(), |_, current| current.id() == channel.id())
            .is_some();
        if removed {
            self.update_gauge();
        }
        removed
    }

    fn emit(&self, event: ChannelEvent) {
        // No receivers is fine
        let _ = self.events.send(event);
    }

    fn update_gauge(&self) {
        ChannelMetrics::set_active(self.channels.len());
    }

    /// Replace a channel lost to a non-clean close and retry its handshake.
    ///
    /// Attempts run strictly one after another. Returns the reopened entity
    /// and its inbound stream, or `None` once the channel is abandoned,
    /// disconnected or superseded.
    async fn reconnect(
        &self,
        lost: &Arc<Channel>,
    ) -> Option<(Arc<Channel>, mpsc::Receiver<TransportEvent>)> {
        let fresh = Arc::new(Channel::successor(
            lost,
            self.config.preserve_subscriptions_on_reconnect,
        ));
        if !self.replace_current(lost, fresh.clone()) {
            return None;
        }
        lost.mark_lost();

        let name = fresh.name().to_string();
        tracing::warn!(channel = %name, "Channel lost, starting reconnection");

        loop {
            if !self.backoff.allows(fresh.reconnect_attempts()) {
                // Unregister before announcing
                if self.remove_current(&fresh) {
                    fresh.mark_lost();
                    ChannelMetrics::record_abandoned();
                    tracing::error!(
                        channel = %name,
                        attempts = fresh.reconnect_attempts(),
                        "Reconnection attempts exhausted, abandoning channel"
                    );
                    self.emit(ChannelEvent::Abandoned { name: name.clone() });
                }
                return None;
            }

            let attempt = fresh.next_attempt();
            let delay = self.backoff.delay_for(attempt);
            ChannelMetrics::record_reconnect_attempt();
            self.emit(ChannelEvent::Reconnecting {
                name: name.clone(),
                attempt,
                delay_ms: delay.as_millis() as u64,
            });
            tracing::info!(
                channel = %name,
                attempt = attempt,
                max_attempts = self.backoff.max_attempts(),
                delay_ms = delay.as_millis() as u64,
                "Reconnecting channel"
            );

            self.clock.sleep(delay).await;

            if !self.is_current(&fresh) {
                tracing::debug!(channel = %name, "Reconnection cancelled");
                return None;
            }

            match self
                .transport
                .open(fresh.target(), self.config.outbound_buffer)
                .await
            {
                Ok(connection) => {
                    if !fresh.attach(connection.outbound) {
                        return None;
                    }
                    ChannelMetrics::record_opened();
                    self.emit(ChannelEvent::Opened { name: name.clone() });
                    tracing::info!(channel = %name, attempt = attempt, "Channel reconnected");
                    return Some((fresh, connection.inbound));
                }
                Err(e) => {
                    tracing::warn!(channel = %name, attempt = attempt, error = %e, "Reconnection attempt failed");
                }
            }
        }
    }
}

/// Drive one channel name: dispatch frames, then react to how it closed
async fn supervise(
    inner: Arc<ManagerInner>,
    mut channel: Arc<Channel>,
    mut inbound: mpsc::Receiver<TransportEvent>,
) {
    loop {
        let Some(kind) = pump(&channel, &mut inbound).await else {
            // Closed by the owner or superseded
            return;
        };

        match kind {
            CloseKind::Clean => {
                if inner.remove_current(&channel) {
                    channel.mark_lost();
                    inner.emit(ChannelEvent::Closed {
                        name: channel.name().to_string(),
                    });
                    tracing::info!(channel = %channel.name(), "Channel closed by peer");
                }
                return;
            }
            CloseKind::Abnormal => match inner.reconnect(&channel).await {
                Some((fresh, fresh_inbound)) => {
                    channel = fresh;
                    inbound = fresh_inbound;
                }
                None => return,
            },
        }
    }
}

/// Dispatch inbound frames until the connection ends.
///
/// Returns `None` when the owner closed the channel.
async fn pump(channel: &Channel, inbound: &mut mpsc::Receiver<TransportEvent>) -> Option<CloseKind> {
    let mut shutdown = channel.shutdown_signal();
    loop {
        tokio::select! {
            _ = shutdown.wait_for(|closed| *closed) => return None,
            event = inbound.recv() => match event {
                Some(TransportEvent::Frame(text)) => {
                    channel.dispatch(&text);
                }
                Some(TransportEvent::Closed(kind)) => return Some(kind),
                None => return Some(CloseKind::Abnormal),
            },
        }
    }
}
