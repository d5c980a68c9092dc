//! Channel entity: one named duplex connection and its subscribers

use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicI64, AtomicU32, AtomicU8, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::{mpsc, watch};
use uuid::Uuid;

use crate::metrics::FrameMetrics;
use crate::websocket::Frame;

use super::subscriber::{SubscriberRef, Subscriptions};
use super::types::{ChannelState, ConnectionStatus};

/// Outcome of writing a frame to a channel
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendOutcome {
    Sent,
    NotOpen,
    BufferFull,
}

/// A named, long-lived duplex connection owned by the manager.
///
/// Each entity has its own `id`; a reconnection replaces the entity under the
/// same name, so holders of an old `Arc<Channel>` observe it as closed.
pub struct Channel {
    id: Uuid,
    name: String,
    target: String,
    state: AtomicU8,
    /// Outbound half of the connection; dropping it closes the connection
    link: Mutex<Option<mpsc::Sender<String>>>,
    subscriptions: Subscriptions,
    reconnect_attempts: AtomicU32,
    /// Unix milliseconds of the last successful handshake, 0 if none
    connected_at: AtomicI64,
    shutdown: watch::Sender<bool>,
}

impl Channel {
    fn new(name: &str, target: &str, state: ChannelState) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            id: Uuid::new_v4(),
            name: name.to_string(),
            target: target.to_string(),
            state: AtomicU8::new(state as u8),
            link: Mutex::new(None),
            subscriptions: Subscriptions::default(),
            reconnect_attempts: AtomicU32::new(0),
            connected_at: AtomicI64::new(0),
            shutdown,
        }
    }

    /// Entity for a connection that completed its handshake
    pub(crate) fn opened(name: &str, target: &str, outbound: mpsc::Sender<String>) -> Self {
        let channel = Self::new(name, target, ChannelState::Connecting);
        channel.attach(outbound);
        channel
    }

    /// Fresh entity replacing `lost` while it reconnects.
    ///
    /// The attempt counter is carried forward; subscribers only when asked.
    pub(crate) fn successor(lost: &Channel, keep_subscriptions: bool) -> Self {
        let channel = Self::new(&lost.name, &lost.target, ChannelState::Connecting);
        channel
            .reconnect_attempts
            .store(lost.reconnect_attempts(), Ordering::Release);
        if keep_subscriptions {
            channel.subscriptions.copy_from(&lost.subscriptions);
        }
        channel
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn target(&self) -> &str {
        &self.target
    }

    pub fn state(&self) -> ChannelState {
        ChannelState::from(self.state.load(Ordering::Acquire))
    }

    pub fn status(&self) -> ConnectionStatus {
        self.state().into()
    }

    pub fn is_open(&self) -> bool {
        self.state() == ChannelState::Open
    }

    pub fn reconnect_attempts(&self) -> u32 {
        self.reconnect_attempts.load(Ordering::Acquire)
    }

    pub fn connected_at(&self) -> Option<DateTime<Utc>> {
        match self.connected_at.load(Ordering::Acquire) {
            0 => None,
            ms => DateTime::from_timestamp_millis(ms),
        }
    }

    pub fn subscriber_count(&self, message_type: &str) -> usize {
        self.subscriptions.count(message_type)
    }

    pub fn total_subscribers(&self) -> usize {
        self.subscriptions.total()
    }

    pub fn message_types(&self) -> Vec<String> {
        self.subscriptions.message_types()
    }

    fn link(&self) -> MutexGuard<'_, Option<mpsc::Sender<String>>> {
        self.link.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_state(&self, state: ChannelState) {
        self.state.store(state as u8, Ordering::Release);
    }

    /// Install a freshly handshaken connection.
    ///
    /// Returns false, dropping `outbound`, if the channel was closed meanwhile.
    pub(crate) fn attach(&self, outbound: mpsc::Sender<String>) -> bool {
        let mut link = self.link();
        if matches!(self.state(), ChannelState::Closing | ChannelState::Closed) {
            return false;
        }
        *link = Some(outbound);
        self.reconnect_attempts.store(0, Ordering::Release);
        self.connected_at
            .store(Utc::now().timestamp_millis(), Ordering::Release);
        self.set_state(ChannelState::Open);
        true
    }

    /// Bump the attempt counter before a reconnection attempt
    pub(crate) fn next_attempt(&self) -> u32 {
        self.reconnect_attempts.fetch_add(1, Ordering::AcqRel) + 1
    }

    pub(crate) fn send_text(&self, text: String) -> SendOutcome {
        let link = self.link();
        if self.state() != ChannelState::Open {
            return SendOutcome::NotOpen;
        }
        let Some(outbound) = link.as_ref() else {
            return SendOutcome::NotOpen;
        };
        match outbound.try_send(text) {
            Ok(()) => SendOutcome::Sent,
            Err(mpsc::error::TrySendError::Full(_)) => SendOutcome::BufferFull,
            Err(mpsc::error::TrySendError::Closed(_)) => SendOutcome::NotOpen,
        }
    }

    /// Close the connection on the owner's request
    pub(crate) fn close(&self) {
        let mut link = self.link();
        self.set_state(ChannelState::Closing);
        link.take();
        self.shutdown.send_replace(true);
        self.set_state(ChannelState::Closed);
    }

    /// Mark the entity dead after the transport dropped underneath it
    pub(crate) fn mark_lost(&self) {
        let mut link = self.link();
        link.take();
        self.set_state(ChannelState::Closed);
    }

    pub(crate) fn shutdown_signal(&self) -> watch::Receiver<bool> {
        self.shutdown.subscribe()
    }

    pub(crate) fn subscribe(&self, message_type: &str, subscriber: SubscriberRef) {
        self.subscriptions.add(message_type, subscriber);
    }

    pub(crate) fn unsubscribe(&self, message_type: &str, subscriber: &SubscriberRef) -> bool {
        self.subscriptions.remove(message_type, subscriber)
    }

    /// Parse one inbound frame and hand its payload to every subscriber of its type.
    ///
    /// Returns the number of subscribers that handled the payload without error.
    pub(crate) fn dispatch(&self, raw: &str) -> usize {
        let frame = match Frame::parse(raw) {
            Ok(frame) => frame,
            Err(e) => {
                FrameMetrics::record_malformed();
                tracing::warn!(channel = %self.name, error = %e, "Dropping malformed frame");
                return 0;
            }
        };
        FrameMetrics::record_received();

        let subscribers = self.subscriptions.snapshot(&frame.message_type);
        tracing::trace!(
            channel = %self.name,
            message_type = %frame.message_type,
            subscribers = subscribers.len(),
            "Dispatching frame"
        );

        let mut handled = 0;
        for subscriber in subscribers.iter() {
            let result =
                panic::catch_unwind(AssertUnwindSafe(|| subscriber.on_message(&frame.payload)));
            match result {
                Ok(Ok(())) => handled += 1,
                Ok(Err(e)) => {
                    FrameMetrics::record_subscriber_error();
                    tracing::error!(
                        channel = %self.name,
                        message_type = %frame.message_type,
                        error = %e,
                        "Subscriber callback failed"
                    );
                }
                Err(_) => {
                    FrameMetrics::record_subscriber_error();
                    tracing::error!(
                        channel = %self.name,
                        message_type = %frame.message_type,
                        "Subscriber callback panicked"
                    );
                }
            }
        }
        handled
    }
}

impl std::fmt::Debug for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Channel")
            .field("id", &self.id)
            .field("name", &self.name)
            .field("target", &self.target)
            .field("state", &self.state())
            .field("reconnect_attempts", &self.reconnect_attempts())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection_manager::subscriber::subscriber;
    use std::sync::Arc;

    fn open_channel() -> (Channel, mpsc::Receiver<String>) {
        let (tx, rx) = mpsc::channel(2);
        (Channel::opened("market", "mem://market", tx), rx)
    }

    #[test]
    fn test_send_requires_open() {
        let (channel, mut rx) = open_channel();
        assert_eq!(channel.send_text("a".into()), SendOutcome::Sent);
        assert_eq!(rx.try_recv().unwrap(), "a");

        channel.close();
        assert_eq!(channel.state(), ChannelState::Closed);
        assert_eq!(channel.send_text("b".into()), SendOutcome::NotOpen);
    }

    #[test]
    fn test_send_reports_full_buffer() {
        let (channel, _rx) = open_channel();
        assert_eq!(channel.send_text("1".into()), SendOutcome::Sent);
        assert_eq!(channel.send_text("2".into()), SendOutcome::Sent);
        assert_eq!(channel.send_text("3".into()), SendOutcome::BufferFull);
    }

    #[test]
    fn test_attach_after_close_is_refused() {
        let (channel, _rx) = open_channel();
        let successor = Channel::successor(&channel, false);
        assert_eq!(successor.state(), ChannelState::Connecting);

        successor.close();
        let (tx, _rx2) = mpsc::channel(1);
        assert!(!successor.attach(tx));
        assert_eq!(successor.state(), ChannelState::Closed);
    }

    #[test]
    fn test_successor_carries_attempts_and_optionally_subscribers() {
        let (channel, _rx) = open_channel();
        channel.subscribe("bid", subscriber(|_| Ok(())));
        channel.next_attempt();

        let bare = Channel::successor(&channel, false);
        assert_ne!(bare.id(), channel.id());
        assert_eq!(bare.reconnect_attempts(), 1);
        assert_eq!(bare.total_subscribers(), 0);

        let kept = Channel::successor(&channel, true);
        assert_eq!(kept.subscriber_count("bid"), 1);
    }

    #[test]
    fn test_dispatch_isolates_failing_subscribers() {
        let (channel, _rx) = open_channel();
        let seen = Arc::new(Mutex::new(Vec::new()));

        let log = seen.clone();
        channel.subscribe(
            "bid",
            subscriber(move |_| {
                log.lock().unwrap().push("first");
                anyhow::bail!("first subscriber rejects")
            }),
        );
        channel.subscribe("bid", subscriber(|_| panic!("second subscriber panics")));
        let log = seen.clone();
        channel.subscribe(
            "bid",
            subscriber(move |_| {
                log.lock().unwrap().push("third");
                Ok(())
            }),
        );

        assert_eq!(channel.dispatch(r#"{"type":"bid","payload":1}"#), 1);
        assert_eq!(channel.dispatch(r#"{"type":"bid","payload":2}"#), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["first", "third", "first", "third"]);
        assert_eq!(channel.subscriber_count("bid"), 3);
    }

    #[test]
    fn test_dispatch_drops_malformed_frames() {
        let (channel, _rx) = open_channel();
        let seen = Arc::new(Mutex::new(0));
        let counter = seen.clone();
        channel.subscribe(
            "bid",
            subscriber(move |_| {
                *counter.lock().unwrap() += 1;
                Ok(())
            }),
        );

        assert_eq!(channel.dispatch("{broken"), 0);
        assert_eq!(channel.dispatch(r#"{"type":"other"}"#), 0);
        assert_eq!(*seen.lock().unwrap(), 0);
    }
}
