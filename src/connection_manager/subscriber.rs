//! Per-channel subscriber lists keyed by message type

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use smallvec::SmallVec;

/// Receives payloads of one message type on one channel.
///
/// Returning an error (or panicking) is logged by the dispatcher and does not
/// affect other subscribers.
pub trait Subscriber: Send + Sync {
    fn on_message(&self, payload: &Value) -> anyhow::Result<()>;
}

impl<F> Subscriber for F
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync,
{
    fn on_message(&self, payload: &Value) -> anyhow::Result<()> {
        self(payload)
    }
}

/// Shared subscriber handle; identity is the allocation, see [`Subscriptions::remove`]
pub type SubscriberRef = Arc<dyn Subscriber>;

/// Wrap a closure as a subscriber handle
pub fn subscriber<F>(f: F) -> SubscriberRef
where
    F: Fn(&Value) -> anyhow::Result<()> + Send + Sync + 'static,
{
    Arc::new(f)
}

pub(crate) type SubscriberList = SmallVec<[SubscriberRef; 4]>;

/// message type -> subscribers in registration order
#[derive(Default)]
pub(crate) struct Subscriptions {
    by_type: Mutex<HashMap<String, SubscriberList>>,
}

impl Subscriptions {
    fn lock(&self) -> MutexGuard<'_, HashMap<String, SubscriberList>> {
        self.by_type.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn add(&self, message_type: &str, subscriber: SubscriberRef) {
        self.lock()
            .entry(message_type.to_string())
            .or_default()
            .push(subscriber);
    }

    /// Remove the first registration of `subscriber`; drops the type once empty
    pub(crate) fn remove(&self, message_type: &str, subscriber: &SubscriberRef) -> bool {
        let mut by_type = self.lock();
        let Some(list) = by_type.get_mut(message_type) else {
            return false;
        };
        let Some(index) = list.iter().position(|s| Arc::ptr_eq(s, subscriber)) else {
            return false;
        };
        list.remove(index);
        if list.is_empty() {
            by_type.remove(message_type);
        }
        true
    }

    /// Copy of the list so callbacks run without holding the lock
    pub(crate) fn snapshot(&self, message_type: &str) -> SubscriberList {
        self.lock().get(message_type).cloned().unwrap_or_default()
    }

    pub(crate) fn count(&self, message_type: &str) -> usize {
        self.lock().get(message_type).map_or(0, SmallVec::len)
    }

    pub(crate) fn total(&self) -> usize {
        self.lock().values().map(SmallVec::len).sum()
    }

    pub(crate) fn message_types(&self) -> Vec<String> {
        let mut types: Vec<String> = self.lock().keys().cloned().collect();
        types.sort();
        types
    }

    pub(crate) fn copy_from(&self, other: &Subscriptions) {
        let copied = other.lock().clone();
        *self.lock() = copied;
    }
}
