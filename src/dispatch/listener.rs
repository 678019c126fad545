//! Telemetry consumers and the slot they are discovered through.
//!
//! A [`Listener`] takes one of two shapes:
//! - **Callback**: invoked directly as `listener(name, data)`.
//! - **Broadcast** (legacy): the event is published as a [`Notification`]
//!   on topic `<prefix><name>` through a [`Notifier`], for any number of
//!   subscribers.

use crate::types::EventData;
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::broadcast;

/// Direct listener callback. An `Err` is reported and then ignored.
pub type ListenerFn = dyn Fn(&str, &EventData) -> Result<(), String> + Send + Sync;

/// The discovered telemetry consumer.
#[derive(Clone)]
pub enum Listener {
    Callback(Arc<ListenerFn>),
    Broadcast(Arc<dyn Notifier>),
}

impl std::fmt::Debug for Listener {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Listener::Callback(_) => f.write_str("Listener::Callback"),
            Listener::Broadcast(_) => f.write_str("Listener::Broadcast"),
        }
    }
}

impl Listener {
    pub fn callback<F>(f: F) -> Self
    where
        F: Fn(&str, &EventData) -> Result<(), String> + Send + Sync + 'static,
    {
        Listener::Callback(Arc::new(f))
    }

    pub fn broadcast(notifier: Arc<dyn Notifier>) -> Self {
        Listener::Broadcast(notifier)
    }

    /// Hand one event to the consumer.
    pub(crate) fn deliver(&self, prefix: &str, name: &str, data: &EventData) -> Result<(), String> {
        match self {
            Listener::Callback(f) => f(name, data),
            Listener::Broadcast(notifier) => {
                let topic = format!("{}{}", prefix, name);
                notifier.notify(&topic, name, data)
            }
        }
    }
}

// ================================================================================================
// LEGACY BROADCAST
// ================================================================================================

/// A namespaced event published by a broadcast listener.
#[derive(Debug, Clone, PartialEq)]
pub struct Notification {
    /// `<prefix><name>`, e.g. `analytics.login`
    pub topic: String,
    pub name: String,
    pub data: EventData,
}

/// Event-notification mechanism used by broadcast listeners.
pub trait Notifier: Send + Sync {
    fn notify(&self, topic: &str, name: &str, data: &EventData) -> Result<(), String>;
}

/// [`Notifier`] over a tokio broadcast channel.
#[derive(Debug, Clone)]
pub struct ChannelNotifier {
    tx: broadcast::Sender<Notification>,
}

impl ChannelNotifier {
    /// Create a notifier and a first subscriber.
    pub fn new(capacity: usize) -> (Self, broadcast::Receiver<Notification>) {
        let (tx, rx) = broadcast::channel(capacity.max(1));
        (Self { tx }, rx)
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Notification> {
        self.tx.subscribe()
    }
}

impl Notifier for ChannelNotifier {
    fn notify(&self, topic: &str, name: &str, data: &EventData) -> Result<(), String> {
        let notification = Notification {
            topic: topic.to_string(),
            name: name.to_string(),
            data: data.clone(),
        };
        self.tx
            .send(notification)
            .map(|_| ())
            .map_err(|_| format!("No subscribers for {}", topic))
    }
}

// ================================================================================================
// DISCOVERY SLOT
// ================================================================================================

/// Well-known slot a host fills once its telemetry back end is ready.
///
/// Clones share the slot. The buffer polls it while waiting and keeps its
/// own copy of the first listener it finds.
#[derive(Clone, Default)]
pub struct ListenerSlot {
    inner: Arc<RwLock<Option<Listener>>>,
}

impl std::fmt::Debug for ListenerSlot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerSlot")
            .field("listener", &*self.inner.read())
            .finish()
    }
}

impl ListenerSlot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(&self, listener: Listener) {
        *self.inner.write() = Some(listener);
    }

    pub fn clear(&self) {
        *self.inner.write() = None;
    }

    pub fn get(&self) -> Option<Listener> {
        self.inner.read().clone()
    }

    pub fn is_set(&self) -> bool {
        self.inner.read().is_some()
    }
}
