//! # Subscriptions
//!
//! Two ways to consume messages:
//!
//! - `Subscription`: a synchronous handler invoked on delivery. Handlers
//!   must not block; they run on the publishing task (local echo) or the
//!   dispatch task (remote delivery).
//! - `MessageReceiver`: an async queue for consumers that need to `.await`.
//!
//! Both unsubscribe when dropped.

use crate::filter::EventFilter;
use parking_lot::RwLock;
use shared_types::CoordinationMessage;
use std::pin::Pin;
use std::sync::{Arc, Weak};
use std::task::{Context, Poll};
use tokio::sync::mpsc;
use tokio_stream::Stream;
use tracing::debug;

/// Message handler.
pub type Handler = Arc<dyn Fn(&CoordinationMessage) + Send + Sync>;

pub(crate) struct SubscriberEntry {
    pub(crate) id: u64,
    pub(crate) filter: EventFilter,
    pub(crate) handler: Handler,
}

/// Registry of live subscribers.
#[derive(Default)]
pub(crate) struct SubscriberRegistry {
    entries: RwLock<Vec<SubscriberEntry>>,
    next_id: std::sync::atomic::AtomicU64,
}

impl SubscriberRegistry {
    pub(crate) fn insert(&self, filter: EventFilter, handler: Handler) -> u64 {
        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        self.entries.write().push(SubscriberEntry {
            id,
            filter,
            handler,
        });
        id
    }

    pub(crate) fn remove(&self, id: u64) {
        self.entries.write().retain(|entry| entry.id != id);
    }

    pub(crate) fn len(&self) -> usize {
        self.entries.read().len()
    }

    /// Invoke every matching handler. The registry lock is released before
    /// handlers run, so handlers may subscribe or unsubscribe.
    pub(crate) fn dispatch(&self, message: &CoordinationMessage) -> usize {
        let handlers: Vec<Handler> = self
            .entries
            .read()
            .iter()
            .filter(|entry| entry.filter.matches(message))
            .map(|entry| Arc::clone(&entry.handler))
            .collect();
        for handler in &handlers {
            handler(message);
        }
        handlers.len()
    }
}

/// Handle for a registered handler. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub(crate) fn new(id: u64, registry: &Arc<SubscriberRegistry>) -> Self {
        Self {
            id,
            registry: Arc::downgrade(registry),
        }
    }

    /// Explicitly unsubscribe.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
            debug!(subscription = self.id, "Unsubscribed");
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("id", &self.id).finish()
    }
}

/// Async queue of matching messages.
pub struct MessageReceiver {
    receiver: mpsc::UnboundedReceiver<CoordinationMessage>,
    _subscription: Subscription,
}

impl MessageReceiver {
    pub(crate) fn new(
        receiver: mpsc::UnboundedReceiver<CoordinationMessage>,
        subscription: Subscription,
    ) -> Self {
        Self {
            receiver,
            _subscription: subscription,
        }
    }

    /// Next matching message. `None` once the bus is dropped.
    pub async fn recv(&mut self) -> Option<CoordinationMessage> {
        self.receiver.recv().await
    }

    /// Non-blocking receive.
    pub fn try_recv(&mut self) -> Option<CoordinationMessage> {
        self.receiver.try_recv().ok()
    }
}

impl Stream for MessageReceiver {
    type Item = CoordinationMessage;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        self.receiver.poll_recv(cx)
    }
}
