//! # Storage Transport
//!
//! Floor of the transport ranking. Each message is written as its own
//! entry in the shared store under `MESSAGE_PREFIX`; every tab polls for
//! entries it has not seen yet.
//!
//! - Keys sort chronologically, so pruning keeps the newest
//!   `max_entries` entries.
//! - Entries present when the transport connects are never delivered.
//! - Backends with change notifications wake the poller early.

use super::{Inbound, Transport, TransportConnector, TransportError, TransportKind};
use async_trait::async_trait;
use parking_lot::Mutex;
use shared_store::keys::{message_key, MESSAGE_PREFIX};
use shared_store::{SharedStore, SharedStoreExt, StoreChange};
use shared_types::{Clock, CoordinationMessage, TabId};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::{debug, trace};

/// Connects tabs through a shared store.
#[derive(Clone)]
pub struct StorageConnector {
    store: Arc<dyn SharedStore>,
    tab_id: TabId,
    clock: Arc<dyn Clock>,
    poll_interval: Duration,
    max_entries: usize,
}

impl StorageConnector {
    #[must_use]
    pub fn new(
        store: Arc<dyn SharedStore>,
        tab_id: TabId,
        clock: Arc<dyn Clock>,
        poll_interval: Duration,
        max_entries: usize,
    ) -> Self {
        Self {
            store,
            tab_id,
            clock,
            poll_interval,
            max_entries: max_entries.max(1),
        }
    }
}

#[async_trait]
impl TransportConnector for StorageConnector {
    fn kind(&self) -> TransportKind {
        TransportKind::Storage
    }

    async fn connect(&self, inbound: Inbound) -> Result<Arc<dyn Transport>, TransportError> {
        let mut poller = StoragePoller {
            store: Arc::clone(&self.store),
            tab_id: self.tab_id.clone(),
            inbound,
            seen: HashSet::new(),
        };
        // Existing entries predate this connection. An unreadable store is
        // not fatal here; the breaker guarding it reopens later.
        match self.store.keys_with_prefix(MESSAGE_PREFIX) {
            Ok(keys) => poller.seen.extend(keys),
            Err(e) => debug!(error = %e, "Fallback store unreadable at connect"),
        }

        let mut watch = self.store.watch();
        let poll_interval = self.poll_interval;
        let task = tokio::spawn(async move {
            let mut ticker = tokio::time::interval(poll_interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
            loop {
                tokio::select! {
                    _ = ticker.tick() => {}
                    _ = next_change(&mut watch) => {}
                }
                if !poller.scan() {
                    break;
                }
            }
        });

        Ok(Arc::new(StorageTransport {
            store: Arc::clone(&self.store),
            clock: Arc::clone(&self.clock),
            max_entries: self.max_entries,
            task: Mutex::new(Some(task)),
        }))
    }
}

/// Resolves on any store change (or lag). Pending forever without a watch.
async fn next_change(watch: &mut Option<broadcast::Receiver<StoreChange>>) {
    match watch {
        Some(rx) => {
            if let Err(broadcast::error::RecvError::Closed) = rx.recv().await {
                *watch = None;
                std::future::pending::<()>().await;
            }
        }
        None => std::future::pending::<()>().await,
    }
}

struct StoragePoller {
    store: Arc<dyn SharedStore>,
    tab_id: TabId,
    inbound: Inbound,
    seen: HashSet<String>,
}

impl StoragePoller {
    /// Deliver unseen entries. Returns `false` once the bus is gone.
    fn scan(&mut self) -> bool {
        let keys = match self.store.keys_with_prefix(MESSAGE_PREFIX) {
            Ok(keys) => keys,
            Err(e) => {
                trace!(error = %e, "Fallback poll failed");
                return true;
            }
        };

        for key in &keys {
            if self.seen.contains(key) {
                continue;
            }
            self.seen.insert(key.clone());
            let message = match self.store.get_json::<CoordinationMessage>(key) {
                Ok(Some(message)) => message,
                Ok(None) => continue,
                Err(e) => {
                    debug!(key = %key, error = %e, "Skipping unreadable fallback entry");
                    continue;
                }
            };
            if message.is_from(&self.tab_id) {
                continue;
            }
            if self.inbound.send(message).is_err() {
                return false;
            }
        }

        // Forget pruned keys.
        let present: HashSet<&String> = keys.iter().collect();
        self.seen.retain(|key| present.contains(key));
        true
    }
}

struct StorageTransport {
    store: Arc<dyn SharedStore>,
    clock: Arc<dyn Clock>,
    max_entries: usize,
    task: Mutex<Option<JoinHandle<()>>>,
}

impl StorageTransport {
    fn prune(&self) {
        let keys = match self.store.keys_with_prefix(MESSAGE_PREFIX) {
            Ok(keys) => keys,
            Err(_) => return,
        };
        if keys.len() <= self.max_entries {
            return;
        }
        let excess = keys.len() - self.max_entries;
        for key in keys.iter().take(excess) {
            if let Err(e) = self.store.remove(key) {
                debug!(key = %key, error = %e, "Failed to prune fallback entry");
                return;
            }
        }
    }
}

#[async_trait]
impl Transport for StorageTransport {
    fn kind(&self) -> TransportKind {
        TransportKind::Storage
    }

    async fn send(&self, message: &CoordinationMessage) -> Result<(), TransportError> {
        let suffix = uuid::Uuid::new_v4().simple().to_string();
        let key = message_key(self.clock.now_ms(), &suffix);
        self.store.set_json(&key, message)?;
        self.prune();
        Ok(())
    }

    async fn probe(&self) -> Result<(), TransportError> {
        self.store.keys_with_prefix(MESSAGE_PREFIX)?;
        Ok(())
    }

    async fn close(&self) {
        if let Some(task) = self.task.lock().take() {
            task.abort();
        }
    }
}

impl Drop for StorageTransport {
    fn drop(&mut self) {
        if let Some(task) = self.task.get_mut().take() {
            task.abort();
        }
    }
}
