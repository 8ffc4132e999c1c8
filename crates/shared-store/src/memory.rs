//! In-memory shared store.
//!
//! Cloning the store shares the underlying map, so a single instance handed
//! to several simulated tabs behaves like one browser profile's storage.

use crate::error::{StoreError, StoreResult};
use crate::ports::{SharedStore, StoreChange};
use parking_lot::RwLock;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::broadcast;

const CHANGE_CAPACITY: usize = 256;

/// Injected failure mode.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum FaultMode {
    /// Every operation succeeds.
    #[default]
    Healthy,
    /// Writes fail with `QuotaExceeded`; reads succeed.
    QuotaExceeded,
    /// Every operation fails with `Unavailable`.
    Unavailable,
}

struct Inner {
    name: String,
    data: RwLock<BTreeMap<String, String>>,
    fault: RwLock<FaultMode>,
    changes: broadcast::Sender<StoreChange>,
    operations: AtomicU64,
}

/// In-memory store with change notifications and fault injection.
#[derive(Clone)]
pub struct InMemorySharedStore {
    inner: Arc<Inner>,
}

impl InMemorySharedStore {
    /// Create an empty store named `name`.
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        let (changes, _) = broadcast::channel(CHANGE_CAPACITY);
        Self {
            inner: Arc::new(Inner {
                name: name.into(),
                data: RwLock::new(BTreeMap::new()),
                fault: RwLock::new(FaultMode::Healthy),
                changes,
                operations: AtomicU64::new(0),
            }),
        }
    }

    /// Switch the injected failure mode.
    pub fn set_fault(&self, fault: FaultMode) {
        *self.inner.fault.write() = fault;
    }

    /// Number of operations that reached the store (including failed ones).
    #[must_use]
    pub fn operations(&self) -> u64 {
        self.inner.operations.load(Ordering::SeqCst)
    }

    /// Number of keys currently stored.
    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.data.read().len()
    }

    /// True if nothing is stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn check(&self, write: bool) -> StoreResult<()> {
        self.inner.operations.fetch_add(1, Ordering::SeqCst);
        match *self.inner.fault.read() {
            FaultMode::Healthy => Ok(()),
            FaultMode::QuotaExceeded if write => Err(StoreError::QuotaExceeded),
            FaultMode::QuotaExceeded => Ok(()),
            FaultMode::Unavailable => Err(StoreError::Unavailable(self.inner.name.clone())),
        }
    }

    fn notify(&self, key: &str, value: Option<String>) {
        // No receivers is fine.
        let _ = self.inner.changes.send(StoreChange {
            key: key.to_string(),
            value,
        });
    }
}

impl Default for InMemorySharedStore {
    fn default() -> Self {
        Self::new("memory")
    }
}

impl SharedStore for InMemorySharedStore {
    fn name(&self) -> &str {
        &self.inner.name
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.check(false)?;
        Ok(self.inner.data.read().get(key).cloned())
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.check(true)?;
        self.inner
            .data
            .write()
            .insert(key.to_string(), value.to_string());
        self.notify(key, Some(value.to_string()));
        Ok(())
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.check(true)?;
        if self.inner.data.write().remove(key).is_some() {
            self.notify(key, None);
        }
        Ok(())
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.check(false)?;
        Ok(self
            .inner
            .data
            .read()
            .range(prefix.to_string()..)
            .take_while(|(k, _)| k.starts_with(prefix))
            .map(|(k, _)| k.clone())
            .collect())
    }

    fn watch(&self) -> Option<broadcast::Receiver<StoreChange>> {
        Some(self.inner.changes.subscribe())
    }
}
