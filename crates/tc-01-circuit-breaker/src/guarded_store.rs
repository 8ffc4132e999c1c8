//! `SharedStore` decorator that routes every call through a breaker.
//!
//! Components that touch the shared store (leader elector, storage
//! transport, refresh in-flight flag) hold a `GuardedStore` rather than the
//! raw adapter, so a throttled or disabled store trips one breaker and all
//! of them fail fast together.

use crate::breaker::CircuitBreaker;
use crate::error::GuardError;
use shared_store::{SharedStore, StoreChange, StoreError, StoreResult};
use std::sync::Arc;
use tokio::sync::broadcast;

/// A store whose operations are guarded by a circuit breaker.
pub struct GuardedStore {
    inner: Arc<dyn SharedStore>,
    breaker: Arc<CircuitBreaker>,
}

impl GuardedStore {
    /// Wrap `inner` with `breaker`.
    pub fn new(inner: Arc<dyn SharedStore>, breaker: Arc<CircuitBreaker>) -> Self {
        Self { inner, breaker }
    }

    /// The breaker guarding this store.
    #[must_use]
    pub fn breaker(&self) -> &Arc<CircuitBreaker> {
        &self.breaker
    }

    fn run<T>(&self, op: impl FnOnce(&dyn SharedStore) -> StoreResult<T>) -> StoreResult<T> {
        self.breaker
            .guard(|| op(self.inner.as_ref()))
            .map_err(|e| match e {
                GuardError::Open(open) => StoreError::from(open),
                GuardError::Inner(inner) => inner,
            })
    }
}

impl SharedStore for GuardedStore {
    fn name(&self) -> &str {
        self.inner.name()
    }

    fn get(&self, key: &str) -> StoreResult<Option<String>> {
        self.run(|s| s.get(key))
    }

    fn set(&self, key: &str, value: &str) -> StoreResult<()> {
        self.run(|s| s.set(key, value))
    }

    fn remove(&self, key: &str) -> StoreResult<()> {
        self.run(|s| s.remove(key))
    }

    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>> {
        self.run(|s| s.keys_with_prefix(prefix))
    }

    fn watch(&self) -> Option<broadcast::Receiver<StoreChange>> {
        self.inner.watch()
    }
}
