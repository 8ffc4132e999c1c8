//! # Store Port
//!
//! Interface the coordination subsystems require from a persistent store.

use crate::error::{StoreError, StoreResult};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::broadcast;

/// A change observed on the store.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreChange {
    /// Key that changed.
    pub key: String,
    /// New value, `None` if removed.
    pub value: Option<String>,
}

/// Abstract interface for a shared key/value store.
///
/// Production: `FileSharedStore`
/// Testing: `InMemorySharedStore`
pub trait SharedStore: Send + Sync {
    /// Logical name of the store (used for breaker keys and logs).
    fn name(&self) -> &str;

    /// Get a value by key.
    fn get(&self, key: &str) -> StoreResult<Option<String>>;

    /// Put a value.
    fn set(&self, key: &str, value: &str) -> StoreResult<()>;

    /// Delete a key. Deleting a missing key is not an error.
    fn remove(&self, key: &str) -> StoreResult<()>;

    /// All keys starting with `prefix`, sorted.
    fn keys_with_prefix(&self, prefix: &str) -> StoreResult<Vec<String>>;

    /// Change notifications, if the backend produces them.
    fn watch(&self) -> Option<broadcast::Receiver<StoreChange>> {
        None
    }
}

/// JSON helpers over any `SharedStore`.
pub trait SharedStoreExt {
    /// Get and decode a JSON value.
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>>;

    /// Encode and put a JSON value.
    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()>;
}

impl<S: SharedStore + ?Sized> SharedStoreExt for S {
    fn get_json<T: DeserializeOwned>(&self, key: &str) -> StoreResult<Option<T>> {
        match self.get(key)? {
            Some(raw) => serde_json::from_str(&raw)
                .map(Some)
                .map_err(|e| StoreError::Serialization(format!("{key}: {e}"))),
            None => Ok(None),
        }
    }

    fn set_json<T: Serialize>(&self, key: &str, value: &T) -> StoreResult<()> {
        let raw = serde_json::to_string(value)?;
        self.set(key, &raw)
    }
}
