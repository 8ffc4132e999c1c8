//! Tab and device identity persistence.
//!
//! The tab id lives in context-local storage so a reload of the same tab
//! keeps it; the device id lives in the shared store so all tabs agree.
//! When a store cannot be read or written the id is still generated, it
//! just does not survive the next restart.

use shared_store::keys::{DEVICE_ID_KEY, TAB_ID_KEY};
use shared_store::SharedStore;
use shared_types::TabId;
use tracing::{info, warn};
use uuid::Uuid;

/// Load this context's tab id, creating and persisting one if absent.
pub fn load_or_create_tab_id(local: &dyn SharedStore) -> TabId {
    let id = load_or_create(local, TAB_ID_KEY, || TabId::generate().as_str().to_string());
    TabId::from(id)
}

/// Load the device id shared by every tab, creating one if absent.
pub fn load_or_create_device_id(shared: &dyn SharedStore) -> String {
    load_or_create(shared, DEVICE_ID_KEY, || format!("device-{}", Uuid::new_v4()))
}

fn load_or_create(store: &dyn SharedStore, key: &str, generate: impl FnOnce() -> String) -> String {
    match store.get(key) {
        Ok(Some(existing)) if !existing.trim().is_empty() => return existing,
        Ok(_) => {}
        Err(e) => warn!(key, store = store.name(), error = %e, "Could not read persisted id"),
    }

    let id = generate();
    match store.set(key, &id) {
        Ok(()) => info!(key, id = %id, "Generated persistent id"),
        Err(e) => warn!(key, error = %e, "Generated id could not be persisted"),
    }
    id
}
