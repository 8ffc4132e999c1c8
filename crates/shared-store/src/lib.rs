//! # Shared Store
//!
//! The persistent key/value store shared by every tab, plus the
//! context-local store that holds per-tab identity.
//!
//! ## Adapters
//!
//! - `InMemorySharedStore`: process-local, change notifications, fault
//!   injection. One instance shared across simulated tabs in tests.
//! - `FileSharedStore`: one file per key under a directory, advisory
//!   `flock` around writes. Shared by real processes on one machine.
//!
//! ## Shared-Resource Policy
//!
//! All writes are last-writer-wins. No write ever blocks another tab's
//! read for longer than the file lock is held.

pub mod error;
pub mod file;
pub mod keys;
pub mod memory;
pub mod ports;

pub use error::{StoreError, StoreResult};
pub use file::FileSharedStore;
pub use memory::{FaultMode, InMemorySharedStore};
pub use ports::{SharedStore, SharedStoreExt, StoreChange};
