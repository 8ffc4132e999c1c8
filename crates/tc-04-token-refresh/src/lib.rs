//! # tc-04-token-refresh
//!
//! At most one credential refresh in flight across all tabs.
//!
//! ## Flow
//!
//! ```text
//! refresh() ──in flight?──yes──→ join waiter queue ─────────────────┐
//!     │ no                                                            │
//!     ├── leader ──→ shared in-flight flag ──→ SessionApi::refresh    │
//!     │                 ok:  store grant, broadcast tokens:refreshed  │
//!     │                 err: broadcast session:expired, clear         │
//!     └── follower ──→ tokens:refresh-requested ──→ await broadcast   │
//!                         (bounded wait, then refresh directly)       │
//!                                                                     ↓
//!                                      every waiter gets the same outcome
//! ```
//!
//! A response that arrives after its flight was cancelled (logout, expiry
//! elsewhere) no longer matches the in-flight marker and is discarded.

pub mod adapters;
pub mod domain;
pub mod error;
pub mod ports;
pub mod service;

pub use adapters::InMemoryCredentialStore;
pub use domain::InFlightMarker;
pub use error::RefreshError;
pub use ports::{CredentialStore, RefreshTrigger};
pub use service::{RefreshConfig, RefreshCoordinator, RefreshDeps};
