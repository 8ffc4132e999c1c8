//! # Adapters
//!
//! Outer-layer implementations of the ports the coordination crates
//! consume.
//!
//! ```text
//! ┌──────────────────────────────────────────────┐
//! │ HttpSessionApi      ──implements──→ SessionApi│
//! │ identity            ──persists───→ TabId,     │
//! │                                    device id  │
//! └──────────────────────────────────────────────┘
//! ```

pub mod identity;
pub mod session_api;

pub use identity::{load_or_create_device_id, load_or_create_tab_id};
pub use session_api::HttpSessionApi;
