//! # tc-03-leader-election
//!
//! Advisory leader election among tabs.
//!
//! ## State Machine
//!
//! ```text
//! [FOLLOWER] ──record missing/stale──→ [CANDIDATE] ──claim ok──→ [LEADER]
//!     ↑                                     │                       │
//!     └──────────lost race──────────────────┘                       │
//!     └──────ping from another tab / fresh foreign record───────────┘
//! ```
//!
//! ## Claim Protocol
//!
//! 1. Read the leadership record; a fresh record held by another tab ends
//!    the attempt.
//! 2. Publish `leader:election`, write a unique claim token to the lock
//!    key, wait the settle delay.
//! 3. Re-read the lock and the record; if either now belongs to another
//!    tab, stand down.
//! 4. Write `{tabId, now}` and publish `leader:ping`.
//!
//! This is write-then-verify, not compare-and-swap. Two leaders can exist
//! briefly; every leader-gated operation is idempotent.
//!
//! ## Degraded Mode
//!
//! When the shared store cannot be used, a tab that has seen no leader
//! ping within the staleness window leads in memory and keeps pinging.

pub mod domain;
pub mod error;
pub mod ports;
pub mod service;

pub use domain::{ClaimToken, ElectionRole};
pub use error::{ElectionError, ElectionResult};
pub use ports::LeadershipView;
pub use service::{ElectorConfig, LeaderElector};
