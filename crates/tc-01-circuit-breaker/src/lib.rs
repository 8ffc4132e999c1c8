//! # tc-01-circuit-breaker
//!
//! Guards every operation against a persistent store.
//!
//! ## State Machine
//!
//! ```text
//!                 failures >= threshold
//!   ┌──────────┐ ─────────────────────► ┌──────────┐
//!   │  CLOSED  │                        │   OPEN   │ ◄──────────┐
//!   └──────────┘                        └──────────┘            │
//!        ▲                                   │ now >= next_retry │ probe
//!        │ probe succeeds                    ▼                   │ fails
//!        │                              ┌──────────┐            │
//!        └───────────────────────────── │HALF-OPEN │ ───────────┘
//!                                       └──────────┘
//!                                     (exactly one probe)
//! ```
//!
//! - A success while `closed` does not reset the failure counter; only a
//!   successful half-open probe does.
//! - A failed probe re-arms `next_retry` without touching `failures`.
//! - State is persisted (best effort) to a separate store so it survives
//!   reloads of the tab.

pub mod breaker;
pub mod domain;
pub mod error;
pub mod guarded_store;

pub use breaker::{CircuitBreaker, CircuitBreakerConfig};
pub use domain::{BreakerState, CircuitStatus};
pub use error::{CircuitOpenError, GuardError};
pub use guarded_store::GuardedStore;
