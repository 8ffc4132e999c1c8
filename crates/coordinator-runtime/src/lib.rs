//! # Coordinator Runtime
//!
//! Wires the coordination crates into one `SessionCoordinator` per tab and
//! ships the `tab-coordinator` binary.
//!
//! ## Wiring
//!
//! ```text
//!                  ┌─────────────── SessionCoordinator ───────────────┐
//!                  │                                                  │
//!   SharedStore ──→ GuardedStore (tc-01) ──┬──→ StorageConnector      │
//!                  │                       ├──→ LeaderElector (tc-03) │
//!                  │                       └──→ RefreshCoordinator    │
//!                  │                                 (tc-04)          │
//!   Broker ───────→ MessageBus (shared-bus) ←── journal (tc-02)       │
//!   ChannelHub ───→     ↑                                             │
//!                  │    └── FallbackPoller / SessionHeartbeat (tc-05) │
//!                  └──────────────────────────────────────────────────┘
//! ```
//!
//! ## Startup Sequence
//!
//! 1. Load and validate `CoordinatorConfig`
//! 2. Load or create the tab id (context-local) and device id (shared)
//! 3. Connect the best transport
//! 4. Validate the session and publish the snapshot
//! 5. Elect, then start refresh, polling and heartbeat loops

pub mod adapters;
pub mod config;
pub mod coordinator;
pub mod telemetry;

pub use config::{
    ApiConfig, ConfigError, CoordinatorConfig, StorageConfig, TransportConfig, MAX_REFRESH_SKEW,
};
pub use coordinator::{CoordinatorBuilder, CoordinatorError, LifecycleState, SessionCoordinator};
pub use telemetry::{init_tracing, LogFormat, TelemetryConfig, TelemetryError};
