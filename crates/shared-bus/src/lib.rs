//! # Shared Bus - Cross-Tab Message Bus
//!
//! Fans coordination messages out to every tab over the best transport
//! currently available, and to local subscribers of the publishing tab.
//!
//! ## Transport Ranking
//!
//! ```text
//!  rank 0  Broker   out-of-process TCP broker, one persistent connection
//!  rank 1  Channel  same-process-group publish/subscribe hub
//!  rank 2  Storage  per-message entries in the shared store, polled
//! ```
//!
//! - On `start()` transports are tried in rank order; the first that
//!   connects becomes active.
//! - A failed send tears the active transport down, demotes to the next
//!   rank and retries the send once. Storage is the always-present floor.
//! - A liveness probe (default 30s) re-tests the active transport and
//!   opportunistically promotes back to a better rank.
//!
//! ## Delivery Rules
//!
//! - `publish` never fails: it echoes to local subscribers synchronously,
//!   then forwards over the active transport.
//! - Inbound messages are dropped if they come from this tab, are older
//!   than the message timeout, are too far in the future, fail signature
//!   verification, or were already delivered.

// Allow in tests
#![cfg_attr(test, allow(clippy::unwrap_used))]
#![cfg_attr(test, allow(clippy::expect_used))]

pub mod bus;
pub mod config;
pub mod dedup;
pub mod filter;
pub mod subscriber;
pub mod transport;

// Re-export main types
pub use bus::{BusStats, MessageBus, MessageBusBuilder, PublishOutcome};
pub use config::BusConfig;
pub use dedup::RecentMessageCache;
pub use filter::EventFilter;
pub use subscriber::{Handler, MessageReceiver, Subscription};
pub use transport::broker::{BrokerConnector, BrokerServer};
pub use transport::channel::{ChannelConnector, ChannelHub};
pub use transport::storage::StorageConnector;
pub use transport::{Transport, TransportConnector, TransportError, TransportKind};
