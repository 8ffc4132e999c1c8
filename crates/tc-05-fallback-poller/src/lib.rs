//! # tc-05-fallback-poller
//!
//! HTTP emulation of push delivery for when the broker and channel are
//! both down, and the leader's session heartbeat.
//!
//! ## Activation
//!
//! | Condition | Poller | Heartbeat |
//! |-----------|--------|-----------|
//! | follower | idle | idle |
//! | leader, broker/channel active | idle | beats |
//! | leader, store-only | polls | beats |
//!
//! ## Failure Budget
//!
//! Every failed poll increments an attempt counter; a success resets it.
//! At `max_attempts` the poller stops and publishes `fallback:failed`.
//! A 401 triggers a refresh straight away instead of waiting for the next
//! interval.

pub mod heartbeat;
pub mod poller;

#[cfg(test)]
pub(crate) mod test_utils;

pub use heartbeat::{HeartbeatConfig, HeartbeatOutcome, SessionHeartbeat};
pub use poller::{FallbackPoller, PollOutcome, PollerConfig, PollerDeps};
