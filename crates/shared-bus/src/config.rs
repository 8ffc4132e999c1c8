//! Bus configuration.

use std::time::Duration;

/// Message bus configuration.
#[derive(Debug, Clone)]
pub struct BusConfig {
    /// Inbound messages older than this are dropped.
    pub message_timeout: Duration,
    /// Inbound messages further than this in the future are dropped.
    pub max_future_skew: Duration,
    /// Interval of the liveness probe / promotion attempt.
    pub liveness_interval: Duration,
    /// Poll interval of the storage transport.
    pub storage_poll_interval: Duration,
    /// Fallback message entries kept in the shared store.
    pub max_fallback_entries: usize,
    /// Shared secret for message signatures. `None` disables signing.
    pub signing_secret: Option<Vec<u8>>,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            message_timeout: Duration::from_secs(30),
            max_future_skew: Duration::from_secs(5),
            liveness_interval: Duration::from_secs(30),
            storage_poll_interval: Duration::from_millis(500),
            max_fallback_entries: 10,
            signing_secret: None,
        }
    }
}
