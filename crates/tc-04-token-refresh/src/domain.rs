//! Refresh domain types.

use serde::{Deserialize, Serialize};
use shared_types::{TabId, Timestamp};

/// Shared in-flight flag written to the store while a network refresh runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct InFlightMarker {
    pub tab_id: TabId,
    pub started_at: Timestamp,
    /// Flight id local to `tab_id`.
    pub flight: u64,
}

impl InFlightMarker {
    /// True if another tab started a refresh within `ttl_ms`.
    #[must_use]
    pub fn is_foreign_and_fresh(&self, tab_id: &TabId, now: Timestamp, ttl_ms: u64) -> bool {
        &self.tab_id != tab_id && now.saturating_sub(self.started_at) <= ttl_ms
    }
}
