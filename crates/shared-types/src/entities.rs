//! # Core Entities
//!
//! Identity and record types persisted in the shared store or carried in
//! message payloads.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Milliseconds since the Unix epoch.
pub type Timestamp = u64;

/// Opaque identity of one tab.
///
/// Generated once per execution context and kept in context-local storage
/// so reloads of the same context keep the same id. Never reused across
/// contexts.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TabId(String);

impl TabId {
    /// Generate a fresh random tab id.
    #[must_use]
    pub fn generate() -> Self {
        Self(format!("tab-{}", Uuid::new_v4().simple()))
    }

    /// Borrow the id as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<String> for TabId {
    fn from(value: String) -> Self {
        Self(value)
    }
}

impl From<&str> for TabId {
    fn from(value: &str) -> Self {
        Self(value.to_string())
    }
}

impl fmt::Display for TabId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The leadership record stored under one well-known key.
///
/// Mutated only by the leader elector; never deleted, only overwritten on
/// renewal or after it has gone stale.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LeadershipRecord {
    /// Tab that claimed or last renewed leadership.
    pub tab_id: TabId,
    /// When the claim or renewal was written.
    pub timestamp: Timestamp,
}

impl LeadershipRecord {
    /// Create a record for `tab_id` written at `now`.
    #[must_use]
    pub fn new(tab_id: TabId, now: Timestamp) -> Self {
        Self {
            tab_id,
            timestamp: now,
        }
    }

    /// A record older than `staleness_ms` has expired and may be overwritten.
    #[must_use]
    pub fn is_expired(&self, now: Timestamp, staleness_ms: u64) -> bool {
        now.saturating_sub(self.timestamp) > staleness_ms
    }

    /// True if the record is held by `tab_id` and still fresh.
    #[must_use]
    pub fn is_held_by(&self, tab_id: &TabId, now: Timestamp, staleness_ms: u64) -> bool {
        &self.tab_id == tab_id && !self.is_expired(now, staleness_ms)
    }
}

/// Snapshot of session metadata written under the session key.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionSnapshot {
    /// Whether the server considers the session valid.
    pub authenticated: bool,
    /// Expiry of the current access credential, if known.
    pub expires_at: Option<Timestamp>,
    /// Server-side user identifier, if known.
    pub user_id: Option<String>,
    /// When this snapshot was taken.
    pub updated_at: Timestamp,
}
