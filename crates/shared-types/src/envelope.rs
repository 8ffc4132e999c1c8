//! # `CoordinationMessage` Envelope
//!
//! The single wire schema for cross-tab coordination. The same JSON shape is
//! used by the broker, the channel and store polling:
//!
//! ```text
//! { "type": "tokens:refreshed", "payload": {...}, "timestamp": 1700000000000,
//!   "sourceTabId": "tab-...", "signature": "9f2c..." }
//! ```
//!
//! ## Delivery Rules
//!
//! - A tab never delivers a message whose `source_tab_id` is its own id
//!   (the publishing tab sees its own message through the local echo only).
//! - A message older than the configured timeout is dropped.
//! - `timestamp` is used only for staleness, never for reordering.

use crate::entities::{TabId, Timestamp};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Closed enumeration of coordination message types.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageType {
    /// Session metadata changed.
    #[serde(rename = "session:updated")]
    SessionUpdated,
    /// The session ended; every tab must clear credentials.
    #[serde(rename = "session:expired")]
    SessionExpired,
    /// Credentials were replaced by some other path than a refresh.
    #[serde(rename = "tokens:updated")]
    TokensUpdated,
    /// A refresh completed; payload carries the new expiry.
    #[serde(rename = "tokens:refreshed")]
    TokensRefreshed,
    /// A non-leader asks the leader to refresh.
    #[serde(rename = "tokens:refresh-requested")]
    RefreshRequested,
    /// Authenticated/unauthenticated state flipped.
    #[serde(rename = "auth:state-changed")]
    AuthStateChanged,
    /// Explicit user logout.
    #[serde(rename = "logout")]
    Logout,
    /// Leader heartbeat / claim announcement.
    #[serde(rename = "leader:ping")]
    LeaderPing,
    /// A tab entered candidacy.
    #[serde(rename = "leader:election")]
    LeaderElection,
    /// User interacted with some tab.
    #[serde(rename = "user:activity")]
    UserActivity,
    /// Fallback polling gave up; the UI should prompt re-authentication.
    #[serde(rename = "fallback:failed")]
    FallbackFailed,
}

impl MessageType {
    /// Every member of the enumeration.
    pub const ALL: [MessageType; 11] = [
        MessageType::SessionUpdated,
        MessageType::SessionExpired,
        MessageType::TokensUpdated,
        MessageType::TokensRefreshed,
        MessageType::RefreshRequested,
        MessageType::AuthStateChanged,
        MessageType::Logout,
        MessageType::LeaderPing,
        MessageType::LeaderElection,
        MessageType::UserActivity,
        MessageType::FallbackFailed,
    ];

    /// Wire name of the type.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::SessionUpdated => "session:updated",
            Self::SessionExpired => "session:expired",
            Self::TokensUpdated => "tokens:updated",
            Self::TokensRefreshed => "tokens:refreshed",
            Self::RefreshRequested => "tokens:refresh-requested",
            Self::AuthStateChanged => "auth:state-changed",
            Self::Logout => "logout",
            Self::LeaderPing => "leader:ping",
            Self::LeaderElection => "leader:election",
            Self::UserActivity => "user:activity",
            Self::FallbackFailed => "fallback:failed",
        }
    }

    /// Parse a wire name. Unknown names yield `None`.
    #[must_use]
    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.iter().copied().find(|t| t.as_str() == name)
    }

    /// Types that end the session in every tab.
    #[must_use]
    pub fn is_session_ending(&self) -> bool {
        matches!(self, Self::SessionExpired | Self::Logout)
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// The coordination message envelope.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CoordinationMessage {
    /// Message type.
    #[serde(rename = "type")]
    pub message_type: MessageType,

    /// Free-form payload.
    #[serde(default)]
    pub payload: serde_json::Value,

    /// When the message was created (ms).
    pub timestamp: Timestamp,

    /// Sole authority for the sender's identity.
    pub source_tab_id: TabId,

    /// Hex HMAC-SHA256 over the canonical form, when a secret is configured.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub signature: Option<String>,
}

impl CoordinationMessage {
    /// Build an unsigned message.
    #[must_use]
    pub fn new(
        message_type: MessageType,
        payload: serde_json::Value,
        source_tab_id: TabId,
        timestamp: Timestamp,
    ) -> Self {
        Self {
            message_type,
            payload,
            timestamp,
            source_tab_id,
            signature: None,
        }
    }

    /// Age of the message relative to `now` (zero for future timestamps).
    #[must_use]
    pub fn age_ms(&self, now: Timestamp) -> u64 {
        now.saturating_sub(self.timestamp)
    }

    /// True if the message is older than `max_age_ms`.
    #[must_use]
    pub fn is_stale(&self, now: Timestamp, max_age_ms: u64) -> bool {
        self.age_ms(now) > max_age_ms
    }

    /// True if the message was sent by `tab_id`.
    #[must_use]
    pub fn is_from(&self, tab_id: &TabId) -> bool {
        &self.source_tab_id == tab_id
    }

    /// Canonical bytes covered by the signature: the JSON encoding of the
    /// message with `signature` removed.
    #[must_use]
    pub fn canonical_bytes(&self) -> Vec<u8> {
        let unsigned = Self {
            signature: None,
            ..self.clone()
        };
        serde_json::to_vec(&unsigned).unwrap_or_default()
    }
}
