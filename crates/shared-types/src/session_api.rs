//! # Remote Session API Port
//!
//! Driven port for the server-side session endpoints. The coordination
//! core only consumes it; the HTTP adapter lives in `coordinator-runtime`.
//!
//! | Operation | Endpoint |
//! |-----------|----------|
//! | `events_since` | `GET events?since=<ts>` |
//! | `heartbeat` | session heartbeat |
//! | `refresh_tokens` | token refresh |
//! | `validate_session` | session validate |
//!
//! Every call carries the device id, tab id and leadership flag from the
//! `RequestContext`, plus the anti-forgery token when one is known.

use crate::entities::{TabId, Timestamp};
use crate::errors::SessionApiError;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// Per-request identity headers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestContext {
    /// Stable device identifier.
    pub device_id: String,
    /// Calling tab.
    pub tab_id: TabId,
    /// Whether the calling tab believes it is leader.
    pub is_leader: bool,
    /// Anti-forgery token, when the session has one.
    pub csrf_token: Option<String>,
}

/// A server-originated auth event returned by the events endpoint.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServerEvent {
    /// Wire name of the event (`session:expired`, `logout`, ...).
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    #[serde(default)]
    pub payload: serde_json::Value,
    /// Server timestamp (ms).
    pub timestamp: Timestamp,
}

/// Result of a successful credential refresh.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TokenGrant {
    /// Expiry of the new access credential (ms).
    pub expires_at: Timestamp,
    /// Rotated anti-forgery token, if the server issued one.
    #[serde(default)]
    pub csrf_token: Option<String>,
}

/// Result of session validation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
    /// Whether the session is still valid.
    pub valid: bool,
    /// Expiry of the current access credential, if valid.
    #[serde(default)]
    pub expires_at: Option<Timestamp>,
    /// Server-side user identifier.
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Remote session API.
#[async_trait]
pub trait SessionApi: Send + Sync {
    /// Fetch server auth events newer than `since`.
    async fn events_since(
        &self,
        ctx: &RequestContext,
        since: Timestamp,
    ) -> Result<Vec<ServerEvent>, SessionApiError>;

    /// Keep the server-side session alive.
    async fn heartbeat(&self, ctx: &RequestContext) -> Result<(), SessionApiError>;

    /// Exchange the refresh credential for a new access credential.
    async fn refresh_tokens(&self, ctx: &RequestContext) -> Result<TokenGrant, SessionApiError>;

    /// Ask the server whether the session is still valid.
    async fn validate_session(&self, ctx: &RequestContext)
        -> Result<SessionStatus, SessionApiError>;
}
