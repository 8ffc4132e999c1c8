//! # Error Types
//!
//! Errors shared across coordination subsystems.

use crate::entities::Timestamp;
use thiserror::Error;

/// Reasons an inbound coordination message is rejected.
///
/// None of these are surfaced to the user: rejected messages are
/// discarded silently apart from a debug log line.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MessageError {
    /// The message originated from this tab.
    #[error("Message from own tab")]
    FromSelf,

    /// The message is older than the delivery timeout.
    #[error("Stale message: timestamp {timestamp} older than {max_age_ms}ms")]
    Stale { timestamp: Timestamp, max_age_ms: u64 },

    /// The message claims to come from too far in the future.
    #[error("Message from the future: timestamp {timestamp} beyond skew {max_skew_ms}ms")]
    FromFuture { timestamp: Timestamp, max_skew_ms: u64 },

    /// Same message already delivered within the timeout window.
    #[error("Duplicate message")]
    Duplicate,

    /// Signature missing or not matching the shared secret.
    #[error("Invalid signature")]
    InvalidSignature,

    /// Frame could not be decoded.
    #[error("Malformed message: {0}")]
    Malformed(String),
}

/// Errors from the remote session API.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SessionApiError {
    /// 401-class response: credentials are no longer accepted.
    #[error("Unauthorized")]
    Unauthorized,

    /// Any other non-success HTTP status.
    #[error("HTTP status {status}")]
    Status { status: u16 },

    /// The request never produced a response.
    #[error("Transport error: {0}")]
    Transport(String),

    /// The response body could not be decoded.
    #[error("Decode error: {0}")]
    Decode(String),
}

impl SessionApiError {
    /// True for 401-class failures.
    #[must_use]
    pub fn is_unauthorized(&self) -> bool {
        matches!(self, SessionApiError::Unauthorized)
    }
}
