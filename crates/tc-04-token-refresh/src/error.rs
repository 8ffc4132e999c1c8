//! Refresh errors.
//!
//! `RefreshCoordinator::refresh` reports only `bool`; these reach the logs.

use shared_types::SessionApiError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum RefreshError {
    /// The refresh endpoint failed or rejected the credential.
    #[error("refresh rejected: {0}")]
    Rejected(#[from] SessionApiError),

    /// No tab answered a refresh request in time.
    #[error("no refresh broadcast within {waited_ms}ms")]
    NoAnswer { waited_ms: u64 },

    /// The session ended while the refresh was in flight.
    #[error("session ended during refresh")]
    SessionEnded,
}
