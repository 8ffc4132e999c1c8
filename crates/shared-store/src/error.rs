//! Store error types.

use shared_types::Timestamp;
use thiserror::Error;

/// Errors from shared store operations.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StoreError {
    /// The store is disabled or unreachable.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// Write rejected because the storage quota is exhausted.
    #[error("Storage quota exceeded")]
    QuotaExceeded,

    /// Filesystem failure.
    #[error("I/O error: {0}")]
    Io(String),

    /// A stored value could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// The circuit breaker guarding this store is open.
    #[error("Circuit open for store {store}, next retry at {next_retry}")]
    CircuitOpen { store: String, next_retry: Timestamp },
}

impl StoreError {
    /// True if the error came from the breaker rather than the store.
    #[must_use]
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, StoreError::CircuitOpen { .. })
    }
}

impl From<std::io::Error> for StoreError {
    fn from(e: std::io::Error) -> Self {
        StoreError::Io(e.to_string())
    }
}

impl From<serde_json::Error> for StoreError {
    fn from(e: serde_json::Error) -> Self {
        StoreError::Serialization(e.to_string())
    }
}

/// Result type for store operations.
pub type StoreResult<T> = Result<T, StoreError>;
