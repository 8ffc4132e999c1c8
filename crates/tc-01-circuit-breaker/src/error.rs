//! Breaker errors.

use shared_store::StoreError;
use shared_types::Timestamp;
use thiserror::Error;

/// Returned without touching the store while the breaker is open.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("Circuit open for {store}, next retry at {next_retry}")]
pub struct CircuitOpenError {
    /// Guarded store name.
    pub store: String,
    /// Earliest time a probe will be let through.
    pub next_retry: Timestamp,
}

impl From<CircuitOpenError> for StoreError {
    fn from(e: CircuitOpenError) -> Self {
        StoreError::CircuitOpen {
            store: e.store,
            next_retry: e.next_retry,
        }
    }
}

/// Outcome of a guarded operation that did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum GuardError<E> {
    /// The operation was not attempted.
    #[error(transparent)]
    Open(#[from] CircuitOpenError),

    /// The operation ran and failed.
    #[error("Guarded operation failed: {0}")]
    Inner(E),
}

impl<E> GuardError<E> {
    /// True if the breaker rejected the call.
    #[must_use]
    pub fn is_open(&self) -> bool {
        matches!(self, GuardError::Open(_))
    }
}
