//! Election errors.
//!
//! These never escape the elector's public operations; they steer the
//! claim protocol between "stand down" and "degraded mode".

use shared_store::StoreError;
use shared_types::TabId;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ElectionError {
    /// Another tab won the lock or holds a fresh record.
    #[error("leadership held by {holder}")]
    LostRace { holder: TabId },

    /// The shared store could not be used.
    #[error("shared store unavailable: {0}")]
    Store(#[from] StoreError),
}

pub type ElectionResult<T> = Result<T, ElectionError>;
