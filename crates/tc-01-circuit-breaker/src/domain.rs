//! Persisted breaker state.

use serde::{Deserialize, Serialize};
use shared_types::Timestamp;
use std::fmt;

/// Breaker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum CircuitStatus {
    /// Normal operation - calls pass through.
    #[default]
    Closed,
    /// Store assumed failing - calls fail fast.
    Open,
    /// Cooldown elapsed - one probe allowed.
    HalfOpen,
}

impl fmt::Display for CircuitStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitStatus::Closed => write!(f, "closed"),
            CircuitStatus::Open => write!(f, "open"),
            CircuitStatus::HalfOpen => write!(f, "half-open"),
        }
    }
}

/// `{ status, failures, lastFailure, nextRetry }`, one per guarded store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BreakerState {
    pub status: CircuitStatus,
    pub failures: u32,
    pub last_failure: Timestamp,
    pub next_retry: Timestamp,
}
