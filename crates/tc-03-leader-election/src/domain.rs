//! Election domain types.

use serde::{Deserialize, Serialize};
use shared_types::TabId;
use std::fmt;

/// Role of this tab in the election state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ElectionRole {
    #[default]
    Follower,
    Candidate,
    Leader,
}

impl fmt::Display for ElectionRole {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Follower => f.write_str("follower"),
            Self::Candidate => f.write_str("candidate"),
            Self::Leader => f.write_str("leader"),
        }
    }
}

/// Value written to the advisory lock key during a claim.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ClaimToken {
    pub tab_id: TabId,
    pub nonce: String,
}

impl ClaimToken {
    /// Fresh token for `tab_id`.
    #[must_use]
    pub fn new(tab_id: TabId) -> Self {
        Self {
            tab_id,
            nonce: uuid::Uuid::new_v4().simple().to_string(),
        }
    }
}
