//! Read-only view of leadership for leader-gated subsystems.

use crate::domain::ElectionRole;
use shared_types::TabId;
use tokio::sync::watch;

/// What refresh, polling and heartbeat need to know about leadership.
pub trait LeadershipView: Send + Sync {
    fn is_leader(&self) -> bool;

    /// Tab currently believed to lead, if any.
    fn leader_id(&self) -> Option<TabId>;

    /// Observe role transitions.
    fn watch_role(&self) -> watch::Receiver<ElectionRole>;
}
