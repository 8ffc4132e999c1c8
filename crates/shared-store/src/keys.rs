//! Key namespace.
//!
//! Every key lives under `NAMESPACE`. Fallback message entries use one key
//! per message: `<prefix><timestamp, zero-padded>:<unique suffix>` so a
//! lexicographic sort is also a chronological sort.

use shared_types::Timestamp;

/// Prefix for every key written by the coordination core.
pub const NAMESPACE: &str = "tabsync:";

/// Leadership record.
pub const LEADER_KEY: &str = "tabsync:leader";

/// Advisory lock written during a leadership claim.
pub const LEADER_LOCK_KEY: &str = "tabsync:leader-lock";

/// Shared refresh in-flight marker.
pub const REFRESH_IN_FLIGHT_KEY: &str = "tabsync:refresh-in-flight";

/// Session metadata snapshot.
pub const SESSION_SNAPSHOT_KEY: &str = "tabsync:session";

/// Prefix of per-message fallback entries.
pub const MESSAGE_PREFIX: &str = "tabsync:msg:";

/// Tab id in context-local storage.
pub const TAB_ID_KEY: &str = "tabsync:tab-id";

/// Device id, shared by every tab of one client.
pub const DEVICE_ID_KEY: &str = "tabsync:device-id";

/// Key holding persisted circuit-breaker state for `store`.
#[must_use]
pub fn breaker_key(store: &str) -> String {
    format!("{NAMESPACE}breaker:{store}")
}

/// Key for one fallback message entry.
#[must_use]
pub fn message_key(timestamp: Timestamp, suffix: &str) -> String {
    format!("{MESSAGE_PREFIX}{timestamp:016}:{suffix}")
}

/// Extract the timestamp from a fallback message key.
#[must_use]
pub fn message_key_timestamp(key: &str) -> Option<Timestamp> {
    key.strip_prefix(MESSAGE_PREFIX)?
        .split(':')
        .next()?
        .parse()
        .ok()
}
