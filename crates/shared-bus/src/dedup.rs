//! # Recent Message Cache
//!
//! Suppresses duplicate deliveries of the same message, e.g. when store
//! polling and a change notification both surface one entry.
//!
//! ## Design
//!
//! - Messages are identified by the SHA-256 of their canonical bytes.
//! - A digest is remembered for the message timeout window; anything older
//!   is rejected as stale before it ever reaches this cache, so the window
//!   bounds memory.
//! - Garbage collection runs at most once per `gc_interval`.

use shared_types::{CoordinationMessage, Timestamp};
use sha2::{Digest, Sha256};
use std::collections::HashMap;

/// 32-byte message digest.
pub type MessageDigest = [u8; 32];

/// Time-bounded set of recently delivered message digests.
#[derive(Debug)]
pub struct RecentMessageCache {
    /// Digest -> time first seen.
    seen: HashMap<MessageDigest, Timestamp>,
    /// How long a digest is remembered.
    window_ms: u64,
    /// Last garbage collection.
    last_gc: Timestamp,
    /// Minimum gap between garbage collections.
    gc_interval_ms: u64,
}

impl RecentMessageCache {
    /// Default garbage collection interval.
    pub const DEFAULT_GC_INTERVAL_MS: u64 = 10_000;

    /// Create a cache remembering digests for `window_ms`.
    #[must_use]
    pub fn new(window_ms: u64) -> Self {
        Self {
            seen: HashMap::new(),
            window_ms,
            last_gc: 0,
            gc_interval_ms: Self::DEFAULT_GC_INTERVAL_MS,
        }
    }

    /// Digest of a message (signature excluded).
    #[must_use]
    pub fn digest(message: &CoordinationMessage) -> MessageDigest {
        Sha256::digest(message.canonical_bytes()).into()
    }

    /// Record `message` as delivered.
    ///
    /// Returns `true` if it had not been seen within the window.
    pub fn check_and_insert(&mut self, message: &CoordinationMessage, now: Timestamp) -> bool {
        if now.saturating_sub(self.last_gc) > self.gc_interval_ms {
            self.garbage_collect(now);
            self.last_gc = now;
        }

        let digest = Self::digest(message);
        if let Some(&seen_at) = self.seen.get(&digest) {
            if now.saturating_sub(seen_at) <= self.window_ms {
                return false;
            }
        }
        self.seen.insert(digest, now);
        true
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.seen.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.seen.is_empty()
    }

    fn garbage_collect(&mut self, now: Timestamp) {
        let window = self.window_ms;
        self.seen
            .retain(|_, &mut seen_at| now.saturating_sub(seen_at) <= window);
    }
}
