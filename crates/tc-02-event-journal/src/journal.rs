//! Ring-buffer journal.

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use shared_types::{CoordinationMessage, MessageType, Timestamp};
use std::collections::VecDeque;
use std::sync::Arc;

/// Default number of entries kept.
pub const DEFAULT_CAPACITY: usize = 50;

/// One recorded event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct JournalEntry {
    #[serde(rename = "type")]
    pub event_type: MessageType,
    pub timestamp: Timestamp,
    pub payload: serde_json::Value,
    /// Tab id of the sender, or a local component name.
    pub source: String,
}

impl JournalEntry {
    /// Record a coordination message.
    #[must_use]
    pub fn from_message(message: &CoordinationMessage) -> Self {
        Self {
            event_type: message.message_type,
            timestamp: message.timestamp,
            payload: message.payload.clone(),
            source: message.source_tab_id.to_string(),
        }
    }
}

/// Bounded most-recent-first event list.
#[derive(Debug)]
pub struct EventJournal {
    capacity: usize,
    /// Front is newest.
    entries: VecDeque<JournalEntry>,
}

impl EventJournal {
    /// Journal with `DEFAULT_CAPACITY`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Journal holding at most `capacity` entries (minimum 1).
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: VecDeque::with_capacity(capacity),
        }
    }

    /// Insert an entry, evicting the oldest once over capacity.
    pub fn record(&mut self, entry: JournalEntry) {
        self.entries.push_front(entry);
        if self.entries.len() > self.capacity {
            self.entries.pop_back();
        }
    }

    /// Entries, newest first.
    pub fn recent(&self) -> impl Iterator<Item = &JournalEntry> {
        self.entries.iter()
    }

    /// Entries of `event_type`, oldest first, for replay.
    #[must_use]
    pub fn replay(&self, event_type: Option<MessageType>) -> Vec<JournalEntry> {
        self.entries
            .iter()
            .rev()
            .filter(|e| event_type.map_or(true, |t| e.event_type == t))
            .cloned()
            .collect()
    }

    /// Most recent entry of `event_type`.
    #[must_use]
    pub fn latest(&self, event_type: MessageType) -> Option<&JournalEntry> {
        self.entries.iter().find(|e| e.event_type == event_type)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    #[must_use]
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

impl Default for EventJournal {
    fn default() -> Self {
        Self::new()
    }
}

/// Journal shared between the bus and the coordinator of one tab.
#[derive(Debug, Clone, Default)]
pub struct SharedJournal {
    inner: Arc<Mutex<EventJournal>>,
}

impl SharedJournal {
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            inner: Arc::new(Mutex::new(EventJournal::with_capacity(capacity))),
        }
    }

    pub fn record(&self, entry: JournalEntry) {
        self.inner.lock().record(entry);
    }

    pub fn record_message(&self, message: &CoordinationMessage) {
        self.record(JournalEntry::from_message(message));
    }

    /// Copy of all entries, newest first.
    #[must_use]
    pub fn snapshot(&self) -> Vec<JournalEntry> {
        self.inner.lock().recent().cloned().collect()
    }

    #[must_use]
    pub fn replay(&self, event_type: Option<MessageType>) -> Vec<JournalEntry> {
        self.inner.lock().replay(event_type)
    }

    #[must_use]
    pub fn latest(&self, event_type: MessageType) -> Option<JournalEntry> {
        self.inner.lock().latest(event_type).cloned()
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.inner.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.inner.lock().is_empty()
    }
}
