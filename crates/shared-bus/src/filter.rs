//! Subscription filters.

use shared_types::{CoordinationMessage, MessageType};

/// Filter for subscribing to specific message types.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct EventFilter {
    /// Types to include. Empty means all types.
    pub types: Vec<MessageType>,
}

impl EventFilter {
    /// Accept every message.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    /// Accept only the listed types.
    #[must_use]
    pub fn types(types: Vec<MessageType>) -> Self {
        Self { types }
    }

    /// Check if a message matches this filter.
    #[must_use]
    pub fn matches(&self, message: &CoordinationMessage) -> bool {
        self.matches_type(message.message_type)
    }

    /// Check if a message type matches this filter.
    #[must_use]
    pub fn matches_type(&self, message_type: MessageType) -> bool {
        self.types.is_empty() || self.types.contains(&message_type)
    }
}

impl From<MessageType> for EventFilter {
    fn from(message_type: MessageType) -> Self {
        Self {
            types: vec![message_type],
        }
    }
}

impl From<Vec<MessageType>> for EventFilter {
    fn from(types: Vec<MessageType>) -> Self {
        Self { types }
    }
}
