//! # tc-02-event-journal
//!
//! Fixed-capacity, most-recent-first record of the last coordination
//! events seen by a tab. Used for diagnostics and to replay recent events
//! to subscribers that attach late.
//!
//! Entirely in memory; lives as long as the owning tab.

pub mod journal;

pub use journal::{EventJournal, JournalEntry, SharedJournal, DEFAULT_CAPACITY};
