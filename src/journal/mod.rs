//! Operation journal
//!
//! An append-only JSONL record of every backup, restore, verification,
//! eviction and reconciliation, kept in the log directory next to the
//! tracing output.

mod entry;
mod logger;

pub use entry::{JournalEntry, JournalEvent};
pub use logger::{Journal, JOURNAL_FILE};
