//! Append-only journal writer
//!
//! Each entry is written as a single JSON line and flushed immediately.

use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use crate::error::{BackupError, BackupResult};

use super::entry::JournalEntry;

/// File name of the journal inside the log directory
pub const JOURNAL_FILE: &str = "journal.jsonl";

/// Writes journal entries to `journal.jsonl`
///
/// Writes from concurrent workers are serialized so lines never interleave.
pub struct Journal {
    log_path: PathBuf,
    write_lock: Mutex<()>,
}

impl Journal {
    /// Journal in `log_dir`
    pub fn in_dir(log_dir: &Path) -> Self {
        Self::new(log_dir.join(JOURNAL_FILE))
    }

    pub fn new(log_path: PathBuf) -> Self {
        Self {
            log_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Append an entry
    pub fn log(&self, entry: &JournalEntry) -> BackupResult<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|p| p.into_inner());

        if let Some(parent) = self.log_path.parent() {
            fs::create_dir_all(parent)
                .map_err(|e| BackupError::Io(format!("Failed to create log directory: {}", e)))?;
        }

        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_path)
            .map_err(|e| BackupError::Io(format!("Failed to open journal: {}", e)))?;

        let json = serde_json::to_string(entry)
            .map_err(|e| BackupError::Json(format!("Failed to serialize journal entry: {}", e)))?;

        writeln!(file, "{}", json)
            .map_err(|e| BackupError::Io(format!("Failed to write journal entry: {}", e)))?;

        file.flush()
            .map_err(|e| BackupError::Io(format!("Failed to flush journal: {}", e)))?;

        Ok(())
    }

    /// Append an entry, logging a warning if it cannot be written
    pub fn record(&self, entry: JournalEntry) {
        if let Err(e) = self.log(&entry) {
            tracing::warn!(error = %e, event = %entry.event, "failed to write journal entry");
        }
    }

    /// Read all entries, oldest first
    pub fn read_all(&self) -> BackupResult<Vec<JournalEntry>> {
        if !self.log_path.exists() {
            return Ok(Vec::new());
        }

        let file = File::open(&self.log_path)
            .map_err(|e| BackupError::Io(format!("Failed to open journal: {}", e)))?;

        let reader = BufReader::new(file);
        let mut entries = Vec::new();

        for (line_num, line) in reader.lines().enumerate() {
            let line = line.map_err(|e| {
                BackupError::Io(format!("Failed to read journal line {}: {}", line_num + 1, e))
            })?;

            if line.trim().is_empty() {
                continue;
            }

            let entry: JournalEntry = serde_json::from_str(&line).map_err(|e| {
                BackupError::Json(format!(
                    "Failed to parse journal entry at line {}: {}",
                    line_num + 1,
                    e
                ))
            })?;

            entries.push(entry);
        }

        Ok(entries)
    }

    /// Read the most recent N entries
    pub fn read_recent(&self, count: usize) -> BackupResult<Vec<JournalEntry>> {
        let all_entries = self.read_all()?;
        let start = all_entries.len().saturating_sub(count);
        Ok(all_entries[start..].to_vec())
    }

    pub fn path(&self) -> &Path {
        &self.log_path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::JournalEvent;
    use tempfile::TempDir;

    #[test]
    fn test_log_and_read_back() {
        let temp_dir = TempDir::new().unwrap();
        let journal = Journal::in_dir(&temp_dir.path().join("logs"));

        journal
            .log(&JournalEntry::new(JournalEvent::BackupStarted).target("a"))
            .unwrap();
        journal.record(JournalEntry::new(JournalEvent::BackupCompleted).target("a"));

        let entries = journal.read_all().unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[1].event, JournalEvent::BackupCompleted);
        assert_eq!(journal.read_recent(1).unwrap().len(), 1);
    }

    #[test]
    fn test_missing_journal_is_empty() {
        let temp_dir = TempDir::new().unwrap();
        let journal = Journal::in_dir(temp_dir.path());
        assert!(journal.read_all().unwrap().is_empty());
    }

    #[test]
    fn test_concurrent_writes_do_not_interleave() {
        let temp_dir = TempDir::new().unwrap();
        let journal = Journal::in_dir(temp_dir.path());

        std::thread::scope(|s| {
            for t in 0..4 {
                let journal = &journal;
                s.spawn(move || {
                    for _ in 0..25 {
                        journal.record(
                            JournalEntry::new(JournalEvent::Verified).target(format!("t{}", t)),
                        );
                    }
                });
            }
        });

        assert_eq!(journal.read_all().unwrap().len(), 100);
    }
}
