//! Journal entry data structures

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::models::BackupId;

/// Kinds of journaled event
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JournalEvent {
    BackupStarted,
    BackupCompleted,
    BackupFailed,
    RestoreStarted,
    RestoreCompleted,
    RestoreFailed,
    Verified,
    Evicted,
    Reconciled,
}

impl std::fmt::Display for JournalEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            JournalEvent::BackupStarted => "BACKUP_STARTED",
            JournalEvent::BackupCompleted => "BACKUP_COMPLETED",
            JournalEvent::BackupFailed => "BACKUP_FAILED",
            JournalEvent::RestoreStarted => "RESTORE_STARTED",
            JournalEvent::RestoreCompleted => "RESTORE_COMPLETED",
            JournalEvent::RestoreFailed => "RESTORE_FAILED",
            JournalEvent::Verified => "VERIFIED",
            JournalEvent::Evicted => "EVICTED",
            JournalEvent::Reconciled => "RECONCILED",
        };
        f.write_str(s)
    }
}

/// A single journal line
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JournalEntry {
    /// When the event occurred (UTC)
    pub timestamp: DateTime<Utc>,

    pub event: JournalEvent,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub backup_id: Option<BackupId>,

    /// Stage a failure occurred in
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stage: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,

    /// Event-specific data (sizes, statuses, reconciliation counts)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub details: Option<serde_json::Value>,
}

impl JournalEntry {
    pub fn new(event: JournalEvent) -> Self {
        Self {
            timestamp: Utc::now(),
            event,
            target: None,
            backup_id: None,
            stage: None,
            message: None,
            details: None,
        }
    }

    pub fn target(mut self, target: impl Into<String>) -> Self {
        self.target = Some(target.into());
        self
    }

    pub fn backup(mut self, id: &BackupId) -> Self {
        self.backup_id = Some(id.clone());
        self
    }

    pub fn stage(mut self, stage: Option<&str>) -> Self {
        self.stage = stage.map(str::to_string);
        self
    }

    pub fn message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = Some(details);
        self
    }

    /// One-line human-readable summary
    pub fn format_human_readable(&self) -> String {
        let mut line = format!(
            "[{}] {}",
            self.timestamp.format("%Y-%m-%d %H:%M:%S UTC"),
            self.event
        );
        if let Some(target) = &self.target {
            line.push_str(&format!(" {}", target));
        }
        if let Some(id) = &self.backup_id {
            line.push_str(&format!(" ({})", id));
        }
        if let Some(stage) = &self.stage {
            line.push_str(&format!(" at {}", stage));
        }
        if let Some(message) = &self.message {
            line.push_str(&format!(": {}", message));
        }
        line
    }
}
