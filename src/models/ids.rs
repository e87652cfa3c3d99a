//! Backup identifiers
//!
//! Ids are time-derived: `<target>-<YYYYMMDD-HHMMSS-mmm>-<8 hex>`. They sort by
//! creation time within a target and double as the artifact file stem.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::BackupError;

/// File extension of committed artifacts
pub const ARTIFACT_EXTENSION: &str = "dbk";

/// Suffix appended to artifacts that are still being written
pub const PARTIAL_SUFFIX: &str = "partial";

/// Unique identifier of a backup record and its artifact
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BackupId(String);

impl BackupId {
    /// Generate a new id for a backup of `target` started at `at`
    pub fn generate(target: &str, at: DateTime<Utc>) -> Self {
        let stem: String = target
            .chars()
            .map(|c| if is_id_char(c) { c } else { '_' })
            .collect();
        let suffix = Uuid::new_v4().simple().to_string();
        Self(format!(
            "{}-{}-{}",
            stem,
            at.format("%Y%m%d-%H%M%S-%3f"),
            &suffix[..8]
        ))
    }

    /// Parse an id supplied by a user or read from disk
    pub fn parse(s: &str) -> Result<Self, BackupError> {
        let s = s.trim();
        if s.is_empty() || !s.chars().all(is_id_char) || s.starts_with('.') {
            return Err(BackupError::Config(format!("Invalid backup id: '{}'", s)));
        }
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// File name of the committed artifact
    pub fn artifact_file_name(&self) -> String {
        format!("{}.{}", self.0, ARTIFACT_EXTENSION)
    }

    /// File name of the artifact while it is being written
    pub fn partial_file_name(&self) -> String {
        format!("{}.{}.{}", self.0, ARTIFACT_EXTENSION, PARTIAL_SUFFIX)
    }
}

fn is_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

impl fmt::Display for BackupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for BackupId {
    type Err = BackupError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}
