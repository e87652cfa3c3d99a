//! Backup records
//!
//! A [`BackupRecord`] is the metadata kept for every artifact: what was dumped,
//! how it was transformed, where it lives and whether it is usable.

use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{BackupId, DatabaseType};
use crate::credentials::CredentialSpec;
use crate::error::{BackupError, BackupResult};
use crate::transform::{CompressionAlgorithm, CompressionLevel, EncryptionAlgorithm, StageSpec};

/// Kind of backup
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum BackupType {
    #[default]
    Full,
    /// Changes since the previous usable backup of any type
    Incremental,
    /// Changes since the previous usable full backup
    Differential,
}

impl fmt::Display for BackupType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupType::Full => write!(f, "full"),
            BackupType::Incremental => write!(f, "incremental"),
            BackupType::Differential => write!(f, "differential"),
        }
    }
}

impl FromStr for BackupType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "full" => Ok(BackupType::Full),
            "incremental" | "inc" => Ok(BackupType::Incremental),
            "differential" | "diff" => Ok(BackupType::Differential),
            other => Err(format!("unknown backup type '{}'", other)),
        }
    }
}

/// Lifecycle status of a record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackupStatus {
    InProgress,
    Complete,
    Failed,
    Verified,
    Corrupt,
}

impl BackupStatus {
    /// Whether a record may move from `self` to `next`
    ///
    /// `verified` and `corrupt` are only reachable from `complete`. A
    /// verified record may be verified again; `failed` and `corrupt` are final.
    pub fn can_transition_to(self, next: BackupStatus) -> bool {
        use BackupStatus::*;
        matches!(
            (self, next),
            (InProgress, Complete)
                | (InProgress, Failed)
                | (Complete, Verified)
                | (Complete, Corrupt)
                | (Verified, Verified)
        )
    }

    /// Whether the artifact may be restored from
    pub fn is_usable(self) -> bool {
        matches!(self, BackupStatus::Complete | BackupStatus::Verified)
    }
}

impl fmt::Display for BackupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupStatus::InProgress => write!(f, "in_progress"),
            BackupStatus::Complete => write!(f, "complete"),
            BackupStatus::Failed => write!(f, "failed"),
            BackupStatus::Verified => write!(f, "verified"),
            BackupStatus::Corrupt => write!(f, "corrupt"),
        }
    }
}

impl FromStr for BackupStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "in_progress" | "in-progress" => Ok(BackupStatus::InProgress),
            "complete" => Ok(BackupStatus::Complete),
            "failed" => Ok(BackupStatus::Failed),
            "verified" => Ok(BackupStatus::Verified),
            "corrupt" => Ok(BackupStatus::Corrupt),
            other => Err(format!("unknown status '{}'", other)),
        }
    }
}

/// Adapter-specific opaque position marker (e.g. a binlog file and offset)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Checkpoint(String);

impl Checkpoint {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CompressionInfo {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<CompressionAlgorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub level: Option<CompressionLevel>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EncryptionInfo {
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub algorithm: Option<EncryptionAlgorithm>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key_reference: Option<CredentialSpec>,
}

/// Where the artifact is stored
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageLocation {
    pub local_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_uri: Option<String>,
}

/// Metadata for one backup artifact
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupRecord {
    pub id: BackupId,

    /// Name of the configured target
    pub target: String,

    /// Connection descriptor of the target at backup time
    pub target_descriptor: String,

    pub created_at: DateTime<Utc>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub completed_at: Option<DateTime<Utc>>,

    pub database_type: DatabaseType,

    pub backup_type: BackupType,

    /// Backup this one is relative to (incremental/differential only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<BackupId>,

    /// Position this dump started from (incremental/differential only)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_checkpoint: Option<Checkpoint>,

    /// Position reached by this dump; the base for later incrementals
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checkpoint: Option<Checkpoint>,

    pub size_bytes: u64,

    /// SHA-256 of the stored artifact, lowercase hex
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub checksum: Option<String>,

    pub compression: CompressionInfo,

    pub encryption: EncryptionInfo,

    /// Transform stages in the order they were applied
    pub pipeline: Vec<StageSpec>,

    pub storage: StorageLocation,

    pub status: BackupStatus,

    /// Non-fatal problems (e.g. cloud mirror failures)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub warnings: Vec<String>,

    /// Failure cause, for failed records
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub verified_at: Option<DateTime<Utc>>,
}

impl BackupRecord {
    /// Start a new in-progress record
    #[allow(clippy::too_many_arguments)]
    pub fn begin(
        id: BackupId,
        target: impl Into<String>,
        target_descriptor: impl Into<String>,
        created_at: DateTime<Utc>,
        database_type: DatabaseType,
        backup_type: BackupType,
        pipeline: Vec<StageSpec>,
        local_path: PathBuf,
    ) -> Self {
        let (compression, encryption) = describe_pipeline(&pipeline);
        Self {
            id,
            target: target.into(),
            target_descriptor: target_descriptor.into(),
            created_at,
            completed_at: None,
            database_type,
            backup_type,
            parent_id: None,
            base_checkpoint: None,
            checkpoint: None,
            size_bytes: 0,
            checksum: None,
            compression,
            encryption,
            pipeline,
            storage: StorageLocation {
                local_path,
                cloud_uri: None,
            },
            status: BackupStatus::InProgress,
            warnings: Vec::new(),
            error: None,
            verified_at: None,
        }
    }

    /// Move to a new status, rejecting transitions the lifecycle forbids
    pub fn transition(&mut self, next: BackupStatus) -> BackupResult<()> {
        if !self.status.can_transition_to(next) {
            return Err(BackupError::Catalog(format!(
                "Invalid status transition for {}: {} -> {}",
                self.id, self.status, next
            )));
        }
        self.status = next;
        Ok(())
    }

    /// Mark the record complete once the artifact is written and hashed
    pub fn complete(&mut self, checksum: String, size_bytes: u64, at: DateTime<Utc>) -> BackupResult<()> {
        if checksum.is_empty() {
            return Err(BackupError::Catalog(format!(
                "Cannot complete {} without a checksum",
                self.id
            )));
        }
        self.transition(BackupStatus::Complete)?;
        self.checksum = Some(checksum);
        self.size_bytes = size_bytes;
        self.completed_at = Some(at);
        Ok(())
    }

    /// Record that the artifact can no longer be trusted
    ///
    /// A complete record becomes `corrupt`. Other statuses cannot move there,
    /// so they keep their status and only carry the warning. Returns whether
    /// the status changed.
    pub fn flag_corrupt(&mut self, reason: impl Into<String>) -> bool {
        self.warnings.push(reason.into());
        if self.status.can_transition_to(BackupStatus::Corrupt) {
            self.status = BackupStatus::Corrupt;
            true
        } else {
            false
        }
    }

    /// Mark the record failed with the cause
    pub fn fail(&mut self, cause: impl Into<String>) -> BackupResult<()> {
        self.transition(BackupStatus::Failed)?;
        self.error = Some(cause.into());
        Ok(())
    }

    pub fn age_days(&self, now: DateTime<Utc>) -> i64 {
        now.signed_duration_since(self.created_at).num_days()
    }
}

/// Summarize a stage list into the record's compression/encryption fields
pub fn describe_pipeline(stages: &[StageSpec]) -> (CompressionInfo, EncryptionInfo) {
    let mut compression = CompressionInfo::default();
    let mut encryption = EncryptionInfo::default();
    for stage in stages {
        match stage {
            StageSpec::Compress { algorithm, level } => {
                compression = CompressionInfo {
                    enabled: true,
                    algorithm: Some(*algorithm),
                    level: Some(*level),
                };
            }
            StageSpec::Encrypt { algorithm, key, .. } => {
                encryption = EncryptionInfo {
                    enabled: true,
                    algorithm: Some(*algorithm),
                    key_reference: Some(key.clone()),
                };
            }
        }
    }
    (compression, encryption)
}
