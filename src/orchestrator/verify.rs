//! Artifact verification
//!
//! Verify never touches the artifact. It only moves a `complete` record to
//! `verified` or `corrupt`, or re-verifies a `verified` one. A failure to
//! decrypt an artifact whose checksum matches is a key problem, not
//! corruption, and leaves the record alone.

use std::io;
use std::time::Instant;

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::{info, warn};

use super::{elapsed_ms, Orchestrator};
use crate::error::{BackupError, BackupResult};
use crate::journal::{JournalEntry, JournalEvent};
use crate::models::{BackupId, BackupRecord, BackupStatus};
use crate::notify::{OperationKind, OutcomePayload, OutcomeStatus};
use crate::storage::sha256_reader;
use crate::transform::{classify, ByteStream, CancelToken, CancellableReader, TransformChain};

/// Result of verifying one backup
#[derive(Debug, Clone, Serialize)]
pub struct VerifyReport {
    pub id: BackupId,
    pub target: String,
    /// Record status after verification
    pub status: BackupStatus,
    pub expected_checksum: Option<String>,
    pub actual_checksum: Option<String>,
    /// Whether a trial decrypt/decompress ran and succeeded
    pub trial_passed: Option<bool>,
    /// Why the backup is corrupt, if it is
    pub error: Option<String>,
    pub verified_at: Option<DateTime<Utc>>,
}

impl VerifyReport {
    pub fn is_ok(&self) -> bool {
        self.status == BackupStatus::Verified && self.error.is_none()
    }
}

impl<'a> Orchestrator<'a> {
    /// Re-check a backup's checksum and, with `trial`, decrypt and
    /// decompress it without loading anything
    ///
    /// A corrupt backup is a successful verification with a failing report;
    /// errors are reserved for backups that cannot be checked at all,
    /// including a trial decrypt with the wrong key.
    pub fn verify(&self, id: &BackupId, trial: bool, token: &CancelToken) -> BackupResult<VerifyReport> {
        let started = Instant::now();
        let record = self.catalog.get(id)?;
        if !matches!(
            record.status,
            BackupStatus::Complete | BackupStatus::Verified | BackupStatus::Corrupt
        ) {
            return Err(BackupError::Precondition(format!(
                "Backup {} is {} and has nothing to verify",
                id, record.status
            )));
        }

        let mut report = VerifyReport {
            id: id.clone(),
            target: record.target.clone(),
            status: record.status,
            expected_checksum: record.checksum.clone(),
            actual_checksum: None,
            trial_passed: None,
            error: None,
            verified_at: record.verified_at,
        };
        let problem = match self.inspect(&record, trial, token, &mut report) {
            Ok(problem) => problem,
            Err(e) => {
                warn!(id = %id, error = %e, "verify could not check backup; status unchanged");
                return Err(e);
            }
        };

        let updated = match &problem {
            Some(reason) => self.catalog.update(id, |r| {
                r.flag_corrupt(format!("verify: {}", reason));
                Ok(())
            })?,
            None if record.status.can_transition_to(BackupStatus::Verified) => {
                self.catalog.update(id, |r| {
                    r.transition(BackupStatus::Verified)?;
                    r.verified_at = Some(Utc::now());
                    Ok(())
                })?
            }
            // Corrupt is final even if the artifact checks out now
            None => record.clone(),
        };
        report.status = updated.status;
        report.verified_at = updated.verified_at;
        report.error = problem;

        info!(id = %id, status = %report.status, trial, "verify finished");
        self.journal.record(
            JournalEntry::new(JournalEvent::Verified)
                .target(record.target.clone())
                .backup(id)
                .details(json!({
                    "status": report.status,
                    "trial": trial,
                    "trial_passed": report.trial_passed,
                    "error": report.error,
                })),
        );
        self.notify(OutcomePayload {
            operation: OperationKind::Verify,
            target: record.target.clone(),
            backup_id: Some(id.clone()),
            status: if report.is_ok() {
                OutcomeStatus::Success
            } else {
                OutcomeStatus::Failure
            },
            stage: None,
            message: report.error.clone(),
            size_bytes: Some(record.size_bytes),
            duration_ms: elapsed_ms(started),
            warnings: Vec::new(),
        });
        Ok(report)
    }

    /// Run the checks, returning what is wrong with the artifact
    fn inspect(
        &self,
        record: &BackupRecord,
        trial: bool,
        token: &CancelToken,
        report: &mut VerifyReport,
    ) -> BackupResult<Option<String>> {
        let Some(stream) = self.open_stored(record)? else {
            return Ok(Some("artifact missing".into()));
        };
        let (actual, _) = sha256_reader(CancellableReader::new(stream, token.clone()))
            .map_err(|e| classify(e, |e| BackupError::Io(format!("Failed to read artifact: {}", e))))?;
        let matches = record.checksum.as_deref() == Some(actual.as_str());
        report.actual_checksum = Some(actual);
        if !matches {
            return Ok(Some("checksum mismatch".into()));
        }
        if !trial {
            return Ok(None);
        }

        let chain = TransformChain::prepare(&record.pipeline, &self.resolver)?;
        let Some(stream) = self.open_stored(record)? else {
            return Ok(Some("artifact missing".into()));
        };
        let mut reversed = chain.reverse(Box::new(CancellableReader::new(stream, token.clone())));
        match io::copy(&mut reversed, &mut io::sink())
            .map_err(|e| classify(e, |e| BackupError::TransformFailed(e.to_string())))
        {
            Ok(_) => {
                report.trial_passed = Some(true);
                Ok(None)
            }
            Err(e @ BackupError::TransformFailed(_)) => {
                report.trial_passed = Some(false);
                Ok(Some(e.to_string()))
            }
            // The checksum matched, so an authentication failure means the
            // key is wrong rather than the artifact
            Err(e) => Err(e),
        }
    }

    /// The stored artifact, from local disk or the mirror
    fn open_stored(&self, record: &BackupRecord) -> BackupResult<Option<ByteStream>> {
        if record.storage.local_path.exists() {
            let file = self.store.open(&record.storage.local_path)?;
            return Ok(Some(Box::new(file)));
        }
        match (&self.mirror, &record.storage.cloud_uri) {
            (Some(mirror), Some(_)) => match mirror.get(&record.id.artifact_file_name()) {
                Ok(stream) => Ok(Some(stream)),
                Err(e) if e.is_not_found() => Ok(None),
                Err(e) => Err(e),
            },
            _ => Ok(None),
        }
    }
}
