//! Restore state machine
//!
//! `Pending -> Fetching -> Reversing -> Loading -> Complete`. Every link of
//! the backup's chain is checksummed and fully reversed into the staging
//! directory before anything is sent to the database.

use std::fs::{self, File};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

use serde_json::json;
use tracing::{info, warn};

use super::state::{RestoreState, StateTracker};
use super::{elapsed_ms, Orchestrator};
use crate::adapters::{adapter_for, ConnectParams, DatabaseAdapter};
use crate::error::{BackupError, BackupResult};
use crate::journal::{JournalEntry, JournalEvent};
use crate::models::{BackupId, BackupRecord};
use crate::notify::{OperationKind, OutcomePayload, OutcomeStatus};
use crate::storage::{checksum_file, LocalStore};
use crate::transform::{CancelToken, CancellableReader, TransformChain};

/// A finished restore
#[derive(Debug)]
pub struct RestoreOutcome {
    pub id: BackupId,
    /// Target the data was loaded into
    pub target: String,
    /// Backups loaded, root of the chain first
    pub restored: Vec<BackupId>,
    pub bytes_loaded: u64,
    pub duration: Duration,
}

/// Scratch directory for one restore, removed on drop
struct StagingArea {
    root: PathBuf,
}

impl StagingArea {
    fn create(root: PathBuf) -> BackupResult<Self> {
        fs::create_dir_all(&root).map_err(|e| {
            BackupError::Io(format!("Failed to create {}: {}", root.display(), e))
        })?;
        Ok(Self { root })
    }

    fn store(&self, name: &str) -> LocalStore {
        LocalStore::new(self.root.join(name))
    }
}

impl Drop for StagingArea {
    fn drop(&mut self) {
        if let Err(e) = fs::remove_dir_all(&self.root) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(path = %self.root.display(), error = %e, "failed to remove staging area");
            }
        }
    }
}

impl<'a> Orchestrator<'a> {
    /// Restore a backup, and every backup it builds on, into its target
    ///
    /// `into` names a different configured target of the same engine.
    pub fn restore(
        &self,
        id: &BackupId,
        into: Option<&str>,
        token: &CancelToken,
    ) -> BackupResult<RestoreOutcome> {
        let started = Instant::now();
        let mut tracker = StateTracker::new(RestoreState::Pending, id.as_str());
        let mut target_name = into.map(str::to_string);

        match self.run_restore(&mut tracker, id, into, token, &mut target_name) {
            Ok(outcome) => {
                info!(
                    id = %id,
                    target = %outcome.target,
                    links = outcome.restored.len(),
                    bytes = outcome.bytes_loaded,
                    "restore complete"
                );
                self.journal.record(
                    JournalEntry::new(JournalEvent::RestoreCompleted)
                        .target(outcome.target.clone())
                        .backup(id)
                        .details(json!({
                            "restored": outcome.restored,
                            "bytes_loaded": outcome.bytes_loaded,
                            "duration_ms": outcome.duration.as_millis() as u64,
                        })),
                );
                self.notify(OutcomePayload {
                    operation: OperationKind::Restore,
                    target: outcome.target.clone(),
                    backup_id: Some(id.clone()),
                    status: OutcomeStatus::Success,
                    stage: None,
                    message: None,
                    size_bytes: Some(outcome.bytes_loaded),
                    duration_ms: elapsed_ms(started),
                    warnings: Vec::new(),
                });
                Ok(outcome)
            }
            Err(err) => {
                let err = tracker.fail(err);
                let target = target_name.unwrap_or_default();
                warn!(id = %id, target = %target, error = %err, "restore failed");
                self.journal.record(
                    JournalEntry::new(JournalEvent::RestoreFailed)
                        .target(target.clone())
                        .backup(id)
                        .stage(err.stage())
                        .message(err.to_string()),
                );
                self.notify(OutcomePayload {
                    operation: OperationKind::Restore,
                    target,
                    backup_id: Some(id.clone()),
                    status: OutcomeStatus::Failure,
                    stage: err.stage().map(str::to_string),
                    message: Some(err.to_string()),
                    size_bytes: None,
                    duration_ms: elapsed_ms(started),
                    warnings: Vec::new(),
                });
                Err(err)
            }
        }
    }

    fn run_restore(
        &self,
        tracker: &mut StateTracker<RestoreState>,
        id: &BackupId,
        into: Option<&str>,
        token: &CancelToken,
        target_name: &mut Option<String>,
    ) -> BackupResult<RestoreOutcome> {
        let started = Instant::now();
        let record = self.catalog.get(id)?;
        *target_name = Some(into.unwrap_or(&record.target).to_string());
        let target = self.settings.target(into.unwrap_or(&record.target))?;
        if target.engine != record.database_type {
            return Err(BackupError::Precondition(format!(
                "Backup {} is a {} dump; target '{}' is {}",
                id, record.database_type, target.name, target.engine
            )));
        }
        let links = self.restore_chain(&record)?;
        let mut adapter = adapter_for(target, self.drivers.as_ref())?;

        let _lock = self.lock_target(target, "restore")?;
        self.journal.record(
            JournalEntry::new(JournalEvent::RestoreStarted)
                .target(target.name.clone())
                .backup(id)
                .details(json!({ "chain": links.iter().map(|l| &l.id).collect::<Vec<_>>() })),
        );
        let staging = StagingArea::create(self.staging_dir.join(format!("restore-{}", id)))?;

        tracker.advance(RestoreState::Fetching)?;
        let fetched_store = staging.store("fetched");
        let mut fetched = Vec::with_capacity(links.len());
        for link in &links {
            fetched.push(self.fetch(link, &fetched_store, token)?);
        }

        tracker.advance(RestoreState::Reversing)?;
        let plain_store = staging.store("plain");
        let mut plain = Vec::with_capacity(links.len());
        for (link, path) in links.iter().zip(&fetched) {
            plain.push(self.reverse_into(link, path, &plain_store, token)?);
        }

        tracker.advance(RestoreState::Loading)?;
        let (user, password) = self.target_credentials(target)?;
        adapter.connect(&ConnectParams::for_target(target, user, password))?;
        let loaded = load_all(adapter.as_mut(), &links, &plain, token);
        adapter.disconnect();
        let bytes_loaded = loaded?;

        tracker.advance(RestoreState::Complete)?;
        Ok(RestoreOutcome {
            id: id.clone(),
            target: target.name.clone(),
            restored: links.into_iter().map(|l| l.id).collect(),
            bytes_loaded,
            duration: started.elapsed(),
        })
    }

    /// The records to load for `record`, root full backup first
    fn restore_chain(&self, record: &BackupRecord) -> BackupResult<Vec<BackupRecord>> {
        if !record.status.is_usable() {
            return Err(BackupError::Precondition(format!(
                "Backup {} is {} and cannot be restored",
                record.id, record.status
            )));
        }
        let mut links = vec![record.clone()];
        let mut current = record.clone();
        while let Some(parent_id) = current.parent_id.clone() {
            let parent = self.catalog.get(&parent_id).map_err(|e| {
                if e.is_not_found() {
                    BackupError::Precondition(format!(
                        "Backup {} builds on {}, which is no longer in the catalog",
                        current.id, parent_id
                    ))
                } else {
                    e
                }
            })?;
            if !parent.status.is_usable() {
                return Err(BackupError::Precondition(format!(
                    "Backup {} builds on {}, which is {}",
                    current.id, parent.id, parent.status
                )));
            }
            if links.iter().any(|l| l.id == parent.id) {
                return Err(BackupError::Catalog(format!(
                    "Backup chain of {} loops back to {}",
                    record.id, parent.id
                )));
            }
            links.push(parent.clone());
            current = parent;
        }
        links.reverse();
        Ok(links)
    }

    /// Locate a link's artifact and check it against the recorded checksum
    fn fetch(
        &self,
        link: &BackupRecord,
        fetched: &LocalStore,
        token: &CancelToken,
    ) -> BackupResult<PathBuf> {
        let local = &link.storage.local_path;
        let path = if local.exists() {
            local.clone()
        } else {
            match (&self.mirror, &link.storage.cloud_uri) {
                (Some(mirror), Some(uri)) => {
                    warn!(id = %link.id, uri = %uri, "local artifact missing; fetching mirror copy");
                    let stream = mirror.get(&link.id.artifact_file_name())?;
                    let mut input = CancellableReader::new(stream, token.clone());
                    let mut partial = fetched.begin(&link.id)?;
                    partial.write_from(&mut input, token)?;
                    partial.commit()?
                }
                _ => {
                    self.mark_corrupt(&link.id, "artifact missing at restore");
                    return Err(BackupError::NotFound {
                        entity_type: "Artifact",
                        identifier: local.display().to_string(),
                    });
                }
            }
        };

        let (actual, _) = checksum_file(&path)?;
        let expected = link.checksum.clone().unwrap_or_default();
        if actual != expected {
            self.mark_corrupt(&link.id, "checksum mismatch at restore");
            return Err(BackupError::ChecksumMismatch {
                id: link.id.to_string(),
                expected,
                actual,
            });
        }
        Ok(path)
    }

    /// Decrypt and decompress an artifact into the staging area
    fn reverse_into(
        &self,
        link: &BackupRecord,
        artifact: &Path,
        plain: &LocalStore,
        token: &CancelToken,
    ) -> BackupResult<PathBuf> {
        let chain = TransformChain::prepare(&link.pipeline, &self.resolver)?;
        let file = self.store.open(artifact)?;
        let mut reversed = chain.reverse(Box::new(CancellableReader::new(file, token.clone())));
        let mut partial = plain.begin(&link.id)?;
        partial.write_from(&mut reversed, token)?;
        drop(reversed);
        partial.commit()
    }

    /// Flag a record whose artifact can no longer be trusted
    pub(super) fn mark_corrupt(&self, id: &BackupId, reason: &str) {
        let result = self.catalog.update(id, |r| {
            r.flag_corrupt(reason);
            Ok(())
        });
        match result {
            Ok(record) => warn!(id = %id, reason, status = %record.status, "backup flagged corrupt"),
            Err(e) => warn!(id = %id, error = %e, "failed to flag backup corrupt"),
        }
    }
}

fn load_all(
    adapter: &mut dyn DatabaseAdapter,
    links: &[BackupRecord],
    plain: &[PathBuf],
    token: &CancelToken,
) -> BackupResult<u64> {
    let mut loaded = 0;
    for (link, path) in links.iter().zip(plain) {
        let file = File::open(path)
            .map_err(|e| BackupError::Io(format!("Failed to open {}: {}", path.display(), e)))?;
        let size = file.metadata().map(|m| m.len()).unwrap_or(0);
        adapter.restore(Box::new(CancellableReader::new(file, token.clone())))?;
        info!(id = %link.id, bytes = size, "loaded");
        loaded += size;
    }
    Ok(loaded)
}
