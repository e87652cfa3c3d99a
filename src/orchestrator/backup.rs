//! Backup state machine
//!
//! `Pending -> Resolving -> Dumping -> Transforming -> Storing -> Finalizing
//! -> Complete`, with `Failed` reachable from every non-terminal state.
//! Dumping, Transforming and Storing run as one streaming pipeline; a
//! transient failure in any of them restarts the pipeline from Dumping.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use super::state::{BackupState, Stage, StateTracker};
use super::{elapsed_ms, Orchestrator};
use crate::adapters::{adapter_for, ConnectParams, DatabaseAdapter, DumpHandle, DumpOptions};
use crate::error::{BackupError, BackupResult};
use crate::journal::{JournalEntry, JournalEvent};
use crate::models::{BackupId, BackupRecord, BackupType, Checkpoint, TargetConfig};
use crate::notify::{OperationKind, OutcomePayload, OutcomeStatus};
use crate::retention::RetentionReport;
use crate::schedule;
use crate::storage::checksum_file;
use crate::transform::{bounded, classify, CancelToken, CancellableReader, TransformChain};

/// A finished backup
#[derive(Debug)]
pub struct BackupRun {
    pub record: BackupRecord,
    pub duration: Duration,
    /// Evictions made by the post-backup retention run
    pub retention: Option<RetentionReport>,
}

/// Stage a failure inside the streaming pipeline belongs to
fn stream_stage(err: &BackupError, current: BackupState) -> &'static str {
    match err.root() {
        BackupError::DumpFailed { .. } => BackupState::Dumping.name(),
        BackupError::TransformFailed(_) | BackupError::DecryptionFailed(_) => {
            BackupState::Transforming.name()
        }
        _ => current.name(),
    }
}

impl<'a> Orchestrator<'a> {
    /// Back up one target
    pub fn backup(
        &self,
        target: &str,
        backup_type: BackupType,
        token: &CancelToken,
    ) -> BackupResult<BackupRun> {
        let started = Instant::now();
        let mut tracker = StateTracker::new(BackupState::Pending, target);
        let mut started_id = None;

        match self.run_backup(&mut tracker, target, backup_type, token, &mut started_id) {
            Ok(record) => {
                let retention = self.retention_after_backup(&record.target);
                let duration = started.elapsed();
                info!(
                    id = %record.id,
                    target = %record.target,
                    size_bytes = record.size_bytes,
                    duration_ms = duration.as_millis() as u64,
                    "backup complete"
                );
                self.journal.record(
                    JournalEntry::new(JournalEvent::BackupCompleted)
                        .target(record.target.clone())
                        .backup(&record.id)
                        .details(json!({
                            "backup_type": record.backup_type,
                            "size_bytes": record.size_bytes,
                            "checksum": record.checksum,
                            "duration_ms": duration.as_millis() as u64,
                            "warnings": record.warnings,
                        })),
                );
                self.notify(OutcomePayload {
                    operation: OperationKind::Backup,
                    target: record.target.clone(),
                    backup_id: Some(record.id.clone()),
                    status: OutcomeStatus::Success,
                    stage: None,
                    message: None,
                    size_bytes: Some(record.size_bytes),
                    duration_ms: elapsed_ms(started),
                    warnings: record.warnings.clone(),
                });
                Ok(BackupRun {
                    record,
                    duration,
                    retention,
                })
            }
            Err(err) => {
                let err = tracker.fail(err);
                if let Some(id) = &started_id {
                    self.abandon(id, &err);
                }
                warn!(target = %target, error = %err, "backup failed");

                let mut entry = JournalEntry::new(JournalEvent::BackupFailed)
                    .target(target)
                    .stage(err.stage())
                    .message(err.to_string());
                if let Some(id) = &started_id {
                    entry = entry.backup(id);
                }
                self.journal.record(entry);
                self.notify(OutcomePayload {
                    operation: OperationKind::Backup,
                    target: target.to_string(),
                    backup_id: started_id,
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

    fn run_backup(
        &self,
        tracker: &mut StateTracker<BackupState>,
        name: &str,
        backup_type: BackupType,
        token: &CancelToken,
        started_id: &mut Option<BackupId>,
    ) -> BackupResult<BackupRecord> {
        let target = self.settings.target(name)?;
        let mut adapter = adapter_for(target, self.drivers.as_ref())?;

        // Everything checkable without a connection fails here
        if backup_type != BackupType::Full && !adapter.supports_incremental() {
            return Err(BackupError::Precondition(format!(
                "{} does not support {} backups",
                target.engine, backup_type
            )));
        }
        let parent = self.chain_parent(&target.name, backup_type)?;
        let options = DumpOptions {
            backup_type,
            base_checkpoint: parent.as_ref().and_then(|p| p.checkpoint.clone()),
        };
        adapter.check_dump(&options)?;

        let _lock = self.lock_target(target, "backup")?;

        let pipeline = self.settings.pipeline();
        let now = Utc::now();
        let id = BackupId::generate(&target.name, now);
        let mut record = BackupRecord::begin(
            id.clone(),
            &target.name,
            target.descriptor(),
            now,
            target.engine,
            backup_type,
            pipeline.clone(),
            self.store.artifact_path(&id),
        );
        record.parent_id = parent.map(|p| p.id);
        record.base_checkpoint = options.base_checkpoint.clone();
        self.catalog.append(record)?;
        *started_id = Some(id.clone());
        self.journal.record(
            JournalEntry::new(JournalEvent::BackupStarted)
                .target(target.name.clone())
                .backup(&id)
                .details(json!({ "backup_type": backup_type })),
        );

        tracker.advance(BackupState::Resolving)?;
        let (user, password) = self.target_credentials(target)?;
        let chain = TransformChain::prepare(&pipeline, &self.resolver)?;
        let params = ConnectParams::for_target(target, user, password);

        tracker.advance(BackupState::Dumping)?;
        let (path, checkpoint) = self.retry.run(token, |attempt| {
            if attempt > 1 {
                tracker.restart(BackupState::Dumping);
            }
            self.transfer(tracker, adapter.as_mut(), &params, &options, &chain, &id, token)
        })?;

        let mut warnings = Vec::new();
        let cloud_uri = self.mirror_artifact(&id, &path, &mut warnings);

        tracker.advance(BackupState::Finalizing)?;
        token
            .check()
            .map_err(|e| classify(e, |e| BackupError::Cancelled(e.to_string())))?;
        let (checksum, size) = checksum_file(&path)?;
        let record = self.catalog.update(&id, |r| {
            r.complete(checksum, size, Utc::now())?;
            r.checkpoint = checkpoint;
            r.storage.cloud_uri = cloud_uri;
            r.warnings = warnings;
            Ok(())
        })?;

        tracker.advance(BackupState::Complete)?;
        Ok(record)
    }

    /// One pass of dump -> transform -> store, cleaning up after a failure
    #[allow(clippy::too_many_arguments)]
    fn transfer(
        &self,
        tracker: &mut StateTracker<BackupState>,
        adapter: &mut dyn DatabaseAdapter,
        params: &ConnectParams,
        options: &DumpOptions,
        chain: &TransformChain,
        id: &BackupId,
        token: &CancelToken,
    ) -> BackupResult<(PathBuf, Option<Checkpoint>)> {
        let result = self.transfer_once(tracker, adapter, params, options, chain, id, token);
        adapter.disconnect();
        if result.is_err() {
            if let Err(e) = self.store.discard(id) {
                warn!(id = %id, error = %e, "failed to discard partial artifact");
            }
        }
        result
    }

    #[allow(clippy::too_many_arguments)]
    fn transfer_once(
        &self,
        tracker: &mut StateTracker<BackupState>,
        adapter: &mut dyn DatabaseAdapter,
        params: &ConnectParams,
        options: &DumpOptions,
        chain: &TransformChain,
        id: &BackupId,
        token: &CancelToken,
    ) -> BackupResult<(PathBuf, Option<Checkpoint>)> {
        adapter.connect(params).map_err(|e| tracker.wrap(e))?;
        let DumpHandle { stream, checkpoint } =
            adapter.dump(options).map_err(|e| tracker.wrap(e))?;
        let dump = bounded(
            Box::new(CancellableReader::new(stream, token.clone())),
            self.settings.pipe_capacity,
            token.clone(),
        );

        tracker.advance(BackupState::Transforming)?;
        let mut transformed = chain.apply(dump).map_err(|e| tracker.wrap(e))?;

        tracker.advance(BackupState::Storing)?;
        let mut partial = self.store.begin(id).map_err(|e| tracker.wrap(e))?;
        partial
            .write_from(&mut transformed, token)
            .map_err(|e| {
                let stage = stream_stage(&e, tracker.current());
                e.in_stage(stage)
            })?;
        drop(transformed);
        let path = partial.commit().map_err(|e| tracker.wrap(e))?;
        Ok((path, checkpoint))
    }

    /// The backup an incremental or differential backup builds on
    ///
    /// Incrementals follow the newest usable backup of any type;
    /// differentials follow the newest usable full backup.
    fn chain_parent(
        &self,
        target: &str,
        backup_type: BackupType,
    ) -> BackupResult<Option<BackupRecord>> {
        let parent = match backup_type {
            BackupType::Full => return Ok(None),
            BackupType::Incremental => self.catalog.latest_usable(target, |_| true),
            BackupType::Differential => self
                .catalog
                .latest_usable(target, |r| r.backup_type == BackupType::Full),
        };
        let parent = parent.ok_or_else(|| {
            BackupError::Precondition(format!(
                "{} backup of '{}' needs a prior complete {}backup",
                backup_type,
                target,
                if backup_type == BackupType::Differential {
                    "full "
                } else {
                    ""
                }
            ))
        })?;
        if parent.checkpoint.is_none() {
            return Err(BackupError::Precondition(format!(
                "Backup {} has no checkpoint to continue from",
                parent.id
            )));
        }
        Ok(Some(parent))
    }

    /// Copy a committed artifact to the cloud mirror
    ///
    /// Failures only add a warning; the local artifact stands on its own.
    fn mirror_artifact(&self, id: &BackupId, path: &Path, warnings: &mut Vec<String>) -> Option<String> {
        let mirror = self.mirror.as_ref()?;
        let uploaded = self
            .store
            .open(path)
            .and_then(|mut file| mirror.put(&id.artifact_file_name(), &mut file));
        match uploaded {
            Ok(uri) => Some(uri),
            Err(e) => {
                warn!(id = %id, error = %e, "cloud mirror failed; keeping local artifact");
                warnings.push(format!("cloud mirror failed: {}", e));
                None
            }
        }
    }

    /// Remove what a failed backup left and mark its record failed
    fn abandon(&self, id: &BackupId, err: &BackupError) {
        if let Err(e) = self.store.discard(id) {
            warn!(id = %id, error = %e, "failed to remove artifact of failed backup");
        }
        if let Some(mirror) = &self.mirror {
            if let Err(e) = mirror.delete(&id.artifact_file_name()) {
                warn!(id = %id, error = %e, "failed to remove mirror copy of failed backup");
            }
        }
        if let Err(e) = self.catalog.update(id, |r| r.fail(err.to_string())) {
            warn!(id = %id, error = %e, "failed to mark backup failed");
        }
    }

    fn retention_after_backup(&self, target: &str) -> Option<RetentionReport> {
        if !self.settings.retention.run_after_backup {
            return None;
        }
        match self.prune(Some(target), false) {
            Ok(report) => Some(report),
            Err(e) => {
                warn!(target = %target, error = %e, "post-backup retention failed");
                None
            }
        }
    }

    /// Back up every configured target concurrently
    ///
    /// Targets that share a connection descriptor are the same database and
    /// run one after another on the same worker.
    pub fn backup_all(&self, backup_type: BackupType) -> Vec<(String, BackupResult<BackupRun>)> {
        let mut groups: BTreeMap<String, Vec<&TargetConfig>> = BTreeMap::new();
        for target in &self.settings.targets {
            groups.entry(target.descriptor()).or_default().push(target);
        }

        thread::scope(|scope| {
            let workers: Vec<_> = groups
                .into_values()
                .map(|group| {
                    let names: Vec<String> = group.iter().map(|t| t.name.clone()).collect();
                    let handle = scope.spawn(move || {
                        group
                            .into_iter()
                            .map(|target| {
                                let token = self.cancel_token(None);
                                (target.name.clone(), self.backup(&target.name, backup_type, &token))
                            })
                            .collect::<Vec<_>>()
                    });
                    (names, handle)
                })
                .collect();

            workers
                .into_iter()
                .flat_map(|(names, handle)| match handle.join() {
                    Ok(results) => results,
                    Err(_) => names
                        .into_iter()
                        .map(|name| (name, Err(BackupError::Io("backup worker panicked".into()))))
                        .collect(),
                })
                .collect()
        })
    }

    /// Run a scheduled job
    ///
    /// A job whose target is already being backed up or restored is an
    /// overlapping schedule, not something to wait for.
    pub fn run_scheduled(&self, job: &str) -> BackupResult<BackupRun> {
        let entry = schedule::find(&self.settings.schedule, job)?;
        let token = self.cancel_token(entry.timeout_secs);
        self.backup(&entry.target, entry.backup_type, &token)
            .map_err(|e| {
                let overlap = match e.root() {
                    BackupError::TargetBusy { target, holder } => Some(format!(
                        "job '{}' started while '{}' was busy ({})",
                        job, target, holder
                    )),
                    _ => None,
                };
                match overlap {
                    Some(message) => BackupError::ScheduleOverlap(message),
                    None => e,
                }
            })
    }
}
