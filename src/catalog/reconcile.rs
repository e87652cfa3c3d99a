//! Reconciliation scan
//!
//! Repairs the state a crash or kill can leave between the catalog and the
//! artifact directory:
//! - `in_progress` records whose target lock is not held are marked `failed`
//!   and their artifacts removed
//! - `.partial` files not belonging to a running backup are removed
//! - artifacts with no record (or only a failed one) are removed
//! - usable records whose artifact is gone, with no mirror copy, become
//!   `corrupt`

use std::collections::HashMap;
use std::fs;
use std::path::PathBuf;

use serde::Serialize;
use tracing::warn;

use super::Catalog;
use crate::error::{BackupError, BackupResult};
use crate::models::ids::{ARTIFACT_EXTENSION, PARTIAL_SUFFIX};
use crate::models::{BackupId, BackupStatus};
use crate::storage::local::remove_if_exists;
use crate::storage::lock::{is_held, target_lock_path};

/// What a reconciliation scan changed
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReconcileReport {
    pub removed_partials: Vec<PathBuf>,
    /// In-progress records marked failed
    pub interrupted: Vec<BackupId>,
    pub removed_orphans: Vec<PathBuf>,
    /// Usable records marked corrupt because the artifact is gone
    pub missing_artifacts: Vec<BackupId>,
}

impl ReconcileReport {
    pub fn is_empty(&self) -> bool {
        self.removed_partials.is_empty()
            && self.interrupted.is_empty()
            && self.removed_orphans.is_empty()
            && self.missing_artifacts.is_empty()
    }
}

enum ArtifactName {
    Committed(BackupId),
    Partial(BackupId),
}

fn classify_file(name: &str) -> Option<ArtifactName> {
    let partial_ext = format!(".{}.{}", ARTIFACT_EXTENSION, PARTIAL_SUFFIX);
    let committed_ext = format!(".{}", ARTIFACT_EXTENSION);
    if let Some(stem) = name.strip_suffix(&partial_ext) {
        BackupId::parse(stem).ok().map(ArtifactName::Partial)
    } else if let Some(stem) = name.strip_suffix(&committed_ext) {
        BackupId::parse(stem).ok().map(ArtifactName::Committed)
    } else {
        None
    }
}

const ARTIFACT_MISSING: &str = "artifact missing";

impl Catalog {
    /// Run the reconciliation scan
    pub fn reconcile(&self) -> BackupResult<ReconcileReport> {
        let lock_dir = self.paths.lock_dir.clone();
        let artifact_dir = self.artifact_dir().to_path_buf();
        let lock_held = |descriptor: &str| is_held(&target_lock_path(&lock_dir, descriptor));

        let mut report = ReconcileReport::default();

        // Record-side repairs first so the directory scan sees final statuses
        let statuses: HashMap<BackupId, (BackupStatus, bool)> = self.mutate(|records| {
            for record in records.iter_mut() {
                match record.status {
                    BackupStatus::InProgress if !lock_held(&record.target_descriptor) => {
                        record.fail("interrupted before completion")?;
                        remove_if_exists(&record.storage.local_path)?;
                        remove_if_exists(&artifact_dir.join(record.id.partial_file_name()))?;
                        report.interrupted.push(record.id.clone());
                    }
                    BackupStatus::Complete | BackupStatus::Verified
                        if !record.storage.local_path.exists()
                            && record.storage.cloud_uri.is_none()
                            && !record.warnings.iter().any(|w| w == ARTIFACT_MISSING) =>
                    {
                        record.flag_corrupt(ARTIFACT_MISSING);
                        report.missing_artifacts.push(record.id.clone());
                    }
                    _ => {}
                }
            }
            Ok(records
                .iter()
                .map(|r| {
                    let running =
                        r.status == BackupStatus::InProgress && lock_held(&r.target_descriptor);
                    (r.id.clone(), (r.status, running))
                })
                .collect())
        })?;

        if !artifact_dir.exists() {
            return Ok(report);
        }
        let entries = fs::read_dir(&artifact_dir).map_err(|e| {
            BackupError::Io(format!("Failed to read {}: {}", artifact_dir.display(), e))
        })?;

        for entry in entries {
            let entry = entry.map_err(|e| {
                BackupError::Io(format!("Failed to read directory entry: {}", e))
            })?;
            let path = entry.path();
            let Some(name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };

            match classify_file(name) {
                Some(ArtifactName::Partial(id)) => {
                    let running = statuses.get(&id).is_some_and(|(_, running)| *running);
                    if !running {
                        remove_if_exists(&path)?;
                        report.removed_partials.push(path);
                    }
                }
                Some(ArtifactName::Committed(id)) => {
                    let orphan = match statuses.get(&id) {
                        None => true,
                        Some((status, _)) => *status == BackupStatus::Failed,
                    };
                    if orphan {
                        warn!(path = %path.display(), "removing orphaned artifact");
                        remove_if_exists(&path)?;
                        report.removed_orphans.push(path);
                    }
                }
                None => {}
            }
        }

        Ok(report)
    }
}
