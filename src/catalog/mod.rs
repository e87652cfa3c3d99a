//! Durable catalog of backup records
//!
//! The catalog is a JSON document of [`BackupRecord`]s. Reads are served from
//! memory; every mutation reloads the document under an inter-process lock,
//! applies the change and writes it back atomically, so concurrent workers and
//! concurrent processes never lose each other's records.
//!
//! Opening a catalog runs a reconciliation scan that repairs what a crash can
//! leave behind (see [`Catalog::reconcile`]).

mod reconcile;

use std::path::{Path, PathBuf};
use std::sync::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{BackupError, BackupResult};
use crate::models::{BackupId, BackupRecord, BackupStatus, BackupType};
use crate::storage::file_io::{read_json, write_json_atomic};
use crate::storage::lock::lock_with_timeout;

pub use reconcile::ReconcileReport;

const LOCK_TIMEOUT: Duration = Duration::from_secs(30);

/// On-disk layout of the catalog file
#[derive(Debug, Serialize, Deserialize)]
struct CatalogFile {
    #[serde(default = "default_schema_version")]
    schema_version: u32,
    #[serde(default)]
    records: Vec<BackupRecord>,
}

fn default_schema_version() -> u32 {
    1
}

impl Default for CatalogFile {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            records: Vec::new(),
        }
    }
}

/// Which records a listing returns
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    pub target: Option<String>,
    pub status: Option<BackupStatus>,
    pub backup_type: Option<BackupType>,
}

impl RecordFilter {
    pub fn for_target(target: impl Into<String>) -> Self {
        Self {
            target: Some(target.into()),
            ..Self::default()
        }
    }

    fn matches(&self, record: &BackupRecord) -> bool {
        self.target.as_deref().map_or(true, |t| record.target == t)
            && self.status.map_or(true, |s| record.status == s)
            && self.backup_type.map_or(true, |b| record.backup_type == b)
    }
}

/// Locations the catalog manages
#[derive(Debug, Clone)]
pub struct CatalogPaths {
    /// The catalog document
    pub file: PathBuf,
    /// Directory holding committed and partial artifacts
    pub artifact_dir: PathBuf,
    /// Directory of per-target lock files
    pub lock_dir: PathBuf,
}

/// Durable index of backup records
pub struct Catalog {
    paths: CatalogPaths,
    records: RwLock<Vec<BackupRecord>>,
}

impl Catalog {
    /// Open the catalog and reconcile it against the artifact directory
    pub fn open(paths: CatalogPaths) -> BackupResult<(Self, ReconcileReport)> {
        let catalog = Self::open_without_reconcile(paths)?;
        let report = catalog.reconcile()?;
        if !report.is_empty() {
            info!(
                partials = report.removed_partials.len(),
                interrupted = report.interrupted.len(),
                orphans = report.removed_orphans.len(),
                missing = report.missing_artifacts.len(),
                "catalog reconciled"
            );
        }
        Ok((catalog, report))
    }

    /// Open the catalog without touching any artifact
    pub fn open_without_reconcile(paths: CatalogPaths) -> BackupResult<Self> {
        let file: CatalogFile = read_json(&paths.file)
            .map_err(|e| BackupError::Catalog(format!("Failed to load catalog: {}", e)))?;
        Ok(Self {
            paths,
            records: RwLock::new(file.records),
        })
    }

    pub fn paths(&self) -> &CatalogPaths {
        &self.paths
    }

    fn read(&self) -> RwLockReadGuard<'_, Vec<BackupRecord>> {
        self.records.read().unwrap_or_else(|p| p.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Vec<BackupRecord>> {
        self.records.write().unwrap_or_else(|p| p.into_inner())
    }

    fn lock_path(&self) -> PathBuf {
        let mut name = self
            .paths
            .file
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "catalog.json".into());
        name.push(".lock");
        self.paths.file.with_file_name(name)
    }

    /// Reload, mutate and persist under the catalog lock
    fn mutate<T>(
        &self,
        f: impl FnOnce(&mut Vec<BackupRecord>) -> BackupResult<T>,
    ) -> BackupResult<T> {
        let mut memory = self.write();
        let _guard = lock_with_timeout(&self.lock_path(), "catalog", LOCK_TIMEOUT)?;

        let mut file: CatalogFile = read_json(&self.paths.file)
            .map_err(|e| BackupError::Catalog(format!("Failed to load catalog: {}", e)))?;
        let result = f(&mut file.records)?;
        write_json_atomic(&self.paths.file, &file)
            .map_err(|e| BackupError::Catalog(format!("Failed to save catalog: {}", e)))?;

        *memory = file.records;
        Ok(result)
    }

    /// Add a new record
    pub fn append(&self, record: BackupRecord) -> BackupResult<()> {
        self.mutate(|records| {
            if records.iter().any(|r| r.id == record.id) {
                return Err(BackupError::Catalog(format!(
                    "Duplicate backup id: {}",
                    record.id
                )));
            }
            records.push(record);
            Ok(())
        })
    }

    /// Apply `f` to a record and persist the result
    pub fn update<F>(&self, id: &BackupId, f: F) -> BackupResult<BackupRecord>
    where
        F: FnOnce(&mut BackupRecord) -> BackupResult<()>,
    {
        self.mutate(|records| {
            let record = records
                .iter_mut()
                .find(|r| &r.id == id)
                .ok_or_else(|| BackupError::backup_not_found(id.as_str()))?;
            f(record)?;
            Ok(record.clone())
        })
    }

    pub fn get(&self, id: &BackupId) -> BackupResult<BackupRecord> {
        self.read()
            .iter()
            .find(|r| &r.id == id)
            .cloned()
            .ok_or_else(|| BackupError::backup_not_found(id.as_str()))
    }

    /// Records matching `filter`, oldest first
    pub fn list(&self, filter: &RecordFilter) -> Vec<BackupRecord> {
        let mut records: Vec<BackupRecord> = self
            .read()
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)));
        records
    }

    /// Names of every target with at least one record
    pub fn targets(&self) -> Vec<String> {
        let mut targets: Vec<String> = self.read().iter().map(|r| r.target.clone()).collect();
        targets.sort();
        targets.dedup();
        targets
    }

    /// Most recent usable record of `target` satisfying `pred`
    pub fn latest_usable(
        &self,
        target: &str,
        pred: impl Fn(&BackupRecord) -> bool,
    ) -> Option<BackupRecord> {
        self.read()
            .iter()
            .filter(|r| r.target == target && r.status.is_usable() && pred(r))
            .max_by(|a, b| a.created_at.cmp(&b.created_at).then_with(|| a.id.cmp(&b.id)))
            .cloned()
    }

    /// Delete a record together with its artifact
    ///
    /// `remove_artifact` runs first inside the exclusive section; the record
    /// is only removed once it succeeds. A crash in between leaves a record
    /// whose artifact is missing, which reconciliation marks corrupt.
    pub fn evict<F>(&self, id: &BackupId, remove_artifact: F) -> BackupResult<BackupRecord>
    where
        F: FnOnce(&BackupRecord) -> BackupResult<()>,
    {
        self.mutate(|records| {
            let index = records
                .iter()
                .position(|r| &r.id == id)
                .ok_or_else(|| BackupError::backup_not_found(id.as_str()))?;
            remove_artifact(&records[index])?;
            Ok(records.remove(index))
        })
    }

    pub fn len(&self) -> usize {
        self.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.read().is_empty()
    }

    pub(crate) fn artifact_dir(&self) -> &Path {
        &self.paths.artifact_dir
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::models::DatabaseType;
    use chrono::{Duration as ChronoDuration, Utc};
    use std::sync::Arc;
    use tempfile::TempDir;

    pub(crate) fn catalog_paths(dir: &Path) -> CatalogPaths {
        CatalogPaths {
            file: dir.join("catalog.json"),
            artifact_dir: dir.join("backups"),
            lock_dir: dir.join("locks"),
        }
    }

    pub(crate) fn record(target: &str, days_ago: i64, status: BackupStatus) -> BackupRecord {
        let created_at = Utc::now() - ChronoDuration::days(days_ago);
        let id = BackupId::generate(target, created_at);
        let mut record = BackupRecord::begin(
            id.clone(),
            target,
            format!("sqlite:///{}.db", target),
            created_at,
            DatabaseType::Sqlite,
            BackupType::Full,
            Vec::new(),
            PathBuf::from(format!("/nonexistent/{}", id.artifact_file_name())),
        );
        record.status = status;
        if status != BackupStatus::InProgress {
            record.checksum = Some("00".repeat(32));
        }
        record
    }

    #[test]
    fn test_append_get_update_persist() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = Catalog::open_without_reconcile(catalog_paths(temp_dir.path())).unwrap();

        let rec = record("app", 1, BackupStatus::InProgress);
        let id = rec.id.clone();
        catalog.append(rec.clone()).unwrap();
        assert!(catalog.append(rec).is_err());

        catalog
            .update(&id, |r| r.complete("ab".repeat(32), 42, Utc::now()))
            .unwrap();

        let reopened = Catalog::open_without_reconcile(catalog_paths(temp_dir.path())).unwrap();
        let loaded = reopened.get(&id).unwrap();
        assert_eq!(loaded.status, BackupStatus::Complete);
        assert_eq!(loaded.size_bytes, 42);
    }

    #[test]
    fn test_failed_update_is_not_persisted() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = Catalog::open_without_reconcile(catalog_paths(temp_dir.path())).unwrap();
        let rec = record("app", 1, BackupStatus::Failed);
        let id = rec.id.clone();
        catalog.append(rec).unwrap();

        assert!(catalog
            .update(&id, |r| r.transition(BackupStatus::Complete))
            .is_err());
        assert_eq!(catalog.get(&id).unwrap().status, BackupStatus::Failed);
    }

    #[test]
    fn test_list_filters_and_orders() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = Catalog::open_without_reconcile(catalog_paths(temp_dir.path())).unwrap();
        catalog.append(record("a", 3, BackupStatus::Complete)).unwrap();
        catalog.append(record("a", 1, BackupStatus::Failed)).unwrap();
        catalog.append(record("b", 2, BackupStatus::Complete)).unwrap();

        let all = catalog.list(&RecordFilter::default());
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].created_at <= w[1].created_at));

        assert_eq!(catalog.list(&RecordFilter::for_target("a")).len(), 2);
        let complete = RecordFilter {
            status: Some(BackupStatus::Complete),
            ..RecordFilter::default()
        };
        assert_eq!(catalog.list(&complete).len(), 2);
        assert_eq!(catalog.targets(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_latest_usable_skips_failed() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = Catalog::open_without_reconcile(catalog_paths(temp_dir.path())).unwrap();
        let older = record("a", 5, BackupStatus::Verified);
        let older_id = older.id.clone();
        catalog.append(older).unwrap();
        catalog.append(record("a", 1, BackupStatus::Failed)).unwrap();

        assert_eq!(catalog.latest_usable("a", |_| true).unwrap().id, older_id);
        assert!(catalog.latest_usable("b", |_| true).is_none());
    }

    #[test]
    fn test_evict_removes_record_only_after_artifact() {
        let temp_dir = TempDir::new().unwrap();
        let catalog = Catalog::open_without_reconcile(catalog_paths(temp_dir.path())).unwrap();
        let rec = record("a", 5, BackupStatus::Complete);
        let id = rec.id.clone();
        catalog.append(rec).unwrap();

        let err = catalog.evict(&id, |_| Err(BackupError::Io("busy".into())));
        assert!(err.is_err());
        assert!(catalog.get(&id).is_ok());

        catalog.evict(&id, |_| Ok(())).unwrap();
        assert!(catalog.get(&id).unwrap_err().is_not_found());
    }

    #[test]
    fn test_concurrent_appends_are_all_kept() {
        let temp_dir = TempDir::new().unwrap();
        let catalog =
            Arc::new(Catalog::open_without_reconcile(catalog_paths(temp_dir.path())).unwrap());

        std::thread::scope(|s| {
            for t in 0..4 {
                let catalog = catalog.clone();
                s.spawn(move || {
                    for i in 0..5 {
                        catalog
                            .append(record(&format!("t{}", t), i, BackupStatus::Complete))
                            .unwrap();
                    }
                });
            }
        });

        assert_eq!(catalog.len(), 20);
        let reopened = Catalog::open_without_reconcile(catalog_paths(temp_dir.path())).unwrap();
        assert_eq!(reopened.len(), 20);
    }
}
