//! Backup orchestrator
//!
//! Drives backups, restores and verifications end to end: credentials from the
//! resolver, an adapter for the target's engine, the transform chain, the
//! artifact store, the catalog, the journal and outcome notifications.
//!
//! The orchestrator holds no global state. It borrows the resolved
//! [`Settings`] for its lifetime and is `Sync`, so one instance serves every
//! worker of a multi-target run.

mod backup;
mod restore;
mod retry;
mod state;
mod verify;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use serde_json::json;
use tracing::warn;

use crate::adapters::DriverFactory;
use crate::catalog::{Catalog, CatalogPaths, ReconcileReport};
use crate::config::{BackupPaths, Settings};
use crate::credentials::{CredentialResolver, CredentialSpec, SecureString};
use crate::error::{BackupError, BackupResult};
use crate::journal::{Journal, JournalEntry, JournalEvent};
use crate::models::{BackupRecord, TargetConfig};
use crate::notify::{deliver, LogNotifier, Notifier, OutcomePayload};
use crate::retention::{RetentionManager, RetentionReport};
use crate::storage::lock::{target_lock_path, try_lock, Acquire, LockGuard};
use crate::storage::{CloudStore, DirectoryMirror, LocalStore};
use crate::transform::CancelToken;

pub use backup::BackupRun;
pub use restore::RestoreOutcome;
pub use retry::RetryPolicy;
pub use state::{BackupState, RestoreState, Stage, StateTracker};
pub use verify::VerifyReport;

/// Runs backup, restore and verify operations against the catalog
pub struct Orchestrator<'a> {
    settings: &'a Settings,
    catalog: Catalog,
    resolver: CredentialResolver,
    drivers: Box<dyn DriverFactory>,
    store: LocalStore,
    staging_dir: PathBuf,
    lock_dir: PathBuf,
    mirror: Option<Box<dyn CloudStore>>,
    journal: Journal,
    notifier: Option<Arc<dyn Notifier>>,
    retry: RetryPolicy,
}

impl<'a> Orchestrator<'a> {
    /// Open the catalog (reconciling it) and wire up the collaborators
    /// described by `settings`
    pub fn open(
        settings: &'a Settings,
        paths: &BackupPaths,
        drivers: Box<dyn DriverFactory>,
    ) -> BackupResult<(Self, ReconcileReport)> {
        paths.ensure_directories()?;
        let artifact_dir = settings.backup_dir(paths);
        let (catalog, report) = Catalog::open(CatalogPaths {
            file: paths.catalog_file(),
            artifact_dir: artifact_dir.clone(),
            lock_dir: paths.lock_dir(),
        })?;

        let journal = Journal::in_dir(&settings.log_dir(paths));
        if !report.is_empty() {
            journal.record(
                JournalEntry::new(JournalEvent::Reconciled).details(serde_json::to_value(&report)?),
            );
        }

        let notifier: Option<Arc<dyn Notifier>> = if settings.notifications.enabled {
            Some(Arc::new(LogNotifier::new(
                settings.notifications.webhook_url.clone(),
            )))
        } else {
            None
        };

        let orchestrator = Self {
            settings,
            catalog,
            resolver: CredentialResolver::from_settings(settings, paths),
            drivers,
            store: LocalStore::new(artifact_dir),
            staging_dir: paths.staging_dir(),
            lock_dir: paths.lock_dir(),
            mirror: settings
                .storage
                .cloud_mirror
                .clone()
                .map(|dir| Box::new(DirectoryMirror::new(dir)) as Box<dyn CloudStore>),
            journal,
            notifier,
            retry: RetryPolicy::from(&settings.retry),
        };
        Ok((orchestrator, report))
    }

    pub fn with_resolver(mut self, resolver: CredentialResolver) -> Self {
        self.resolver = resolver;
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = Some(notifier);
        self
    }

    pub fn with_mirror(mut self, mirror: Box<dyn CloudStore>) -> Self {
        self.mirror = Some(mirror);
        self
    }

    pub fn settings(&self) -> &Settings {
        self.settings
    }

    pub fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    /// Apply the retention policy, to one target or all of them
    pub fn prune(&self, target: Option<&str>, dry_run: bool) -> BackupResult<RetentionReport> {
        let manager = RetentionManager::new(&self.catalog, &self.settings.retention);
        let report = manager.enforce(target, Utc::now(), dry_run, |record| {
            self.remove_artifact(record)
        })?;
        if !dry_run {
            for eviction in &report.evicted {
                self.journal.record(
                    JournalEntry::new(JournalEvent::Evicted)
                        .target(eviction.target.clone())
                        .backup(&eviction.id)
                        .details(json!({
                            "created_at": eviction.created_at,
                            "status": eviction.status,
                            "size_bytes": eviction.size_bytes,
                        })),
                );
            }
        }
        Ok(report)
    }

    /// Token for one operation, honouring the configured timeout
    pub fn cancel_token(&self, timeout_secs: Option<u64>) -> CancelToken {
        match timeout_secs.or(self.settings.operation_timeout_secs) {
            Some(secs) => CancelToken::with_timeout(Duration::from_secs(secs)),
            None => CancelToken::new(),
        }
    }

    /// Take the target's advisory lock without waiting
    fn lock_target(&self, target: &TargetConfig, label: &str) -> BackupResult<LockGuard> {
        let path = target_lock_path(&self.lock_dir, &target.descriptor());
        match try_lock(&path, &format!("{} {}", label, target.name))? {
            Acquire::Acquired(guard) => Ok(guard),
            Acquire::Held(holder) => Err(BackupError::TargetBusy {
                target: target.name.clone(),
                holder,
            }),
        }
    }

    fn resolve(&self, spec: &CredentialSpec) -> BackupResult<SecureString> {
        self.resolver
            .resolve(&spec.with_default_sources(&self.settings.credentials.default_sources))
    }

    /// User name and password for a target
    fn target_credentials(
        &self,
        target: &TargetConfig,
    ) -> BackupResult<(Option<String>, Option<SecureString>)> {
        let user = match &target.user_credential {
            Some(spec) => Some(self.resolve(spec)?.as_str().to_string()),
            None => target.user.clone(),
        };
        let password = target
            .password
            .as_ref()
            .map(|spec| self.resolve(spec))
            .transpose()?;
        Ok((user, password))
    }

    /// Delete a record's artifact and its mirror copy
    fn remove_artifact(&self, record: &BackupRecord) -> BackupResult<()> {
        self.store.remove(&record.storage.local_path)?;
        if let (Some(mirror), Some(_)) = (&self.mirror, &record.storage.cloud_uri) {
            if let Err(e) = mirror.delete(&record.id.artifact_file_name()) {
                warn!(id = %record.id, error = %e, "failed to delete mirror copy");
            }
        }
        Ok(())
    }

    fn notify(&self, payload: OutcomePayload) {
        if let Some(notifier) = &self.notifier {
            let timeout = Duration::from_millis(self.settings.notifications.timeout_ms);
            deliver(Arc::clone(notifier), payload, timeout);
        }
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    started.elapsed().as_millis() as u64
}
