//! Retention manager
//!
//! Two independent thresholds decide which records of a target may be
//! evicted: age (`max_age_days`) and count (`max_backups`). A record is
//! eligible when either threshold selects it. The newest usable record of a
//! target is always kept unless `max_backups` is explicitly `0`, and records
//! still `in_progress` are never touched. Evictions run oldest first.
//!
//! Retention does not protect the parents of retained incremental or
//! differential backups; a chain whose parent was evicted can no longer be
//! restored.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::catalog::{Catalog, RecordFilter};
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupId, BackupRecord, BackupStatus};

/// Age and count thresholds
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RetentionPolicy {
    /// Evict records older than this many days
    #[serde(default)]
    pub max_age_days: Option<u32>,

    /// Keep at most this many of the most recent records per target
    #[serde(default)]
    pub max_backups: Option<u32>,

    /// Enforce after every successful backup of a target
    #[serde(default = "default_true")]
    pub run_after_backup: bool,
}

fn default_true() -> bool {
    true
}

impl Default for RetentionPolicy {
    fn default() -> Self {
        Self {
            max_age_days: Some(30),
            max_backups: Some(10),
            run_after_backup: true,
        }
    }
}

impl RetentionPolicy {
    /// Reject thresholds that would evict everything by accident
    pub fn validate(&self) -> BackupResult<()> {
        if self.max_age_days == Some(0) {
            return Err(BackupError::RetentionPolicyViolation(
                "max_age_days = 0 would evict every backup; use max_backups = 0 to opt out of the retention floor explicitly".into(),
            ));
        }
        Ok(())
    }

    /// Records of one target to evict, oldest first
    ///
    /// `records` may be in any order and should all belong to the same target.
    pub fn plan<'a>(&self, records: &'a [BackupRecord], now: DateTime<Utc>) -> Vec<&'a BackupRecord> {
        let mut ranked: Vec<&BackupRecord> = records
            .iter()
            .filter(|r| r.status != BackupStatus::InProgress)
            .collect();
        // Newest first
        ranked.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| b.id.cmp(&a.id)));

        let floor: Option<&BackupId> = if self.max_backups == Some(0) {
            None
        } else {
            ranked.iter().find(|r| r.status.is_usable()).map(|r| &r.id)
        };

        let mut evict: Vec<&BackupRecord> = ranked
            .iter()
            .enumerate()
            .filter(|(rank, record)| {
                let too_old = self
                    .max_age_days
                    .is_some_and(|days| record.age_days(now) > i64::from(days));
                let beyond_count = self
                    .max_backups
                    .is_some_and(|max| *rank >= max as usize);
                (too_old || beyond_count) && Some(&record.id) != floor
            })
            .map(|(_, record)| *record)
            .collect();

        evict.reverse();
        evict
    }
}

/// One eviction, planned or performed
#[derive(Debug, Clone, Serialize)]
pub struct Eviction {
    pub id: BackupId,
    pub target: String,
    pub created_at: DateTime<Utc>,
    pub status: BackupStatus,
    pub size_bytes: u64,
}

impl From<&BackupRecord> for Eviction {
    fn from(record: &BackupRecord) -> Self {
        Self {
            id: record.id.clone(),
            target: record.target.clone(),
            created_at: record.created_at,
            status: record.status,
            size_bytes: record.size_bytes,
        }
    }
}

/// Result of a retention run
#[derive(Debug, Clone, Default, Serialize)]
pub struct RetentionReport {
    pub evicted: Vec<Eviction>,
    pub dry_run: bool,
}

impl RetentionReport {
    pub fn reclaimed_bytes(&self) -> u64 {
        self.evicted.iter().map(|e| e.size_bytes).sum()
    }
}

/// Applies a policy to the catalog
pub struct RetentionManager<'a> {
    catalog: &'a Catalog,
    policy: &'a RetentionPolicy,
}

impl<'a> RetentionManager<'a> {
    pub fn new(catalog: &'a Catalog, policy: &'a RetentionPolicy) -> Self {
        Self { catalog, policy }
    }

    /// Evictions the policy selects right now
    pub fn plan(&self, target: Option<&str>, now: DateTime<Utc>) -> BackupResult<Vec<Eviction>> {
        self.policy.validate()?;
        let targets = match target {
            Some(t) => vec![t.to_string()],
            None => self.catalog.targets(),
        };

        let mut evictions = Vec::new();
        for target in targets {
            let records = self.catalog.list(&RecordFilter::for_target(target));
            evictions.extend(self.policy.plan(&records, now).into_iter().map(Eviction::from));
        }
        Ok(evictions)
    }

    /// Evict what the policy selects
    ///
    /// `remove_artifact` deletes an evicted record's artifact (local file and
    /// any mirror copy); the record is removed only after it succeeds.
    pub fn enforce<F>(
        &self,
        target: Option<&str>,
        now: DateTime<Utc>,
        dry_run: bool,
        mut remove_artifact: F,
    ) -> BackupResult<RetentionReport>
    where
        F: FnMut(&BackupRecord) -> BackupResult<()>,
    {
        let planned = self.plan(target, now)?;
        if dry_run {
            return Ok(RetentionReport {
                evicted: planned,
                dry_run: true,
            });
        }

        let mut report = RetentionReport::default();
        for eviction in planned {
            match self.catalog.evict(&eviction.id, &mut remove_artifact) {
                Ok(_) => {
                    info!(id = %eviction.id, target = %eviction.target, "evicted backup");
                    report.evicted.push(eviction);
                }
                Err(e) if e.is_not_found() => {
                    warn!(id = %eviction.id, "backup vanished before eviction");
                }
                Err(e) => return Err(e),
            }
        }
        Ok(report)
    }
}
