//! End-to-end orchestrator scenarios against an in-memory database

mod common;

use std::fs;
use std::io::Read;
use std::sync::atomic::Ordering;

use chrono::{Duration as ChronoDuration, Utc};

use common::{resolver_with, sample_dump, Fixture, PASSPHRASE};
use dbbackup::journal::JournalEvent;
use dbbackup::models::{BackupId, BackupRecord, BackupStatus, BackupType};
use dbbackup::retention::RetentionPolicy;
use dbbackup::schedule::ScheduleEntry;
use dbbackup::storage::lock::{is_held, target_lock_path, try_lock, Acquire};
use dbbackup::storage::{checksum_file, CloudStore, LocalStore};
use dbbackup::transform::{ByteStream, CancelToken};
use dbbackup::{BackupError, BackupResult};

fn events(fixture: &Fixture) -> Vec<JournalEvent> {
    let orchestrator = fixture.orchestrator();
    orchestrator
        .journal()
        .read_all()
        .unwrap()
        .into_iter()
        .map(|e| e.event)
        .collect()
}

#[test]
fn test_full_backup_and_restore_roundtrip() {
    let dump = sample_dump();
    let fixture = Fixture::sqlite(&dump).encrypted();
    let orchestrator = fixture.orchestrator();
    let token = CancelToken::new();

    let run = orchestrator.backup("app", BackupType::Full, &token).unwrap();
    let record = &run.record;
    assert_eq!(record.status, BackupStatus::Complete);
    assert!(record.completed_at.is_some());
    assert_eq!(record.pipeline.len(), 2);

    let (checksum, size) = checksum_file(&record.storage.local_path).unwrap();
    assert_eq!(record.checksum.as_deref(), Some(checksum.as_str()));
    assert_eq!(record.size_bytes, size);
    assert_eq!(fixture.artifact_files(), vec![record.id.artifact_file_name()]);

    let outcome = orchestrator.restore(&record.id, None, &token).unwrap();
    assert_eq!(outcome.target, "app");
    assert_eq!(outcome.restored, vec![record.id.clone()]);
    assert_eq!(fixture.db.restored(), vec![dump]);

    // Staging is cleaned up after a restore
    let staging: Vec<_> = fs::read_dir(fixture.paths.staging_dir()).unwrap().collect();
    assert!(staging.is_empty());

    let journal = events(&fixture);
    assert!(journal.contains(&JournalEvent::BackupStarted));
    assert!(journal.contains(&JournalEvent::BackupCompleted));
    assert!(journal.contains(&JournalEvent::RestoreCompleted));
}

#[test]
fn test_empty_database_backup_is_complete_and_restorable() {
    let fixture = Fixture::sqlite(b"");
    let orchestrator = fixture.orchestrator();
    let token = CancelToken::new();

    let run = orchestrator.backup("app", BackupType::Full, &token).unwrap();
    assert_eq!(run.record.status, BackupStatus::Complete);
    let (checksum, _) = checksum_file(&run.record.storage.local_path).unwrap();
    assert_eq!(run.record.checksum, Some(checksum));

    orchestrator.restore(&run.record.id, None, &token).unwrap();
    assert_eq!(fixture.db.restored(), vec![Vec::<u8>::new()]);
}

#[test]
fn test_wrong_key_never_reaches_the_database() {
    let fixture = Fixture::sqlite(&sample_dump()).encrypted();
    let token = CancelToken::new();
    let id = fixture
        .orchestrator()
        .backup("app", BackupType::Full, &token)
        .unwrap()
        .record
        .id;

    let orchestrator = fixture.orchestrator_with(resolver_with("not the passphrase"));
    let err = orchestrator.restore(&id, None, &token).unwrap_err();
    assert!(matches!(err.root(), BackupError::DecryptionFailed(_)));
    assert_eq!(err.stage(), Some("Reversing"));
    assert!(fixture.db.restored().is_empty());

    // A wrong key says nothing about the artifact itself
    let record = orchestrator.catalog().get(&id).unwrap();
    assert_eq!(record.status, BackupStatus::Complete);
    assert!(events(&fixture).contains(&JournalEvent::RestoreFailed));
}

#[test]
fn test_incremental_without_full_fails_before_connecting() {
    let fixture = Fixture::mysql(b"CREATE TABLE t (id INT);\n");
    let orchestrator = fixture.orchestrator();

    let err = orchestrator
        .backup("shop", BackupType::Incremental, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, BackupError::Precondition(_)));
    assert_eq!(err.stage(), None);
    assert!(!err.to_string().contains("Pending"));
    assert_eq!(err.exit_code(), 2);
    assert_eq!(fixture.db.connects.load(Ordering::SeqCst), 0);
    assert!(orchestrator.catalog().is_empty());
}

#[test]
fn test_logical_dump_engines_reject_incremental() {
    let fixture = Fixture::sqlite(b"x");
    let orchestrator = fixture.orchestrator();
    let token = CancelToken::new();
    orchestrator.backup("app", BackupType::Full, &token).unwrap();

    let err = orchestrator
        .backup("app", BackupType::Differential, &token)
        .unwrap_err();
    assert!(matches!(err.root(), BackupError::Precondition(_)));
    assert_eq!(orchestrator.catalog().len(), 1);
}

#[test]
fn test_incremental_chain_restores_in_order() {
    let fixture = Fixture::mysql(b"CREATE TABLE t (id INT);\n");
    let orchestrator = fixture.orchestrator();
    let token = CancelToken::new();

    let full = orchestrator.backup("shop", BackupType::Full, &token).unwrap().record;
    assert!(full.checkpoint.is_some());

    let inc = orchestrator
        .backup("shop", BackupType::Incremental, &token)
        .unwrap()
        .record;
    assert_eq!(inc.parent_id.as_ref(), Some(&full.id));
    assert_eq!(inc.base_checkpoint, full.checkpoint);
    assert_ne!(inc.checkpoint, full.checkpoint);

    let outcome = orchestrator.restore(&inc.id, None, &token).unwrap();
    assert_eq!(outcome.restored, vec![full.id.clone(), inc.id.clone()]);

    let restored = fixture.db.restored();
    assert_eq!(restored.len(), 2);
    assert_eq!(restored[0], b"CREATE TABLE t (id INT);\n".to_vec());
    let expected = format!(
        "-- changes since {}\n",
        full.checkpoint.as_ref().unwrap()
    );
    assert_eq!(restored[1], expected.into_bytes());
}

#[test]
fn test_differential_chains_from_last_full() {
    let fixture = Fixture::mysql(b"base\n");
    let orchestrator = fixture.orchestrator();
    let token = CancelToken::new();

    let full = orchestrator.backup("shop", BackupType::Full, &token).unwrap().record;
    orchestrator
        .backup("shop", BackupType::Incremental, &token)
        .unwrap();
    let diff = orchestrator
        .backup("shop", BackupType::Differential, &token)
        .unwrap()
        .record;
    assert_eq!(diff.parent_id.as_ref(), Some(&full.id));
}

#[test]
fn test_transient_connect_failures_are_retried() {
    let fixture = Fixture::mysql(b"data\n");
    fixture
        .db
        .transient_connect_failures
        .store(2, Ordering::SeqCst);
    let orchestrator = fixture.orchestrator();

    let run = orchestrator
        .backup("shop", BackupType::Full, &CancelToken::new())
        .unwrap();
    assert_eq!(run.record.status, BackupStatus::Complete);
    assert_eq!(fixture.db.connects.load(Ordering::SeqCst), 3);
}

#[test]
fn test_exhausted_retries_leave_failed_record_and_no_artifact() {
    let fixture = Fixture::mysql(b"data\n");
    fixture
        .db
        .transient_connect_failures
        .store(10, Ordering::SeqCst);
    let orchestrator = fixture.orchestrator();

    let err = orchestrator
        .backup("shop", BackupType::Full, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(
        err.root(),
        BackupError::AdapterConnectionFailed { transient: true, .. }
    ));
    assert_eq!(err.stage(), Some("Dumping"));
    assert_eq!(fixture.db.connects.load(Ordering::SeqCst), 3);

    let records = orchestrator.catalog().list(&Default::default());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, BackupStatus::Failed);
    assert!(records[0].error.is_some());
    assert!(fixture.artifact_files().is_empty());
}

#[test]
fn test_transient_dump_break_restarts_pipeline() {
    let dump = sample_dump();
    let fixture = Fixture::mysql(&dump);
    fixture.db.fail_next_dump(10_000, "2013");
    let orchestrator = fixture.orchestrator();
    let token = CancelToken::new();

    let run = orchestrator.backup("shop", BackupType::Full, &token).unwrap();
    orchestrator.restore(&run.record.id, None, &token).unwrap();
    assert_eq!(fixture.db.restored(), vec![dump]);
}

#[test]
fn test_permanent_dump_failure_names_the_stage() {
    let fixture = Fixture::mysql(&sample_dump());
    fixture.db.fail_next_dump(10_000, "1146");
    let orchestrator = fixture.orchestrator();

    let err = orchestrator
        .backup("shop", BackupType::Full, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(
        err.root(),
        BackupError::DumpFailed {
            transient: false,
            ..
        }
    ));
    assert_eq!(err.stage(), Some("Dumping"));
    assert!(err.to_string().contains("Dumping"));
    assert!(fixture.artifact_files().is_empty());
}

#[test]
fn test_cancelled_backup_is_failed_not_complete() {
    let fixture = Fixture::sqlite(&sample_dump());
    let orchestrator = fixture.orchestrator();
    let token = CancelToken::new();
    token.cancel();

    let err = orchestrator
        .backup("app", BackupType::Full, &token)
        .unwrap_err();
    assert!(matches!(err.root(), BackupError::Cancelled(_)));

    let records = orchestrator.catalog().list(&Default::default());
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].status, BackupStatus::Failed);
    assert!(fixture.artifact_files().is_empty());
}

#[test]
fn test_tampered_artifact_is_marked_corrupt() {
    let fixture = Fixture::sqlite(&sample_dump());
    let orchestrator = fixture.orchestrator();
    let token = CancelToken::new();
    let record = orchestrator.backup("app", BackupType::Full, &token).unwrap().record;

    let mut bytes = fs::read(&record.storage.local_path).unwrap();
    let middle = bytes.len() / 2;
    bytes[middle] ^= 0xff;
    fs::write(&record.storage.local_path, bytes).unwrap();

    let err = orchestrator.restore(&record.id, None, &token).unwrap_err();
    assert!(matches!(err.root(), BackupError::ChecksumMismatch { .. }));
    assert_eq!(err.stage(), Some("Fetching"));
    assert!(fixture.db.restored().is_empty());
    assert_eq!(
        orchestrator.catalog().get(&record.id).unwrap().status,
        BackupStatus::Corrupt
    );

    let report = orchestrator.verify(&record.id, false, &token).unwrap();
    assert!(!report.is_ok());
    assert_eq!(report.status, BackupStatus::Corrupt);
}

#[test]
fn test_verify_with_trial_marks_verified() {
    let fixture = Fixture::sqlite(&sample_dump()).encrypted();
    let orchestrator = fixture.orchestrator();
    let token = CancelToken::new();
    let record = orchestrator.backup("app", BackupType::Full, &token).unwrap().record;

    let report = orchestrator.verify(&record.id, true, &token).unwrap();
    assert!(report.is_ok());
    assert_eq!(report.trial_passed, Some(true));
    assert_eq!(report.actual_checksum, record.checksum);

    let stored = orchestrator.catalog().get(&record.id).unwrap();
    assert_eq!(stored.status, BackupStatus::Verified);
    assert!(stored.verified_at.is_some());
    assert!(events(&fixture).contains(&JournalEvent::Verified));
}

#[test]
fn test_verify_rejects_failed_backups() {
    let fixture = Fixture::mysql(b"data\n");
    fixture
        .db
        .transient_connect_failures
        .store(10, Ordering::SeqCst);
    let orchestrator = fixture.orchestrator();
    orchestrator
        .backup("shop", BackupType::Full, &CancelToken::new())
        .unwrap_err();
    let id = orchestrator.catalog().list(&Default::default())[0].id.clone();

    let err = orchestrator
        .verify(&id, false, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err.root(), BackupError::Precondition(_)));
}

#[test]
fn test_busy_target_and_schedule_overlap() {
    let mut fixture = Fixture::sqlite(b"data");
    fixture.settings.schedule.push(ScheduleEntry {
        name: "nightly".into(),
        target: "app".into(),
        cron: "0 2 * * *".into(),
        backup_type: BackupType::Full,
        timeout_secs: None,
    });
    let descriptor = fixture.settings.targets[0].descriptor();
    let lock_path = target_lock_path(&fixture.paths.lock_dir(), &descriptor);
    let _held = match try_lock(&lock_path, "restore app").unwrap() {
        Acquire::Acquired(guard) => guard,
        Acquire::Held(holder) => panic!("lock unexpectedly held by {}", holder),
    };

    let orchestrator = fixture.orchestrator();
    let err = orchestrator
        .backup("app", BackupType::Full, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, BackupError::TargetBusy { .. }));
    assert_eq!(err.stage(), None);

    let err = orchestrator.run_scheduled("nightly").unwrap_err();
    assert!(matches!(err, BackupError::ScheduleOverlap(_)));
    assert_eq!(err.exit_code(), 2);
    assert!(orchestrator.catalog().is_empty());
}

#[test]
fn test_backup_all_runs_every_target() {
    let mut fixture = Fixture::sqlite(b"shared contents");
    let mut second = fixture.settings.targets[0].clone();
    second.name = "reports".into();
    second.path = Some("/srv/data/reports.db".into());
    fixture.settings.targets.push(second);
    let orchestrator = fixture.orchestrator();

    let results = orchestrator.backup_all(BackupType::Full);
    assert_eq!(results.len(), 2);
    for (name, result) in &results {
        let run = result.as_ref().unwrap();
        assert_eq!(&run.record.target, name);
        assert_eq!(run.record.status, BackupStatus::Complete);
    }
}

#[test]
fn test_interrupted_store_is_reconciled_on_next_open() {
    let fixture = Fixture::sqlite(b"data");
    let id = {
        let orchestrator = fixture.orchestrator();
        // A backup that died mid-Storing: in-progress record plus partial file
        let target = &fixture.settings.targets[0];
        let now = Utc::now();
        let id = BackupId::generate(&target.name, now);
        let store = LocalStore::new(fixture.paths.backup_dir());
        let record = BackupRecord::begin(
            id.clone(),
            &target.name,
            target.descriptor(),
            now,
            target.engine,
            BackupType::Full,
            Vec::new(),
            store.artifact_path(&id),
        );
        orchestrator.catalog().append(record).unwrap();
        fs::write(store.partial_path(&id), b"half a dump").unwrap();
        id
    };

    let orchestrator = fixture.orchestrator();
    let record = orchestrator.catalog().get(&id).unwrap();
    assert_eq!(record.status, BackupStatus::Failed);
    assert!(fixture.artifact_files().is_empty());
    assert!(events(&fixture).contains(&JournalEvent::Reconciled));
}

#[test]
fn test_prune_applies_age_and_count_with_floor() {
    let mut fixture = Fixture::sqlite(b"data");
    fixture.settings.retention = RetentionPolicy {
        max_age_days: Some(30),
        max_backups: Some(10),
        run_after_backup: false,
    };
    let orchestrator = fixture.orchestrator();
    let store = LocalStore::new(fixture.paths.backup_dir());
    let target = &fixture.settings.targets[0];

    // 15 backups aged 1, 4, 7, ... 43 days
    for i in 0..15 {
        let created_at = Utc::now() - ChronoDuration::days(1 + 3 * i);
        let id = BackupId::generate(&target.name, created_at);
        let mut record = BackupRecord::begin(
            id.clone(),
            &target.name,
            target.descriptor(),
            created_at,
            target.engine,
            BackupType::Full,
            Vec::new(),
            store.artifact_path(&id),
        );
        fs::create_dir_all(store.dir()).unwrap();
        fs::write(store.artifact_path(&id), b"artifact").unwrap();
        record.complete("00".repeat(32), 8, created_at).unwrap();
        orchestrator.catalog().append(record).unwrap();
    }

    let plan = orchestrator.prune(Some("app"), true).unwrap();
    assert_eq!(plan.evicted.len(), 5);
    assert_eq!(orchestrator.catalog().len(), 15);

    let report = orchestrator.prune(Some("app"), false).unwrap();
    assert_eq!(report.evicted.len(), 5);
    assert_eq!(orchestrator.catalog().len(), 10);
    assert_eq!(fixture.artifact_files().len(), 10);
    let cutoff = Utc::now() - ChronoDuration::days(30);
    assert!(orchestrator
        .catalog()
        .list(&Default::default())
        .iter()
        .all(|r| r.created_at > cutoff));
    assert!(events(&fixture).contains(&JournalEvent::Evicted));
}

#[test]
fn test_missing_artifact_is_fetched_from_mirror() {
    let mut fixture = Fixture::sqlite(&sample_dump()).encrypted();
    let mirror_dir = fixture.temp.path().join("mirror");
    fixture.settings.storage.cloud_mirror = Some(mirror_dir.clone());
    let orchestrator = fixture.orchestrator();
    let token = CancelToken::new();

    let record = orchestrator.backup("app", BackupType::Full, &token).unwrap().record;
    assert!(record.storage.cloud_uri.is_some());
    assert!(record.warnings.is_empty());

    fs::remove_file(&record.storage.local_path).unwrap();
    orchestrator.restore(&record.id, None, &token).unwrap();
    assert_eq!(fixture.db.restored(), vec![sample_dump()]);
}

#[test]
fn test_restore_into_other_target_requires_same_engine() {
    let mut fixture = Fixture::sqlite(b"data");
    let mut other = Fixture::mysql(b"").settings.targets[0].clone();
    other.name = "warehouse".into();
    fixture.settings.targets.push(other);
    let orchestrator = fixture.orchestrator();
    let token = CancelToken::new();

    let record = orchestrator.backup("app", BackupType::Full, &token).unwrap().record;
    let err = orchestrator
        .restore(&record.id, Some("warehouse"), &token)
        .unwrap_err();
    assert!(matches!(err.root(), BackupError::Precondition(_)));
    assert!(fixture.db.restored().is_empty());
}

#[test]
fn test_passphrase_matches_fixture() {
    // Guards the fixture: the default resolver must open what it encrypts
    let fixture = Fixture::sqlite(b"x").encrypted();
    let orchestrator = fixture.orchestrator_with(resolver_with(PASSPHRASE));
    let token = CancelToken::new();
    let record = orchestrator.backup("app", BackupType::Full, &token).unwrap().record;
    assert!(orchestrator.verify(&record.id, true, &token).unwrap().is_ok());
}

#[test]
fn test_verify_with_wrong_key_leaves_backup_usable() {
    let fixture = Fixture::sqlite(&sample_dump()).encrypted();
    let token = CancelToken::new();
    let id = fixture
        .orchestrator()
        .backup("app", BackupType::Full, &token)
        .unwrap()
        .record
        .id;

    {
        let orchestrator = fixture.orchestrator_with(resolver_with("not the passphrase"));
        let err = orchestrator.verify(&id, true, &token).unwrap_err();
        assert!(matches!(err.root(), BackupError::DecryptionFailed(_)));
        assert_eq!(err.exit_code(), 1);

        let record = orchestrator.catalog().get(&id).unwrap();
        assert_eq!(record.status, BackupStatus::Complete);
        assert!(record.warnings.is_empty());
    }

    let orchestrator = fixture.orchestrator();
    assert!(orchestrator.verify(&id, true, &token).unwrap().is_ok());
    orchestrator.restore(&id, None, &token).unwrap();
    assert_eq!(fixture.db.restored(), vec![sample_dump()]);
}

#[test]
fn test_status_lifecycle_through_verify() {
    let fixture = Fixture::sqlite(&sample_dump());
    let orchestrator = fixture.orchestrator();
    let token = CancelToken::new();
    let verified = orchestrator.backup("app", BackupType::Full, &token).unwrap().record;
    let complete = orchestrator.backup("app", BackupType::Full, &token).unwrap().record;

    // complete -> verified, and verified may be verified again
    let first = orchestrator.verify(&verified.id, false, &token).unwrap();
    assert_eq!(first.status, BackupStatus::Verified);
    let again = orchestrator.verify(&verified.id, true, &token).unwrap();
    assert!(again.is_ok());
    assert!(again.verified_at >= first.verified_at);

    let originals: Vec<Vec<u8>> = [&verified, &complete]
        .iter()
        .map(|r| fs::read(&r.storage.local_path).unwrap())
        .collect();
    for record in [&verified, &complete] {
        let mut bytes = fs::read(&record.storage.local_path).unwrap();
        bytes[0] ^= 0xff;
        fs::write(&record.storage.local_path, bytes).unwrap();
    }

    // A verified backup found damaged keeps its status but is not ok
    let report = orchestrator.verify(&verified.id, false, &token).unwrap();
    assert!(!report.is_ok());
    assert_eq!(report.status, BackupStatus::Verified);
    let stored = orchestrator.catalog().get(&verified.id).unwrap();
    assert_eq!(stored.warnings, vec!["verify: checksum mismatch".to_string()]);
    let err = orchestrator.restore(&verified.id, None, &token).unwrap_err();
    assert!(matches!(err.root(), BackupError::ChecksumMismatch { .. }));

    // complete -> corrupt, and corrupt is final even once the bytes are back
    let report = orchestrator.verify(&complete.id, false, &token).unwrap();
    assert_eq!(report.status, BackupStatus::Corrupt);
    fs::write(&complete.storage.local_path, &originals[1]).unwrap();
    let report = orchestrator.verify(&complete.id, true, &token).unwrap();
    assert!(!report.is_ok());
    assert_eq!(report.status, BackupStatus::Corrupt);
    assert_eq!(report.trial_passed, Some(true));
    let err = orchestrator.restore(&complete.id, None, &token).unwrap_err();
    assert!(matches!(err, BackupError::Precondition(_)));
    assert!(fixture.db.restored().is_empty());

    fs::write(&verified.storage.local_path, &originals[0]).unwrap();
    assert!(orchestrator.verify(&verified.id, false, &token).unwrap().is_ok());
}

/// A mirror whose uploads always fail
struct UnreachableMirror;

impl CloudStore for UnreachableMirror {
    fn uri(&self, name: &str) -> String {
        format!("mirror://unreachable/{}", name)
    }

    fn put(&self, _name: &str, data: &mut dyn Read) -> BackupResult<String> {
        let mut first = [0u8; 16];
        let _ = data.read(&mut first);
        Err(BackupError::StorageWriteFailed("connection refused".into()))
    }

    fn get(&self, name: &str) -> BackupResult<ByteStream> {
        Err(BackupError::NotFound {
            entity_type: "Object",
            identifier: name.to_string(),
        })
    }

    fn delete(&self, _name: &str) -> BackupResult<()> {
        Ok(())
    }
}

#[test]
fn test_failed_mirror_upload_is_a_warning() {
    let fixture = Fixture::sqlite(&sample_dump());
    let orchestrator = fixture.orchestrator().with_mirror(Box::new(UnreachableMirror));
    let token = CancelToken::new();

    let record = orchestrator.backup("app", BackupType::Full, &token).unwrap().record;
    assert_eq!(record.status, BackupStatus::Complete);
    assert!(record.storage.cloud_uri.is_none());
    assert_eq!(record.warnings.len(), 1);
    assert!(record.warnings[0].starts_with("cloud mirror failed"));
    assert!(record.warnings[0].contains("connection refused"));

    let stored = orchestrator.catalog().get(&record.id).unwrap();
    assert_eq!(stored.warnings, record.warnings);
    assert_eq!(fixture.artifact_files(), vec![record.id.artifact_file_name()]);

    orchestrator.restore(&record.id, None, &token).unwrap();
    assert_eq!(fixture.db.restored(), vec![sample_dump()]);
}

#[test]
fn test_artifact_lost_after_crash_is_reconciled_on_next_open() {
    let fixture = Fixture::sqlite(b"data");
    let record = {
        let orchestrator = fixture.orchestrator();
        let record = orchestrator
            .backup("app", BackupType::Full, &CancelToken::new())
            .unwrap()
            .record;
        // Eviction removed the artifact, then died before updating the catalog
        fs::remove_file(&record.storage.local_path).unwrap();
        record
    };

    let orchestrator = fixture.orchestrator();
    let stored = orchestrator.catalog().get(&record.id).unwrap();
    assert_eq!(stored.status, BackupStatus::Corrupt);
    assert_eq!(stored.warnings, vec!["artifact missing".to_string()]);
    assert!(events(&fixture).contains(&JournalEvent::Reconciled));

    let err = orchestrator
        .restore(&record.id, None, &CancelToken::new())
        .unwrap_err();
    assert!(matches!(err, BackupError::Precondition(_)));
}

#[cfg(unix)]
#[test]
fn test_lock_left_by_dead_process_is_reclaimed() {
    let fixture = Fixture::sqlite(b"data");
    let descriptor = fixture.settings.targets[0].descriptor();
    let lock_path = target_lock_path(&fixture.paths.lock_dir(), &descriptor);
    fs::create_dir_all(lock_path.parent().unwrap()).unwrap();

    let mut child = std::process::Command::new("true").spawn().unwrap();
    let dead_pid = child.id();
    child.wait().unwrap();
    fs::write(
        &lock_path,
        format!(
            r#"{{"pid":{},"label":"backup app","acquired_at":"2024-01-01T00:00:00Z"}}"#,
            dead_pid
        ),
    )
    .unwrap();
    assert!(!is_held(&lock_path));

    let orchestrator = fixture.orchestrator();
    let run = orchestrator
        .backup("app", BackupType::Full, &CancelToken::new())
        .unwrap();
    assert_eq!(run.record.status, BackupStatus::Complete);
    assert!(!lock_path.exists());
}
