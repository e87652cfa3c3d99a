//! Restore and verify CLI commands

use clap::Args;

use super::open_orchestrator;
use crate::config::{BackupPaths, Settings};
use crate::display::{format_record_details, format_restore_outcome, format_verify_report};
use crate::error::{BackupError, BackupResult};
use crate::models::BackupId;
use crate::orchestrator::VerifyReport;

#[derive(Args, Debug)]
pub struct RestoreArgs {
    /// Backup id (see `db-backup list`)
    pub id: String,

    /// Restore into this configured target instead of the original one
    #[arg(long)]
    pub target: Option<String>,

    /// Skip the confirmation step
    #[arg(short, long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct VerifyArgs {
    /// Backup id (see `db-backup list`)
    pub id: String,

    /// Also decrypt and decompress the artifact without loading it
    #[arg(long)]
    pub trial: bool,
}

/// Handle the restore command
pub fn handle_restore_command(
    paths: &BackupPaths,
    settings: &Settings,
    args: RestoreArgs,
) -> BackupResult<()> {
    settings.validate()?;
    let id = BackupId::parse(&args.id)?;
    let orchestrator = open_orchestrator(paths, settings)?;
    let record = orchestrator.catalog().get(&id)?;
    let into = args.target.as_deref().unwrap_or(&record.target);

    if !args.force {
        print!("{}", format_record_details(&record));
        println!();
        println!(
            "WARNING: This will overwrite the contents of target '{}'!",
            into
        );
        println!("To proceed, run again with --force flag:");
        match &args.target {
            Some(target) => println!("  db-backup restore {} --target {} --force", id, target),
            None => println!("  db-backup restore {} --force", id),
        }
        return Ok(());
    }

    println!("Restoring {} into '{}'...", id, into);
    let token = orchestrator.cancel_token(None);
    let outcome = orchestrator.restore(&id, args.target.as_deref(), &token)?;
    print!("{}", format_restore_outcome(&outcome));
    Ok(())
}

/// Handle the verify command
///
/// A corrupt backup is reported and then turned into an operational error so
/// the exit code reflects it.
pub fn handle_verify_command(
    paths: &BackupPaths,
    settings: &Settings,
    args: VerifyArgs,
) -> BackupResult<()> {
    let id = BackupId::parse(&args.id)?;
    let orchestrator = open_orchestrator(paths, settings)?;
    let token = orchestrator.cancel_token(None);
    let report = orchestrator.verify(&id, args.trial, &token)?;
    print!("{}", format_verify_report(&report));
    match verify_failure(&report) {
        Some(err) => Err(err),
        None => Ok(()),
    }
}

fn verify_failure(report: &VerifyReport) -> Option<BackupError> {
    if report.is_ok() {
        return None;
    }
    let err = match (&report.expected_checksum, &report.actual_checksum) {
        (_, None) => BackupError::NotFound {
            entity_type: "Artifact",
            identifier: report.id.to_string(),
        },
        (expected, Some(actual)) if expected.as_deref() != Some(actual.as_str()) => {
            BackupError::ChecksumMismatch {
                id: report.id.to_string(),
                expected: expected.clone().unwrap_or_default(),
                actual: actual.clone(),
            }
        }
        _ if report.trial_passed == Some(false) => BackupError::TransformFailed(
            report
                .error
                .clone()
                .unwrap_or_else(|| "trial decode failed".into()),
        ),
        // The artifact checks out but the record was condemned earlier
        _ => BackupError::Catalog(format!("Backup {} is {}", report.id, report.status)),
    };
    Some(err)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::BackupStatus;

    fn report(status: BackupStatus, expected: &str, actual: Option<&str>) -> VerifyReport {
        VerifyReport {
            id: BackupId::parse("orders-20240101-000000-000-abcdef01").unwrap(),
            target: "orders".into(),
            status,
            expected_checksum: Some(expected.into()),
            actual_checksum: actual.map(str::to_string),
            trial_passed: None,
            error: None,
            verified_at: None,
        }
    }

    #[test]
    fn test_verified_is_success() {
        assert!(verify_failure(&report(BackupStatus::Verified, "aa", Some("aa"))).is_none());
    }

    #[test]
    fn test_mismatch_is_reported() {
        let err = verify_failure(&report(BackupStatus::Corrupt, "aa", Some("bb"))).unwrap();
        assert!(matches!(err, BackupError::ChecksumMismatch { .. }));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_missing_artifact_is_not_found() {
        let err = verify_failure(&report(BackupStatus::Corrupt, "aa", None)).unwrap();
        assert!(err.is_not_found());
    }

    #[test]
    fn test_failed_trial_is_a_transform_failure() {
        let mut failed = report(BackupStatus::Corrupt, "aa", Some("aa"));
        failed.trial_passed = Some(false);
        failed.error = Some("Transform failed: truncated gzip stream".into());
        let err = verify_failure(&failed).unwrap();
        assert!(matches!(err, BackupError::TransformFailed(_)));
        assert_eq!(err.exit_code(), 1);
    }

    #[test]
    fn test_previously_corrupt_backup_is_reported_by_status() {
        let err = verify_failure(&report(BackupStatus::Corrupt, "aa", Some("aa"))).unwrap();
        assert!(!matches!(err, BackupError::TransformFailed(_)));
        assert!(err.to_string().contains("corrupt"));
        assert_eq!(err.exit_code(), 1);
    }
}
