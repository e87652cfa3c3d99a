//! Operation result summaries

use super::{format_elapsed, format_size};
use crate::catalog::ReconcileReport;
use crate::orchestrator::{BackupRun, RestoreOutcome, VerifyReport};
use crate::retention::RetentionReport;

pub fn format_backup_run(run: &BackupRun) -> String {
    let record = &run.record;
    let mut output = format!(
        "Backup complete: {}\n  Target:   {}\n  Type:     {}\n  Size:     {}\n  Time:     {}\n  Artifact: {}\n",
        record.id,
        record.target,
        record.backup_type,
        format_size(record.size_bytes),
        format_elapsed(run.duration),
        record.storage.local_path.display(),
    );
    if let Some(uri) = &record.storage.cloud_uri {
        output.push_str(&format!("  Mirror:   {}\n", uri));
    }
    for warning in &record.warnings {
        output.push_str(&format!("  Warning:  {}\n", warning));
    }
    if let Some(retention) = &run.retention {
        if !retention.evicted.is_empty() {
            output.push_str(&format!(
                "  Pruned {} old backup(s), {} reclaimed\n",
                retention.evicted.len(),
                format_size(retention.reclaimed_bytes())
            ));
        }
    }
    output
}

pub fn format_restore_outcome(outcome: &RestoreOutcome) -> String {
    let mut output = format!(
        "Restored {} into '{}' in {}\n",
        outcome.id,
        outcome.target,
        format_elapsed(outcome.duration)
    );
    if outcome.restored.len() > 1 {
        output.push_str("Chain loaded:\n");
        for (i, id) in outcome.restored.iter().enumerate() {
            output.push_str(&format!("  {}. {}\n", i + 1, id));
        }
    }
    output.push_str(&format!("Loaded {}\n", format_size(outcome.bytes_loaded)));
    output
}

pub fn format_verify_report(report: &VerifyReport) -> String {
    let mut output = format!("Backup {}: {}\n", report.id, report.status);
    if let Some(expected) = &report.expected_checksum {
        output.push_str(&format!("  Expected: {}\n", expected));
    }
    match &report.actual_checksum {
        Some(actual) => output.push_str(&format!("  Actual:   {}\n", actual)),
        None => output.push_str("  Actual:   (artifact unavailable)\n"),
    }
    match report.trial_passed {
        Some(true) => output.push_str("  Trial decode: passed\n"),
        Some(false) => output.push_str("  Trial decode: FAILED\n"),
        None => {}
    }
    if let Some(error) = &report.error {
        output.push_str(&format!("  Problem:  {}\n", error));
    }
    output
}

pub fn format_retention_report(report: &RetentionReport) -> String {
    if report.evicted.is_empty() {
        return "Nothing to prune.".to_string();
    }

    let verb = if report.dry_run { "Would delete" } else { "Deleted" };
    let mut output = String::new();
    for eviction in &report.evicted {
        output.push_str(&format!(
            "{} {} ({}, {}, created {})\n",
            verb,
            eviction.id,
            eviction.status,
            format_size(eviction.size_bytes),
            eviction.created_at.format("%Y-%m-%d"),
        ));
    }
    output.push_str(&format!(
        "{} backup(s), {} {}",
        report.evicted.len(),
        format_size(report.reclaimed_bytes()),
        if report.dry_run { "would be reclaimed" } else { "reclaimed" }
    ));
    output
}

pub fn format_reconcile_report(report: &ReconcileReport) -> String {
    if report.is_empty() {
        return "Catalog is consistent with the artifact directory.".to_string();
    }

    let mut output = String::new();
    for path in &report.removed_partials {
        output.push_str(&format!("Removed partial artifact {}\n", path.display()));
    }
    for id in &report.interrupted {
        output.push_str(&format!("Marked interrupted backup {} failed\n", id));
    }
    for path in &report.removed_orphans {
        output.push_str(&format!("Removed orphaned artifact {}\n", path.display()));
    }
    for id in &report.missing_artifacts {
        output.push_str(&format!("Marked {} corrupt (artifact missing)\n", id));
    }
    output.trim_end().to_string()
}
