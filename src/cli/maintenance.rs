//! Retention and reconciliation commands

use clap::Args;

use super::open_orchestrator;
use crate::config::{BackupPaths, Settings};
use crate::display::{format_reconcile_report, format_retention_report};
use crate::drivers::CliDriverFactory;
use crate::error::BackupResult;
use crate::orchestrator::Orchestrator;

#[derive(Args, Debug)]
pub struct PruneArgs {
    /// Print what would be deleted without deleting anything
    #[arg(long)]
    pub dry_run: bool,

    /// Only prune backups of this target
    #[arg(long)]
    pub target: Option<String>,
}

/// Handle the prune command
pub fn handle_prune_command(
    paths: &BackupPaths,
    settings: &Settings,
    args: PruneArgs,
) -> BackupResult<()> {
    settings.retention.validate()?;
    let orchestrator = open_orchestrator(paths, settings)?;
    let report = orchestrator.prune(args.target.as_deref(), args.dry_run)?;
    println!("{}", format_retention_report(&report));
    Ok(())
}

/// Handle the reconcile command
///
/// Opening the catalog runs the scan, so its report is what gets printed.
pub fn handle_reconcile_command(paths: &BackupPaths, settings: &Settings) -> BackupResult<()> {
    let drivers = Box::new(CliDriverFactory::new(paths.staging_dir()));
    let (_orchestrator, report) = Orchestrator::open(settings, paths, drivers)?;
    println!("{}", format_reconcile_report(&report));
    Ok(())
}
