//! CLI command handlers
//!
//! This module contains the implementation of CLI commands,
//! bridging the clap argument parsing with the orchestrator.

pub mod backup;
pub mod keystore;
pub mod list;
pub mod maintenance;
pub mod restore;
pub mod schedule;
pub mod setup;

use tracing::warn;

use crate::config::{BackupPaths, Settings};
use crate::drivers::CliDriverFactory;
use crate::error::BackupResult;
use crate::orchestrator::Orchestrator;

pub use backup::{handle_backup_command, BackupArgs};
pub use keystore::{handle_keystore_command, KeystoreCommands};
pub use list::{handle_list_command, handle_show_command, ListArgs};
pub use maintenance::{handle_prune_command, handle_reconcile_command, PruneArgs};
pub use restore::{handle_restore_command, handle_verify_command, RestoreArgs, VerifyArgs};
pub use schedule::{handle_schedule_command, ScheduleCommands};
pub use setup::{handle_config_command, handle_init_command};

/// Open the orchestrator with the native client drivers
pub fn open_orchestrator<'a>(
    paths: &BackupPaths,
    settings: &'a Settings,
) -> BackupResult<Orchestrator<'a>> {
    let drivers = Box::new(CliDriverFactory::new(paths.staging_dir()));
    let (orchestrator, report) = Orchestrator::open(settings, paths, drivers)?;
    if !report.is_empty() {
        warn!(
            partials = report.removed_partials.len(),
            interrupted = report.interrupted.len(),
            orphans = report.removed_orphans.len(),
            missing = report.missing_artifacts.len(),
            "catalog reconciled at startup"
        );
    }
    Ok(orchestrator)
}
