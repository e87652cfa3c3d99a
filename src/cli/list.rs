//! Catalog listing commands

use chrono::Utc;
use clap::Args;

use super::open_orchestrator;
use crate::catalog::RecordFilter;
use crate::config::{BackupPaths, Settings};
use crate::display::{format_record_details, format_record_list};
use crate::error::BackupResult;
use crate::models::{BackupId, BackupStatus, BackupType};

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Only show backups of this target
    #[arg(long)]
    pub target: Option<String>,

    /// Only show backups with this status
    #[arg(long)]
    pub status: Option<BackupStatus>,

    /// Only show backups of this type
    #[arg(short = 't', long = "type")]
    pub backup_type: Option<BackupType>,

    /// Show engine, creation time, parent and pipeline
    #[arg(short, long)]
    pub verbose: bool,
}

/// Handle the list command
pub fn handle_list_command(
    paths: &BackupPaths,
    settings: &Settings,
    args: ListArgs,
) -> BackupResult<()> {
    let orchestrator = open_orchestrator(paths, settings)?;
    let filter = RecordFilter {
        target: args.target,
        status: args.status,
        backup_type: args.backup_type,
    };
    let records = orchestrator.catalog().list(&filter);
    println!("{}", format_record_list(&records, args.verbose, Utc::now()));
    Ok(())
}

/// Handle the show command
pub fn handle_show_command(paths: &BackupPaths, settings: &Settings, id: &str) -> BackupResult<()> {
    let id = BackupId::parse(id)?;
    let orchestrator = open_orchestrator(paths, settings)?;
    let record = orchestrator.catalog().get(&id)?;
    print!("{}", format_record_details(&record));
    Ok(())
}
