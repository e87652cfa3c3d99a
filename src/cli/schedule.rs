//! Schedule CLI commands

use std::path::{Path, PathBuf};

use clap::Subcommand;

use super::open_orchestrator;
use crate::config::{BackupPaths, Settings};
use crate::display::format_backup_run;
use crate::error::{BackupError, BackupResult};
use crate::schedule::{check_entries, render_crontab};

/// Schedule subcommands
#[derive(Subcommand, Debug)]
pub enum ScheduleCommands {
    /// List configured schedule entries
    List,

    /// Validate schedule entries against the configured targets
    Check,

    /// Print crontab lines for an external scheduler
    Crontab {
        /// Binary the crontab should invoke (default: this executable)
        #[arg(long)]
        binary: Option<PathBuf>,
    },

    /// Run one scheduled job now
    Run {
        /// Job name
        job: String,
    },
}

/// Handle a schedule command
pub fn handle_schedule_command(
    paths: &BackupPaths,
    settings: &Settings,
    config_path: &Path,
    cmd: ScheduleCommands,
) -> BackupResult<()> {
    match cmd {
        ScheduleCommands::List => {
            if settings.schedule.is_empty() {
                println!("No scheduled jobs.");
                return Ok(());
            }
            for entry in &settings.schedule {
                let timeout = entry
                    .timeout_secs
                    .map(|s| format!(", timeout {}s", s))
                    .unwrap_or_default();
                println!(
                    "{:<20} {:<16} {:<14} {}{}",
                    entry.name, entry.target, entry.cron, entry.backup_type, timeout
                );
            }
        }

        ScheduleCommands::Check => {
            check_entries(&settings.schedule, &settings.targets)?;
            println!("{} scheduled job(s) OK", settings.schedule.len());
        }

        ScheduleCommands::Crontab { binary } => {
            check_entries(&settings.schedule, &settings.targets)?;
            let binary = match binary {
                Some(path) => path,
                None => std::env::current_exe().map_err(|e| {
                    BackupError::Io(format!("Cannot locate the db-backup binary: {}", e))
                })?,
            };
            print!("{}", render_crontab(&settings.schedule, &binary, config_path));
        }

        ScheduleCommands::Run { job } => {
            settings.validate()?;
            let orchestrator = open_orchestrator(paths, settings)?;
            let run = orchestrator.run_scheduled(&job)?;
            print!("{}", format_backup_run(&run));
        }
    }

    Ok(())
}
