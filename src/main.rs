use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use dbbackup::cli::{
    handle_backup_command, handle_config_command, handle_init_command, handle_keystore_command,
    handle_list_command, handle_prune_command, handle_reconcile_command, handle_restore_command,
    handle_schedule_command, handle_show_command, handle_verify_command, BackupArgs,
    KeystoreCommands, ListArgs, PruneArgs, RestoreArgs, ScheduleCommands, VerifyArgs,
};
use dbbackup::config::settings::LoggingSettings;
use dbbackup::config::{BackupPaths, Settings};
use dbbackup::BackupError;

#[derive(Parser)]
#[command(
    name = "db-backup",
    author = "Monroe Stephenson",
    version,
    about = "Database backup and restore engine",
    long_about = "db-backup backs up MySQL, PostgreSQL, SQLite and MongoDB databases \
                  through a compression and encryption pipeline, keeps a catalog of \
                  every backup, verifies artifacts and enforces retention."
)]
struct Cli {
    /// Configuration file (default: <base dir>/config.json)
    #[arg(long, global = true, env = "DB_BACKUP_CONFIG")]
    config: Option<PathBuf>,

    /// Log at debug level unless RUST_LOG is set
    #[arg(long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Back up one target, or every target with --all
    Backup(BackupArgs),

    /// Restore a backup (and the backups it builds on)
    Restore(RestoreArgs),

    /// Re-check a backup's checksum, optionally decoding it
    Verify(VerifyArgs),

    /// List backups in the catalog
    #[command(alias = "ls")]
    List(ListArgs),

    /// Show one backup in detail
    Show {
        /// Backup id
        id: String,
    },

    /// Delete backups according to the retention policy
    Prune(PruneArgs),

    /// Scheduled jobs
    #[command(subcommand)]
    Schedule(ScheduleCommands),

    /// Manage secrets in the local keystore
    #[command(subcommand)]
    Keystore(KeystoreCommands),

    /// Clean up interrupted backups and orphaned artifacts
    Reconcile,

    /// Show resolved paths and settings
    Config,

    /// Write a template configuration
    Init {
        /// Overwrite an existing configuration
        #[arg(long)]
        force: bool,
    },
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("Error: {:#}", err);
            let code = err
                .downcast_ref::<BackupError>()
                .map(BackupError::exit_code)
                .unwrap_or(1);
            ExitCode::from(code)
        }
    }
}

fn run(cli: Cli) -> Result<()> {
    let paths = BackupPaths::new()?;
    let config_path = cli.config.clone().unwrap_or_else(|| paths.config_file());

    if let Commands::Init { force } = cli.command {
        init_tracing(&LoggingSettings::default(), cli.verbose);
        handle_init_command(&paths, &config_path, force)?;
        return Ok(());
    }

    // An explicitly named file must exist; the default one is optional
    let settings = if cli.config.is_some() {
        Settings::load(&config_path)?
    } else {
        Settings::load_or_default(&config_path)?
    };
    init_tracing(&settings.logging, cli.verbose);

    match cli.command {
        Commands::Backup(args) => handle_backup_command(&paths, &settings, args)?,
        Commands::Restore(args) => handle_restore_command(&paths, &settings, args)?,
        Commands::Verify(args) => handle_verify_command(&paths, &settings, args)?,
        Commands::List(args) => handle_list_command(&paths, &settings, args)?,
        Commands::Show { id } => handle_show_command(&paths, &settings, &id)?,
        Commands::Prune(args) => handle_prune_command(&paths, &settings, args)?,
        Commands::Schedule(cmd) => handle_schedule_command(&paths, &settings, &config_path, cmd)?,
        Commands::Keystore(cmd) => handle_keystore_command(&paths, &settings, cmd)?,
        Commands::Reconcile => handle_reconcile_command(&paths, &settings)?,
        Commands::Config => handle_config_command(&paths, &settings, &config_path),
        Commands::Init { .. } => {}
    }

    Ok(())
}

/// Log to stderr so command output on stdout stays clean
fn init_tracing(logging: &LoggingSettings, verbose: bool) {
    let default_level = if verbose { "debug" } else { logging.level.as_str() };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);
    let _ = if logging.json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
}
