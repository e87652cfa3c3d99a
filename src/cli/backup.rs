//! Backup CLI command

use clap::Args;

use super::open_orchestrator;
use crate::config::{BackupPaths, Settings};
use crate::display::format_backup_run;
use crate::error::{BackupError, BackupResult};
use crate::models::BackupType;

#[derive(Args, Debug)]
pub struct BackupArgs {
    /// full, incremental or differential
    #[arg(short = 't', long = "type", default_value = "full")]
    pub backup_type: BackupType,

    /// Target to back up (may be omitted when only one is configured)
    #[arg(long, conflicts_with = "all")]
    pub target: Option<String>,

    /// Back up every configured target concurrently
    #[arg(long)]
    pub all: bool,
}

/// Handle the backup command
pub fn handle_backup_command(
    paths: &BackupPaths,
    settings: &Settings,
    args: BackupArgs,
) -> BackupResult<()> {
    settings.validate()?;
    let orchestrator = open_orchestrator(paths, settings)?;

    if args.all {
        let mut first_error = None;
        for (name, result) in orchestrator.backup_all(args.backup_type) {
            match result {
                Ok(run) => print!("{}", format_backup_run(&run)),
                Err(e) => {
                    eprintln!("Backup of '{}' failed: {}", name, e);
                    if first_error.is_none() {
                        first_error = Some(e);
                    }
                }
            }
        }
        return match first_error {
            Some(e) => Err(e),
            None => Ok(()),
        };
    }

    let target = select_target(settings, args.target.as_deref())?;
    let token = orchestrator.cancel_token(None);
    println!("Backing up '{}' ({})...", target, args.backup_type);
    let run = orchestrator.backup(target, args.backup_type, &token)?;
    print!("{}", format_backup_run(&run));
    Ok(())
}

fn select_target<'s>(settings: &'s Settings, requested: Option<&'s str>) -> BackupResult<&'s str> {
    if let Some(name) = requested {
        return Ok(name);
    }
    match settings.targets.as_slice() {
        [only] => Ok(only.name.as_str()),
        _ => Err(BackupError::Config(
            "Several targets are configured; pass --target NAME or --all".into(),
        )),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::TargetConfig;

    fn settings_with(names: &[&str]) -> Settings {
        let mut settings = Settings::default();
        for name in names {
            settings.targets.push(TargetConfig {
                name: name.to_string(),
                ..Settings::template().targets[0].clone()
            });
        }
        settings
    }

    #[test]
    fn test_single_target_is_implied() {
        let settings = settings_with(&["orders"]);
        assert_eq!(select_target(&settings, None).unwrap(), "orders");
    }

    #[test]
    fn test_explicit_target_wins() {
        let settings = settings_with(&["orders", "users"]);
        assert_eq!(select_target(&settings, Some("users")).unwrap(), "users");
    }

    #[test]
    fn test_ambiguous_target_is_config_error() {
        let settings = settings_with(&["orders", "users"]);
        let err = select_target(&settings, None).unwrap_err();
        assert_eq!(err.exit_code(), 2);
    }
}
