//! Init and config commands

use std::path::Path;

use crate::config::{BackupPaths, Settings};
use crate::credentials::CredentialSpec;
use crate::error::BackupResult;

/// Handle the init command
pub fn handle_init_command(paths: &BackupPaths, config_path: &Path, force: bool) -> BackupResult<()> {
    println!("Initializing db-backup at: {}", paths.base_dir().display());
    paths.ensure_directories()?;

    if config_path.exists() && !force {
        println!("Configuration already exists: {}", config_path.display());
        println!("Run 'db-backup init --force' to overwrite it with the template.");
        return Ok(());
    }

    Settings::template().save(config_path)?;
    println!("Wrote template configuration: {}", config_path.display());
    println!();
    println!("Next steps:");
    println!("  1. Edit the 'targets' section to describe your databases");
    println!("  2. Store credentials: db-backup keystore set db_password");
    println!("  3. Run a first backup: db-backup backup");
    Ok(())
}

/// Handle the config command
pub fn handle_config_command(paths: &BackupPaths, settings: &Settings, config_path: &Path) {
    println!("db-backup Configuration");
    println!("=======================");
    println!("Config file:      {}", config_path.display());
    println!("Base directory:   {}", paths.base_dir().display());
    println!("Backup directory: {}", settings.backup_dir(paths).display());
    println!("Catalog:          {}", paths.catalog_file().display());
    println!("Log directory:    {}", settings.log_dir(paths).display());
    println!(
        "Keystore:         {}",
        settings
            .credentials
            .keystore_path
            .clone()
            .unwrap_or_else(|| paths.keystore_file())
            .display()
    );
    if let Some(mirror) = &settings.storage.cloud_mirror {
        println!("Cloud mirror:     {}", mirror.display());
    }
    println!();

    println!("Targets:");
    if settings.targets.is_empty() {
        println!("  (none)");
    }
    for target in &settings.targets {
        let password = target
            .password
            .as_ref()
            .map(describe_credential)
            .unwrap_or_else(|| "no password".into());
        println!("  {:<16} {}  [{}]", target.name, target.descriptor(), password);
    }
    println!();

    println!("Settings:");
    let pipeline = settings.pipeline();
    if pipeline.is_empty() {
        println!("  Pipeline:    none");
    } else {
        let stages: Vec<String> = pipeline.iter().map(|s| s.to_string()).collect();
        println!("  Pipeline:    {}", stages.join(" -> "));
    }
    println!(
        "  Retention:   max age {}, max backups {}",
        settings
            .retention
            .max_age_days
            .map(|d| format!("{} days", d))
            .unwrap_or_else(|| "unlimited".into()),
        settings
            .retention
            .max_backups
            .map(|n| n.to_string())
            .unwrap_or_else(|| "unlimited".into()),
    );
    println!(
        "  Retry:       {} attempt(s), backoff {}-{} ms",
        settings.retry.max_attempts, settings.retry.initial_backoff_ms, settings.retry.max_backoff_ms
    );
    println!("  Scheduled:   {} job(s)", settings.schedule.len());
    if let Some(timeout) = settings.operation_timeout_secs {
        println!("  Timeout:     {}s per operation", timeout);
    }
}

fn describe_credential(spec: &CredentialSpec) -> String {
    if spec.sources.is_empty() {
        format!("credential '{}'", spec.key)
    } else {
        let sources: Vec<String> = spec.sources.iter().map(|s| s.to_string()).collect();
        format!("credential '{}' via {}", spec.key, sources.join(", "))
    }
}
