//! Path management for db-backup
//!
//! ## Path Resolution Order
//!
//! 1. `DB_BACKUP_HOME` environment variable (if set)
//! 2. Unix (Linux/macOS): `$XDG_CONFIG_HOME/db-backup` or `~/.config/db-backup`
//! 3. Windows: `%APPDATA%\db-backup`

use std::path::PathBuf;

use crate::error::BackupError;

/// Environment variable that overrides the base directory
pub const HOME_ENV: &str = "DB_BACKUP_HOME";

/// Manages all paths used by db-backup
#[derive(Debug, Clone)]
pub struct BackupPaths {
    /// Base directory for configuration, catalog and backups
    base_dir: PathBuf,
}

impl BackupPaths {
    /// Create a new BackupPaths instance
    ///
    /// # Errors
    ///
    /// Returns an error if the home directory cannot be determined.
    pub fn new() -> Result<Self, BackupError> {
        let base_dir = match std::env::var(HOME_ENV) {
            Ok(custom) if !custom.is_empty() => PathBuf::from(custom),
            _ => resolve_default_path()?,
        };

        Ok(Self { base_dir })
    }

    /// Create BackupPaths with a custom base directory (useful for testing)
    pub fn with_base_dir(base_dir: PathBuf) -> Self {
        Self { base_dir }
    }

    /// Get the base directory (~/.config/db-backup/ or equivalent)
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }

    /// Default configuration file
    pub fn config_file(&self) -> PathBuf {
        self.base_dir.join("config.json")
    }

    /// Default artifact directory (~/.config/db-backup/backups/)
    pub fn backup_dir(&self) -> PathBuf {
        self.base_dir.join("backups")
    }

    /// Catalog index of backup records
    pub fn catalog_file(&self) -> PathBuf {
        self.base_dir.join("catalog.json")
    }

    /// Advisory lock files, one per target
    pub fn lock_dir(&self) -> PathBuf {
        self.base_dir.join("locks")
    }

    /// Default log directory
    pub fn log_dir(&self) -> PathBuf {
        self.base_dir.join("logs")
    }

    /// Scratch space for restores
    pub fn staging_dir(&self) -> PathBuf {
        self.base_dir.join("staging")
    }

    pub fn keystore_file(&self) -> PathBuf {
        self.base_dir.join("keystore.json")
    }

    /// Directory read by the file credential source
    pub fn secrets_dir(&self) -> PathBuf {
        self.base_dir.join("secrets")
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<(), BackupError> {
        for dir in [
            self.base_dir.clone(),
            self.backup_dir(),
            self.lock_dir(),
            self.log_dir(),
            self.staging_dir(),
        ] {
            std::fs::create_dir_all(&dir).map_err(|e| {
                BackupError::Io(format!("Failed to create {}: {}", dir.display(), e))
            })?;
        }

        Ok(())
    }
}

/// Resolve the default base directory path based on platform
#[cfg(not(windows))]
fn resolve_default_path() -> Result<PathBuf, BackupError> {
    if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
        if !xdg.is_empty() {
            return Ok(PathBuf::from(xdg).join("db-backup"));
        }
    }
    let dirs = directories::BaseDirs::new()
        .ok_or_else(|| BackupError::Config("Could not determine home directory".into()))?;
    Ok(dirs.home_dir().join(".config").join("db-backup"))
}

/// Resolve the default base directory path based on platform
#[cfg(windows)]
fn resolve_default_path() -> Result<PathBuf, BackupError> {
    let dirs = directories::BaseDirs::new()
        .ok_or_else(|| BackupError::Config("Could not determine APPDATA directory".into()))?;
    Ok(dirs.config_dir().join("db-backup"))
}
