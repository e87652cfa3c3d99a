//! File-backed keystore
//!
//! A JSON map of credential keys to secrets, kept owner-readable under the
//! base directory and managed with `db-backup keystore`.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::warn;

use super::SecureString;
use crate::error::{BackupError, BackupResult};
use crate::storage::file_io::{read_json, restrict_permissions, write_json_atomic};

#[derive(Debug, Default, Serialize, Deserialize)]
struct KeystoreFile {
    #[serde(default)]
    entries: BTreeMap<String, String>,
}

/// Read/write access to the keystore file
#[derive(Debug, Clone)]
pub struct Keystore {
    path: PathBuf,
}

impl Keystore {
    pub fn new(path: PathBuf) -> Self {
        Self { path }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Look up a secret
    pub fn get(&self, key: &str) -> BackupResult<Option<SecureString>> {
        warn_if_exposed(&self.path);
        let mut file: KeystoreFile = read_json(&self.path)?;
        Ok(file.entries.remove(key).map(SecureString::from))
    }

    /// Store or replace a secret
    pub fn set(&self, key: &str, secret: &SecureString) -> BackupResult<()> {
        validate_key(key)?;
        let mut file: KeystoreFile = read_json(&self.path)?;
        file.entries.insert(key.to_string(), secret.as_str().to_string());
        write_json_atomic(&self.path, &file)?;
        restrict_permissions(&self.path)
    }

    /// Remove a secret, returning whether it existed
    pub fn remove(&self, key: &str) -> BackupResult<bool> {
        let mut file: KeystoreFile = read_json(&self.path)?;
        let existed = file.entries.remove(key).is_some();
        if existed {
            write_json_atomic(&self.path, &file)?;
            restrict_permissions(&self.path)?;
        }
        Ok(existed)
    }

    /// Names of stored keys (never the secrets)
    pub fn keys(&self) -> BackupResult<Vec<String>> {
        let file: KeystoreFile = read_json(&self.path)?;
        Ok(file.entries.into_keys().collect())
    }
}

fn validate_key(key: &str) -> BackupResult<()> {
    if key.trim().is_empty() {
        return Err(BackupError::Config("Credential key cannot be empty".into()));
    }
    Ok(())
}

#[cfg(unix)]
fn warn_if_exposed(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Ok(meta) = std::fs::metadata(path) {
        if meta.permissions().mode() & 0o077 != 0 {
            warn!(path = %path.display(), "keystore is readable by other users");
        }
    }
}

#[cfg(not(unix))]
fn warn_if_exposed(_path: &Path) {}
