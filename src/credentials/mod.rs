//! Credential resolution for db-backup
//!
//! Secrets (database passwords, encryption passphrases) are looked up by key
//! across an ordered list of sources. The first source that yields a value
//! wins; later sources are never consulted and values are not merged.
//!
//! # Example
//!
//! ```rust,ignore
//! use dbbackup::credentials::{CredentialResolver, CredentialSpec, SourceKind};
//!
//! let resolver = CredentialResolver::from_settings(&settings, &paths);
//! let spec = CredentialSpec::new("db_password", vec![SourceKind::Keystore, SourceKind::Environment]);
//! let password = resolver.resolve(&spec)?;
//! ```

pub mod keystore;
pub mod secure;
pub mod sources;

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::config::paths::BackupPaths;
use crate::config::settings::Settings;
use crate::error::{BackupError, BackupResult};

pub use keystore::Keystore;
pub use secure::SecureString;
pub use sources::{EnvironmentSource, FileSource, KeystoreSource};

/// Kinds of credential source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SourceKind {
    Keystore,
    Environment,
    File,
}

impl SourceKind {
    /// Default lookup order
    pub fn default_order() -> Vec<SourceKind> {
        vec![SourceKind::Keystore, SourceKind::Environment, SourceKind::File]
    }
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SourceKind::Keystore => write!(f, "keystore"),
            SourceKind::Environment => write!(f, "environment"),
            SourceKind::File => write!(f, "file"),
        }
    }
}

/// What to resolve and where to look, in order
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialSpec {
    pub key: String,
    /// Empty means the configured default order
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub sources: Vec<SourceKind>,
}

impl CredentialSpec {
    pub fn new(key: impl Into<String>, sources: Vec<SourceKind>) -> Self {
        Self {
            key: key.into(),
            sources,
        }
    }

    /// Fill in the default source order when none was given
    pub fn with_default_sources(&self, defaults: &[SourceKind]) -> Self {
        if self.sources.is_empty() {
            Self::new(self.key.clone(), defaults.to_vec())
        } else {
            self.clone()
        }
    }
}

/// A place secrets can come from
pub trait CredentialSource: Send + Sync {
    fn kind(&self) -> SourceKind;

    /// Yield the value for `key`, or decline with `None`
    fn lookup(&self, key: &str) -> Option<SecureString>;
}

/// Resolves credentials against an ordered set of sources
pub struct CredentialResolver {
    sources: Vec<Box<dyn CredentialSource>>,
}

impl CredentialResolver {
    pub fn new(sources: Vec<Box<dyn CredentialSource>>) -> Self {
        Self { sources }
    }

    /// Build the keystore, environment and file sources from settings
    pub fn from_settings(settings: &Settings, paths: &BackupPaths) -> Self {
        let creds = &settings.credentials;
        let keystore = Keystore::new(
            creds
                .keystore_path
                .clone()
                .unwrap_or_else(|| paths.keystore_file()),
        );
        let secrets_dir = creds
            .secrets_dir
            .clone()
            .unwrap_or_else(|| paths.secrets_dir());

        Self::new(vec![
            Box::new(KeystoreSource::new(keystore)),
            Box::new(EnvironmentSource::new(creds.env_prefix.clone())),
            Box::new(FileSource::new(secrets_dir)),
        ])
    }

    fn source(&self, kind: SourceKind) -> Option<&dyn CredentialSource> {
        self.sources
            .iter()
            .find(|s| s.kind() == kind)
            .map(|s| s.as_ref())
    }

    /// Resolve a credential, first match wins
    pub fn resolve(&self, spec: &CredentialSpec) -> BackupResult<SecureString> {
        let order: Vec<SourceKind> = if spec.sources.is_empty() {
            self.sources.iter().map(|s| s.kind()).collect()
        } else {
            spec.sources.clone()
        };

        for kind in order {
            let Some(source) = self.source(kind) else {
                debug!(key = %spec.key, source = %kind, "credential source not configured");
                continue;
            };
            if let Some(value) = source.lookup(&spec.key) {
                debug!(key = %spec.key, source = %kind, "credential resolved");
                return Ok(value);
            }
            debug!(key = %spec.key, source = %kind, "credential source declined");
        }

        Err(BackupError::CredentialNotFound {
            key: spec.key.clone(),
        })
    }
}
