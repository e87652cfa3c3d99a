//! Configuration document for db-backup
//!
//! Manages targets, storage locations, the transform pipeline, retention,
//! retry behaviour, credential sources, schedules and notifications. The file
//! is JSON unless its extension is `.yaml`/`.yml`.

use std::collections::HashSet;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use super::paths::BackupPaths;
use crate::credentials::{CredentialSpec, SourceKind};
use crate::error::{BackupError, BackupResult};
use crate::models::{DatabaseType, TargetConfig};
use crate::retention::RetentionPolicy;
use crate::schedule::{self, ScheduleEntry};
use crate::storage::file_io::write_json_atomic;
use crate::transform::{
    validate_stages, CompressionAlgorithm, CompressionLevel, EncryptionAlgorithm, KdfParams,
    StageKind, StageSpec,
};

/// Where artifacts are kept
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct StorageSettings {
    /// Artifact directory (default: `<base>/backups`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_dir: Option<PathBuf>,

    /// Directory mirrored as the cloud copy of every artifact
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cloud_mirror: Option<PathBuf>,
}

/// Compression stage settings
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompressionSettings {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub algorithm: CompressionAlgorithm,
    #[serde(default)]
    pub level: CompressionLevel,
}

impl Default for CompressionSettings {
    fn default() -> Self {
        Self {
            enabled: true,
            algorithm: CompressionAlgorithm::default(),
            level: CompressionLevel::default(),
        }
    }
}

/// Encryption stage settings
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct EncryptionSettings {
    /// Whether encryption is enabled
    #[serde(default)]
    pub enabled: bool,

    #[serde(default)]
    pub algorithm: EncryptionAlgorithm,

    /// Credential holding the passphrase
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<CredentialSpec>,

    /// Key derivation parameters written into new artifacts
    #[serde(default)]
    pub kdf: KdfParams,
}

/// Bounded retry for transient failures
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetrySettings {
    /// Total attempts including the first
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 500,
            max_backoff_ms: 8_000,
        }
    }
}

/// Credential source configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialSettings {
    /// Keystore file (default: `<base>/keystore.json`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub keystore_path: Option<PathBuf>,

    /// Directory of one-secret-per-file credentials (default: `<base>/secrets`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub secrets_dir: Option<PathBuf>,

    /// Prepended to derived environment variable names
    #[serde(default)]
    pub env_prefix: String,

    /// Order used by credential specs that do not name their sources
    #[serde(default = "SourceKind::default_order")]
    pub default_sources: Vec<SourceKind>,
}

impl Default for CredentialSettings {
    fn default() -> Self {
        Self {
            keystore_path: None,
            secrets_dir: None,
            env_prefix: String::new(),
            default_sources: SourceKind::default_order(),
        }
    }
}

/// Outcome notifications
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationSettings {
    #[serde(default)]
    pub enabled: bool,

    /// Webhook the external transport posts to
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub webhook_url: Option<String>,

    /// Longest the orchestrator waits for delivery
    #[serde(default = "default_notify_timeout_ms")]
    pub timeout_ms: u64,
}

impl Default for NotificationSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            webhook_url: None,
            timeout_ms: default_notify_timeout_ms(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Filter used when `RUST_LOG` is unset
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Emit JSON lines instead of human-readable output
    #[serde(default)]
    pub json: bool,

    /// Journal directory (default: `<base>/logs`)
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub log_dir: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            log_dir: None,
        }
    }
}

/// Configuration for db-backup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Settings {
    /// Schema version for migration support
    #[serde(default = "default_schema_version")]
    pub schema_version: u32,

    /// Databases to back up
    #[serde(default)]
    pub targets: Vec<TargetConfig>,

    #[serde(default)]
    pub storage: StorageSettings,

    #[serde(default)]
    pub compression: CompressionSettings,

    #[serde(default)]
    pub encryption: EncryptionSettings,

    /// Order enabled stages are applied in on backup
    #[serde(default = "default_pipeline_order")]
    pub pipeline_order: Vec<StageKind>,

    #[serde(default)]
    pub retention: RetentionPolicy,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default)]
    pub credentials: CredentialSettings,

    #[serde(default)]
    pub schedule: Vec<ScheduleEntry>,

    #[serde(default)]
    pub notifications: NotificationSettings,

    #[serde(default)]
    pub logging: LoggingSettings,

    /// Abort any single operation after this many seconds
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub operation_timeout_secs: Option<u64>,

    /// Chunks buffered between the dump and the transform stages
    #[serde(default = "default_pipe_capacity")]
    pub pipe_capacity: usize,
}

fn default_schema_version() -> u32 {
    1
}

fn default_true() -> bool {
    true
}

fn default_notify_timeout_ms() -> u64 {
    2_000
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_pipeline_order() -> Vec<StageKind> {
    vec![StageKind::Compress, StageKind::Encrypt]
}

fn default_pipe_capacity() -> usize {
    8
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            schema_version: default_schema_version(),
            targets: Vec::new(),
            storage: StorageSettings::default(),
            compression: CompressionSettings::default(),
            encryption: EncryptionSettings::default(),
            pipeline_order: default_pipeline_order(),
            retention: RetentionPolicy::default(),
            retry: RetrySettings::default(),
            credentials: CredentialSettings::default(),
            schedule: Vec::new(),
            notifications: NotificationSettings::default(),
            logging: LoggingSettings::default(),
            operation_timeout_secs: None,
            pipe_capacity: default_pipe_capacity(),
        }
    }
}

fn is_yaml(path: &Path) -> bool {
    matches!(
        path.extension().and_then(|e| e.to_str()),
        Some("yaml") | Some("yml")
    )
}

impl Settings {
    /// Load settings from a JSON or YAML file
    pub fn load(path: &Path) -> BackupResult<Self> {
        let contents = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                BackupError::Config(format!(
                    "Configuration file {} not found (run 'db-backup init')",
                    path.display()
                ))
            } else {
                BackupError::Io(format!("Failed to read {}: {}", path.display(), e))
            }
        })?;

        if is_yaml(path) {
            serde_yaml::from_str(&contents).map_err(|e| {
                BackupError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })
        } else {
            serde_json::from_str(&contents).map_err(|e| {
                BackupError::Config(format!("Failed to parse {}: {}", path.display(), e))
            })
        }
    }

    /// Load settings, or fall back to defaults if the file doesn't exist
    pub fn load_or_default(path: &Path) -> BackupResult<Self> {
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Save settings to disk
    pub fn save(&self, path: &Path) -> BackupResult<()> {
        if is_yaml(path) {
            let contents = serde_yaml::to_string(self).map_err(|e| {
                BackupError::Config(format!("Failed to serialize settings: {}", e))
            })?;
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)?;
            }
            std::fs::write(path, contents).map_err(|e| {
                BackupError::Io(format!("Failed to write {}: {}", path.display(), e))
            })
        } else {
            write_json_atomic(path, self)
        }
    }

    /// A starter configuration written by `init`
    pub fn template() -> Self {
        Self {
            targets: vec![TargetConfig {
                name: "primary".into(),
                engine: DatabaseType::Mysql,
                host: Some("localhost".into()),
                port: Some(3306),
                database: Some("app".into()),
                path: None,
                user: None,
                user_credential: Some(CredentialSpec::new("db_user", Vec::new())),
                password: Some(CredentialSpec::new("db_password", Vec::new())),
                options: Default::default(),
            }],
            ..Self::default()
        }
    }

    /// Reject configurations the engine cannot run
    pub fn validate(&self) -> BackupResult<()> {
        if self.targets.is_empty() {
            return Err(BackupError::Config("No targets configured".into()));
        }

        let mut names = HashSet::new();
        for target in &self.targets {
            target.validate()?;
            if !names.insert(target.name.as_str()) {
                return Err(BackupError::Config(format!(
                    "Duplicate target name: {}",
                    target.name
                )));
            }
        }

        if self.encryption.enabled && self.encryption.key.is_none() {
            return Err(BackupError::Config(
                "Encryption is enabled but no key reference is configured".into(),
            ));
        }

        for kind in [StageKind::Compress, StageKind::Encrypt] {
            if self.pipeline_order.iter().filter(|k| **k == kind).count() > 1 {
                return Err(BackupError::Config(format!(
                    "pipeline_order lists '{}' more than once",
                    kind
                )));
            }
        }
        validate_stages(&self.pipeline())?;

        if self.retry.max_attempts == 0 {
            return Err(BackupError::Config(
                "retry.max_attempts must be at least 1".into(),
            ));
        }
        if self.pipe_capacity == 0 {
            return Err(BackupError::Config("pipe_capacity must be at least 1".into()));
        }

        self.retention.validate()?;
        schedule::check_entries(&self.schedule, &self.targets)?;

        Ok(())
    }

    /// Stage list new backups are written with
    ///
    /// Enabled stages follow `pipeline_order`; an enabled stage missing from
    /// the order is appended in the default position.
    pub fn pipeline(&self) -> Vec<StageSpec> {
        let mut order = self.pipeline_order.clone();
        for kind in default_pipeline_order() {
            if !order.contains(&kind) {
                order.push(kind);
            }
        }

        let mut stages = Vec::new();
        let mut seen = HashSet::new();
        for kind in order {
            if !seen.insert(kind) {
                continue;
            }
            match kind {
                StageKind::Compress if self.compression.enabled => {
                    stages.push(StageSpec::Compress {
                        algorithm: self.compression.algorithm,
                        level: self.compression.level,
                    });
                }
                StageKind::Encrypt if self.encryption.enabled => {
                    if let Some(key) = &self.encryption.key {
                        stages.push(StageSpec::Encrypt {
                            algorithm: self.encryption.algorithm,
                            key: key.with_default_sources(&self.credentials.default_sources),
                            kdf: self.encryption.kdf,
                        });
                    }
                }
                _ => {}
            }
        }
        stages
    }

    /// Look up a configured target by name
    pub fn target(&self, name: &str) -> BackupResult<&TargetConfig> {
        self.targets
            .iter()
            .find(|t| t.name == name)
            .ok_or_else(|| BackupError::target_not_found(name))
    }

    /// Directory committed artifacts are written to
    pub fn backup_dir(&self, paths: &BackupPaths) -> PathBuf {
        self.storage
            .local_dir
            .clone()
            .unwrap_or_else(|| paths.backup_dir())
    }

    /// Directory the operation journal lives in
    pub fn log_dir(&self, paths: &BackupPaths) -> PathBuf {
        self.logging
            .log_dir
            .clone()
            .unwrap_or_else(|| paths.log_dir())
    }
}
