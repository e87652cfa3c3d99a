//! Database engines and configured backup targets

use std::collections::BTreeMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::credentials::CredentialSpec;
use crate::error::BackupError;

/// Supported database engines
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum DatabaseType {
    Mysql,
    #[serde(alias = "postgresql")]
    Postgres,
    Sqlite,
    #[serde(alias = "mongo")]
    Mongodb,
}

impl DatabaseType {
    /// Whether the engine can produce dumps relative to a checkpoint
    pub fn supports_incremental(self) -> bool {
        matches!(self, DatabaseType::Mysql)
    }

    /// Engines reached over the network need a host
    pub fn is_networked(self) -> bool {
        !matches!(self, DatabaseType::Sqlite)
    }

    pub fn default_port(self) -> Option<u16> {
        match self {
            DatabaseType::Mysql => Some(3306),
            DatabaseType::Postgres => Some(5432),
            DatabaseType::Mongodb => Some(27017),
            DatabaseType::Sqlite => None,
        }
    }
}

impl fmt::Display for DatabaseType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DatabaseType::Mysql => write!(f, "mysql"),
            DatabaseType::Postgres => write!(f, "postgres"),
            DatabaseType::Sqlite => write!(f, "sqlite"),
            DatabaseType::Mongodb => write!(f, "mongodb"),
        }
    }
}

impl FromStr for DatabaseType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "mysql" => Ok(DatabaseType::Mysql),
            "postgres" | "postgresql" => Ok(DatabaseType::Postgres),
            "sqlite" => Ok(DatabaseType::Sqlite),
            "mongodb" | "mongo" => Ok(DatabaseType::Mongodb),
            other => Err(format!("unknown database type '{}'", other)),
        }
    }
}

/// A named database the engine backs up
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TargetConfig {
    /// Unique name used on the command line and in backup ids
    pub name: String,

    pub engine: DatabaseType,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<u16>,

    /// Database (schema) name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database: Option<String>,

    /// Database file, for SQLite
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<PathBuf>,

    /// Literal user name
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,

    /// User name resolved through the credential sources instead
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_credential: Option<CredentialSpec>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<CredentialSpec>,

    /// Extra engine-specific options passed to the driver
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub options: BTreeMap<String, String>,
}

impl TargetConfig {
    /// Connection descriptor identifying the target
    ///
    /// Two targets with the same descriptor are the same database and share a
    /// lock.
    pub fn descriptor(&self) -> String {
        match self.engine {
            DatabaseType::Sqlite => format!(
                "sqlite://{}",
                self.path
                    .as_ref()
                    .map(|p| p.display().to_string())
                    .unwrap_or_default()
            ),
            engine => format!(
                "{}://{}:{}/{}",
                engine,
                self.host.as_deref().unwrap_or("localhost"),
                self.effective_port().unwrap_or(0),
                self.database.as_deref().unwrap_or("")
            ),
        }
    }

    pub fn effective_port(&self) -> Option<u16> {
        self.port.or_else(|| self.engine.default_port())
    }

    /// Check the target has what its engine needs
    pub fn validate(&self) -> Result<(), BackupError> {
        if self.name.trim().is_empty() {
            return Err(BackupError::Config("Target name cannot be empty".into()));
        }
        match self.engine {
            DatabaseType::Sqlite => {
                if self.path.is_none() {
                    return Err(BackupError::Config(format!(
                        "Target '{}': sqlite targets require 'path'",
                        self.name
                    )));
                }
            }
            _ => {
                if self.host.as_deref().map_or(true, |h| h.trim().is_empty()) {
                    return Err(BackupError::Config(format!(
                        "Target '{}': {} targets require 'host'",
                        self.name, self.engine
                    )));
                }
            }
        }
        if self.user.is_some() && self.user_credential.is_some() {
            return Err(BackupError::Config(format!(
                "Target '{}': set either 'user' or 'user_credential', not both",
                self.name
            )));
        }
        Ok(())
    }
}
