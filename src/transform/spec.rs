//! Transform stage descriptions
//!
//! Stage lists are stored verbatim in every backup record so that restore can
//! rebuild the exact reverse pipeline even after the configured defaults
//! change.

use std::fmt;

use serde::{Deserialize, Serialize};

use crate::credentials::CredentialSpec;
use crate::error::{BackupError, BackupResult};

/// Which kind of transform a stage performs
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StageKind {
    Compress,
    Encrypt,
}

impl fmt::Display for StageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageKind::Compress => write!(f, "compress"),
            StageKind::Encrypt => write!(f, "encrypt"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionAlgorithm {
    #[default]
    Gzip,
    Zlib,
    Deflate,
}

impl fmt::Display for CompressionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionAlgorithm::Gzip => write!(f, "gzip"),
            CompressionAlgorithm::Zlib => write!(f, "zlib"),
            CompressionAlgorithm::Deflate => write!(f, "deflate"),
        }
    }
}

/// Portable compression level
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum CompressionLevel {
    Low,
    #[default]
    Medium,
    High,
}

impl CompressionLevel {
    /// Level in the algorithm's native range
    pub fn native(self, algorithm: CompressionAlgorithm) -> u32 {
        match algorithm {
            CompressionAlgorithm::Gzip | CompressionAlgorithm::Zlib | CompressionAlgorithm::Deflate => {
                match self {
                    CompressionLevel::Low => 1,
                    CompressionLevel::Medium => 6,
                    CompressionLevel::High => 9,
                }
            }
        }
    }
}

impl fmt::Display for CompressionLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CompressionLevel::Low => write!(f, "low"),
            CompressionLevel::Medium => write!(f, "medium"),
            CompressionLevel::High => write!(f, "high"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum EncryptionAlgorithm {
    #[default]
    #[serde(rename = "aes-256-gcm")]
    Aes256Gcm,
}

impl fmt::Display for EncryptionAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EncryptionAlgorithm::Aes256Gcm => write!(f, "aes-256-gcm"),
        }
    }
}

/// Argon2id cost parameters used to derive the stream key
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct KdfParams {
    /// Memory cost in KiB (default: 65536 = 64 MiB)
    pub memory_kib: u32,
    /// Time cost (iterations, default: 3)
    pub iterations: u32,
    /// Parallelism degree (default: 4)
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 65536,
            iterations: 3,
            parallelism: 4,
        }
    }
}

/// One stage of the transform pipeline
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "lowercase")]
pub enum StageSpec {
    Compress {
        algorithm: CompressionAlgorithm,
        level: CompressionLevel,
    },
    Encrypt {
        algorithm: EncryptionAlgorithm,
        /// Credential holding the passphrase
        key: CredentialSpec,
        #[serde(default)]
        kdf: KdfParams,
    },
}

impl StageSpec {
    pub fn kind(&self) -> StageKind {
        match self {
            StageSpec::Compress { .. } => StageKind::Compress,
            StageSpec::Encrypt { .. } => StageKind::Encrypt,
        }
    }
}

impl fmt::Display for StageSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StageSpec::Compress { algorithm, level } => write!(f, "{}({})", algorithm, level),
            StageSpec::Encrypt { algorithm, key, .. } => write!(f, "{}[{}]", algorithm, key.key),
        }
    }
}

/// Reject stage lists that cannot be reversed unambiguously
pub fn validate_stages(stages: &[StageSpec]) -> BackupResult<()> {
    for kind in [StageKind::Compress, StageKind::Encrypt] {
        if stages.iter().filter(|s| s.kind() == kind).count() > 1 {
            return Err(BackupError::Config(format!(
                "Pipeline may contain at most one {} stage",
                kind
            )));
        }
    }
    for stage in stages {
        if let StageSpec::Encrypt { key, kdf, .. } = stage {
            if key.key.trim().is_empty() {
                return Err(BackupError::Config(
                    "Encryption stage requires a key reference".into(),
                ));
            }
            if kdf.parallelism == 0 || kdf.iterations == 0 || kdf.memory_kib < 8 * kdf.parallelism {
                return Err(BackupError::Config(format!(
                    "Invalid key derivation parameters: {:?}",
                    kdf
                )));
            }
        }
    }
    Ok(())
}
