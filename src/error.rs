//! Error types for db-backup
//!
//! Every failure in the engine maps onto one uniform taxonomy regardless of
//! which database engine, transform stage or storage backend produced it.
//! Errors raised inside an operation are wrapped in [`BackupError::Stage`] so
//! the user-facing message names the stage and the original cause.

use thiserror::Error;

/// The main error type for db-backup operations
#[derive(Error, Debug)]
pub enum BackupError {
    /// Configuration-related errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// No credential source yielded a value for the key
    #[error("Credential not found: {key}")]
    CredentialNotFound { key: String },

    /// Could not connect to the database engine
    #[error("Connection to {engine} failed: {message}")]
    AdapterConnectionFailed {
        engine: String,
        message: String,
        transient: bool,
    },

    /// The engine failed while producing the dump stream
    #[error("Dump failed: {message}")]
    DumpFailed { message: String, transient: bool },

    /// The engine failed while loading a restore stream
    #[error("Restore failed: {0}")]
    RestoreFailed(String),

    /// Compression or stream framing failed (corruption or misconfiguration)
    #[error("Transform failed: {0}")]
    TransformFailed(String),

    /// Writing the artifact to storage failed
    #[error("Storage write failed: {0}")]
    StorageWriteFailed(String),

    /// Stored artifact does not match the recorded checksum
    #[error("Checksum mismatch for {id}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        id: String,
        expected: String,
        actual: String,
    },

    /// Authenticated decryption rejected the ciphertext
    #[error("Decryption failed: {0}")]
    DecryptionFailed(String),

    /// Retention thresholds are unusable
    #[error("Retention policy violation: {0}")]
    RetentionPolicyViolation(String),

    /// An operation was requested without what it depends on
    #[error("Precondition failed: {0}")]
    Precondition(String),

    /// Another operation holds the target's lock
    #[error("Target is busy: {target} (held by {holder})")]
    TargetBusy { target: String, holder: String },

    /// Scheduled runs overlap for the same target
    #[error("Schedule overlap: {0}")]
    ScheduleOverlap(String),

    /// The operation was aborted or timed out
    #[error("Operation cancelled: {0}")]
    Cancelled(String),

    /// Entity not found errors
    #[error("{entity_type} not found: {identifier}")]
    NotFound {
        entity_type: &'static str,
        identifier: String,
    },

    /// Catalog persistence errors
    #[error("Catalog error: {0}")]
    Catalog(String),

    /// File I/O errors
    #[error("I/O error: {0}")]
    Io(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(String),

    /// Any error raised inside a named state-machine stage
    #[error("{stage} stage failed: {source}")]
    Stage {
        stage: &'static str,
        #[source]
        source: Box<BackupError>,
    },
}

/// Broad classes of failure, used to pick the process exit code
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCategory {
    Configuration,
    Credential,
    Operational,
}

impl BackupError {
    /// Create a "not found" error for backup records
    pub fn backup_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Backup",
            identifier: identifier.into(),
        }
    }

    /// Create a "not found" error for configured targets
    pub fn target_not_found(identifier: impl Into<String>) -> Self {
        Self::NotFound {
            entity_type: "Target",
            identifier: identifier.into(),
        }
    }

    /// Wrap this error with the stage it occurred in
    ///
    /// Already-wrapped errors keep their innermost stage.
    pub fn in_stage(self, stage: &'static str) -> Self {
        match self {
            err @ Self::Stage { .. } => err,
            err => Self::Stage {
                stage,
                source: Box::new(err),
            },
        }
    }

    /// The error with any stage wrapping removed
    pub fn root(&self) -> &BackupError {
        match self {
            Self::Stage { source, .. } => source.root(),
            err => err,
        }
    }

    /// The stage this error was raised in, if known
    pub fn stage(&self) -> Option<&'static str> {
        match self {
            Self::Stage { stage, .. } => Some(stage),
            _ => None,
        }
    }

    /// Whether a bounded retry may succeed
    pub fn is_retryable(&self) -> bool {
        match self.root() {
            Self::AdapterConnectionFailed { transient, .. } => *transient,
            Self::DumpFailed { transient, .. } => *transient,
            Self::StorageWriteFailed(_) => true,
            _ => false,
        }
    }

    /// Check if this is a "not found" error
    pub fn is_not_found(&self) -> bool {
        matches!(self.root(), Self::NotFound { .. })
    }

    /// Classify the error for exit-code purposes
    pub fn category(&self) -> ErrorCategory {
        match self.root() {
            Self::Config(_)
            | Self::RetentionPolicyViolation(_)
            | Self::ScheduleOverlap(_)
            | Self::Precondition(_) => ErrorCategory::Configuration,
            Self::CredentialNotFound { .. } => ErrorCategory::Credential,
            _ => ErrorCategory::Operational,
        }
    }

    /// Process exit code for this error
    pub fn exit_code(&self) -> u8 {
        match self.category() {
            ErrorCategory::Operational => 1,
            ErrorCategory::Configuration => 2,
            ErrorCategory::Credential => 3,
        }
    }
}

impl From<std::io::Error> for BackupError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackupError {
    fn from(err: serde_json::Error) -> Self {
        Self::Json(err.to_string())
    }
}

/// Result type alias for db-backup operations
pub type BackupResult<T> = Result<T, BackupError>;
