//! Core data models for db-backup
//!
//! Backup records, their identifiers and the enums shared by the catalog,
//! the adapters and the orchestrator.

pub mod database;
pub mod ids;
pub mod record;

pub use database::{DatabaseType, TargetConfig};
pub use ids::BackupId;
pub use record::{
    BackupRecord, BackupStatus, BackupType, Checkpoint, CompressionInfo, EncryptionInfo,
    StorageLocation,
};
