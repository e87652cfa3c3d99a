//! Configuration module for db-backup
//!
//! This module provides configuration management including:
//! - Base directory and sub-path resolution
//! - The structured configuration document and its validation

pub mod paths;
pub mod settings;

pub use paths::BackupPaths;
pub use settings::Settings;
