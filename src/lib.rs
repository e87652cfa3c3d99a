//! db-backup - Database backup and restore engine
//!
//! This library provides the core of the `db-backup` tool: streaming dumps
//! from MySQL, PostgreSQL, SQLite and MongoDB through a compression and
//! encryption pipeline into durable artifacts, a catalog of every backup,
//! verification, retention and scheduled runs.
//!
//! # Architecture
//!
//! The crate is organized into the following modules:
//!
//! - `config`: Configuration document and path management
//! - `error`: Error taxonomy and exit codes
//! - `models`: Targets, backup ids and catalog records
//! - `credentials`: Credential resolution (keystore, environment, files)
//! - `adapters`: Database adapters over engine drivers
//! - `drivers`: Drivers built on the engines' native client programs
//! - `transform`: Compression and encryption stages
//! - `storage`: Artifact store, cloud mirror, checksums and lock files
//! - `catalog`: Durable record index with reconciliation
//! - `retention`: Eviction policy
//! - `orchestrator`: Backup, restore and verify state machines
//! - `journal`: Append-only operation journal
//! - `notify`: Outcome notifications
//! - `schedule`: Scheduled jobs
//!
//! # Example
//!
//! ```rust,ignore
//! use dbbackup::config::{BackupPaths, Settings};
//! use dbbackup::drivers::CliDriverFactory;
//! use dbbackup::orchestrator::Orchestrator;
//!
//! let paths = BackupPaths::new()?;
//! let settings = Settings::load(&paths.config_file())?;
//! let drivers = Box::new(CliDriverFactory::new(paths.staging_dir()));
//! let (orchestrator, _) = Orchestrator::open(&settings, &paths, drivers)?;
//! let run = orchestrator.backup("primary", BackupType::Full, &orchestrator.cancel_token(None))?;
//! ```

pub mod adapters;
pub mod catalog;
pub mod cli;
pub mod config;
pub mod credentials;
pub mod display;
pub mod drivers;
pub mod error;
pub mod journal;
pub mod models;
pub mod notify;
pub mod orchestrator;
pub mod retention;
pub mod schedule;
pub mod storage;
pub mod transform;

pub use error::{BackupError, BackupResult};
