//! Storage layer for db-backup
//!
//! Atomic JSON persistence for the catalog and keystore, the local artifact
//! store, the optional cloud mirror, checksums and advisory lock files.

pub mod checksum;
pub mod cloud;
pub mod file_io;
pub mod local;
pub mod lock;

pub use checksum::{checksum_file, sha256_hex, sha256_reader};
pub use cloud::{CloudStore, DirectoryMirror};
pub use local::{LocalStore, PartialArtifact};
pub use lock::{Acquire, LockGuard};
