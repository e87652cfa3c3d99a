//! Native client drivers
//!
//! Each driver streams through the engine's own dump and load programs
//! (`mysqldump`, `pg_dump`, `sqlite3`, `mongodump`, ...), reading their stdout
//! or feeding their stdin, and reports failures with the engine's error code.
//! Client binaries are looked up on `PATH` unless a target sets the
//! `bin_dir` option.

pub mod mongodb;
pub mod mysql;
pub mod postgres;
mod process;
pub mod sqlite;

use std::path::PathBuf;

use crate::adapters::{DatabaseDriver, DriverFactory};
use crate::error::BackupResult;
use crate::models::DatabaseType;

pub use mongodb::MongodbDriver;
pub use mysql::MysqlDriver;
pub use postgres::PostgresDriver;
pub use sqlite::SqliteDriver;

/// Builds client-program drivers
#[derive(Debug, Clone)]
pub struct CliDriverFactory {
    scratch_dir: PathBuf,
}

impl CliDriverFactory {
    /// `scratch_dir` holds short-lived files drivers hand to client tools
    pub fn new(scratch_dir: PathBuf) -> Self {
        Self { scratch_dir }
    }
}

impl DriverFactory for CliDriverFactory {
    fn driver(&self, engine: DatabaseType) -> BackupResult<Box<dyn DatabaseDriver>> {
        let driver: Box<dyn DatabaseDriver> = match engine {
            DatabaseType::Mysql => Box::new(MysqlDriver::new()),
            DatabaseType::Postgres => Box::new(PostgresDriver::new()),
            DatabaseType::Sqlite => Box::new(SqliteDriver::new()),
            DatabaseType::Mongodb => Box::new(MongodbDriver::new(self.scratch_dir.clone())),
        };
        Ok(driver)
    }
}
