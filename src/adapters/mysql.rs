//! MySQL dialect
//!
//! Checkpoints are binary log coordinates, written `<file>:<position>`.

use std::fmt;

use super::{Dialect, ErrorClass};
use crate::error::{BackupError, BackupResult};
use crate::models::{Checkpoint, DatabaseType};

pub struct Mysql;

impl Dialect for Mysql {
    const ENGINE: DatabaseType = DatabaseType::Mysql;

    fn classify(code: &str) -> ErrorClass {
        match code {
            // CR_CONNECTION_ERROR, CR_CONN_HOST_ERROR, CR_SERVER_GONE_ERROR,
            // CR_SERVER_LOST, ER_LOCK_WAIT_TIMEOUT, ER_LOCK_DEADLOCK
            "2002" | "2003" | "2006" | "2013" | "1205" | "1213" => ErrorClass::Transient,
            // ER_ACCESS_DENIED_ERROR, ER_DBACCESS_DENIED_ERROR
            "1045" | "1044" => ErrorClass::Authentication,
            _ => ErrorClass::Permanent,
        }
    }

    fn check_checkpoint(checkpoint: &Checkpoint) -> BackupResult<()> {
        BinlogPosition::parse(checkpoint.as_str()).map(|_| ())
    }
}

/// A position in the binary log
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BinlogPosition {
    pub file: String,
    pub position: u64,
}

impl BinlogPosition {
    pub fn parse(token: &str) -> BackupResult<Self> {
        let (file, position) = token.rsplit_once(':').ok_or_else(|| {
            BackupError::Precondition(format!("Malformed binlog checkpoint '{}'", token))
        })?;
        let position = position.parse::<u64>().map_err(|_| {
            BackupError::Precondition(format!("Malformed binlog position in '{}'", token))
        })?;
        if file.is_empty() {
            return Err(BackupError::Precondition(format!(
                "Binlog checkpoint '{}' has no file name",
                token
            )));
        }
        Ok(Self {
            file: file.to_string(),
            position,
        })
    }
}

impl fmt::Display for BinlogPosition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.file, self.position)
    }
}
