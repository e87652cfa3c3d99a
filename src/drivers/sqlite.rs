//! SQLite through the `sqlite3` shell
//!
//! Restores load into a sibling file and rename it over the database, so a
//! failed load leaves the existing database untouched.

use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;

use super::process::{feed, program, ChildReader};
use crate::adapters::{ConnectParams, DatabaseDriver, DriverDump, DriverError, DumpScope};
use crate::transform::ByteStream;

#[derive(Default)]
pub struct SqliteDriver {
    params: Option<ConnectParams>,
}

impl SqliteDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn connected(&self) -> Result<(&ConnectParams, &Path), DriverError> {
        let params = self
            .params
            .as_ref()
            .ok_or_else(|| DriverError::new("21", "not connected"))?;
        let path = params
            .path
            .as_deref()
            .ok_or_else(|| DriverError::new("14", "no database path configured"))?;
        Ok((params, path))
    }

    fn command(params: &ConnectParams, path: &Path) -> Command {
        let mut cmd = Command::new(program(params, "sqlite3"));
        cmd.args(["-batch", "-bail"]).arg(path);
        cmd
    }
}

fn restoring_path(path: &Path) -> PathBuf {
    let mut name = path.as_os_str().to_os_string();
    name.push(".restoring");
    PathBuf::from(name)
}

fn io_error(code: &str, context: &str, err: std::io::Error) -> DriverError {
    DriverError::new(code, format!("{}: {}", context, err))
}

impl DatabaseDriver for SqliteDriver {
    fn connect(&mut self, params: &ConnectParams) -> Result<(), DriverError> {
        if params.path.is_none() {
            return Err(DriverError::new("14", "no database path configured"));
        }
        self.params = Some(params.clone());
        Ok(())
    }

    fn dump_stream(&mut self, scope: &DumpScope) -> Result<DriverDump, DriverError> {
        let (params, path) = self.connected()?;
        if let DumpScope::Since(_) = scope {
            return Err(DriverError::new("1", "sqlite dumps are always full"));
        }
        if !path.is_file() {
            return Err(DriverError::new(
                "14",
                format!("unable to open database file {}", path.display()),
            ));
        }
        let mut cmd = Self::command(params, path);
        cmd.arg(".dump");
        Ok(DriverDump {
            stream: Box::new(ChildReader::spawn(cmd, error_code)?),
            checkpoint: None,
        })
    }

    fn restore_stream(&mut self, input: ByteStream) -> Result<(), DriverError> {
        let (params, path) = self.connected()?;
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| io_error("14", "cannot create directory", e))?;
        }

        let staging = restoring_path(path);
        if staging.exists() {
            fs::remove_file(&staging).map_err(|e| io_error("10", "cannot clear staging file", e))?;
        }

        let loaded = feed(Self::command(params, &staging), input, error_code)
            .and_then(|()| {
                fs::rename(&staging, path).map_err(|e| io_error("10", "cannot replace database", e))
            });
        if loaded.is_err() {
            let _ = fs::remove_file(&staging);
        }
        loaded
    }

    fn disconnect(&mut self) {
        self.params = None;
    }
}

fn error_code(stderr: &str) -> String {
    let s = stderr.to_lowercase();
    let code = if s.contains("database table is locked") {
        "6"
    } else if s.contains("database is locked") {
        "5"
    } else if s.contains("unable to open database") {
        "14"
    } else if s.contains("file is not a database") {
        "26"
    } else if s.contains("malformed") {
        "11"
    } else {
        "1"
    };
    code.to_string()
}
