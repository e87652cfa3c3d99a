//! PostgreSQL through `psql` and `pg_dump`

use std::process::Command;

use tracing::debug;

use super::process::{capture, feed, program, ChildReader};
use crate::adapters::{ConnectParams, DatabaseDriver, DriverDump, DriverError, DumpScope};
use crate::transform::ByteStream;

#[derive(Default)]
pub struct PostgresDriver {
    params: Option<ConnectParams>,
}

impl PostgresDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn params(&self) -> Result<&ConnectParams, DriverError> {
        self.params
            .as_ref()
            .ok_or_else(|| DriverError::new("08003", "not connected"))
    }

    fn command(params: &ConnectParams, name: &str) -> Command {
        let mut cmd = Command::new(program(params, name));
        cmd.arg("--no-password");
        if let Some(host) = &params.host {
            cmd.arg(format!("--host={}", host));
        }
        if let Some(port) = params.port {
            cmd.arg(format!("--port={}", port));
        }
        if let Some(user) = &params.user {
            cmd.arg(format!("--username={}", user));
        }
        if let Some(database) = &params.database {
            cmd.arg(format!("--dbname={}", database));
        }
        if let Some(password) = &params.password {
            cmd.env("PGPASSWORD", password.as_str());
        }
        if let Some(mode) = params.options.get("sslmode") {
            cmd.env("PGSSLMODE", mode);
        }
        cmd
    }

    fn query(params: &ConnectParams, sql: &str) -> Result<String, DriverError> {
        let mut cmd = Self::command(params, "psql");
        cmd.args(["-X", "-A", "-t", "-c", sql]);
        capture(cmd, error_code)
    }
}

impl DatabaseDriver for PostgresDriver {
    fn connect(&mut self, params: &ConnectParams) -> Result<(), DriverError> {
        Self::query(params, "SELECT 1")?;
        self.params = Some(params.clone());
        Ok(())
    }

    fn dump_stream(&mut self, scope: &DumpScope) -> Result<DriverDump, DriverError> {
        let params = self.params()?;
        if let DumpScope::Since(_) = scope {
            return Err(DriverError::new(
                "0A000",
                "logical dumps cannot be taken relative to a checkpoint",
            ));
        }

        // Standbys cannot report the current WAL position
        let checkpoint = match Self::query(params, "SELECT pg_current_wal_lsn()") {
            Ok(lsn) => Some(lsn.trim().to_string()).filter(|s| !s.is_empty()),
            Err(e) => {
                debug!(error = %e, "no WAL position for checkpoint");
                None
            }
        };

        let mut cmd = Self::command(params, "pg_dump");
        cmd.args(["--no-owner", "--no-privileges", "--clean", "--if-exists"]);
        Ok(DriverDump {
            stream: Box::new(ChildReader::spawn(cmd, error_code)?),
            checkpoint,
        })
    }

    fn restore_stream(&mut self, input: ByteStream) -> Result<(), DriverError> {
        let params = self.params()?;
        let mut cmd = Self::command(params, "psql");
        cmd.args(["-X", "-q", "--single-transaction", "-v", "ON_ERROR_STOP=1"]);
        feed(cmd, input, error_code)
    }

    fn disconnect(&mut self) {
        self.params = None;
    }
}

/// SQLSTATE for the failures the client tools report in prose
fn error_code(stderr: &str) -> String {
    let s = stderr.to_lowercase();
    let code = if s.contains("password authentication failed") {
        "28P01"
    } else if s.contains("no pg_hba.conf entry") {
        "28000"
    } else if s.contains("terminating connection due to administrator command") {
        "57P01"
    } else if s.contains("the database system is starting up")
        || s.contains("the database system is shutting down")
    {
        "57P03"
    } else if s.contains("connection refused")
        || s.contains("could not connect")
        || s.contains("could not translate host name")
        || s.contains("timeout expired")
    {
        "08001"
    } else if s.contains("server closed the connection unexpectedly")
        || s.contains("connection to server was lost")
    {
        "08006"
    } else if s.contains("database") && s.contains("does not exist") {
        "3D000"
    } else {
        "XX000"
    };
    code.to_string()
}
