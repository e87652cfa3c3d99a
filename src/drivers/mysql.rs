//! MySQL through `mysql`, `mysqldump` and `mysqlbinlog`
//!
//! Full dumps record the binary log position current at dump start.
//! Incremental dumps replay the binary log from a recorded position up to the
//! position current when the dump starts, which becomes the new checkpoint.

use std::process::Command;

use tracing::debug;

use super::process::{capture, feed, program, ChildReader};
use crate::adapters::mysql::BinlogPosition;
use crate::adapters::{ConnectParams, DatabaseDriver, DriverDump, DriverError, DumpScope};
use crate::transform::ByteStream;

#[derive(Default)]
pub struct MysqlDriver {
    params: Option<ConnectParams>,
}

impl MysqlDriver {
    pub fn new() -> Self {
        Self::default()
    }

    fn params(&self) -> Result<&ConnectParams, DriverError> {
        self.params
            .as_ref()
            .ok_or_else(|| DriverError::new("2006", "not connected"))
    }

    fn database(params: &ConnectParams) -> Result<&str, DriverError> {
        params
            .database
            .as_deref()
            .ok_or_else(|| DriverError::new("1046", "no database selected"))
    }

    fn command(params: &ConnectParams, name: &str) -> Command {
        let mut cmd = Command::new(program(params, name));
        if let Some(host) = &params.host {
            cmd.arg(format!("--host={}", host)).arg("--protocol=TCP");
        }
        if let Some(port) = params.port {
            cmd.arg(format!("--port={}", port));
        }
        if let Some(user) = &params.user {
            cmd.arg(format!("--user={}", user));
        }
        if let Some(password) = &params.password {
            cmd.env("MYSQL_PWD", password.as_str());
        }
        cmd
    }

    fn query(params: &ConnectParams, sql: &str) -> Result<String, DriverError> {
        let mut cmd = Self::command(params, "mysql");
        cmd.args(["--batch", "--skip-column-names", "-e", sql]);
        capture(cmd, error_code)
    }

    /// Current binary log coordinates, if binary logging is on
    fn current_position(params: &ConnectParams) -> Result<Option<BinlogPosition>, DriverError> {
        let output = match Self::query(params, "SHOW MASTER STATUS") {
            Ok(output) => output,
            // Renamed in 8.4
            Err(_) => Self::query(params, "SHOW BINARY LOG STATUS")?,
        };
        Ok(parse_status(&output))
    }

    fn binary_logs(params: &ConnectParams) -> Result<Vec<String>, DriverError> {
        let output = Self::query(params, "SHOW BINARY LOGS")?;
        Ok(output
            .lines()
            .filter_map(|line| line.split('\t').next())
            .filter(|name| !name.is_empty())
            .map(str::to_string)
            .collect())
    }
}

impl DatabaseDriver for MysqlDriver {
    fn connect(&mut self, params: &ConnectParams) -> Result<(), DriverError> {
        Self::query(params, "SELECT 1")?;
        self.params = Some(params.clone());
        Ok(())
    }

    fn dump_stream(&mut self, scope: &DumpScope) -> Result<DriverDump, DriverError> {
        let params = self.params()?;
        let database = Self::database(params)?;

        match scope {
            DumpScope::Full => {
                let checkpoint = Self::current_position(params)?.map(|p| p.to_string());
                if checkpoint.is_none() {
                    debug!("binary logging is off; full dump has no checkpoint");
                }
                let mut cmd = Self::command(params, "mysqldump");
                cmd.args([
                    "--single-transaction",
                    "--routines",
                    "--triggers",
                    "--events",
                    "--hex-blob",
                    database,
                ]);
                Ok(DriverDump {
                    stream: Box::new(ChildReader::spawn(cmd, error_code)?),
                    checkpoint,
                })
            }
            DumpScope::Since(checkpoint) => {
                let start = BinlogPosition::parse(checkpoint.as_str())
                    .map_err(|e| DriverError::new("checkpoint", e.to_string()))?;
                let end = Self::current_position(params)?
                    .ok_or_else(|| DriverError::new("1381", "binary logging is not enabled"))?;
                let files = logs_between(&Self::binary_logs(params)?, &start, &end)?;

                let mut cmd = Self::command(params, "mysqlbinlog");
                cmd.arg("--read-from-remote-server")
                    .arg(format!("--database={}", database))
                    .arg(format!("--start-position={}", start.position))
                    .arg(format!("--stop-position={}", end.position))
                    .args(files);
                Ok(DriverDump {
                    stream: Box::new(ChildReader::spawn(cmd, error_code)?),
                    checkpoint: Some(end.to_string()),
                })
            }
        }
    }

    fn restore_stream(&mut self, input: ByteStream) -> Result<(), DriverError> {
        let params = self.params()?;
        let database = Self::database(params)?;
        let mut cmd = Self::command(params, "mysql");
        cmd.arg(database);
        feed(cmd, input, error_code)
    }

    fn disconnect(&mut self) {
        self.params = None;
    }
}

fn parse_status(output: &str) -> Option<BinlogPosition> {
    let line = output.lines().find(|l| !l.trim().is_empty())?;
    let mut fields = line.split('\t');
    let file = fields.next()?.trim();
    let position = fields.next()?.trim().parse().ok()?;
    Some(BinlogPosition {
        file: file.to_string(),
        position,
    })
}

/// Log files from `start` through `end`, in server order
fn logs_between(
    logs: &[String],
    start: &BinlogPosition,
    end: &BinlogPosition,
) -> Result<Vec<String>, DriverError> {
    let first = logs.iter().position(|l| *l == start.file).ok_or_else(|| {
        DriverError::new(
            "1236",
            format!("binary log {} has been purged", start.file),
        )
    })?;
    let last = logs
        .iter()
        .position(|l| *l == end.file)
        .ok_or_else(|| DriverError::new("1236", format!("binary log {} not found", end.file)))?;
    if last < first {
        return Err(DriverError::new(
            "1236",
            format!("checkpoint {} is ahead of the server ({})", start, end),
        ));
    }
    Ok(logs[first..=last].to_vec())
}

/// First client or server error number in the output
fn error_code(stderr: &str) -> String {
    stderr
        .split(|c: char| !c.is_ascii_alphanumeric())
        .filter(|t| t.len() == 4 && t.chars().all(|c| c.is_ascii_digit()))
        .find(|t| matches!(t.parse::<u32>(), Ok(1000..=2999)))
        .unwrap_or("unknown")
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_code() {
        assert_eq!(
            error_code("ERROR 2003 (HY000): Can't connect to MySQL server on 'db:3306' (111)"),
            "2003"
        );
        assert_eq!(
            error_code("mysqldump: Got error: 1045: Access denied for user 'backup'@'10.0.0.2'"),
            "1045"
        );
        assert_eq!(error_code("segmentation fault"), "unknown");
    }

    #[test]
    fn test_parse_status() {
        let pos = parse_status("binlog.000007\t1570\t\t\t\n").unwrap();
        assert_eq!(pos.to_string(), "binlog.000007:1570");
        assert!(parse_status("").is_none());
    }

    #[test]
    fn test_logs_between() {
        let logs: Vec<String> = ["b.1", "b.2", "b.3", "b.4"].iter().map(|s| s.to_string()).collect();
        let start = BinlogPosition::parse("b.2:100").unwrap();
        let end = BinlogPosition::parse("b.3:40").unwrap();
        assert_eq!(logs_between(&logs, &start, &end).unwrap(), vec!["b.2", "b.3"]);

        let purged = BinlogPosition::parse("b.0:4").unwrap();
        assert_eq!(logs_between(&logs, &purged, &end).unwrap_err().code, "1236");
    }

    #[test]
    fn test_dump_requires_connection() {
        let mut driver = MysqlDriver::new();
        assert!(driver.dump_stream(&DumpScope::Full).is_err());
    }
}
