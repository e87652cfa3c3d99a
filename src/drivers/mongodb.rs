//! MongoDB through `mongodump` and `mongorestore` archives
//!
//! The password never appears on a command line: it is written to a
//! short-lived owner-only config file passed with `--config`.

use std::collections::BTreeMap;
use std::fs::{self, OpenOptions};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::Command;

use uuid::Uuid;

use super::process::{feed, program, ChildReader};
use crate::adapters::{ConnectParams, DatabaseDriver, DriverDump, DriverError, DumpScope};
use crate::storage::file_io::restrict_permissions;
use crate::transform::ByteStream;

pub struct MongodbDriver {
    scratch_dir: PathBuf,
    params: Option<ConnectParams>,
}

/// Tool config file removed on drop
struct ScratchConfig {
    path: PathBuf,
}

impl ScratchConfig {
    fn write(dir: &Path, password: &str) -> Result<Self, DriverError> {
        let fail = |e: &dyn std::fmt::Display| {
            DriverError::new("scratch", format!("cannot write tool config: {}", e))
        };
        fs::create_dir_all(dir).map_err(|e| fail(&e))?;
        let path = dir.join(format!("mongo-{}.yaml", Uuid::new_v4().simple()));
        let mut file = OpenOptions::new()
            .write(true)
            .create_new(true)
            .open(&path)
            .map_err(|e| fail(&e))?;
        let config = Self { path };
        restrict_permissions(&config.path).map_err(|e| fail(&e))?;

        let mut body = BTreeMap::new();
        body.insert("password", password);
        let yaml = serde_yaml::to_string(&body).map_err(|e| fail(&e))?;
        file.write_all(yaml.as_bytes()).map_err(|e| fail(&e))?;
        file.sync_all().map_err(|e| fail(&e))?;
        Ok(config)
    }
}

impl Drop for ScratchConfig {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

/// Keeps the config file alive until the dump finishes
struct DumpWithConfig {
    reader: ChildReader,
    _config: Option<ScratchConfig>,
}

impl Read for DumpWithConfig {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.reader.read(buf)
    }
}

impl MongodbDriver {
    pub fn new(scratch_dir: PathBuf) -> Self {
        Self {
            scratch_dir,
            params: None,
        }
    }

    fn params(&self) -> Result<&ConnectParams, DriverError> {
        self.params
            .as_ref()
            .ok_or_else(|| DriverError::new("6", "not connected"))
    }

    fn command(
        &self,
        params: &ConnectParams,
        name: &str,
    ) -> Result<(Command, Option<ScratchConfig>), DriverError> {
        let mut cmd = Command::new(program(params, name));
        cmd.arg("--archive");
        if let Some(host) = &params.host {
            cmd.arg(format!("--host={}", host));
        }
        if let Some(port) = params.port {
            cmd.arg(format!("--port={}", port));
        }
        if let Some(user) = &params.user {
            cmd.arg(format!("--username={}", user));
        }
        if let Some(auth_db) = params.options.get("auth_db") {
            cmd.arg(format!("--authenticationDatabase={}", auth_db));
        }
        let config = match &params.password {
            Some(password) => {
                let config = ScratchConfig::write(&self.scratch_dir, password.as_str())?;
                cmd.arg(format!("--config={}", config.path.display()));
                Some(config)
            }
            None => None,
        };
        Ok((cmd, config))
    }
}

impl DatabaseDriver for MongodbDriver {
    /// The tools connect per invocation, so this only records the target
    fn connect(&mut self, params: &ConnectParams) -> Result<(), DriverError> {
        if params.host.is_none() {
            return Err(DriverError::new("6", "no host configured"));
        }
        self.params = Some(params.clone());
        Ok(())
    }

    fn dump_stream(&mut self, scope: &DumpScope) -> Result<DriverDump, DriverError> {
        let params = self.params()?;
        if let DumpScope::Since(_) = scope {
            return Err(DriverError::new("238", "archive dumps are always full"));
        }
        let (mut cmd, config) = self.command(params, "mongodump")?;
        if let Some(database) = &params.database {
            cmd.arg(format!("--db={}", database));
        }
        Ok(DriverDump {
            stream: Box::new(DumpWithConfig {
                reader: ChildReader::spawn(cmd, error_code)?,
                _config: config,
            }),
            checkpoint: None,
        })
    }

    fn restore_stream(&mut self, input: ByteStream) -> Result<(), DriverError> {
        let params = self.params()?;
        let (mut cmd, _config) = self.command(params, "mongorestore")?;
        cmd.arg("--drop");
        if let Some(database) = &params.database {
            cmd.arg(format!("--nsInclude={}.*", database));
        }
        feed(cmd, input, error_code)
    }

    fn disconnect(&mut self) {
        self.params = None;
    }
}

fn error_code(stderr: &str) -> String {
    let s = stderr.to_lowercase();
    let code = if s.contains("authentication failed") {
        "18"
    } else if s.contains("not authorized") {
        "13"
    } else if s.contains("i/o timeout") || s.contains("context deadline exceeded") {
        "89"
    } else if s.contains("server selection error")
        || s.contains("connection refused")
        || s.contains("no reachable servers")
        || s.contains("error connecting")
    {
        "6"
    } else {
        "1"
    };
    code.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_error_code() {
        assert_eq!(
            error_code("Failed: can't create session: could not connect to server: server selection error: connection refused"),
            "6"
        );
        assert_eq!(error_code("Failed: error connecting to db server: Authentication failed."), "18");
        assert_eq!(error_code("Failed: corrupted archive"), "1");
    }

    #[test]
    fn test_scratch_config_is_private_and_removed() {
        let temp_dir = TempDir::new().unwrap();
        let path = {
            let config = ScratchConfig::write(temp_dir.path(), "it's secret").unwrap();
            let body = fs::read_to_string(&config.path).unwrap();
            let parsed: BTreeMap<String, String> = serde_yaml::from_str(&body).unwrap();
            assert_eq!(parsed["password"], "it's secret");

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                let mode = fs::metadata(&config.path).unwrap().permissions().mode();
                assert_eq!(mode & 0o077, 0);
            }
            config.path.clone()
        };
        assert!(!path.exists());
    }
}
