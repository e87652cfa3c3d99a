//! Database adapters
//!
//! A [`DatabaseAdapter`] is the engine-agnostic face of a database: connect,
//! stream a dump, load a restore stream. Each engine variant wraps a
//! [`DatabaseDriver`] (the native client, an external collaborator) and maps
//! the driver's engine-specific error codes onto the uniform taxonomy in
//! [`crate::error`].
//!
//! The engine is resolved once, when [`adapter_for`] builds the adapter.

pub mod mongodb;
pub mod mysql;
pub mod postgres;
pub mod sqlite;

use std::collections::BTreeMap;
use std::fmt;
use std::io::{self, Read};
use std::marker::PhantomData;
use std::path::PathBuf;

use tracing::debug;

use crate::credentials::SecureString;
use crate::error::{BackupError, BackupResult};
use crate::models::{BackupType, Checkpoint, DatabaseType, TargetConfig};
use crate::transform::{ByteStream, StreamFault};

pub use mongodb::Mongodb;
pub use mysql::Mysql;
pub use postgres::Postgres;
pub use sqlite::Sqlite;

/// Everything a driver needs to reach a target
#[derive(Debug, Clone)]
pub struct ConnectParams {
    pub engine: DatabaseType,
    pub host: Option<String>,
    pub port: Option<u16>,
    pub database: Option<String>,
    pub path: Option<PathBuf>,
    pub user: Option<String>,
    pub password: Option<SecureString>,
    pub options: BTreeMap<String, String>,
}

impl ConnectParams {
    /// Combine a target with its resolved credentials
    pub fn for_target(
        target: &TargetConfig,
        user: Option<String>,
        password: Option<SecureString>,
    ) -> Self {
        Self {
            engine: target.engine,
            host: target.host.clone(),
            port: target.effective_port(),
            database: target.database.clone(),
            path: target.path.clone(),
            user: user.or_else(|| target.user.clone()),
            password,
            options: target.options.clone(),
        }
    }
}

/// What a dump covers
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DumpScope {
    Full,
    /// Changes after the checkpoint
    Since(Checkpoint),
}

/// Dump request handed to an adapter
#[derive(Debug, Clone)]
pub struct DumpOptions {
    pub backup_type: BackupType,
    /// Checkpoint of the parent backup, required unless `backup_type` is full
    pub base_checkpoint: Option<Checkpoint>,
}

impl DumpOptions {
    pub fn full() -> Self {
        Self {
            backup_type: BackupType::Full,
            base_checkpoint: None,
        }
    }
}

/// A started dump
pub struct DumpHandle {
    pub stream: ByteStream,
    /// Position the dump reaches; the base for later incrementals
    pub checkpoint: Option<Checkpoint>,
}

impl fmt::Debug for DumpHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DumpHandle")
            .field("checkpoint", &self.checkpoint)
            .finish_non_exhaustive()
    }
}

/// Error reported by a native driver, with its engine-specific code
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriverError {
    pub code: String,
    pub message: String,
}

impl DriverError {
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
        }
    }

    /// Wrap into an `io::Error` so it can travel through a dump stream
    pub fn into_io(self) -> io::Error {
        io::Error::new(io::ErrorKind::Other, self)
    }

    /// The driver error carried by an `io::Error`, if any
    pub fn from_io(err: &io::Error) -> Option<&DriverError> {
        err.get_ref().and_then(|inner| inner.downcast_ref::<DriverError>())
    }
}

impl fmt::Display for DriverError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.code, self.message)
    }
}

impl std::error::Error for DriverError {}

/// A driver's dump output
pub struct DriverDump {
    pub stream: ByteStream,
    /// Engine-native position token
    pub checkpoint: Option<String>,
}

/// Native client primitives for one engine
pub trait DatabaseDriver: Send {
    fn connect(&mut self, params: &ConnectParams) -> Result<(), DriverError>;
    fn dump_stream(&mut self, scope: &DumpScope) -> Result<DriverDump, DriverError>;
    fn restore_stream(&mut self, input: ByteStream) -> Result<(), DriverError>;
    fn disconnect(&mut self);
}

/// Builds drivers for engines
pub trait DriverFactory: Send + Sync {
    fn driver(&self, engine: DatabaseType) -> BackupResult<Box<dyn DatabaseDriver>>;
}

/// Engine-independent dump/restore capability
pub trait DatabaseAdapter: Send {
    fn engine(&self) -> DatabaseType;

    fn supports_incremental(&self) -> bool;

    /// Reject a dump request the engine cannot serve, without connecting
    fn check_dump(&self, options: &DumpOptions) -> BackupResult<()>;

    fn connect(&mut self, params: &ConnectParams) -> BackupResult<()>;

    /// Start a streaming dump
    fn dump(&mut self, options: &DumpOptions) -> BackupResult<DumpHandle>;

    /// Load a restore stream into the connected database
    fn restore(&mut self, input: ByteStream) -> BackupResult<()>;

    fn disconnect(&mut self);
}

/// How an engine error code should be treated
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorClass {
    /// Worth retrying (connection reset, server restarting, lock timeout)
    Transient,
    /// Credentials were rejected
    Authentication,
    Permanent,
}

/// Engine-specific knowledge an adapter is parameterized over
pub trait Dialect: Send + 'static {
    const ENGINE: DatabaseType;

    fn classify(code: &str) -> ErrorClass;

    /// Check a checkpoint token before handing it to the driver
    fn check_checkpoint(_checkpoint: &Checkpoint) -> BackupResult<()> {
        Ok(())
    }
}

/// Adapter for engine `D` over a native driver
pub struct EngineAdapter<D: Dialect> {
    driver: Box<dyn DatabaseDriver>,
    connected: bool,
    _dialect: PhantomData<D>,
}

pub type MysqlAdapter = EngineAdapter<Mysql>;
pub type PostgresAdapter = EngineAdapter<Postgres>;
pub type SqliteAdapter = EngineAdapter<Sqlite>;
pub type MongodbAdapter = EngineAdapter<Mongodb>;

impl<D: Dialect> EngineAdapter<D> {
    pub fn new(driver: Box<dyn DatabaseDriver>) -> Self {
        Self {
            driver,
            connected: false,
            _dialect: PhantomData,
        }
    }

    fn transient(code: &str) -> bool {
        D::classify(code) == ErrorClass::Transient
    }

    fn require_connection(&self) -> BackupResult<()> {
        if self.connected {
            Ok(())
        } else {
            Err(BackupError::Precondition(format!(
                "{} adapter used before connect",
                D::ENGINE
            )))
        }
    }
}

impl<D: Dialect> DatabaseAdapter for EngineAdapter<D> {
    fn engine(&self) -> DatabaseType {
        D::ENGINE
    }

    fn supports_incremental(&self) -> bool {
        D::ENGINE.supports_incremental()
    }

    fn check_dump(&self, options: &DumpOptions) -> BackupResult<()> {
        if options.backup_type == BackupType::Full {
            return Ok(());
        }
        if !self.supports_incremental() {
            return Err(BackupError::Precondition(format!(
                "{} does not support {} backups",
                D::ENGINE,
                options.backup_type
            )));
        }
        match &options.base_checkpoint {
            Some(checkpoint) => D::check_checkpoint(checkpoint),
            None => Err(BackupError::Precondition(format!(
                "{} backup requires a checkpoint from a prior backup",
                options.backup_type
            ))),
        }
    }

    fn connect(&mut self, params: &ConnectParams) -> BackupResult<()> {
        if self.connected {
            return Ok(());
        }
        self.driver
            .connect(params)
            .map_err(|e| BackupError::AdapterConnectionFailed {
                engine: D::ENGINE.to_string(),
                transient: Self::transient(&e.code),
                message: e.to_string(),
            })?;
        debug!(engine = %D::ENGINE, "connected");
        self.connected = true;
        Ok(())
    }

    fn dump(&mut self, options: &DumpOptions) -> BackupResult<DumpHandle> {
        self.check_dump(options)?;
        self.require_connection()?;

        let scope = match (&options.backup_type, &options.base_checkpoint) {
            (BackupType::Full, _) => DumpScope::Full,
            (_, Some(checkpoint)) => DumpScope::Since(checkpoint.clone()),
            (_, None) => DumpScope::Full,
        };
        let dump = self
            .driver
            .dump_stream(&scope)
            .map_err(|e| BackupError::DumpFailed {
                transient: Self::transient(&e.code),
                message: e.to_string(),
            })?;

        Ok(DumpHandle {
            stream: Box::new(DumpReader::<D> {
                inner: dump.stream,
                _dialect: PhantomData,
            }),
            checkpoint: dump.checkpoint.map(Checkpoint::new),
        })
    }

    fn restore(&mut self, input: ByteStream) -> BackupResult<()> {
        self.require_connection()?;
        self.driver
            .restore_stream(input)
            .map_err(|e| BackupError::RestoreFailed(e.to_string()))
    }

    fn disconnect(&mut self) {
        if self.connected {
            self.driver.disconnect();
            self.connected = false;
        }
    }
}

impl<D: Dialect> Drop for EngineAdapter<D> {
    fn drop(&mut self) {
        self.disconnect();
    }
}

/// Translates driver failures inside the dump stream into dump faults
struct DumpReader<D: Dialect> {
    inner: ByteStream,
    _dialect: PhantomData<D>,
}

impl<D: Dialect> Read for DumpReader<D> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).map_err(|err| {
            if StreamFault::from_io(&err).is_some() {
                return err;
            }
            let fault = match DriverError::from_io(&err) {
                Some(driver) => StreamFault::Dump {
                    message: driver.to_string(),
                    transient: D::classify(&driver.code) == ErrorClass::Transient,
                },
                None => StreamFault::Dump {
                    message: err.to_string(),
                    transient: matches!(
                        err.kind(),
                        io::ErrorKind::ConnectionReset
                            | io::ErrorKind::ConnectionAborted
                            | io::ErrorKind::BrokenPipe
                            | io::ErrorKind::TimedOut
                    ),
                },
            };
            fault.into_io()
        })
    }
}

/// Build the adapter for a target's engine
pub fn adapter_for(
    target: &TargetConfig,
    factory: &dyn DriverFactory,
) -> BackupResult<Box<dyn DatabaseAdapter>> {
    let driver = factory.driver(target.engine)?;
    let adapter: Box<dyn DatabaseAdapter> = match target.engine {
        DatabaseType::Mysql => Box::new(MysqlAdapter::new(driver)),
        DatabaseType::Postgres => Box::new(PostgresAdapter::new(driver)),
        DatabaseType::Sqlite => Box::new(SqliteAdapter::new(driver)),
        DatabaseType::Mongodb => Box::new(MongodbAdapter::new(driver)),
    };
    Ok(adapter)
}
