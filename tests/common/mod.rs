//! Shared fixtures: an in-memory database behind the driver traits

#![allow(dead_code)]

use std::collections::HashMap;
use std::io::{self, Cursor, Read};
use std::path::PathBuf;
use std::sync::atomic::{AtomicU32, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use tempfile::TempDir;

use dbbackup::adapters::{
    ConnectParams, DatabaseDriver, DriverDump, DriverError, DriverFactory, DumpScope,
};
use dbbackup::config::settings::{EncryptionSettings, RetrySettings};
use dbbackup::config::{BackupPaths, Settings};
use dbbackup::credentials::{
    CredentialResolver, CredentialSource, CredentialSpec, SecureString, SourceKind,
};
use dbbackup::models::{DatabaseType, TargetConfig};
use dbbackup::orchestrator::Orchestrator;
use dbbackup::transform::{ByteStream, EncryptionAlgorithm, KdfParams};
use dbbackup::BackupResult;

pub const KEY_NAME: &str = "backup_key";
pub const PASSPHRASE: &str = "correct horse battery staple";

/// State shared by every driver the factory hands out
#[derive(Default)]
pub struct MemoryDatabase {
    contents: Mutex<Vec<u8>>,
    restored: Mutex<Vec<Vec<u8>>>,
    /// Binary log offset, advanced by every dump
    position: AtomicU64,
    pub connects: AtomicUsize,
    /// Connect attempts that fail with a transient code before one succeeds
    pub transient_connect_failures: AtomicU32,
    /// Break the next dump stream after this many bytes, with this code
    dump_failure: Mutex<Option<(usize, &'static str)>>,
}

impl MemoryDatabase {
    pub fn with_contents(data: &[u8]) -> Arc<Self> {
        let db = Arc::new(Self::default());
        db.set_contents(data);
        db
    }

    pub fn set_contents(&self, data: &[u8]) {
        *self.contents.lock().unwrap() = data.to_vec();
    }

    /// Streams loaded by restores, in load order
    pub fn restored(&self) -> Vec<Vec<u8>> {
        self.restored.lock().unwrap().clone()
    }

    pub fn fail_next_dump(&self, after_bytes: usize, code: &'static str) {
        *self.dump_failure.lock().unwrap() = Some((after_bytes, code));
    }
}

pub struct MemoryFactory {
    db: Arc<MemoryDatabase>,
}

impl MemoryFactory {
    pub fn new(db: Arc<MemoryDatabase>) -> Self {
        Self { db }
    }
}

impl DriverFactory for MemoryFactory {
    fn driver(&self, engine: DatabaseType) -> BackupResult<Box<dyn DatabaseDriver>> {
        Ok(Box::new(MemoryDriver {
            db: Arc::clone(&self.db),
            engine,
        }))
    }
}

struct MemoryDriver {
    db: Arc<MemoryDatabase>,
    engine: DatabaseType,
}

fn transient_code(engine: DatabaseType) -> &'static str {
    match engine {
        DatabaseType::Mysql => "2013",
        DatabaseType::Postgres => "08006",
        DatabaseType::Sqlite => "5",
        DatabaseType::Mongodb => "6",
    }
}

impl DatabaseDriver for MemoryDriver {
    fn connect(&mut self, _params: &ConnectParams) -> Result<(), DriverError> {
        self.db.connects.fetch_add(1, Ordering::SeqCst);
        let remaining = self.db.transient_connect_failures.load(Ordering::SeqCst);
        if remaining > 0 {
            self.db
                .transient_connect_failures
                .store(remaining - 1, Ordering::SeqCst);
            return Err(DriverError::new(
                transient_code(self.engine),
                "server has gone away",
            ));
        }
        Ok(())
    }

    fn dump_stream(&mut self, scope: &DumpScope) -> Result<DriverDump, DriverError> {
        let payload = match scope {
            DumpScope::Full => self.db.contents.lock().unwrap().clone(),
            DumpScope::Since(checkpoint) => {
                format!("-- changes since {}\n", checkpoint).into_bytes()
            }
        };
        let end = self
            .db
            .position
            .fetch_add(payload.len() as u64 + 1, Ordering::SeqCst)
            + payload.len() as u64
            + 1;
        let checkpoint =
            (self.engine == DatabaseType::Mysql).then(|| format!("binlog.000001:{}", end));

        let stream: ByteStream = match self.db.dump_failure.lock().unwrap().take() {
            Some((after, code)) => Box::new(BrokenReader {
                data: Cursor::new(payload),
                remaining: after,
                code,
            }),
            None => Box::new(Cursor::new(payload)),
        };
        Ok(DriverDump { stream, checkpoint })
    }

    fn restore_stream(&mut self, mut input: ByteStream) -> Result<(), DriverError> {
        let mut data = Vec::new();
        input
            .read_to_end(&mut data)
            .map_err(|e| DriverError::new("io", e.to_string()))?;
        self.db.restored.lock().unwrap().push(data);
        Ok(())
    }

    fn disconnect(&mut self) {}
}

/// Yields `remaining` bytes, then fails like a dropped connection
struct BrokenReader {
    data: Cursor<Vec<u8>>,
    remaining: usize,
    code: &'static str,
}

impl Read for BrokenReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        if self.remaining == 0 {
            return Err(DriverError::new(self.code, "lost connection during dump").into_io());
        }
        let limit = buf.len().min(self.remaining);
        let n = self.data.read(&mut buf[..limit])?;
        self.remaining -= n;
        if n == 0 {
            self.remaining = 0;
        }
        Ok(n)
    }
}

/// Fixed secrets standing in for the keystore
pub struct StaticSource(pub HashMap<String, String>);

impl CredentialSource for StaticSource {
    fn kind(&self) -> SourceKind {
        SourceKind::Keystore
    }

    fn lookup(&self, key: &str) -> Option<SecureString> {
        self.0.get(key).map(|v| SecureString::new(v.clone()))
    }
}

pub fn resolver_with(passphrase: &str) -> CredentialResolver {
    let mut secrets = HashMap::new();
    secrets.insert(KEY_NAME.to_string(), passphrase.to_string());
    CredentialResolver::new(vec![Box::new(StaticSource(secrets))])
}

/// A base directory, settings with one target and an in-memory database
pub struct Fixture {
    pub temp: TempDir,
    pub paths: BackupPaths,
    pub settings: Settings,
    pub db: Arc<MemoryDatabase>,
}

impl Fixture {
    fn with_target(target: TargetConfig, contents: &[u8]) -> Self {
        let temp = TempDir::new().unwrap();
        let paths = BackupPaths::with_base_dir(temp.path().to_path_buf());
        let mut settings = Settings::default();
        settings.targets.push(target);
        settings.retry = RetrySettings {
            max_attempts: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 4,
        };
        Self {
            temp,
            paths,
            settings,
            db: MemoryDatabase::with_contents(contents),
        }
    }

    /// Target `app`, a SQLite file
    pub fn sqlite(contents: &[u8]) -> Self {
        let path = PathBuf::from("/srv/data/app.db");
        Self::with_target(
            TargetConfig {
                name: "app".into(),
                engine: DatabaseType::Sqlite,
                host: None,
                port: None,
                database: None,
                path: Some(path),
                user: None,
                user_credential: None,
                password: None,
                options: Default::default(),
            },
            contents,
        )
    }

    /// Target `shop`, a MySQL server
    pub fn mysql(contents: &[u8]) -> Self {
        Self::with_target(
            TargetConfig {
                name: "shop".into(),
                engine: DatabaseType::Mysql,
                host: Some("db.internal".into()),
                port: None,
                database: Some("shop".into()),
                path: None,
                user: Some("backup".into()),
                user_credential: None,
                password: None,
                options: Default::default(),
            },
            contents,
        )
    }

    /// Turn on encryption with a cheap KDF
    pub fn encrypted(mut self) -> Self {
        self.settings.encryption = EncryptionSettings {
            enabled: true,
            algorithm: EncryptionAlgorithm::default(),
            key: Some(CredentialSpec::new(KEY_NAME, vec![SourceKind::Keystore])),
            kdf: KdfParams {
                memory_kib: 64,
                iterations: 1,
                parallelism: 1,
            },
        };
        self
    }

    pub fn orchestrator(&self) -> Orchestrator<'_> {
        self.orchestrator_with(resolver_with(PASSPHRASE))
    }

    pub fn orchestrator_with(&self, resolver: CredentialResolver) -> Orchestrator<'_> {
        let (orchestrator, _) = Orchestrator::open(
            &self.settings,
            &self.paths,
            Box::new(MemoryFactory::new(Arc::clone(&self.db))),
        )
        .unwrap();
        orchestrator.with_resolver(resolver)
    }

    /// Files currently in the artifact directory
    pub fn artifact_files(&self) -> Vec<String> {
        let mut names: Vec<String> = std::fs::read_dir(self.paths.backup_dir())
            .map(|entries| {
                entries
                    .filter_map(|e| e.ok())
                    .map(|e| e.file_name().to_string_lossy().to_string())
                    .collect()
            })
            .unwrap_or_default();
        names.sort();
        names
    }
}

/// A dump large enough to span several encryption frames
pub fn sample_dump() -> Vec<u8> {
    let mut dump = Vec::new();
    for i in 0..4_000 {
        dump.extend_from_slice(
            format!("INSERT INTO orders VALUES ({}, 'customer-{}', {});\n", i, i % 97, i * 3)
                .as_bytes(),
        );
    }
    dump
}
