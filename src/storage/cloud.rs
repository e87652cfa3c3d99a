//! Cloud mirror of the local artifact store
//!
//! The mirror is optional; the orchestrator treats its failures as warnings on
//! the backup record rather than as backup failures.

use std::fs::{self, File};
use std::io::{self, BufWriter, Read};
use std::path::PathBuf;

use crate::error::{BackupError, BackupResult};
use crate::transform::ByteStream;

/// Object storage the artifacts are replicated to
pub trait CloudStore: Send + Sync {
    /// URI recorded for an object name
    fn uri(&self, name: &str) -> String;

    /// Store `data` under `name`, returning its URI
    fn put(&self, name: &str, data: &mut dyn Read) -> BackupResult<String>;

    fn get(&self, name: &str) -> BackupResult<ByteStream>;

    /// Delete an object; a missing object is not an error
    fn delete(&self, name: &str) -> BackupResult<()>;
}

/// Mirror into a directory (e.g. a mounted bucket or network share)
#[derive(Debug, Clone)]
pub struct DirectoryMirror {
    root: PathBuf,
}

impl DirectoryMirror {
    pub fn new(root: PathBuf) -> Self {
        Self { root }
    }

    fn object_path(&self, name: &str) -> BackupResult<PathBuf> {
        if name.is_empty() || name.contains('/') || name.contains('\\') || name.starts_with('.') {
            return Err(BackupError::Config(format!("Invalid object name: '{}'", name)));
        }
        Ok(self.root.join(name))
    }
}

impl CloudStore for DirectoryMirror {
    fn uri(&self, name: &str) -> String {
        format!("file://{}", self.root.join(name).display())
    }

    fn put(&self, name: &str, data: &mut dyn Read) -> BackupResult<String> {
        let path = self.object_path(name)?;
        let upload_err =
            |e: io::Error| BackupError::StorageWriteFailed(format!("Mirror upload of {} failed: {}", name, e));

        fs::create_dir_all(&self.root).map_err(upload_err)?;
        let temp_path = path.with_extension("upload");
        let result = (|| {
            let mut writer = BufWriter::new(File::create(&temp_path)?);
            io::copy(data, &mut writer)?;
            writer.into_inner().map_err(|e| e.into_error())?.sync_all()?;
            fs::rename(&temp_path, &path)
        })();
        if let Err(e) = result {
            let _ = fs::remove_file(&temp_path);
            return Err(upload_err(e));
        }
        Ok(self.uri(name))
    }

    fn get(&self, name: &str) -> BackupResult<ByteStream> {
        let path = self.object_path(name)?;
        match File::open(&path) {
            Ok(file) => Ok(Box::new(file)),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(BackupError::NotFound {
                entity_type: "Mirrored artifact",
                identifier: self.uri(name),
            }),
            Err(e) => Err(BackupError::Io(format!("Failed to open {}: {}", path.display(), e))),
        }
    }

    fn delete(&self, name: &str) -> BackupResult<()> {
        super::local::remove_if_exists(&self.object_path(name)?)
    }
}
