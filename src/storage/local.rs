//! Local artifact store
//!
//! Artifacts are written to `<id>.dbk.partial`, fsynced and renamed to
//! `<id>.dbk` on commit, so a committed file name always denotes a complete
//! artifact. A partial artifact that is dropped without being committed is
//! deleted.

use std::fs::{self, File, OpenOptions};
use std::io::{self, BufWriter, Read, Write};
use std::path::{Path, PathBuf};

use tracing::{debug, warn};

use crate::error::{BackupError, BackupResult};
use crate::models::BackupId;
use crate::transform::{classify, CancelToken};

/// Directory of committed and in-flight artifacts
#[derive(Debug, Clone)]
pub struct LocalStore {
    dir: PathBuf,
}

impl LocalStore {
    pub fn new(dir: PathBuf) -> Self {
        Self { dir }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn artifact_path(&self, id: &BackupId) -> PathBuf {
        self.dir.join(id.artifact_file_name())
    }

    pub fn partial_path(&self, id: &BackupId) -> PathBuf {
        self.dir.join(id.partial_file_name())
    }

    /// Start writing a new artifact
    pub fn begin(&self, id: &BackupId) -> BackupResult<PartialArtifact> {
        fs::create_dir_all(&self.dir).map_err(|e| {
            BackupError::StorageWriteFailed(format!(
                "Failed to create {}: {}",
                self.dir.display(),
                e
            ))
        })?;

        let partial_path = self.partial_path(id);
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&partial_path)
            .map_err(|e| {
                BackupError::StorageWriteFailed(format!(
                    "Failed to create {}: {}",
                    partial_path.display(),
                    e
                ))
            })?;

        Ok(PartialArtifact {
            writer: Some(BufWriter::new(file)),
            partial_path,
            final_path: self.artifact_path(id),
            written: 0,
        })
    }

    /// Open a committed artifact for reading
    pub fn open(&self, path: &Path) -> BackupResult<File> {
        File::open(path).map_err(|e| {
            if e.kind() == io::ErrorKind::NotFound {
                BackupError::NotFound {
                    entity_type: "Artifact",
                    identifier: path.display().to_string(),
                }
            } else {
                BackupError::Io(format!("Failed to open {}: {}", path.display(), e))
            }
        })
    }

    /// Delete an artifact; a missing file is not an error
    pub fn remove(&self, path: &Path) -> BackupResult<()> {
        remove_if_exists(path)
    }

    /// Remove every in-flight artifact for `id`
    pub fn discard(&self, id: &BackupId) -> BackupResult<()> {
        remove_if_exists(&self.partial_path(id))?;
        remove_if_exists(&self.artifact_path(id))
    }
}

pub(crate) fn remove_if_exists(path: &Path) -> BackupResult<()> {
    match fs::remove_file(path) {
        Ok(()) => {
            debug!(path = %path.display(), "removed artifact");
            Ok(())
        }
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(BackupError::Io(format!(
            "Failed to remove {}: {}",
            path.display(),
            e
        ))),
    }
}

/// An artifact being written
#[derive(Debug)]
pub struct PartialArtifact {
    writer: Option<BufWriter<File>>,
    partial_path: PathBuf,
    final_path: PathBuf,
    written: u64,
}

impl PartialArtifact {
    pub fn partial_path(&self) -> &Path {
        &self.partial_path
    }

    /// Bytes written so far
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Copy `input` to the artifact, checking `token` between chunks
    ///
    /// Read errors are mapped through their stream fault when they carry one;
    /// write errors are storage failures.
    pub fn write_from(&mut self, input: &mut dyn Read, token: &CancelToken) -> BackupResult<u64> {
        let Some(writer) = self.writer.as_mut() else {
            return Err(BackupError::StorageWriteFailed("artifact already closed".into()));
        };
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            token
                .check()
                .map_err(|e| classify(e, |e| BackupError::Cancelled(e.to_string())))?;
            let n = match input.read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(e) => {
                    return Err(classify(e, |e| BackupError::TransformFailed(e.to_string())))
                }
            };
            writer.write_all(&buf[..n]).map_err(|e| {
                BackupError::StorageWriteFailed(format!(
                    "Failed to write {}: {}",
                    self.partial_path.display(),
                    e
                ))
            })?;
            self.written += n as u64;
        }
        Ok(self.written)
    }

    /// Flush, fsync and rename into place
    pub fn commit(mut self) -> BackupResult<PathBuf> {
        let Some(writer) = self.writer.take() else {
            return Err(BackupError::StorageWriteFailed("artifact already closed".into()));
        };
        let storage_err = |what: &str, e: io::Error| {
            BackupError::StorageWriteFailed(format!("Failed to {} artifact: {}", what, e))
        };

        let file = writer.into_inner().map_err(|e| storage_err("flush", e.into_error()))?;
        file.sync_all().map_err(|e| storage_err("sync", e))?;
        drop(file);

        fs::rename(&self.partial_path, &self.final_path).map_err(|e| storage_err("commit", e))?;
        sync_parent(&self.final_path);
        Ok(self.final_path.clone())
    }
}

impl Drop for PartialArtifact {
    fn drop(&mut self) {
        if self.writer.take().is_some() {
            if let Err(e) = remove_if_exists(&self.partial_path) {
                warn!(error = %e, "failed to discard partial artifact");
            }
        }
    }
}

#[cfg(unix)]
fn sync_parent(path: &Path) {
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
}

#[cfg(not(unix))]
fn sync_parent(_path: &Path) {}
