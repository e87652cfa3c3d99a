//! Crash-safe writes for the catalog, keystore and configuration
//!
//! Every document is written to a sibling temp file, synced, renamed over the
//! target and then the directory entry itself is synced. A reader sees the
//! old document or the new one, never a mix.

use std::fs::{self, File};
use std::io::{self, BufReader, BufWriter, Write};
use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};

use crate::error::{BackupError, BackupResult};

fn io_err(action: &str, path: &Path, e: io::Error) -> BackupError {
    BackupError::Io(format!("Failed to {} {}: {}", action, path.display(), e))
}

/// Load a JSON document, or `T::default()` when there is none yet
pub fn read_json<T, P>(path: P) -> BackupResult<T>
where
    T: DeserializeOwned + Default,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(T::default()),
        Err(e) => return Err(io_err("open", path, e)),
    };
    serde_json::from_reader(BufReader::new(file))
        .map_err(|e| BackupError::Json(format!("Failed to parse {}: {}", path.display(), e)))
}

/// Replace `path` with a pretty-printed JSON document
pub fn write_json_atomic<T, P>(path: P, data: &T) -> BackupResult<()>
where
    T: Serialize,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    write_atomic(path, |writer| {
        serde_json::to_writer_pretty(&mut *writer, data).map_err(|e| {
            BackupError::Json(format!("Failed to serialize {}: {}", path.display(), e))
        })?;
        writer.write_all(b"\n").map_err(|e| io_err("write", path, e))
    })
}

/// Replace `path` with whatever `fill` writes
pub fn write_atomic<F>(path: &Path, fill: F) -> BackupResult<()>
where
    F: FnOnce(&mut BufWriter<File>) -> BackupResult<()>,
{
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir.to_path_buf(),
        _ => PathBuf::from("."),
    };
    fs::create_dir_all(&dir).map_err(|e| io_err("create directory", &dir, e))?;

    let temp_path = temp_path_for(path);
    let result = (|| {
        let file = File::create(&temp_path).map_err(|e| io_err("create", &temp_path, e))?;
        let mut writer = BufWriter::new(file);
        fill(&mut writer)?;
        let file = writer
            .into_inner()
            .map_err(|e| io_err("flush", &temp_path, e.into_error()))?;
        file.sync_all().map_err(|e| io_err("sync", &temp_path, e))?;
        fs::rename(&temp_path, path).map_err(|e| io_err("replace", path, e))
    })();

    if result.is_err() {
        let _ = fs::remove_file(&temp_path);
        return result;
    }
    sync_dir(&dir);
    Ok(())
}

fn temp_path_for(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| "document".into());
    path.with_file_name(format!(".{}.{}.tmp", name, std::process::id()))
}

/// Persist a rename; best effort, not every platform can open directories
#[cfg(unix)]
fn sync_dir(dir: &Path) {
    if let Ok(handle) = File::open(dir) {
        let _ = handle.sync_all();
    }
}

#[cfg(not(unix))]
fn sync_dir(_dir: &Path) {}

/// Restrict a file to its owner (Unix only)
#[cfg(unix)]
pub fn restrict_permissions(path: &Path) -> BackupResult<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
        .map_err(|e| io_err("set permissions on", path, e))
}

#[cfg(not(unix))]
pub fn restrict_permissions(_path: &Path) -> BackupResult<()> {
    Ok(())
}
