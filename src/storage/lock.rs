//! Advisory lock files
//!
//! A lock is a file created with `create_new` holding the owner's pid and a
//! token unique to the acquisition. Locks whose owner is no longer running
//! are stale: they are moved aside under a unique name, re-checked and only
//! then discarded, so a lock taken by someone else in the meantime is put
//! back. The lock is released when its [`LockGuard`] is dropped, and only if
//! the file still carries the guard's token.

use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::thread;
use std::time::{Duration, Instant, SystemTime};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use uuid::Uuid;

use super::checksum::sha256_hex;
use crate::error::{BackupError, BackupResult};

/// Grace period for a lock file whose contents are not written yet
const FRESH_LOCK_GRACE: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
struct LockInfo {
    pid: u32,
    label: String,
    acquired_at: DateTime<Utc>,
    #[serde(default)]
    token: String,
}

/// Held lock; removes the lock file on drop
#[derive(Debug)]
pub struct LockGuard {
    path: PathBuf,
    token: String,
}

impl LockGuard {
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        match read_info(&self.path) {
            Some(info) if info.token == self.token => {}
            _ => {
                debug!(path = %self.path.display(), "lock no longer ours; leaving it");
                return;
            }
        }
        if let Err(e) = fs::remove_file(&self.path) {
            if e.kind() != io::ErrorKind::NotFound {
                warn!(path = %self.path.display(), error = %e, "failed to release lock");
            }
        }
    }
}

/// Outcome of a non-blocking lock attempt
#[derive(Debug)]
pub enum Acquire {
    Acquired(LockGuard),
    /// Someone else holds it; describes the holder
    Held(String),
}

/// Who a lock file belongs to
#[derive(Debug)]
enum Holder {
    /// A running process, described for messages
    Live(String),
    /// Nobody; carries what the file said, if it could be read
    Stale(Option<LockInfo>),
}

/// Lock file used for a target's connection descriptor
pub fn target_lock_path(lock_dir: &Path, descriptor: &str) -> PathBuf {
    lock_dir.join(format!("{}.lock", &sha256_hex(descriptor.as_bytes())[..16]))
}

/// Try to take the lock without waiting
pub fn try_lock(path: &Path, label: &str) -> BackupResult<Acquire> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).map_err(|e| {
            BackupError::Io(format!("Failed to create {}: {}", parent.display(), e))
        })?;
    }

    for _ in 0..3 {
        match OpenOptions::new().write(true).create_new(true).open(path) {
            Ok(mut file) => {
                let info = LockInfo {
                    pid: std::process::id(),
                    label: label.to_string(),
                    acquired_at: Utc::now(),
                    token: Uuid::new_v4().simple().to_string(),
                };
                let guard = LockGuard {
                    path: path.to_path_buf(),
                    token: info.token.clone(),
                };
                serde_json::to_writer(&mut file, &info)?;
                file.flush()?;
                return Ok(Acquire::Acquired(guard));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => match holder(path) {
                Holder::Live(holder) => return Ok(Acquire::Held(holder)),
                Holder::Stale(info) => {
                    if break_stale(path, &info)? {
                        debug!(path = %path.display(), "removed stale lock");
                    } else {
                        debug!(path = %path.display(), "stale lock was taken over meanwhile");
                    }
                }
            },
            Err(e) => {
                return Err(BackupError::Io(format!(
                    "Failed to create lock {}: {}",
                    path.display(),
                    e
                )))
            }
        }
    }

    Ok(Acquire::Held(match holder(path) {
        Holder::Live(holder) => holder,
        Holder::Stale(_) => "unknown".into(),
    }))
}

/// Take the lock, waiting up to `timeout` for the holder to release it
pub fn lock_with_timeout(path: &Path, label: &str, timeout: Duration) -> BackupResult<LockGuard> {
    let deadline = Instant::now() + timeout;
    loop {
        match try_lock(path, label)? {
            Acquire::Acquired(guard) => return Ok(guard),
            Acquire::Held(holder) => {
                if Instant::now() >= deadline {
                    return Err(BackupError::Catalog(format!(
                        "Timed out waiting for lock {} (held by {})",
                        path.display(),
                        holder
                    )));
                }
                thread::sleep(Duration::from_millis(20));
            }
        }
    }
}

/// Whether a live process holds the lock at `path`
pub fn is_held(path: &Path) -> bool {
    matches!(holder(path), Holder::Live(_))
}

fn read_info(path: &Path) -> Option<LockInfo> {
    let contents = fs::read_to_string(path).ok()?;
    serde_json::from_str(&contents).ok()
}

fn holder(path: &Path) -> Holder {
    match read_info(path) {
        Some(info) if process_alive(info.pid) => Holder::Live(format!(
            "{} (pid {} since {})",
            info.label,
            info.pid,
            info.acquired_at.format("%Y-%m-%d %H:%M:%S")
        )),
        Some(info) => Holder::Stale(Some(info)),
        None => {
            // Possibly created a moment ago and not written yet
            let fresh = fs::metadata(path)
                .and_then(|m| m.modified())
                .ok()
                .and_then(|t| SystemTime::now().duration_since(t).ok())
                .is_some_and(|age| age < FRESH_LOCK_GRACE);
            if fresh {
                Holder::Live("another process".into())
            } else {
                Holder::Stale(None)
            }
        }
    }
}

/// Discard the stale lock at `path` that was read as `judged`
///
/// Returns `false` when the file turned out to be a different, live lock;
/// that lock is left in place.
fn break_stale(path: &Path, judged: &Option<LockInfo>) -> BackupResult<bool> {
    let aside = path.with_extension(format!("lock.stale-{}", Uuid::new_v4().simple()));
    match fs::rename(path, &aside) {
        Ok(()) => {}
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(true),
        Err(e) => {
            return Err(BackupError::Io(format!(
                "Failed to remove stale lock {}: {}",
                path.display(),
                e
            )))
        }
    }

    let unchanged = matches!(holder(&aside), Holder::Stale(ref info) if info == judged);
    if !unchanged {
        // A new holder fails create_new while its file is back in place
        match fs::hard_link(&aside, path) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => warn!(path = %path.display(), error = %e, "failed to restore lock"),
        }
    }
    if let Err(e) = fs::remove_file(&aside) {
        warn!(path = %aside.display(), error = %e, "failed to remove stale lock");
    }
    Ok(unchanged)
}

#[cfg(unix)]
fn process_alive(pid: u32) -> bool {
    use nix::errno::Errno;
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    if pid == std::process::id() {
        return true;
    }
    match i32::try_from(pid) {
        // EPERM means the process exists under another user
        Ok(raw) if raw > 0 => !matches!(kill(Pid::from_raw(raw), None), Err(Errno::ESRCH)),
        _ => false,
    }
}

/// Without a liveness check every readable lock counts as held
#[cfg(not(unix))]
fn process_alive(_pid: u32) -> bool {
    true
}
