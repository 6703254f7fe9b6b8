//! Single-instance advisory lock (spec.md §5 "created on startup after
//! lock + socket acquisition"; §7 "lock held by another live owner").
//! Grounded in the `fs2::FileExt` exclusive-lock pattern used for the
//! plugin lockfile in the pack's astrid example, adapted from a
//! load/mutate/save lockfile to a plain hold-for-process-lifetime lock.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs2::FileExt;

use crate::error::DaemonError;

/// Holds the lock file open; dropping it releases the `flock`.
pub struct InstanceLock {
    _file: File,
    path: PathBuf,
}

/// Acquires the exclusive lock at `<socket parent dir>/suggestd.lock`,
/// creating the parent directory if needed. Fails immediately rather
/// than blocking — a live owner means this process should exit, not wait.
pub fn acquire(socket_path: &Path) -> Result<InstanceLock, DaemonError> {
    let parent = socket_path.parent().unwrap_or_else(|| Path::new("."));
    std::fs::create_dir_all(parent).map_err(|e| DaemonError::Internal(format!("failed to create lock directory: {e}")))?;

    let lock_path = parent.join("suggestd.lock");
    let file = OpenOptions::new()
        .create(true)
        .write(true)
        .open(&lock_path)
        .map_err(|e| DaemonError::Internal(format!("failed to open lock file: {e}")))?;

    file.try_lock_exclusive()
        .map_err(|_| DaemonError::Unavailable(format!("another suggestd already holds the lock at {}", lock_path.display())))?;

    Ok(InstanceLock { _file: file, path: lock_path })
}

impl InstanceLock {
    pub fn path(&self) -> &Path {
        &self.path
    }
}
