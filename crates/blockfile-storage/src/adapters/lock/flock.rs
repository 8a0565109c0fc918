//! # File Lock Implementation
//!
//! Uses `fs2` for cross-platform file locking (flock on Unix, LockFile on Windows).

use std::fs::{File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use fs2::FileExt;
use thiserror::Error;

/// Lock file name inside a ledger directory.
pub const LOCK_FILE: &str = "LOCK";

/// Errors from ledger locking.
#[derive(Debug, Error)]
pub enum LockError {
    /// Lock file could not be created
    #[error("Failed to create lock file: {0}")]
    CreateFailed(#[source] io::Error),

    /// Ledger is already locked by another holder
    #[error("Ledger already in use{} ({})", holder(.pid), .path.display())]
    AlreadyLocked { pid: Option<u32>, path: PathBuf },

    /// Failed to write PID to lock file
    #[error("Failed to write PID to lock file: {0}")]
    WriteFailed(#[source] io::Error),
}

fn holder(pid: &Option<u32>) -> String {
    pid.map(|p| format!(" by process {p}")).unwrap_or_default()
}

/// Exclusive lock on a ledger directory.
///
/// Acquired when a ledger is opened, released on drop (RAII). The lock is
/// advisory; a second handle in the same process is refused just like one
/// in another process.
#[derive(Debug)]
pub struct DatabaseLock {
    /// Kept open to hold the lock.
    file: File,
    path: PathBuf,
    pid: u32,
}

impl DatabaseLock {
    /// Try once to take the lock on `dir`. Never blocks.
    ///
    /// # Errors
    ///
    /// `LockError::AlreadyLocked` if someone else holds it.
    pub fn acquire(dir: &Path) -> Result<Self, LockError> {
        let path = dir.join(LOCK_FILE);

        // Not truncated here: the holder's PID must survive a failed attempt.
        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .map_err(LockError::CreateFailed)?;

        if file.try_lock_exclusive().is_err() {
            return Err(LockError::AlreadyLocked {
                pid: Self::read_existing_pid(&path),
                path,
            });
        }

        let pid = std::process::id();
        file.set_len(0).map_err(LockError::WriteFailed)?;
        writeln!(file, "{pid}").map_err(LockError::WriteFailed)?;
        file.sync_all().map_err(LockError::WriteFailed)?;

        Ok(Self { file, path, pid })
    }

    /// PID written into the lock file.
    pub fn pid(&self) -> u32 {
        self.pid
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_existing_pid(path: &Path) -> Option<u32> {
        std::fs::read_to_string(path)
            .ok()
            .and_then(|s| s.trim().parse().ok())
    }
}

impl Drop for DatabaseLock {
    /// Unlocks only; the file stays so every holder locks the same inode.
    fn drop(&mut self) {
        #[allow(clippy::incompatible_msrv)]
        let unlocked = FileExt::unlock(&self.file);
        if let Err(e) = unlocked {
            tracing::warn!(
                "[blkstorage] Failed to unlock {}: {}",
                self.path.display(),
                e
            );
        }
    }
}
