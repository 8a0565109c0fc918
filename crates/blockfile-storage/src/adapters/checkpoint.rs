//! # Checkpoint Manager
//!
//! Keeps the in-memory [`CheckpointInfo`] and its durable slot, a small file
//! next to the blockfiles. Every save replaces the whole slot atomically
//! (temp file, fsync, rename), so a crash leaves either the old or the new
//! value on disk and never a mix of fields.

use std::fs::File;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};

use crate::adapters::storage::sync_parent_dir;
use crate::domain::checkpoint::CheckpointInfo;
use crate::domain::errors::StorageError;

/// File name of the checkpoint slot inside a ledger directory.
pub const CHECKPOINT_FILE: &str = "checkpoint";

pub struct CheckpointManager {
    path: PathBuf,
    current: CheckpointInfo,
}

impl CheckpointManager {
    /// Open the slot in `ledger_dir`, loading the persisted value or the
    /// zero sentinel when none exists yet.
    pub fn open(ledger_dir: &Path) -> Result<Self, StorageError> {
        let path = ledger_dir.join(CHECKPOINT_FILE);
        let current = Self::load(&path)?.unwrap_or_default();
        Ok(Self { path, current })
    }

    /// Read the slot at `path`; `None` if it was never written.
    pub fn load(path: &Path) -> Result<Option<CheckpointInfo>, StorageError> {
        let bytes = match std::fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StorageError::io(path, e)),
        };
        CheckpointInfo::decode_slot(&bytes)
            .map(Some)
            .map_err(|reason| StorageError::CorruptCheckpoint {
                reason: format!("{}: {}", path.display(), reason),
            })
    }

    /// Last persisted value.
    pub fn current(&self) -> CheckpointInfo {
        self.current
    }

    /// Synchronously persist `info` and make it current.
    pub fn save(&mut self, info: CheckpointInfo) -> Result<(), StorageError> {
        let temp_path = self.path.with_extension("tmp");
        let mut file = File::create(&temp_path).map_err(|e| StorageError::io(&temp_path, e))?;
        file.write_all(&info.encode_slot())
            .map_err(|e| StorageError::io(&temp_path, e))?;
        file.sync_all()
            .map_err(|e| StorageError::io(&temp_path, e))?;
        drop(file);

        std::fs::rename(&temp_path, &self.path).map_err(|e| StorageError::io(&self.path, e))?;
        sync_parent_dir(&self.path);

        self.current = info;
        Ok(())
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_slot_is_sentinel() {
        let dir = TempDir::new().unwrap();
        let manager = CheckpointManager::open(dir.path()).unwrap();
        assert!(manager.current().is_fresh());
        assert!(!manager.path().exists());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = TempDir::new().unwrap();
        let info = CheckpointInfo::new(2, 512, 40);
        {
            let mut manager = CheckpointManager::open(dir.path()).unwrap();
            manager.save(info).unwrap();
            assert_eq!(manager.current(), info);
        }
        let manager = CheckpointManager::open(dir.path()).unwrap();
        assert_eq!(manager.current(), info);
        assert!(!dir.path().join("checkpoint.tmp").exists());
    }

    #[test]
    fn test_damaged_slot_is_corrupt_checkpoint() {
        let dir = TempDir::new().unwrap();
        std::fs::write(dir.path().join(CHECKPOINT_FILE), b"not a checkpoint").unwrap();
        let err = CheckpointManager::open(dir.path()).err().unwrap();
        assert!(matches!(err, StorageError::CorruptCheckpoint { .. }));
    }
}
