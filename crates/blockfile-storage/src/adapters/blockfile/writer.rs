use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use super::blockfile_path;
use crate::domain::errors::FileStoreError;

/// Owned append handle on the active blockfile.
///
/// Acquired at open and at roll, released by [`close`](Self::close),
/// [`roll`](Self::roll) or drop. Content is never validated here.
#[derive(Debug)]
pub struct BlockfileWriter {
    dir: PathBuf,
    path: PathBuf,
    suffix: u32,
    file: File,
    offset: u64,
}

impl BlockfileWriter {
    /// Open blockfile `suffix`, creating it if needed. The write offset
    /// starts at the current file length.
    pub fn open(dir: &Path, suffix: u32) -> Result<Self, FileStoreError> {
        let path = blockfile_path(dir, suffix);
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)
            .map_err(|source| FileStoreError::Io {
                path: path.clone(),
                source,
            })?;
        let offset = file
            .metadata()
            .map_err(|source| FileStoreError::Io {
                path: path.clone(),
                source,
            })?
            .len();

        Ok(Self {
            dir: dir.to_path_buf(),
            path,
            suffix,
            file,
            offset,
        })
    }

    pub fn suffix(&self) -> u32 {
        self.suffix
    }

    /// Bytes written so far.
    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append raw bytes, optionally forcing them to stable storage, and
    /// return the offset after the write.
    ///
    /// On a failed write or sync the file is cut back to its previous length
    /// so the offset stays truthful.
    pub fn append(&mut self, bytes: &[u8], sync: bool) -> Result<u64, FileStoreError> {
        let written = self.file.write_all(bytes).and_then(|()| {
            if sync {
                self.file.sync_data()
            } else {
                Ok(())
            }
        });
        if let Err(source) = written {
            self.cut_back();
            return Err(self.io_error(source));
        }
        self.offset += bytes.len() as u64;
        Ok(self.offset)
    }

    fn cut_back(&self) {
        if let Err(e) = self.file.set_len(self.offset) {
            tracing::warn!(
                "[blkstorage] Could not cut {} back to {} bytes after a failed append: {}",
                self.path.display(),
                self.offset,
                e
            );
        }
    }

    /// Cut the file to `len` bytes and sync.
    pub fn truncate(&mut self, len: u64) -> Result<(), FileStoreError> {
        self.file.set_len(len).map_err(|e| self.io_error(e))?;
        self.file.sync_all().map_err(|e| self.io_error(e))?;
        self.offset = len;
        Ok(())
    }

    /// Force everything written so far to stable storage.
    pub fn sync(&self) -> Result<(), FileStoreError> {
        self.file.sync_all().map_err(|e| self.io_error(e))
    }

    /// Sync and close this file, then open `suffix + 1`.
    pub fn roll(self) -> Result<Self, FileStoreError> {
        let dir = self.dir.clone();
        let next = self.suffix + 1;
        self.close()?;
        Self::open(&dir, next)
    }

    /// Sync and release the handle.
    pub fn close(self) -> Result<(), FileStoreError> {
        self.sync()
    }

    fn io_error(&self, source: std::io::Error) -> FileStoreError {
        FileStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
