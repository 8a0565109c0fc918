use std::fs::File;
use std::io::{Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::blockfile_path;
use crate::domain::entities::Location;
use crate::domain::errors::FileStoreError;

/// Random-access reader over the blockfiles of one ledger.
///
/// Holds at most one open file and switches handles when a read targets a
/// different suffix. Dropping the reader releases the handle.
#[derive(Debug)]
pub struct BlockfileReader {
    dir: PathBuf,
    open: Option<(u32, File)>,
}

impl BlockfileReader {
    pub fn new(dir: &Path) -> Self {
        Self {
            dir: dir.to_path_buf(),
            open: None,
        }
    }

    /// Read exactly `length` bytes at `offset` of blockfile `suffix`.
    ///
    /// Fails with `ShortRead` if the file ends first.
    pub fn read_at(
        &mut self,
        suffix: u32,
        offset: u64,
        length: u64,
    ) -> Result<Vec<u8>, FileStoreError> {
        let path = blockfile_path(&self.dir, suffix);
        let io_err = |source| FileStoreError::Io {
            path: path.clone(),
            source,
        };

        let file = self.file(suffix).map_err(io_err)?;
        let file_len = file.metadata().map_err(io_err)?.len();
        if offset.saturating_add(length) > file_len {
            return Err(FileStoreError::ShortRead {
                suffix,
                offset,
                wanted: length,
                available: file_len.saturating_sub(offset),
            });
        }

        let mut buf = vec![0u8; length as usize];
        file.seek(SeekFrom::Start(offset)).map_err(io_err)?;
        file.read_exact(&mut buf).map_err(io_err)?;
        Ok(buf)
    }

    /// Read the payload a location points at.
    pub fn read_location(&mut self, location: &Location) -> Result<Vec<u8>, FileStoreError> {
        self.read_at(location.file_suffix, location.offset, location.length)
    }

    /// Release the held file handle, if any.
    pub fn release(&mut self) {
        self.open = None;
    }

    /// Suffix of the currently held file.
    pub fn open_suffix(&self) -> Option<u32> {
        self.open.as_ref().map(|(suffix, _)| *suffix)
    }

    fn file(&mut self, suffix: u32) -> std::io::Result<&mut File> {
        if self.open_suffix() != Some(suffix) {
            self.open = None;
            let file = File::open(blockfile_path(&self.dir, suffix))?;
            self.open = Some((suffix, file));
        }
        match self.open.as_mut() {
            Some((_, file)) => Ok(file),
            None => Err(std::io::Error::other("blockfile handle missing")),
        }
    }
}
