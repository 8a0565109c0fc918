use std::fs::File;
use std::io::{BufReader, Read, Seek, SeekFrom};
use std::path::{Path, PathBuf};

use super::blockfile_path;
use crate::domain::codec::{decode_varint, MAX_VARINT_LEN};
use crate::domain::entities::Location;
use crate::domain::errors::{CodecError, FileStoreError};

/// One complete record read by a [`RecordScanner`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScannedRecord {
    pub file_suffix: u32,
    /// Offset of the length prefix.
    pub offset: u64,
    pub header_len: u64,
    pub payload: Vec<u8>,
}

impl ScannedRecord {
    /// Location of the payload.
    pub fn location(&self) -> Location {
        Location::new(
            self.file_suffix,
            self.offset + self.header_len,
            self.payload.len() as u64,
        )
    }

    /// Offset of the first byte after the record.
    pub fn end(&self) -> u64 {
        self.offset + self.header_len + self.payload.len() as u64
    }
}

/// Sequential reader of `varint(len) || payload` records in one blockfile.
///
/// Stops cleanly (`Ok(None)`) when the file ends on a record boundary and
/// fails with `ShortRead` or `MalformedHeader` when it ends inside one.
pub struct RecordScanner {
    suffix: u32,
    path: PathBuf,
    reader: BufReader<File>,
    position: u64,
    file_len: u64,
}

impl RecordScanner {
    /// Start scanning blockfile `suffix` at `start_offset`.
    pub fn open(dir: &Path, suffix: u32, start_offset: u64) -> Result<Self, FileStoreError> {
        let path = blockfile_path(dir, suffix);
        let io_err = |source| FileStoreError::Io {
            path: path.clone(),
            source,
        };

        let mut file = File::open(&path).map_err(io_err)?;
        let file_len = file.metadata().map_err(io_err)?.len();
        if start_offset > file_len {
            return Err(FileStoreError::ShortRead {
                suffix,
                offset: start_offset,
                wanted: 0,
                available: 0,
            });
        }
        file.seek(SeekFrom::Start(start_offset)).map_err(io_err)?;

        Ok(Self {
            suffix,
            reader: BufReader::new(file),
            path,
            position: start_offset,
            file_len,
        })
    }

    /// Offset of the next unread byte (always a record boundary).
    pub fn position(&self) -> u64 {
        self.position
    }

    /// Length of the file when the scan started.
    pub fn file_len(&self) -> u64 {
        self.file_len
    }

    /// Read the next record.
    pub fn next_record(&mut self) -> Result<Option<ScannedRecord>, FileStoreError> {
        let remaining = self.file_len - self.position;
        if remaining == 0 {
            return Ok(None);
        }

        let mut header = [0u8; MAX_VARINT_LEN];
        let peek_len = remaining.min(MAX_VARINT_LEN as u64) as usize;
        self.reader
            .read_exact(&mut header[..peek_len])
            .map_err(|e| self.io_error(e))?;

        let (payload_len, header_len) = match decode_varint(&header[..peek_len]) {
            Ok(decoded) => decoded,
            Err(CodecError::TruncatedLength) => {
                return Err(FileStoreError::ShortRead {
                    suffix: self.suffix,
                    offset: self.position,
                    wanted: peek_len as u64 + 1,
                    available: peek_len as u64,
                });
            }
            Err(source) => {
                return Err(FileStoreError::MalformedHeader {
                    suffix: self.suffix,
                    offset: self.position,
                    source,
                });
            }
        };

        // Give back the peeked bytes that belong to the payload.
        let unread = peek_len as i64 - header_len as i64;
        self.reader
            .seek_relative(-unread)
            .map_err(|e| self.io_error(e))?;

        let available = remaining - header_len as u64;
        if payload_len > available {
            return Err(FileStoreError::ShortRead {
                suffix: self.suffix,
                offset: self.position,
                wanted: payload_len,
                available,
            });
        }

        let mut payload = vec![0u8; payload_len as usize];
        self.reader
            .read_exact(&mut payload)
            .map_err(|e| self.io_error(e))?;

        let record = ScannedRecord {
            file_suffix: self.suffix,
            offset: self.position,
            header_len: header_len as u64,
            payload,
        };
        self.position = record.end();
        Ok(Some(record))
    }

    fn io_error(&self, source: std::io::Error) -> FileStoreError {
        FileStoreError::Io {
            path: self.path.clone(),
            source,
        }
    }
}
