//! # Domain Errors
//!
//! Error types for the blockfile storage engine.
//!
//! Callers only ever see [`StorageError`]. The lower-level [`CodecError`] and
//! [`FileStoreError`] describe torn or short records; recovery consumes them
//! while scanning the active file tail, and the read path converts them into
//! [`StorageError::UnrecoverableLedger`] because committed data must decode.

use std::io;
use std::path::PathBuf;

use ledger_types::{short_hex, Hash, TxId};
use thiserror::Error;

use crate::adapters::lock::LockError;
use crate::domain::value_objects::IndexedAttribute;

/// Errors surfaced by the storage engine.
#[derive(Debug, Error)]
pub enum StorageError {
    /// Disk or filesystem failure. Fatal, never retried.
    #[error("I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// Persisted checkpoint contradicts the files on disk.
    #[error("Corrupt checkpoint: {reason}")]
    CorruptCheckpoint { reason: String },

    /// Corruption outside the active file tail.
    #[error("Unrecoverable ledger: blockfile {suffix} at offset {offset}: {reason}")]
    UnrecoverableLedger {
        suffix: u32,
        offset: u64,
        reason: String,
    },

    /// No committed block with this number.
    #[error("Block not found: number {number}")]
    BlockNotFound { number: u64 },

    /// No committed block with this hash.
    #[error("Block not found: hash {}", short_hex(.hash))]
    HashNotFound { hash: Hash },

    /// No committed transaction with this id.
    #[error("Transaction not found: {tx_id}")]
    TxNotFound { tx_id: TxId },

    /// Block exists but has fewer transactions.
    #[error("Block {block_number} has no transaction at position {tx_number}")]
    TxNumberNotFound { block_number: u64, tx_number: u64 },

    /// Appended block does not extend the log contiguously.
    #[error("Out of order append: expected block {expected}, got {got}")]
    OutOfOrder { expected: u64, got: u64 },

    /// Lookup on an attribute the index is configured to skip.
    #[error("{attribute} is not maintained by the index")]
    AttributeNotIndexed { attribute: IndexedAttribute },

    /// Block could not be serialized.
    #[error("Serialization error: {message}")]
    Serialization { message: String },

    /// A previous append failed half-way and could not be rolled back.
    #[error("Writer poisoned by a failed append; reopen the ledger to recover")]
    WriterPoisoned,

    /// The ledger was closed.
    #[error("Ledger is closed")]
    Closed,

    /// Invalid options record.
    #[error("Invalid configuration: {0}")]
    Config(String),

    /// Index journal failure.
    #[error(transparent)]
    Index(#[from] KVStoreError),

    /// Another process holds the ledger directory.
    #[error(transparent)]
    Locked(#[from] LockError),
}

impl StorageError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: io::Error) -> Self {
        StorageError::Io {
            path: path.into(),
            source,
        }
    }

    /// Whether this is a normal "no such entry" outcome.
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            StorageError::BlockNotFound { .. }
                | StorageError::HashNotFound { .. }
                | StorageError::TxNotFound { .. }
                | StorageError::TxNumberNotFound { .. }
        )
    }
}

/// Record framing and block decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CodecError {
    /// Input ended inside the varint length prefix.
    #[error("Malformed record: truncated length prefix")]
    TruncatedLength,

    /// Length prefix longer than ten bytes.
    #[error("Malformed record: length prefix overflows u64")]
    LengthOverflow,

    /// Declared payload length differs from the bytes present.
    #[error("Malformed record: declared {declared} bytes, found {available}")]
    LengthMismatch { declared: u64, available: u64 },

    /// Payload bytes do not decode to a block.
    #[error("Malformed record: {message}")]
    Decode { message: String },

    /// Block could not be encoded.
    #[error("Block encoding failed: {message}")]
    Encode { message: String },
}

impl From<CodecError> for StorageError {
    fn from(err: CodecError) -> Self {
        StorageError::Serialization {
            message: err.to_string(),
        }
    }
}

/// Checkpoint slot decoding errors.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CheckpointSlotError {
    #[error("slot too short: {len} bytes")]
    TooShort { len: usize },

    #[error("slot checksum mismatch")]
    ChecksumMismatch,

    #[error("unsupported slot version {version}")]
    UnsupportedVersion { version: u8 },

    #[error("slot does not decode: {message}")]
    Decode { message: String },
}

/// Blockfile I/O errors.
#[derive(Debug, Error)]
pub enum FileStoreError {
    /// Fewer bytes on disk than requested.
    #[error("Short read in blockfile {suffix} at offset {offset}: wanted {wanted} bytes, {available} available")]
    ShortRead {
        suffix: u32,
        offset: u64,
        wanted: u64,
        available: u64,
    },

    /// Record length prefix is unreadable.
    #[error("Malformed record header in blockfile {suffix} at offset {offset}: {source}")]
    MalformedHeader {
        suffix: u32,
        offset: u64,
        #[source]
        source: CodecError,
    },

    /// Underlying filesystem failure.
    #[error("Blockfile I/O error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
}

impl FileStoreError {
    /// Errors that mark a torn tail rather than a disk failure.
    pub fn is_torn_record(&self) -> bool {
        matches!(
            self,
            FileStoreError::ShortRead { .. } | FileStoreError::MalformedHeader { .. }
        )
    }
}

impl From<FileStoreError> for StorageError {
    fn from(err: FileStoreError) -> Self {
        match err {
            FileStoreError::Io { path, source } => StorageError::Io { path, source },
            FileStoreError::ShortRead { suffix, offset, .. }
            | FileStoreError::MalformedHeader { suffix, offset, .. } => {
                StorageError::UnrecoverableLedger {
                    suffix,
                    offset,
                    reason: err.to_string(),
                }
            }
        }
    }
}

/// Key-value journal errors.
#[derive(Debug, Error)]
pub enum KVStoreError {
    /// I/O error during read/write.
    #[error("KV store I/O error: {message}")]
    IOError { message: String },
    /// Stored value does not decode.
    #[error("KV store corruption: {message}")]
    CorruptionError { message: String },
}

impl KVStoreError {
    pub(crate) fn io(err: io::Error) -> Self {
        KVStoreError::IOError {
            message: err.to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = StorageError::OutOfOrder {
            expected: 11,
            got: 13,
        };
        let msg = err.to_string();
        assert!(msg.contains("expected block 11"));
        assert!(msg.contains("got 13"));

        let err = StorageError::HashNotFound {
            hash: vec![0xAB, 0xCD, 0xEF, 0x01, 0x99],
        };
        assert!(err.to_string().contains("abcdef01"));
    }

    #[test]
    fn test_short_read_becomes_unrecoverable_on_read_path() {
        let fs_err = FileStoreError::ShortRead {
            suffix: 2,
            offset: 100,
            wanted: 50,
            available: 10,
        };
        assert!(fs_err.is_torn_record());

        match StorageError::from(fs_err) {
            StorageError::UnrecoverableLedger { suffix, offset, .. } => {
                assert_eq!(suffix, 2);
                assert_eq!(offset, 100);
            }
            other => panic!("Expected UnrecoverableLedger, got {other:?}"),
        }
    }

    #[test]
    fn test_not_found_classification() {
        assert!(StorageError::BlockNotFound { number: 3 }.is_not_found());
        assert!(StorageError::TxNotFound {
            tx_id: "x".to_string()
        }
        .is_not_found());
        assert!(!StorageError::Closed.is_not_found());
    }

    #[test]
    fn test_kv_error_conversion() {
        let kv_err = KVStoreError::IOError {
            message: "disk failure".to_string(),
        };
        let storage_err: StorageError = kv_err.into();
        assert!(storage_err.to_string().contains("disk failure"));
    }
}
