//! # Value Objects
//!
//! Configuration and key layout for the blockfile storage engine.

use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::domain::errors::StorageError;

/// Default per-file capacity (64 MiB).
pub const DEFAULT_MAX_FILE_SIZE: u64 = 64 * 1024 * 1024;

/// Directory under `root_dir` holding one subdirectory per ledger.
pub const CHAINS_DIR: &str = "chains";

/// Options record accepted at construction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Root directory; each ledger lives in `root_dir/chains/<ledger_id>`.
    pub root_dir: PathBuf,

    /// Maximum blockfile size in bytes. `0` means unbounded.
    pub max_file_size: u64,

    /// What an append forces to stable storage before returning.
    pub flush_scope: FlushScope,

    /// Optional attributes maintained by the index.
    ///
    /// Block number is always indexed; the iterator depends on it.
    pub indexed_attributes: Vec<IndexedAttribute>,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            root_dir: PathBuf::from("ledgersData"),
            max_file_size: DEFAULT_MAX_FILE_SIZE,
            flush_scope: FlushScope::Full,
            indexed_attributes: IndexedAttribute::ALL.to_vec(),
        }
    }
}

impl StorageConfig {
    /// Create a configuration rooted at `root_dir` with default values.
    pub fn new(root_dir: impl Into<PathBuf>) -> Self {
        Self {
            root_dir: root_dir.into(),
            ..Self::default()
        }
    }

    /// Parse a JSON options record. Missing fields take their defaults.
    pub fn from_json(json: &str) -> Result<Self, StorageError> {
        serde_json::from_str(json).map_err(|e| StorageError::Config(e.to_string()))
    }

    /// Set the per-file capacity (`0` disables rolling).
    pub fn with_max_file_size(mut self, size: u64) -> Self {
        self.max_file_size = size;
        self
    }

    /// Set the flush scope.
    pub fn with_flush_scope(mut self, scope: FlushScope) -> Self {
        self.flush_scope = scope;
        self
    }

    /// Set which optional attributes are indexed.
    pub fn with_indexed_attributes(mut self, attributes: &[IndexedAttribute]) -> Self {
        let mut attributes = attributes.to_vec();
        attributes.sort();
        attributes.dedup();
        self.indexed_attributes = attributes;
        self
    }

    /// Whether `attribute` is maintained by the index.
    pub fn is_indexed(&self, attribute: IndexedAttribute) -> bool {
        self.indexed_attributes.contains(&attribute)
    }

    /// Whether a record of `record_len` bytes must go to a fresh file.
    ///
    /// An empty file always accepts the record, so a single oversized block
    /// is stored alone instead of rolling forever.
    pub fn should_roll(&self, current_offset: u64, record_len: u64) -> bool {
        self.max_file_size > 0
            && current_offset > 0
            && current_offset + record_len > self.max_file_size
    }

    /// Directory of one ledger.
    pub fn ledger_dir(&self, ledger_id: &str) -> Result<PathBuf, StorageError> {
        validate_ledger_id(ledger_id)?;
        Ok(self.root_dir.join(CHAINS_DIR).join(ledger_id))
    }

    /// The root directory.
    pub fn root_dir(&self) -> &Path {
        &self.root_dir
    }
}

fn validate_ledger_id(ledger_id: &str) -> Result<(), StorageError> {
    let valid = !ledger_id.is_empty()
        && ledger_id != "."
        && ledger_id != ".."
        && ledger_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.'));
    if valid {
        Ok(())
    } else {
        Err(StorageError::Config(format!(
            "invalid ledger id {ledger_id:?}"
        )))
    }
}

/// Which writes an append forces to stable storage.
///
/// The checkpoint slot is always written synchronously.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlushScope {
    /// fsync the blockfile before persisting the checkpoint.
    #[default]
    Full,
    /// Only the checkpoint is synced; the blockfile is left to the OS.
    ///
    /// After power loss the checkpoint may point past the durable tail;
    /// recovery rescans the active file and shortens the log.
    CheckpointOnly,
}

impl FlushScope {
    /// Whether blockfile appends are synced.
    pub fn syncs_blockfile(self) -> bool {
        matches!(self, FlushScope::Full)
    }
}

/// Optional index attributes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IndexedAttribute {
    /// Block hash -> block number.
    BlockHash,
    /// Transaction id -> transaction location.
    TxId,
}

impl IndexedAttribute {
    pub const ALL: [IndexedAttribute; 2] = [IndexedAttribute::BlockHash, IndexedAttribute::TxId];

    fn tag(self) -> u8 {
        match self {
            IndexedAttribute::BlockHash => 1,
            IndexedAttribute::TxId => 2,
        }
    }

    /// Stable byte encoding of an attribute set, stored with the index.
    pub fn encode_set(attributes: &[IndexedAttribute]) -> Vec<u8> {
        let mut tags: Vec<u8> = attributes.iter().map(|a| a.tag()).collect();
        tags.sort_unstable();
        tags.dedup();
        tags
    }
}

impl fmt::Display for IndexedAttribute {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            IndexedAttribute::BlockHash => write!(f, "block hash"),
            IndexedAttribute::TxId => write!(f, "transaction id"),
        }
    }
}

/// Key prefixes for the index journal.
#[derive(Debug, Clone, Copy)]
pub enum KeyPrefix {
    /// `n:{number_be}` -> BlockIndexEntry
    BlockByNumber,
    /// `h:{hash}` -> number_be
    BlockByHash,
    /// `t:{tx_id}` -> TxLocation
    Transaction,
    /// `m:{name}` -> index metadata
    Meta,
}

impl KeyPrefix {
    /// Get the byte prefix for this key type.
    pub fn as_bytes(&self) -> &'static [u8] {
        match self {
            KeyPrefix::BlockByNumber => b"n:",
            KeyPrefix::BlockByHash => b"h:",
            KeyPrefix::Transaction => b"t:",
            KeyPrefix::Meta => b"m:",
        }
    }

    /// Build a full key with the given suffix.
    pub fn key(&self, suffix: &[u8]) -> Vec<u8> {
        let mut key = self.as_bytes().to_vec();
        key.extend_from_slice(suffix);
        key
    }

    pub fn number_key(number: u64) -> Vec<u8> {
        KeyPrefix::BlockByNumber.key(&number.to_be_bytes())
    }

    pub fn hash_key(hash: &[u8]) -> Vec<u8> {
        KeyPrefix::BlockByHash.key(hash)
    }

    pub fn tx_key(tx_id: &str) -> Vec<u8> {
        KeyPrefix::Transaction.key(tx_id.as_bytes())
    }

    /// Highest block number whose index entries are persisted.
    pub fn last_indexed_key() -> Vec<u8> {
        KeyPrefix::Meta.key(b"last_indexed")
    }

    /// Attribute set the persisted index was built with.
    pub fn attributes_key() -> Vec<u8> {
        KeyPrefix::Meta.key(b"attributes")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_should_roll() {
        let config = StorageConfig::default().with_max_file_size(100);
        assert!(!config.should_roll(0, 500), "empty file takes any record");
        assert!(!config.should_roll(40, 60));
        assert!(config.should_roll(41, 60));

        let unbounded = StorageConfig::default().with_max_file_size(0);
        assert!(!unbounded.should_roll(u64::MAX / 2, 1 << 40));
    }

    #[test]
    fn test_ledger_dir_layout() {
        let config = StorageConfig::new("/var/ledger");
        let dir = config.ledger_dir("ch1").unwrap();
        assert_eq!(dir, PathBuf::from("/var/ledger/chains/ch1"));

        assert!(config.ledger_dir("").is_err());
        assert!(config.ledger_dir("..").is_err());
        assert!(config.ledger_dir("a/b").is_err());
    }

    #[test]
    fn test_from_json_fills_defaults() {
        let config =
            StorageConfig::from_json(r#"{"root_dir": "/tmp/x", "flush_scope": "checkpoint_only"}"#)
                .unwrap();
        assert_eq!(config.root_dir, PathBuf::from("/tmp/x"));
        assert_eq!(config.flush_scope, FlushScope::CheckpointOnly);
        assert_eq!(config.max_file_size, DEFAULT_MAX_FILE_SIZE);
        assert!(config.is_indexed(IndexedAttribute::TxId));

        let err = StorageConfig::from_json(r#"{"max_file_size": "big"}"#).unwrap_err();
        assert!(matches!(err, StorageError::Config(_)));
    }

    #[test]
    fn test_indexed_attributes() {
        let config = StorageConfig::default().with_indexed_attributes(&[
            IndexedAttribute::TxId,
            IndexedAttribute::TxId,
        ]);
        assert_eq!(config.indexed_attributes, vec![IndexedAttribute::TxId]);
        assert!(!config.is_indexed(IndexedAttribute::BlockHash));
        assert_eq!(
            IndexedAttribute::encode_set(&[IndexedAttribute::TxId, IndexedAttribute::BlockHash]),
            vec![1, 2]
        );
    }

    #[test]
    fn test_key_prefixes() {
        assert_eq!(KeyPrefix::number_key(1), b"n:\0\0\0\0\0\0\0\x01".to_vec());
        assert_eq!(KeyPrefix::tx_key("abc"), b"t:abc".to_vec());
        assert!(KeyPrefix::last_indexed_key().starts_with(b"m:"));
    }
}
