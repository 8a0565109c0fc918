//! # Outbound Ports (Driven Ports)
//!
//! Dependencies the blockfile manager is built over. The blockfiles
//! themselves are not behind a port: their layout is the product.

use ledger_types::Block;

use crate::domain::errors::{CodecError, KVStoreError};

/// Result of a prefix scan: `(key, value)` pairs in unspecified order.
pub type ScanResult = Vec<(Vec<u8>, Vec<u8>)>;

/// Abstract interface for the key-value store holding the index.
///
/// Production: `FileBackedKVStore` (append-only journal)
/// Testing: `InMemoryKVStore`
pub trait KeyValueStore: Send + Sync {
    /// Get a value by key.
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError>;

    /// Put a single key-value pair.
    fn put(&mut self, key: &[u8], value: &[u8]) -> Result<(), KVStoreError> {
        self.atomic_batch_write(vec![BatchOperation::put(key, value)])
    }

    /// Delete a key.
    fn delete(&mut self, key: &[u8]) -> Result<(), KVStoreError> {
        self.atomic_batch_write(vec![BatchOperation::delete(key)])
    }

    /// Execute an atomic batch write.
    ///
    /// Either ALL operations in the batch are applied and durable, or NONE
    /// are visible after a restart.
    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError>;

    /// Check if a key exists.
    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.get(key)?.is_some())
    }

    /// Iterate over keys with a prefix.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, KVStoreError>;
}

/// Batch operation for atomic writes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BatchOperation {
    /// Put a key-value pair.
    Put { key: Vec<u8>, value: Vec<u8> },
    /// Delete a key.
    Delete { key: Vec<u8> },
}

impl BatchOperation {
    /// Create a Put operation.
    pub fn put(key: impl Into<Vec<u8>>, value: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Put {
            key: key.into(),
            value: value.into(),
        }
    }

    /// Create a Delete operation.
    pub fn delete(key: impl Into<Vec<u8>>) -> Self {
        BatchOperation::Delete { key: key.into() }
    }

    pub fn key(&self) -> &[u8] {
        match self {
            BatchOperation::Put { key, .. } | BatchOperation::Delete { key } => key,
        }
    }
}

/// Abstract interface for block serialization.
///
/// Implementations must be deterministic and must reject trailing bytes,
/// so that `deserialize(serialize(b)) == b` and nothing else decodes.
pub trait BlockSerializer: Send + Sync {
    /// Serialize a block to bytes.
    fn serialize(&self, block: &Block) -> Result<Vec<u8>, CodecError>;

    /// Deserialize bytes to a block.
    fn deserialize(&self, data: &[u8]) -> Result<Block, CodecError>;
}
