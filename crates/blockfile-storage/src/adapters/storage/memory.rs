use std::collections::BTreeMap;

use crate::domain::errors::KVStoreError;
use crate::ports::outbound::{BatchOperation, KeyValueStore, ScanResult};

/// Index store that lives only as long as the manager.
///
/// Reopening a ledger over a fresh instance forces recovery to replay every
/// blockfile into the index.
#[derive(Debug, Default)]
pub struct InMemoryKVStore {
    entries: BTreeMap<Vec<u8>, Vec<u8>>,
    batches: usize,
}

impl InMemoryKVStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches applied since creation.
    pub fn batch_count(&self) -> usize {
        self.batches
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl KeyValueStore for InMemoryKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.entries.get(key).cloned())
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        for operation in operations {
            match operation {
                BatchOperation::Put { key, value } => {
                    self.entries.insert(key, value);
                }
                BatchOperation::Delete { key } => {
                    self.entries.remove(&key);
                }
            }
        }
        self.batches += 1;
        Ok(())
    }

    /// Keys come back in ascending order.
    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, KVStoreError> {
        Ok(self
            .entries
            .range(prefix.to_vec()..)
            .take_while(|(key, _)| key.starts_with(prefix))
            .map(|(key, value)| (key.clone(), value.clone()))
            .collect())
    }
}
