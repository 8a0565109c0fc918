//! # Blockfile Manager - Index Persistence Helpers
//!
//! Key layout and (de)serialization of the index journal entries, shared by
//! the append path and recovery.

use std::collections::HashMap;

use ledger_types::{Hash, TxId};

use crate::domain::entities::{BlockIndexEntry, IndexedBlock, TxLocation};
use crate::domain::errors::{KVStoreError, StorageError};
use crate::domain::index::{BlockIndex, RemovedEntries};
use crate::domain::value_objects::{IndexedAttribute, KeyPrefix, StorageConfig};
use crate::ports::outbound::{BatchOperation, KeyValueStore};

/// Index loaded from the journal at open.
pub(crate) struct LoadedIndex {
    pub(crate) index: BlockIndex,
    /// Persisted entries were discarded and must be replayed.
    pub(crate) rebuilt: bool,
}

/// Operations persisting one block's entries plus the last-indexed mark.
///
/// `displaced` is the entry previously stored under the same number.
pub(crate) fn index_batch(
    index: &BlockIndex,
    block: &IndexedBlock,
    displaced: Option<&BlockIndexEntry>,
    last_indexed: u64,
) -> Result<Vec<BatchOperation>, StorageError> {
    let mut operations = Vec::with_capacity(3 + block.tx_ids.len());
    operations.push(BatchOperation::put(
        KeyPrefix::number_key(block.number),
        encode_value(&block.entry())?,
    ));

    if index.is_indexed(IndexedAttribute::BlockHash) {
        if let Some(old) = displaced.filter(|old| old.hash != block.hash) {
            operations.push(BatchOperation::delete(KeyPrefix::hash_key(&old.hash)));
        }
        operations.push(BatchOperation::put(
            KeyPrefix::hash_key(&block.hash),
            block.number.to_be_bytes().to_vec(),
        ));
    }
    if index.is_indexed(IndexedAttribute::TxId) {
        for (tx_id, location) in block.tx_locations() {
            operations.push(BatchOperation::put(
                KeyPrefix::tx_key(tx_id),
                encode_value(&location)?,
            ));
        }
    }

    operations.push(last_indexed_op(last_indexed));
    Ok(operations)
}

/// Operations deleting entries dropped from the in-memory index.
pub(crate) fn removal_batch(removed: &RemovedEntries, last_indexed: u64) -> Vec<BatchOperation> {
    let mut operations: Vec<BatchOperation> = removed
        .blocks
        .iter()
        .flat_map(|entry| {
            [
                BatchOperation::delete(KeyPrefix::number_key(entry.number)),
                BatchOperation::delete(KeyPrefix::hash_key(&entry.hash)),
            ]
        })
        .collect();
    operations.extend(
        removed
            .tx_ids
            .iter()
            .map(|tx_id| BatchOperation::delete(KeyPrefix::tx_key(tx_id))),
    );
    operations.push(last_indexed_op(last_indexed));
    operations
}

fn last_indexed_op(number: u64) -> BatchOperation {
    BatchOperation::put(KeyPrefix::last_indexed_key(), number.to_be_bytes().to_vec())
}

/// Load the persisted index.
///
/// The journal is wiped when it was built for another attribute set or its
/// last-indexed mark disagrees with the stored entries; recovery then replays
/// the blockfiles into the empty index.
pub(crate) fn load_index<KV: KeyValueStore>(
    kv: &mut KV,
    config: &StorageConfig,
) -> Result<LoadedIndex, StorageError> {
    let configured = IndexedAttribute::encode_set(&config.indexed_attributes);
    let stored = kv.get(&KeyPrefix::attributes_key())?;

    match stored {
        None => {
            // Fresh journal, or one from before any append.
            wipe_index(kv, &configured)?;
            return Ok(LoadedIndex {
                index: BlockIndex::new(&config.indexed_attributes),
                rebuilt: false,
            });
        }
        Some(stored) if stored != configured => {
            tracing::warn!(
                "[blkstorage] Indexed attributes changed ({:?}): rebuilding index",
                config.indexed_attributes
            );
            return rebuild(kv, config, &configured);
        }
        Some(_) => {}
    }

    let entries = kv
        .prefix_scan(KeyPrefix::BlockByNumber.as_bytes())?
        .into_iter()
        .map(|(_, value)| decode_value::<BlockIndexEntry>(&value))
        .collect::<Result<Vec<_>, _>>()?;

    let mark = match kv.get(&KeyPrefix::last_indexed_key())? {
        Some(bytes) => decode_u64(&bytes)?,
        None => 0,
    };
    let highest = entries.iter().map(|e| e.number).max().unwrap_or(0);
    if mark != highest || entries.len() as u64 != highest {
        tracing::warn!(
            "[blkstorage] Index journal inconsistent (mark {}, {} entries, highest {}): rebuilding index",
            mark,
            entries.len(),
            highest
        );
        return rebuild(kv, config, &configured);
    }

    let mut by_hash: HashMap<Hash, u64> = HashMap::new();
    if config.is_indexed(IndexedAttribute::BlockHash) {
        for (key, value) in kv.prefix_scan(KeyPrefix::BlockByHash.as_bytes())? {
            let hash = key[KeyPrefix::BlockByHash.as_bytes().len()..].to_vec();
            by_hash.insert(hash, decode_u64(&value)?);
        }
    }

    let mut by_tx: HashMap<TxId, TxLocation> = HashMap::new();
    if config.is_indexed(IndexedAttribute::TxId) {
        for (key, value) in kv.prefix_scan(KeyPrefix::Transaction.as_bytes())? {
            let tx_id = String::from_utf8(key[KeyPrefix::Transaction.as_bytes().len()..].to_vec())
                .map_err(|e| corruption(format!("transaction key is not UTF-8: {e}")))?;
            by_tx.insert(tx_id, decode_value(&value)?);
        }
    }

    let index = BlockIndex::from_parts(&config.indexed_attributes, entries, by_hash, by_tx);
    tracing::debug!(
        "[blkstorage] Loaded index: {} blocks, {} transactions",
        index.len(),
        index.tx_count()
    );
    Ok(LoadedIndex {
        index,
        rebuilt: false,
    })
}

fn rebuild<KV: KeyValueStore>(
    kv: &mut KV,
    config: &StorageConfig,
    configured: &[u8],
) -> Result<LoadedIndex, StorageError> {
    wipe_index(kv, configured)?;
    Ok(LoadedIndex {
        index: BlockIndex::new(&config.indexed_attributes),
        rebuilt: true,
    })
}

/// Delete every index key and record the attribute set, in one batch.
fn wipe_index<KV: KeyValueStore>(kv: &mut KV, attributes: &[u8]) -> Result<(), StorageError> {
    let mut operations = Vec::new();
    for prefix in [
        KeyPrefix::BlockByNumber,
        KeyPrefix::BlockByHash,
        KeyPrefix::Transaction,
        KeyPrefix::Meta,
    ] {
        operations.extend(
            kv.prefix_scan(prefix.as_bytes())?
                .into_iter()
                .map(|(key, _)| BatchOperation::delete(key)),
        );
    }
    operations.push(BatchOperation::put(
        KeyPrefix::attributes_key(),
        attributes.to_vec(),
    ));
    kv.atomic_batch_write(operations)?;
    Ok(())
}

fn encode_value<T: serde::Serialize>(value: &T) -> Result<Vec<u8>, StorageError> {
    bincode::serialize(value).map_err(|e| StorageError::Serialization {
        message: format!("Failed to serialize index entry: {e}"),
    })
}

fn decode_value<T: serde::de::DeserializeOwned>(bytes: &[u8]) -> Result<T, StorageError> {
    bincode::deserialize(bytes)
        .map_err(|e| corruption(format!("Failed to deserialize index entry: {e}")))
}

fn decode_u64(bytes: &[u8]) -> Result<u64, StorageError> {
    let array: [u8; 8] = bytes
        .try_into()
        .map_err(|_| corruption(format!("expected 8-byte number, found {} bytes", bytes.len())))?;
    Ok(u64::from_be_bytes(array))
}

fn corruption(message: String) -> StorageError {
    StorageError::Index(KVStoreError::CorruptionError { message })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::storage::InMemoryKVStore;
    use crate::domain::entities::Location;

    fn indexed(number: u64) -> IndexedBlock {
        IndexedBlock {
            number,
            hash: vec![number as u8; 32],
            location: Location::new(0, number * 100, 90),
            tx_ids: vec![format!("tx-{number}")],
        }
    }

    fn persist(kv: &mut InMemoryKVStore, index: &mut BlockIndex, block: &IndexedBlock) {
        index.record_block(block);
        kv.atomic_batch_write(index_batch(index, block, None, index.last_indexed()).unwrap())
            .unwrap();
    }

    #[test]
    fn test_index_round_trips_through_journal() {
        let config = StorageConfig::default();
        let mut kv = InMemoryKVStore::new();
        let mut index = load_index(&mut kv, &config).unwrap().index;
        for n in 1..=3 {
            persist(&mut kv, &mut index, &indexed(n));
        }

        let loaded = load_index(&mut kv, &config).unwrap();
        assert!(!loaded.rebuilt);
        assert_eq!(loaded.index.last_indexed(), 3);
        assert_eq!(loaded.index.number_of_hash(&[2u8; 32]).unwrap(), Some(2));
        let tx = loaded.index.location_of_tx("tx-3").unwrap().unwrap();
        assert_eq!(tx.block, Location::new(0, 300, 90));
    }

    #[test]
    fn test_attribute_change_wipes_index() {
        let mut kv = InMemoryKVStore::new();
        let config = StorageConfig::default();
        let mut index = load_index(&mut kv, &config).unwrap().index;
        persist(&mut kv, &mut index, &indexed(1));

        let narrowed = StorageConfig::default().with_indexed_attributes(&[IndexedAttribute::BlockHash]);
        let loaded = load_index(&mut kv, &narrowed).unwrap();
        assert!(loaded.rebuilt);
        assert!(loaded.index.is_empty());
        assert!(kv.prefix_scan(b"n:").unwrap().is_empty());
        assert!(kv.prefix_scan(b"t:").unwrap().is_empty());
    }

    #[test]
    fn test_removal_batch_deletes_entries() {
        let config = StorageConfig::default();
        let mut kv = InMemoryKVStore::new();
        let mut index = load_index(&mut kv, &config).unwrap().index;
        for n in 1..=4 {
            persist(&mut kv, &mut index, &indexed(n));
        }

        let removed = index.remove_above(2);
        kv.atomic_batch_write(removal_batch(&removed, 2)).unwrap();

        let loaded = load_index(&mut kv, &config).unwrap();
        assert!(!loaded.rebuilt);
        assert_eq!(loaded.index.last_indexed(), 2);
        assert!(loaded.index.location_of_tx("tx-4").unwrap().is_none());
    }

    #[test]
    fn test_inconsistent_mark_forces_rebuild() {
        let config = StorageConfig::default();
        let mut kv = InMemoryKVStore::new();
        let mut index = load_index(&mut kv, &config).unwrap().index;
        persist(&mut kv, &mut index, &indexed(1));
        kv.put(&KeyPrefix::last_indexed_key(), &7u64.to_be_bytes())
            .unwrap();

        assert!(load_index(&mut kv, &config).unwrap().rebuilt);
    }
}
