//! # Block Index
//!
//! In-memory view of the committed index:
//!
//! - number -> `{hash, location}`, dense and sorted by number
//! - hash -> number (when `BlockHash` is indexed)
//! - tx id -> `TxLocation` (when `TxId` is indexed)
//!
//! The persisted form lives in the index journal; the service loads it into
//! this structure at open and keeps both in step.

use std::collections::HashMap;

use ledger_types::{short_hex, Hash, TxId};

use crate::domain::entities::{BlockIndexEntry, IndexedBlock, Location, TxLocation};
use crate::domain::errors::StorageError;
use crate::domain::value_objects::IndexedAttribute;

/// What [`BlockIndex::record_block`] did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RecordOutcome {
    /// Same number at the same location was already indexed.
    Unchanged,
    /// New number.
    Inserted,
    /// Same number at a different location; the old entry was replaced.
    Overwritten,
}

/// Entries dropped by [`BlockIndex::remove_above`].
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RemovedEntries {
    pub blocks: Vec<BlockIndexEntry>,
    pub tx_ids: Vec<TxId>,
}

impl RemovedEntries {
    pub fn is_empty(&self) -> bool {
        self.blocks.is_empty() && self.tx_ids.is_empty()
    }
}

#[derive(Debug, Clone, Default)]
pub struct BlockIndex {
    attributes: Vec<IndexedAttribute>,
    /// Sorted by number.
    entries: Vec<BlockIndexEntry>,
    by_hash: HashMap<Hash, u64>,
    by_tx: HashMap<TxId, TxLocation>,
}

impl BlockIndex {
    /// Create an empty index maintaining `attributes`.
    pub fn new(attributes: &[IndexedAttribute]) -> Self {
        Self {
            attributes: attributes.to_vec(),
            ..Self::default()
        }
    }

    /// Rebuild from persisted parts.
    ///
    /// Hash and transaction entries that disagree with the number entries
    /// (left behind by an overwrite) are dropped.
    pub fn from_parts(
        attributes: &[IndexedAttribute],
        mut entries: Vec<BlockIndexEntry>,
        by_hash: HashMap<Hash, u64>,
        by_tx: HashMap<TxId, TxLocation>,
    ) -> Self {
        entries.sort_by_key(|e| e.number);
        entries.dedup_by_key(|e| e.number);
        let mut index = Self::new(attributes);
        index.entries = entries;

        if index.is_indexed(IndexedAttribute::BlockHash) {
            let by_hash = by_hash
                .into_iter()
                .filter(|(hash, number)| index.entry(*number).is_some_and(|e| &e.hash == hash))
                .collect();
            index.by_hash = by_hash;
        }
        if index.is_indexed(IndexedAttribute::TxId) {
            let by_tx = by_tx
                .into_iter()
                .filter(|(_, loc)| index.location_of(loc.block_number) == Some(loc.block))
                .collect();
            index.by_tx = by_tx;
        }
        index
    }

    pub fn is_indexed(&self, attribute: IndexedAttribute) -> bool {
        self.attributes.contains(&attribute)
    }

    pub fn attributes(&self) -> &[IndexedAttribute] {
        &self.attributes
    }

    /// Add one block.
    ///
    /// Recording the same block at the same location twice is a no-op. A
    /// transaction id seen before keeps only its latest location.
    pub fn record_block(&mut self, block: &IndexedBlock) -> RecordOutcome {
        let outcome = match self
            .entries
            .binary_search_by_key(&block.number, |e| e.number)
        {
            Ok(pos) if self.entries[pos].location == block.location => {
                return RecordOutcome::Unchanged;
            }
            Ok(pos) => {
                let old = std::mem::replace(&mut self.entries[pos], block.entry());
                if self.by_hash.get(&old.hash) == Some(&old.number) {
                    self.by_hash.remove(&old.hash);
                }
                self.by_tx.retain(|_, loc| loc.block_number != old.number);
                RecordOutcome::Overwritten
            }
            Err(pos) => {
                self.entries.insert(pos, block.entry());
                RecordOutcome::Inserted
            }
        };

        if self.is_indexed(IndexedAttribute::BlockHash) {
            self.by_hash.insert(block.hash.clone(), block.number);
        }
        if self.is_indexed(IndexedAttribute::TxId) {
            for (tx_id, location) in block.tx_locations() {
                if let Some(previous) = self.by_tx.insert(tx_id.to_owned(), location) {
                    tracing::warn!(
                        "[blkstorage] Duplicate transaction id {} (block {} tx {}, was block {} tx {})",
                        tx_id,
                        location.block_number,
                        location.tx_number,
                        previous.block_number,
                        previous.tx_number
                    );
                }
            }
        }

        outcome
    }

    /// Location of block `number`.
    pub fn location_of(&self, number: u64) -> Option<Location> {
        self.entry(number).map(|e| e.location)
    }

    pub fn entry(&self, number: u64) -> Option<&BlockIndexEntry> {
        self.entries
            .binary_search_by_key(&number, |e| e.number)
            .ok()
            .map(|pos| &self.entries[pos])
    }

    /// Number of the block with `hash`.
    pub fn number_of_hash(&self, hash: &[u8]) -> Result<Option<u64>, StorageError> {
        self.require(IndexedAttribute::BlockHash)?;
        Ok(self.by_hash.get(hash).copied())
    }

    /// Location of transaction `tx_id`.
    pub fn location_of_tx(&self, tx_id: &str) -> Result<Option<TxLocation>, StorageError> {
        self.require(IndexedAttribute::TxId)?;
        Ok(self.by_tx.get(tx_id).copied())
    }

    /// Highest indexed number, `0` when empty.
    pub fn last_indexed(&self) -> u64 {
        self.entries.last().map_or(0, |e| e.number)
    }

    pub fn last_entry(&self) -> Option<&BlockIndexEntry> {
        self.entries.last()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn tx_count(&self) -> usize {
        self.by_tx.len()
    }

    /// Drop every entry for blocks numbered above `number`.
    pub fn remove_above(&mut self, number: u64) -> RemovedEntries {
        let keep = self.entries.partition_point(|e| e.number <= number);
        let blocks = self.entries.split_off(keep);
        for entry in &blocks {
            if self.by_hash.get(&entry.hash) == Some(&entry.number) {
                self.by_hash.remove(&entry.hash);
            }
        }

        let mut tx_ids = Vec::new();
        self.by_tx.retain(|tx_id, loc| {
            let stale = loc.block_number > number;
            if stale {
                tx_ids.push(tx_id.clone());
            }
            !stale
        });
        tx_ids.sort();

        if !blocks.is_empty() {
            tracing::debug!(
                "[blkstorage] Dropped {} index entries above block {} (first hash {})",
                blocks.len(),
                number,
                short_hex(&blocks[0].hash)
            );
        }
        RemovedEntries { blocks, tx_ids }
    }

    fn require(&self, attribute: IndexedAttribute) -> Result<(), StorageError> {
        if self.is_indexed(attribute) {
            Ok(())
        } else {
            Err(StorageError::AttributeNotIndexed { attribute })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn indexed(number: u64, offset: u64, tx_ids: &[&str]) -> IndexedBlock {
        IndexedBlock {
            number,
            hash: vec![number as u8; 32],
            location: Location::new(0, offset, 10),
            tx_ids: tx_ids.iter().map(|s| s.to_string()).collect(),
        }
    }

    fn full_index() -> BlockIndex {
        BlockIndex::new(&IndexedAttribute::ALL)
    }

    #[test]
    fn test_record_and_lookup() {
        let mut index = full_index();
        assert_eq!(index.last_indexed(), 0);
        assert_eq!(index.record_block(&indexed(1, 1, &["a", "b"])), RecordOutcome::Inserted);
        assert_eq!(index.record_block(&indexed(2, 12, &["c"])), RecordOutcome::Inserted);

        assert_eq!(index.location_of(2), Some(Location::new(0, 12, 10)));
        assert_eq!(index.location_of(3), None);
        assert_eq!(index.number_of_hash(&[1u8; 32]).unwrap(), Some(1));

        let tx = index.location_of_tx("b").unwrap().unwrap();
        assert_eq!((tx.block_number, tx.tx_number), (1, 1));
        assert_eq!(index.last_indexed(), 2);
        assert_eq!(index.tx_count(), 3);
    }

    #[test]
    fn test_record_is_idempotent() {
        let mut index = full_index();
        let block = indexed(1, 1, &["a"]);
        index.record_block(&block);
        assert_eq!(index.record_block(&block), RecordOutcome::Unchanged);
        assert_eq!(index.len(), 1);
        assert_eq!(index.tx_count(), 1);
    }

    #[test]
    fn test_record_overwrites_different_location() {
        let mut index = full_index();
        index.record_block(&indexed(1, 1, &["a"]));

        let mut moved = indexed(1, 99, &["z"]);
        moved.hash = vec![0xEE; 32];
        assert_eq!(index.record_block(&moved), RecordOutcome::Overwritten);

        assert_eq!(index.location_of(1).unwrap().offset, 99);
        assert_eq!(index.number_of_hash(&[1u8; 32]).unwrap(), None);
        assert_eq!(index.number_of_hash(&[0xEE; 32]).unwrap(), Some(1));
        assert!(index.location_of_tx("a").unwrap().is_none());
        assert!(index.location_of_tx("z").unwrap().is_some());
    }

    #[test]
    fn test_duplicate_tx_id_keeps_latest() {
        let mut index = full_index();
        index.record_block(&indexed(1, 1, &["dup"]));
        index.record_block(&indexed(2, 12, &["x", "dup"]));

        let tx = index.location_of_tx("dup").unwrap().unwrap();
        assert_eq!((tx.block_number, tx.tx_number), (2, 1));
    }

    #[test]
    fn test_disabled_attributes() {
        let mut index = BlockIndex::new(&[]);
        index.record_block(&indexed(1, 1, &["a"]));

        assert!(index.location_of(1).is_some());
        assert!(matches!(
            index.number_of_hash(&[1u8; 32]),
            Err(StorageError::AttributeNotIndexed {
                attribute: IndexedAttribute::BlockHash
            })
        ));
        assert!(matches!(
            index.location_of_tx("a"),
            Err(StorageError::AttributeNotIndexed {
                attribute: IndexedAttribute::TxId
            })
        ));
    }

    #[test]
    fn test_remove_above() {
        let mut index = full_index();
        for n in 1..=5 {
            index.record_block(&indexed(n, n * 11, &[&format!("tx{n}")]));
        }

        let removed = index.remove_above(3);
        assert_eq!(
            removed.blocks.iter().map(|e| e.number).collect::<Vec<_>>(),
            vec![4, 5]
        );
        assert_eq!(removed.tx_ids, vec!["tx4".to_string(), "tx5".to_string()]);
        assert_eq!(index.last_indexed(), 3);
        assert_eq!(index.number_of_hash(&[5u8; 32]).unwrap(), None);
        assert!(index.location_of_tx("tx4").unwrap().is_none());

        assert!(index.remove_above(3).is_empty());
    }

    #[test]
    fn test_from_parts_sorts_entries() {
        let entries = vec![indexed(2, 12, &[]).entry(), indexed(1, 1, &[]).entry()];
        let mut by_hash = HashMap::new();
        by_hash.insert(vec![1u8; 32], 1);
        by_hash.insert(vec![0xEE; 32], 2);
        let index = BlockIndex::from_parts(&IndexedAttribute::ALL, entries, by_hash, HashMap::new());

        assert_eq!(index.last_indexed(), 2);
        assert_eq!(index.entry(1).unwrap().location.offset, 1);
        assert_eq!(index.number_of_hash(&[1u8; 32]).unwrap(), Some(1));
        assert_eq!(index.number_of_hash(&[0xEE; 32]).unwrap(), None, "stale hash entry");
    }
}
