//! # Storage Entities
//!
//! Pointers into the log and the entries the index keeps for them.

use ledger_types::{Block, Hash, TxId};
use serde::{Deserialize, Serialize};

/// Pointer to a serialized block inside a blockfile.
///
/// `offset` is the first payload byte (after the varint length prefix) and
/// `length` the payload length, so `read_at(offset, length)` yields exactly
/// the codec bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Location {
    pub file_suffix: u32,
    pub offset: u64,
    pub length: u64,
}

impl Location {
    pub fn new(file_suffix: u32, offset: u64, length: u64) -> Self {
        Self {
            file_suffix,
            offset,
            length,
        }
    }

    /// First byte after the record.
    pub fn end(&self) -> u64 {
        self.offset + self.length
    }
}

/// Where a transaction lives: its block and its position inside it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxLocation {
    pub block_number: u64,
    pub tx_number: u64,
    pub block: Location,
}

/// A single entry in the number index.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockIndexEntry {
    /// Block number.
    pub number: u64,
    /// Block hash, also used for chain info.
    pub hash: Hash,
    /// Where the block is stored.
    pub location: Location,
}

/// Everything the index needs to know about one stored block.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexedBlock {
    pub number: u64,
    pub hash: Hash,
    pub location: Location,
    pub tx_ids: Vec<TxId>,
}

impl IndexedBlock {
    pub fn from_block(block: &Block, location: Location) -> Self {
        Self {
            number: block.number,
            hash: block.hash.clone(),
            location,
            tx_ids: block.tx_ids().map(str::to_owned).collect(),
        }
    }

    pub fn entry(&self) -> BlockIndexEntry {
        BlockIndexEntry {
            number: self.number,
            hash: self.hash.clone(),
            location: self.location,
        }
    }

    /// Transaction locations in envelope order.
    pub fn tx_locations(&self) -> impl Iterator<Item = (&str, TxLocation)> + '_ {
        self.tx_ids.iter().enumerate().map(move |(i, id)| {
            (
                id.as_str(),
                TxLocation {
                    block_number: self.number,
                    tx_number: i as u64,
                    block: self.location,
                },
            )
        })
    }
}
