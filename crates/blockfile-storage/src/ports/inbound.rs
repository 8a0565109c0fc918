//! # Inbound Ports (Driving Ports)
//!
//! The API the ledger uses to store and retrieve blocks.

use ledger_types::{Block, BlockchainInfo, Envelope};

use crate::domain::errors::StorageError;

/// Primary API of the blockfile storage engine.
///
/// Implementations take `&self` everywhere: a single writer is serialized
/// internally and readers never wait on block file I/O of the writer.
pub trait BlockStore {
    /// Ordered scan over committed blocks.
    type Iter<'a>: Iterator<Item = Result<Block, StorageError>>
    where
        Self: 'a;

    /// Append the next block of the chain.
    ///
    /// ## Durability
    ///
    /// When this returns `Ok`, the block, the checkpoint and the index
    /// entries are persisted per the configured flush scope and visible to
    /// every reader.
    ///
    /// ## Errors
    ///
    /// - `OutOfOrder`: `block.number` is not the height plus one
    /// - `Io` / `Index`: persistence failed; the append was rolled back
    /// - `WriterPoisoned`: an earlier rollback failed
    fn append(&self, block: &Block) -> Result<(), StorageError>;

    /// ## Errors
    ///
    /// - `BlockNotFound`: no committed block with this number
    fn block_by_number(&self, number: u64) -> Result<Block, StorageError>;

    /// ## Errors
    ///
    /// - `HashNotFound`: no committed block with this hash
    /// - `AttributeNotIndexed`: block hashes are not indexed
    fn block_by_hash(&self, hash: &[u8]) -> Result<Block, StorageError>;

    /// Envelope of a transaction by id.
    ///
    /// ## Errors
    ///
    /// - `TxNotFound`: the id was never committed
    /// - `AttributeNotIndexed`: transaction ids are not indexed
    fn tx_by_id(&self, tx_id: &str) -> Result<Envelope, StorageError>;

    /// Block containing a transaction.
    fn block_by_tx_id(&self, tx_id: &str) -> Result<Block, StorageError>;

    /// Envelope at position `tx_number` (0-based) of block `block_number`.
    fn tx_by_block_and_tx_number(
        &self,
        block_number: u64,
        tx_number: u64,
    ) -> Result<Envelope, StorageError>;

    /// Blocks from `max(start, 1)` to the height observed now.
    fn iter_from(&self, start: u64) -> Result<Self::Iter<'_>, StorageError>;

    /// Height and head hashes.
    fn info(&self) -> BlockchainInfo;

    /// Number of the last committed block, `0` when empty.
    fn height(&self) -> u64 {
        self.info().height
    }
}
