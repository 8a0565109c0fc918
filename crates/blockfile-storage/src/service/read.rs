//! # Blockfile Manager - Read Path
//!
//! Implements [`BlockStore`]. Lookups resolve a location under the committed
//! view's read lock, drop it, then read and decode the block.

use ledger_types::{Block, BlockchainInfo, Envelope};

use super::*;
use crate::adapters::blockfile::BlockfileReader;
use crate::domain::entities::{Location, TxLocation};

impl<KV, BS> BlockfileManager<KV, BS>
where
    KV: KeyValueStore,
    BS: BlockSerializer,
{
    /// Read and decode the block at `location`.
    pub(crate) fn read_block_at(&self, location: &Location) -> Result<Block, StorageError> {
        let bytes = BlockfileReader::new(&self.dir).read_location(location)?;
        self.decode_at(location, &bytes)
    }

    /// Decode committed bytes. Failure here means the log is damaged.
    pub(crate) fn decode_at(&self, location: &Location, bytes: &[u8]) -> Result<Block, StorageError> {
        self.codec
            .decode(bytes)
            .map_err(|e| StorageError::UnrecoverableLedger {
                suffix: location.file_suffix,
                offset: location.offset,
                reason: e.to_string(),
            })
    }

    fn number_location(&self, number: u64) -> Result<Location, StorageError> {
        let committed = self.committed.read();
        if committed.closed {
            return Err(StorageError::Closed);
        }
        committed
            .index
            .location_of(number)
            .ok_or(StorageError::BlockNotFound { number })
    }

    fn tx_location(&self, tx_id: &str) -> Result<TxLocation, StorageError> {
        let committed = self.committed.read();
        if committed.closed {
            return Err(StorageError::Closed);
        }
        committed
            .index
            .location_of_tx(tx_id)?
            .ok_or_else(|| StorageError::TxNotFound {
                tx_id: tx_id.to_string(),
            })
    }
}

impl<KV, BS> BlockStore for BlockfileManager<KV, BS>
where
    KV: KeyValueStore,
    BS: BlockSerializer,
{
    type Iter<'a>
        = BlocksIterator<'a, KV, BS>
    where
        Self: 'a;

    fn append(&self, block: &Block) -> Result<(), StorageError> {
        self.append_block(block)
    }

    fn block_by_number(&self, number: u64) -> Result<Block, StorageError> {
        let location = self.number_location(number)?;
        self.read_block_at(&location)
    }

    fn block_by_hash(&self, hash: &[u8]) -> Result<Block, StorageError> {
        let location = {
            let committed = self.committed.read();
            if committed.closed {
                return Err(StorageError::Closed);
            }
            let number = committed
                .index
                .number_of_hash(hash)?
                .ok_or_else(|| StorageError::HashNotFound {
                    hash: hash.to_vec(),
                })?;
            committed
                .index
                .location_of(number)
                .ok_or(StorageError::BlockNotFound { number })?
        };
        self.read_block_at(&location)
    }

    fn tx_by_id(&self, tx_id: &str) -> Result<Envelope, StorageError> {
        let location = self.tx_location(tx_id)?;
        let block = self.read_block_at(&location.block)?;
        let tx_number = location.tx_number;

        match usize::try_from(tx_number).ok().and_then(|i| block.data.into_iter().nth(i)) {
            Some(envelope) if envelope.tx_id == tx_id => Ok(envelope),
            _ => Err(StorageError::UnrecoverableLedger {
                suffix: location.block.file_suffix,
                offset: location.block.offset,
                reason: format!(
                    "index places transaction {tx_id} at position {tx_number} of block {}",
                    location.block_number
                ),
            }),
        }
    }

    fn block_by_tx_id(&self, tx_id: &str) -> Result<Block, StorageError> {
        let location = self.tx_location(tx_id)?;
        self.read_block_at(&location.block)
    }

    fn tx_by_block_and_tx_number(
        &self,
        block_number: u64,
        tx_number: u64,
    ) -> Result<Envelope, StorageError> {
        let block = self.block_by_number(block_number)?;
        usize::try_from(tx_number)
            .ok()
            .and_then(|i| block.data.into_iter().nth(i))
            .ok_or(StorageError::TxNumberNotFound {
                block_number,
                tx_number,
            })
    }

    fn iter_from(&self, start: u64) -> Result<Self::Iter<'_>, StorageError> {
        self.ensure_open()?;
        Ok(BlocksIterator::new(self, start))
    }

    fn info(&self) -> BlockchainInfo {
        let committed = self.committed.read();
        let Some(last) = committed.index.last_entry() else {
            return BlockchainInfo::default();
        };
        let previous_block_hash = last
            .number
            .checked_sub(1)
            .and_then(|n| committed.index.entry(n))
            .map(|e| e.hash.clone())
            .unwrap_or_default();

        BlockchainInfo {
            height: last.number,
            current_block_hash: last.hash.clone(),
            previous_block_hash,
        }
    }
}
