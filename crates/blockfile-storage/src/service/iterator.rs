//! # Block Iterator
//!
//! Ordered, finite scan over committed blocks. The upper bound is the height
//! at creation; later appends are not observed.

use ledger_types::Block;

use crate::adapters::blockfile::BlockfileReader;
use crate::domain::entities::Location;
use crate::domain::errors::StorageError;
use crate::ports::outbound::{BlockSerializer, KeyValueStore};

use super::BlockfileManager;

/// Yields blocks `start..=last` of a ledger, then `None`.
///
/// Holds at most one open blockfile, switching when the scan crosses into
/// the next file. The handle is released by [`close`](Self::close), at the
/// end of the scan, after the first error, or on drop.
pub struct BlocksIterator<'a, KV, BS>
where
    KV: KeyValueStore,
    BS: BlockSerializer,
{
    manager: &'a BlockfileManager<KV, BS>,
    reader: Option<BlockfileReader>,
    next: u64,
    last: u64,
}

impl<'a, KV, BS> BlocksIterator<'a, KV, BS>
where
    KV: KeyValueStore,
    BS: BlockSerializer,
{
    pub(crate) fn new(manager: &'a BlockfileManager<KV, BS>, start: u64) -> Self {
        let last = manager.checkpoint_info().last_block_number;
        Self {
            manager,
            reader: Some(BlockfileReader::new(manager.dir())),
            next: start.max(1),
            last,
        }
    }

    /// Number of the next block to yield.
    pub fn position(&self) -> u64 {
        self.next
    }

    /// Last block this iterator will yield.
    pub fn last_block(&self) -> u64 {
        self.last
    }

    /// Stop the scan and release the file handle.
    pub fn close(&mut self) {
        self.reader = None;
    }

    fn read(&mut self, number: u64) -> Result<Block, StorageError> {
        let location = self.locate(number)?;
        let reader = self.reader.as_mut().ok_or(StorageError::Closed)?;
        let bytes = reader.read_location(&location)?;
        let block = self.manager.decode_at(&location, &bytes)?;
        if block.number != number {
            return Err(StorageError::UnrecoverableLedger {
                suffix: location.file_suffix,
                offset: location.offset,
                reason: format!("index points block {number} at block {}", block.number),
            });
        }
        Ok(block)
    }

    fn locate(&self, number: u64) -> Result<Location, StorageError> {
        self.manager
            .committed
            .read()
            .index
            .location_of(number)
            .ok_or(StorageError::BlockNotFound { number })
    }
}

impl<KV, BS> Iterator for BlocksIterator<'_, KV, BS>
where
    KV: KeyValueStore,
    BS: BlockSerializer,
{
    type Item = Result<Block, StorageError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.reader.is_none() {
            return None;
        }
        if self.next > self.last {
            self.close();
            return None;
        }

        let result = self.read(self.next);
        match result {
            Ok(_) => self.next += 1,
            Err(_) => self.close(),
        }
        Some(result)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.reader.is_none() || self.next > self.last {
            return (0, Some(0));
        }
        let remaining = usize::try_from(self.last - self.next + 1).unwrap_or(usize::MAX);
        (0, Some(remaining))
    }
}
