//! # Blockfile Manager - Append Path
//!
//! encode -> roll if needed -> blockfile append -> checkpoint -> index
//! journal -> publish to readers.
//!
//! A failure after bytes reached the blockfile is undone by cutting the file
//! back and restoring the previous checkpoint. If that undo fails the writer
//! is poisoned and the ledger must be reopened, letting recovery finish the
//! job from disk.

use ledger_types::{short_hex, Block};

use super::*;
use crate::domain::codec::EncodedRecord;
use crate::domain::entities::{IndexedBlock, Location};

use super::helpers;

impl<KV, BS> BlockfileManager<KV, BS>
where
    KV: KeyValueStore,
    BS: BlockSerializer,
{
    pub(crate) fn append_block(&self, block: &Block) -> Result<(), StorageError> {
        let mut writer = self.writer.lock();
        if writer.poisoned {
            return Err(StorageError::WriterPoisoned);
        }
        if writer.file.is_none() {
            return Err(StorageError::Closed);
        }

        let expected = writer.checkpoint.current().last_block_number + 1;
        if block.number != expected {
            return Err(StorageError::OutOfOrder {
                expected,
                got: block.number,
            });
        }

        let record = self.codec.encode_record(block)?;
        if self.needs_roll(&writer, &record) {
            self.roll(&mut writer)?;
        }
        let previous = writer.checkpoint.current();

        let (checkpoint, indexed) = match self.write_durable(&mut writer, block, &record) {
            Ok(written) => written,
            Err(err) => {
                self.rollback(&mut writer, previous);
                return Err(err);
            }
        };

        {
            let mut committed = self.committed.write();
            committed.checkpoint = checkpoint;
            committed.index.record_block(&indexed);
        }

        tracing::debug!(
            "[blkstorage] Appended block {} ({}) to blockfile {} at offset {}, {} txs",
            block.number,
            short_hex(&block.hash),
            indexed.location.file_suffix,
            indexed.location.offset,
            block.data.len()
        );
        Ok(())
    }

    fn needs_roll(&self, writer: &WriterState<KV>, record: &EncodedRecord) -> bool {
        writer
            .file
            .as_ref()
            .is_some_and(|file| self.config.should_roll(file.offset(), record.len()))
    }

    /// Close the active file and start the next one.
    fn roll(&self, writer: &mut WriterState<KV>) -> Result<(), StorageError> {
        let Some(file) = writer.file.take() else {
            return Err(StorageError::Closed);
        };
        let last = writer.checkpoint.current().last_block_number;

        let next = match file.roll() {
            Ok(next) => next,
            Err(err) => {
                writer.poisoned = true;
                return Err(err.into());
            }
        };
        let rolled = CheckpointInfo::new(next.suffix(), 0, last);
        writer.file = Some(next);

        if let Err(err) = writer.checkpoint.save(rolled) {
            // Recovery picks the new file up from disk.
            writer.poisoned = true;
            return Err(err);
        }
        self.committed.write().checkpoint = rolled;

        tracing::info!(
            "[blkstorage] Rolled to blockfile {} after block {}",
            rolled.latest_file_suffix,
            last
        );
        Ok(())
    }

    fn write_durable(
        &self,
        writer: &mut WriterState<KV>,
        block: &Block,
        record: &EncodedRecord,
    ) -> Result<(CheckpointInfo, IndexedBlock), StorageError> {
        let file = writer.file.as_mut().ok_or(StorageError::Closed)?;
        let location = Location::new(
            file.suffix(),
            file.offset() + record.header_len as u64,
            record.payload_len(),
        );

        let end = file.append(&record.bytes, self.config.flush_scope.syncs_blockfile())?;
        let checkpoint = CheckpointInfo::new(location.file_suffix, end, block.number);
        writer.checkpoint.save(checkpoint)?;

        let indexed = IndexedBlock::from_block(block, location);
        let operations =
            helpers::index_batch(&self.committed.read().index, &indexed, None, block.number)?;
        writer.kv.atomic_batch_write(operations)?;

        Ok((checkpoint, indexed))
    }

    /// Undo a partial append. Poisons the writer when that fails too.
    fn rollback(&self, writer: &mut WriterState<KV>, previous: CheckpointInfo) {
        let restored = match writer.file.as_mut() {
            Some(file) if file.suffix() == previous.latest_file_suffix => file
                .truncate(previous.latest_file_offset)
                .map_err(StorageError::from)
                .and_then(|()| writer.checkpoint.save(previous)),
            _ => Err(StorageError::WriterPoisoned),
        };

        match restored {
            Ok(()) => tracing::warn!(
                "[blkstorage] Append rolled back to block {}",
                previous.last_block_number
            ),
            Err(err) => {
                writer.poisoned = true;
                tracing::warn!(
                    "[blkstorage] Rollback failed, writer poisoned: {}",
                    err
                );
            }
        }
    }
}
