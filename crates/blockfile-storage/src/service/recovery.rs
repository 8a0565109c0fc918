//! # Blockfile Manager - Recovery
//!
//! Runs once at open:
//!
//! 1. Pick the active file (checkpoint's, or a higher one on disk)
//! 2. Scan it from offset 0; a torn or undecodable record ends the scan.
//!    When the checkpoint lags behind the active file its count is not
//!    trusted; numbering continues from the last block of the previous file
//! 3. Truncate to the last complete record and re-persist the checkpoint
//! 4. Bring the index in line: drop entries past the recovered tail, replay
//!    closed files it is missing, then index the active file's blocks
//!
//! Closed files are trusted. Any failure while replaying one is
//! `UnrecoverableLedger`.

use std::io::ErrorKind;
use std::path::Path;

use crate::adapters::blockfile::{blockfile_path, highest_suffix, BlockfileWriter, RecordScanner};
use crate::adapters::checkpoint::CheckpointManager;
use crate::domain::checkpoint::CheckpointInfo;
use crate::domain::codec::BlockCodec;
use crate::domain::entities::IndexedBlock;
use crate::domain::errors::{FileStoreError, StorageError};
use crate::domain::index::{BlockIndex, RecordOutcome};
use crate::domain::recovery::{active_file_start, active_suffix, ActiveFileStart, RecoveryReport};
use crate::domain::value_objects::StorageConfig;
use crate::ports::outbound::{BlockSerializer, KeyValueStore};

use super::helpers;

/// State handed to the manager after recovery.
pub(super) struct Recovered {
    pub(super) writer: BlockfileWriter,
    pub(super) checkpoint: CheckpointInfo,
    pub(super) index: BlockIndex,
    pub(super) report: RecoveryReport,
}

/// Complete records found in the active file.
struct TailScan {
    blocks: Vec<IndexedBlock>,
    /// End of the last complete record.
    good_end: u64,
}

pub(super) fn recover<KV, BS>(
    dir: &Path,
    config: &StorageConfig,
    codec: &BlockCodec<BS>,
    checkpoint: &mut CheckpointManager,
    kv: &mut KV,
) -> Result<Recovered, StorageError>
where
    KV: KeyValueStore,
    BS: BlockSerializer,
{
    let loaded = checkpoint.current();
    let mut report = RecoveryReport::new(loaded);

    let highest = highest_suffix(dir).map_err(|e| StorageError::io(dir, e))?;
    if !loaded.is_fresh() && !blockfile_path(dir, loaded.latest_file_suffix).exists() {
        return Err(StorageError::CorruptCheckpoint {
            reason: format!(
                "checkpoint {:?} names blockfile {} which does not exist",
                loaded, loaded.latest_file_suffix
            ),
        });
    }
    let active = active_suffix(&loaded, highest);
    if active != loaded.latest_file_suffix {
        tracing::warn!(
            "[blkstorage] Blockfile {} exists past checkpoint file {}: resuming there",
            active,
            loaded.latest_file_suffix
        );
    }

    let mut writer = BlockfileWriter::open(dir, active)?;
    let expected_first = match active_file_start(&loaded, active) {
        ActiveFileStart::Pinned(first) => Some(first),
        ActiveFileStart::AfterPrevious => Some(last_block_in(dir, active - 1, codec)? + 1),
        ActiveFileStart::Unpinned => None,
    };
    let tail = scan_active(dir, active, codec, expected_first)?;

    let file_len = writer.offset();
    if file_len > tail.good_end {
        tracing::warn!(
            "[blkstorage] Truncating blockfile {} from {} to {} bytes (torn tail)",
            active,
            file_len,
            tail.good_end
        );
        writer.truncate(tail.good_end)?;
        report.bytes_truncated = file_len - tail.good_end;
    }

    let last_block = match (tail.blocks.last(), expected_first) {
        (Some(block), _) => block.number,
        (None, Some(first)) => first - 1,
        (None, None) => last_block_in(dir, active - 1, codec)?,
    };

    let recovered = CheckpointInfo::new(active, tail.good_end, last_block);
    checkpoint.save(recovered)?;
    report.active_suffix = active;
    report.records_scanned = tail.blocks.len() as u64;
    report.recovered = recovered;
    if report.checkpoint_changed() {
        tracing::info!(
            "[blkstorage] Checkpoint reconciled: {:?} -> {:?}",
            loaded,
            recovered
        );
    }

    let loaded_index = helpers::load_index(kv, config)?;
    report.index_rebuilt = loaded_index.rebuilt;
    let mut index = loaded_index.index;
    sync_index(dir, codec, kv, &mut index, &tail, recovered, &mut report)?;

    Ok(Recovered {
        writer,
        checkpoint: recovered,
        index,
        report,
    })
}

fn scan_active<BS: BlockSerializer>(
    dir: &Path,
    suffix: u32,
    codec: &BlockCodec<BS>,
    expected_first: Option<u64>,
) -> Result<TailScan, StorageError> {
    let mut scanner = RecordScanner::open(dir, suffix, 0)?;
    let mut blocks = Vec::new();
    let mut good_end = 0;
    let mut expected = expected_first;

    loop {
        let record = match scanner.next_record() {
            Ok(Some(record)) => record,
            Ok(None) => break,
            Err(e) if e.is_torn_record() => {
                tracing::warn!("[blkstorage] Scan of blockfile {} stopped: {}", suffix, e);
                break;
            }
            Err(e) => return Err(e.into()),
        };

        let block = match codec.decode(&record.payload) {
            Ok(block) => block,
            Err(e) => {
                tracing::warn!(
                    "[blkstorage] Scan of blockfile {} stopped at offset {}: {}",
                    suffix,
                    record.offset,
                    e
                );
                break;
            }
        };

        if let Some(number) = expected.filter(|n| *n != block.number) {
            return Err(StorageError::UnrecoverableLedger {
                suffix,
                offset: record.offset,
                reason: format!("expected block {number}, found block {}", block.number),
            });
        }
        expected = Some(block.number + 1);
        good_end = record.end();
        blocks.push(IndexedBlock::from_block(&block, record.location()));
    }

    Ok(TailScan { blocks, good_end })
}

/// Number of the last block in closed file `suffix`.
fn last_block_in<BS: BlockSerializer>(
    dir: &Path,
    suffix: u32,
    codec: &BlockCodec<BS>,
) -> Result<u64, StorageError> {
    let mut last = None;
    for_each_closed_block(dir, suffix, 0, codec, |block| {
        last = Some(block.number);
        Ok(())
    })?;
    last.ok_or_else(|| StorageError::UnrecoverableLedger {
        suffix,
        offset: 0,
        reason: "closed blockfile holds no records".to_string(),
    })
}

fn sync_index<KV, BS>(
    dir: &Path,
    codec: &BlockCodec<BS>,
    kv: &mut KV,
    index: &mut BlockIndex,
    tail: &TailScan,
    recovered: CheckpointInfo,
    report: &mut RecoveryReport,
) -> Result<(), StorageError>
where
    KV: KeyValueStore,
    BS: BlockSerializer,
{
    let last_block = recovered.last_block_number;
    let active = recovered.latest_file_suffix;

    if index.last_indexed() > last_block {
        let removed = index.remove_above(last_block);
        kv.atomic_batch_write(helpers::removal_batch(&removed, last_block))?;
        report.stale_entries_removed = removed.blocks.len() as u64;
        tracing::warn!(
            "[blkstorage] Removed {} index entries past recovered block {}",
            removed.blocks.len(),
            last_block
        );
    }

    let first_active = tail
        .blocks
        .first()
        .map_or(last_block + 1, |block| block.number);
    let indexed = index.last_indexed();

    if indexed + 1 < first_active {
        let (mut suffix, mut offset) = match index.location_of(indexed) {
            Some(location) => (location.file_suffix, location.end()),
            None => (0, 0),
        };
        tracing::info!(
            "[blkstorage] Replaying blocks {}..{} into the index from blockfile {}",
            indexed + 1,
            first_active,
            suffix
        );

        let mut expected = indexed + 1;
        while suffix < active {
            for_each_closed_block(dir, suffix, offset, codec, |block| {
                if block.number != expected {
                    return Err(ClosedFileFault::Rejected(format!(
                        "expected block {expected}, found block {}",
                        block.number
                    )));
                }
                expected += 1;
                record_and_persist(kv, index, &block)?;
                report.blocks_replayed += 1;
                Ok(())
            })?;
            suffix += 1;
            offset = 0;
        }

        if expected != first_active {
            return Err(StorageError::UnrecoverableLedger {
                suffix: active,
                offset: 0,
                reason: format!(
                    "closed blockfiles end at block {} but blockfile {} continues at block {}",
                    expected - 1,
                    active,
                    first_active
                ),
            });
        }
    }

    for block in &tail.blocks {
        if record_and_persist(kv, index, block)? {
            report.blocks_replayed += 1;
        }
    }

    if report.blocks_replayed > 0 {
        tracing::info!(
            "[blkstorage] Index caught up: {} blocks replayed, last indexed {}",
            report.blocks_replayed,
            index.last_indexed()
        );
    }
    Ok(())
}

/// Record one block in memory and in the journal. Returns whether the index
/// changed.
fn record_and_persist<KV: KeyValueStore>(
    kv: &mut KV,
    index: &mut BlockIndex,
    block: &IndexedBlock,
) -> Result<bool, StorageError> {
    let displaced = index.entry(block.number).cloned();
    if index.record_block(block) == RecordOutcome::Unchanged {
        return Ok(false);
    }
    let operations =
        helpers::index_batch(index, block, displaced.as_ref(), index.last_indexed())?;
    kv.atomic_batch_write(operations)?;
    Ok(true)
}

/// Decode every record of closed file `suffix` from `offset` on.
///
/// `visit` may reject a block with a reason; a rejection or a read failure
/// is reported as `UnrecoverableLedger` at the record's offset.
fn for_each_closed_block<BS, F>(
    dir: &Path,
    suffix: u32,
    offset: u64,
    codec: &BlockCodec<BS>,
    mut visit: F,
) -> Result<(), StorageError>
where
    BS: BlockSerializer,
    F: FnMut(IndexedBlock) -> Result<(), ClosedFileFault>,
{
    let mut scanner =
        RecordScanner::open(dir, suffix, offset).map_err(|e| closed_file_error(suffix, offset, e))?;

    loop {
        let position = scanner.position();
        let record = match scanner.next_record() {
            Ok(Some(record)) => record,
            Ok(None) => return Ok(()),
            Err(e) => return Err(closed_file_error(suffix, position, e)),
        };
        let block = codec
            .decode(&record.payload)
            .map_err(|e| StorageError::UnrecoverableLedger {
                suffix,
                offset: record.offset,
                reason: e.to_string(),
            })?;

        match visit(IndexedBlock::from_block(&block, record.location())) {
            Ok(()) => {}
            Err(ClosedFileFault::Rejected(reason)) => {
                return Err(StorageError::UnrecoverableLedger {
                    suffix,
                    offset: record.offset,
                    reason,
                });
            }
            Err(ClosedFileFault::Storage(err)) => return Err(err),
        }
    }
}

/// Why visiting a closed-file block failed.
enum ClosedFileFault {
    Rejected(String),
    Storage(StorageError),
}

impl From<StorageError> for ClosedFileFault {
    fn from(err: StorageError) -> Self {
        ClosedFileFault::Storage(err)
    }
}

fn closed_file_error(suffix: u32, offset: u64, err: FileStoreError) -> StorageError {
    match err {
        FileStoreError::Io { ref source, .. } if source.kind() == ErrorKind::NotFound => {
            StorageError::UnrecoverableLedger {
                suffix,
                offset,
                reason: "closed blockfile is missing".to_string(),
            }
        }
        FileStoreError::Io { path, source } => StorageError::Io { path, source },
        other => StorageError::UnrecoverableLedger {
            suffix,
            offset,
            reason: other.to_string(),
        },
    }
}
