//! # Recovery Rules
//!
//! Pure decisions taken while reconciling the checkpoint with the files on
//! disk at open. The service performs the scan and the repair; this module
//! says what the scan must find and records what was done.

use crate::domain::checkpoint::CheckpointInfo;

/// Outcome of the reconciliation run at open.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    /// Suffix of the file appends continue in.
    pub active_suffix: u32,
    /// Complete records found in the active file.
    pub records_scanned: u64,
    /// Bytes cut from the active file tail.
    pub bytes_truncated: u64,
    /// Blocks added to the index from closed and active files.
    pub blocks_replayed: u64,
    /// Index entries removed because their blocks did not survive.
    pub stale_entries_removed: u64,
    /// Index dropped and rebuilt because its attribute set changed.
    pub index_rebuilt: bool,
    /// Checkpoint as loaded from its slot.
    pub loaded: CheckpointInfo,
    /// Checkpoint after reconciliation.
    pub recovered: CheckpointInfo,
}

impl RecoveryReport {
    pub fn new(loaded: CheckpointInfo) -> Self {
        Self {
            loaded,
            ..Self::default()
        }
    }

    /// Whether the persisted checkpoint had to be corrected.
    pub fn checkpoint_changed(&self) -> bool {
        self.loaded != self.recovered
    }

    /// Whether the ledger was left exactly as loaded.
    pub fn is_clean(&self) -> bool {
        !self.checkpoint_changed()
            && self.bytes_truncated == 0
            && self.blocks_replayed == 0
            && self.stale_entries_removed == 0
            && !self.index_rebuilt
    }
}

/// Active file of a ledger: the checkpoint's file, or a higher one left by a
/// crash between opening the next file and persisting the roll.
pub fn active_suffix(checkpoint: &CheckpointInfo, highest_on_disk: Option<u32>) -> u32 {
    highest_on_disk.map_or(checkpoint.latest_file_suffix, |highest| {
        highest.max(checkpoint.latest_file_suffix)
    })
}

/// Where the active file's block numbering starts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActiveFileStart {
    /// The first record must carry this number.
    Pinned(u64),
    /// The first record follows the last block of closed file
    /// `active_suffix - 1`.
    AfterPrevious,
    /// The checkpoint lies inside the active file and says nothing about
    /// where it began; the scan decides.
    Unpinned,
}

/// How the first record of the active file is checked.
///
/// File 0 always starts at block 1. A checkpoint at offset 0 of the active
/// file was written by the roll that opened it and carries the block count.
/// A checkpoint in an earlier file, including a missing slot, is only a
/// hint: the previous file is the source of truth.
pub fn active_file_start(checkpoint: &CheckpointInfo, active_suffix: u32) -> ActiveFileStart {
    if active_suffix == 0 {
        ActiveFileStart::Pinned(1)
    } else if checkpoint.latest_file_suffix < active_suffix {
        ActiveFileStart::AfterPrevious
    } else if checkpoint.latest_file_offset == 0 {
        ActiveFileStart::Pinned(checkpoint.last_block_number + 1)
    } else {
        ActiveFileStart::Unpinned
    }
}
