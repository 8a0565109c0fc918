//! # Checkpoint Info
//!
//! Durable marker of writer progress.
//!
//! Central invariant: after every successful append and after recovery,
//! `latest_file_offset` is the length of blockfile `latest_file_suffix`
//! up to its last complete record.

use bincode::Options;
use serde::{Deserialize, Serialize};

use crate::domain::errors::CheckpointSlotError;

/// Slot format version.
const SLOT_VERSION: u8 = 1;

/// Where writing left off.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct CheckpointInfo {
    /// Suffix of the active blockfile.
    pub latest_file_suffix: u32,
    /// Bytes of complete records in the active blockfile.
    pub latest_file_offset: u64,
    /// Number of the last committed block, `0` when empty.
    pub last_block_number: u64,
}

impl CheckpointInfo {
    pub fn new(latest_file_suffix: u32, latest_file_offset: u64, last_block_number: u64) -> Self {
        Self {
            latest_file_suffix,
            latest_file_offset,
            last_block_number,
        }
    }

    /// The zero sentinel: a fresh, empty ledger.
    pub fn is_fresh(&self) -> bool {
        *self == Self::default()
    }

    /// Encode as `version || bincode(info) || crc32`.
    pub fn encode_slot(&self) -> Vec<u8> {
        let mut bytes = vec![SLOT_VERSION];
        // Fixed-width encoding of three integers cannot fail.
        bytes.extend(
            bincode::DefaultOptions::new()
                .with_fixint_encoding()
                .serialize(self)
                .unwrap_or_default(),
        );
        let crc = crc32fast::hash(&bytes);
        bytes.extend_from_slice(&crc.to_le_bytes());
        bytes
    }

    /// Decode a slot written by [`encode_slot`](Self::encode_slot).
    pub fn decode_slot(bytes: &[u8]) -> Result<Self, CheckpointSlotError> {
        if bytes.len() < 5 {
            return Err(CheckpointSlotError::TooShort { len: bytes.len() });
        }
        let (body, crc_bytes) = bytes.split_at(bytes.len() - 4);
        let mut crc = [0u8; 4];
        crc.copy_from_slice(crc_bytes);
        if crc32fast::hash(body) != u32::from_le_bytes(crc) {
            return Err(CheckpointSlotError::ChecksumMismatch);
        }
        if body[0] != SLOT_VERSION {
            return Err(CheckpointSlotError::UnsupportedVersion { version: body[0] });
        }
        bincode::DefaultOptions::new()
            .with_fixint_encoding()
            .reject_trailing_bytes()
            .deserialize(&body[1..])
            .map_err(|e| CheckpointSlotError::Decode {
                message: e.to_string(),
            })
    }
}
