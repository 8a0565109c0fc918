//! # Core Ledger Entities
//!
//! Blocks are produced by the ordering service in ascending, contiguous
//! number order and are immutable once appended to the log.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

/// A block or envelope digest. Empty means "no hash" (previous hash of
/// block 1, head hash of an empty ledger).
pub type Hash = Vec<u8>;

/// Transaction identifier assigned upstream by the ordering service.
pub type TxId = String;

/// One opaque transaction envelope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// Identifier used by the transaction index.
    pub tx_id: TxId,
    /// Serialized transaction, never interpreted by storage.
    pub payload: Vec<u8>,
}

impl Envelope {
    pub fn new(tx_id: impl Into<TxId>, payload: impl Into<Vec<u8>>) -> Self {
        Self {
            tx_id: tx_id.into(),
            payload: payload.into(),
        }
    }

    /// SHA-256 of the transaction id and payload.
    pub fn digest(&self) -> [u8; 32] {
        let mut hasher = Sha256::new();
        hasher.update((self.tx_id.len() as u64).to_be_bytes());
        hasher.update(self.tx_id.as_bytes());
        hasher.update(&self.payload);
        hasher.finalize().into()
    }
}

/// A block as stored in the log.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    /// Block number, starting at 1.
    pub number: u64,
    /// Digest over the block contents.
    pub hash: Hash,
    /// Hash of block `number - 1`, empty for block 1.
    pub previous_hash: Hash,
    /// Ordered transaction envelopes.
    pub data: Vec<Envelope>,
}

impl Block {
    /// Build a block and compute its hash.
    pub fn new(number: u64, previous_hash: Hash, data: Vec<Envelope>) -> Self {
        let hash = Self::compute_hash(number, &previous_hash, &data);
        Self {
            number,
            hash,
            previous_hash,
            data,
        }
    }

    /// `sha256(number_be || previous_hash || sha256(envelope)...)`
    pub fn compute_hash(number: u64, previous_hash: &[u8], data: &[Envelope]) -> Hash {
        let mut hasher = Sha256::new();
        hasher.update(number.to_be_bytes());
        hasher.update(previous_hash);
        for envelope in data {
            hasher.update(envelope.digest());
        }
        hasher.finalize().to_vec()
    }

    /// Whether the stored hash matches the contents.
    pub fn verify_hash(&self) -> bool {
        self.hash == Self::compute_hash(self.number, &self.previous_hash, &self.data)
    }

    /// Transaction ids in envelope order.
    pub fn tx_ids(&self) -> impl Iterator<Item = &str> {
        self.data.iter().map(|e| e.tx_id.as_str())
    }
}

/// Summary of the committed chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockchainInfo {
    /// Number of committed blocks (equal to the last block number).
    pub height: u64,
    /// Hash of the last committed block.
    pub current_block_hash: Hash,
    /// Hash of the block before it.
    pub previous_block_hash: Hash,
}

/// First four bytes of a hash as hex, for log lines.
pub fn short_hex(hash: &[u8]) -> String {
    hex::encode(&hash[..hash.len().min(4)])
}
