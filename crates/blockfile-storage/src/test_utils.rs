use ledger_types::{Block, Envelope, Hash};
use rand::{Rng, RngCore};

/// Produces a contiguous chain of blocks with random payloads.
pub struct BlockGenerator {
    next_number: u64,
    previous_hash: Hash,
    txs_per_block: usize,
}

impl BlockGenerator {
    pub fn new() -> Self {
        Self::with_txs_per_block(3)
    }

    pub fn with_txs_per_block(txs_per_block: usize) -> Self {
        Self {
            next_number: 1,
            previous_hash: Vec::new(),
            txs_per_block,
        }
    }

    pub fn next_block(&mut self) -> Block {
        let mut rng = rand::thread_rng();
        let number = self.next_number;
        let data = (0..self.txs_per_block)
            .map(|i| {
                let len = rng.gen_range(16..256);
                Envelope::new(format!("tx-{number}-{i}"), random_bytes(len))
            })
            .collect();

        let block = Block::new(number, self.previous_hash.clone(), data);
        self.previous_hash = block.hash.clone();
        self.next_number += 1;
        block
    }

    pub fn next_blocks(&mut self, count: usize) -> Vec<Block> {
        (0..count).map(|_| self.next_block()).collect()
    }
}

pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut bytes = vec![0u8; len];
    rand::thread_rng().fill_bytes(&mut bytes);
    bytes
}

/// `varint(declared_len) || random bytes`, cut to `keep` bytes: a record
/// torn by a crash mid-write.
pub fn torn_record(declared_len: usize, keep: usize) -> Vec<u8> {
    let mut bytes = Vec::new();
    crate::domain::codec::encode_varint(declared_len as u64, &mut bytes);
    bytes.extend(random_bytes(declared_len));
    bytes.truncate(keep);
    bytes
}

/// Install a test subscriber once; honours `RUST_LOG`.
pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}
