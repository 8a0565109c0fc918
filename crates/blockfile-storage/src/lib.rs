//! # Blockfile Storage Engine
//!
//! Durable, append-only block log for a replicated ledger. Blocks are
//! written once, in order, into numbered fixed-capacity blockfiles and are
//! recoverable verbatim after an unclean shutdown.
//!
//! ## Ledger Directory
//!
//! ```text
//! <root>/chains/<ledger_id>/
//!     blockfile_000000      varint(len) || block, appended in order
//!     blockfile_000001      opened when the previous file is full
//!     checkpoint            {active suffix, offset, last block number}
//!     index.journal         number / hash / tx id index
//!     LOCK                  held by the owning process
//! ```
//!
//! ## Guarantees
//!
//! | Property | Description |
//! |----------|-------------|
//! | Contiguity | Block `n` is accepted only when the height is `n - 1` |
//! | Durability | `append` returns after file, checkpoint and index are persisted |
//! | Atomic visibility | Readers see an append entirely or not at all |
//! | Crash repair | A torn trailing record is cut at open; the checkpoint is rebuilt from the file |
//! | No split records | A record never spans two blockfiles |
//!
//! ## Crate Structure (Hexagonal Architecture)
//!
//! - `domain/` - Codec, checkpoint, index and recovery rules (no I/O)
//! - `ports/` - `BlockStore` API and the key-value / serializer SPI
//! - `adapters/` - Blockfiles, checkpoint slot, lock file, journal, bincode
//! - `service/` - `BlockfileManager`, the engine itself
//!
//! ## Usage
//!
//! ```no_run
//! use blockfile_storage::{BlockStore, BlockfileManager, StorageConfig};
//! use ledger_types::{Block, Envelope};
//!
//! # fn main() -> Result<(), blockfile_storage::StorageError> {
//! let config = StorageConfig::new("/var/ledgers").with_max_file_size(64 * 1024 * 1024);
//! let ledger = BlockfileManager::open(config, "mychannel")?;
//!
//! let block = Block::new(1, Vec::new(), vec![Envelope::new("tx-1", b"payload".to_vec())]);
//! ledger.append(&block)?;
//!
//! assert_eq!(ledger.block_by_number(1)?, block);
//! for block in ledger.iter_from(1)? {
//!     let block = block?;
//!     println!("block {} has {} txs", block.number, block.data.len());
//! }
//! # Ok(())
//! # }
//! ```

pub mod adapters;
pub mod domain;
pub mod ports;
pub mod service;

#[cfg(test)]
pub(crate) mod test_utils;

// Re-export key types for convenience
pub use adapters::{
    BincodeBlockSerializer, CheckpointManager, DatabaseLock, FileBackedKVStore, InMemoryKVStore,
    LockError,
};
pub use domain::checkpoint::CheckpointInfo;
pub use domain::entities::{BlockIndexEntry, Location, TxLocation};
pub use domain::errors::{
    CheckpointSlotError, CodecError, FileStoreError, KVStoreError, StorageError,
};
pub use domain::recovery::RecoveryReport;
pub use domain::value_objects::{FlushScope, IndexedAttribute, StorageConfig};
pub use ports::inbound::BlockStore;
pub use ports::outbound::{BatchOperation, BlockSerializer, KeyValueStore};
pub use service::{BlockfileDependencies, BlockfileManager, BlocksIterator, INDEX_FILE};

pub use ledger_types::{Block, BlockchainInfo, Envelope};
