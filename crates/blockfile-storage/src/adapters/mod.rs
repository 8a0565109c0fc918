//! # Adapters Layer
//!
//! Concrete implementations behind the ports, plus the on-disk pieces of a
//! ledger directory.
//!
//! - `blockfile` - Numbered append-only blockfiles
//! - `checkpoint` - Durable checkpoint slot
//! - `lock` - Process-level ledger lock
//! - `serializer` - Block serialization
//! - `storage` - Key-value stores for the index

pub mod blockfile;
pub mod checkpoint;
pub mod lock;
pub mod serializer;
pub mod storage;

pub use blockfile::{BlockfileReader, BlockfileWriter, RecordScanner};
pub use checkpoint::{CheckpointManager, CHECKPOINT_FILE};
pub use lock::{DatabaseLock, LockError};
pub use serializer::BincodeBlockSerializer;
pub use storage::{FileBackedKVStore, InMemoryKVStore};
