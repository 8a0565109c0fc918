//! Storage Adapters
//!
//! Implementations of the `KeyValueStore` trait.

mod file;
mod memory;

pub(crate) use file::sync_parent_dir;
pub use file::FileBackedKVStore;
pub use memory::InMemoryKVStore;
