//! # Blockfile Manager
//!
//! The main service implementing the [`BlockStore`] API over one ledger
//! directory.
//!
//! ## Architecture
//!
//! This service:
//! 1. Runs recovery once at open, before any append or read
//! 2. Serializes appends on a writer mutex (file, checkpoint, index journal)
//! 3. Publishes each append to readers in one step through the committed view
//! 4. Serves point lookups through the in-memory index and range scans
//!    through [`BlocksIterator`]

mod append;
mod helpers;
mod iterator;
mod read;
mod recovery;

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};

use crate::adapters::blockfile::BlockfileWriter;
use crate::adapters::checkpoint::CheckpointManager;
use crate::adapters::lock::DatabaseLock;
use crate::adapters::serializer::BincodeBlockSerializer;
use crate::adapters::storage::FileBackedKVStore;
use crate::domain::checkpoint::CheckpointInfo;
use crate::domain::codec::BlockCodec;
use crate::domain::errors::StorageError;
use crate::domain::index::BlockIndex;
use crate::domain::recovery::RecoveryReport;
use crate::domain::value_objects::StorageConfig;
use crate::ports::inbound::BlockStore;
use crate::ports::outbound::{BlockSerializer, KeyValueStore};

pub use iterator::BlocksIterator;

/// File name of the index journal inside a ledger directory.
pub const INDEX_FILE: &str = "index.journal";

/// Storage engine for one ledger.
pub struct BlockfileManager<KV = FileBackedKVStore, BS = BincodeBlockSerializer>
where
    KV: KeyValueStore,
    BS: BlockSerializer,
{
    pub(crate) ledger_id: String,
    pub(crate) dir: PathBuf,
    pub(crate) config: StorageConfig,
    pub(crate) codec: BlockCodec<BS>,
    /// Held for the whole append; owns every durable handle.
    pub(crate) writer: Mutex<WriterState<KV>>,
    /// What readers see. Replaced only after the durable work of an append.
    pub(crate) committed: RwLock<CommittedState>,
    pub(crate) report: RecoveryReport,
}

/// State touched only by the writer.
pub(crate) struct WriterState<KV> {
    /// `None` after close, or after a roll that failed half-way.
    pub(crate) file: Option<BlockfileWriter>,
    pub(crate) checkpoint: CheckpointManager,
    pub(crate) kv: KV,
    pub(crate) lock: Option<DatabaseLock>,
    pub(crate) poisoned: bool,
}

/// Committed view shared with readers.
pub(crate) struct CommittedState {
    pub(crate) checkpoint: CheckpointInfo,
    pub(crate) index: BlockIndex,
    pub(crate) closed: bool,
}

/// Dependencies for [`BlockfileManager::open_with`].
pub struct BlockfileDependencies<KV, BS> {
    pub kv_store: KV,
    pub serializer: BS,
}

impl BlockfileManager {
    /// Open (creating if needed) ledger `ledger_id` under `config.root_dir`
    /// with the journal-backed index.
    pub fn open(config: StorageConfig, ledger_id: &str) -> Result<Self, StorageError> {
        let (dir, lock) = Self::prepare_dir(&config, ledger_id)?;

        let mut kv_store = FileBackedKVStore::open(dir.join(INDEX_FILE))?;
        if kv_store.needs_compaction() {
            kv_store.compact()?;
        }

        let deps = BlockfileDependencies {
            kv_store,
            serializer: BincodeBlockSerializer,
        };
        Self::open_locked(config, ledger_id, dir, lock, deps)
    }
}

impl<KV, BS> BlockfileManager<KV, BS>
where
    KV: KeyValueStore,
    BS: BlockSerializer,
{
    /// Open ledger `ledger_id` over the given index store and serializer.
    pub fn open_with(
        config: StorageConfig,
        ledger_id: &str,
        deps: BlockfileDependencies<KV, BS>,
    ) -> Result<Self, StorageError> {
        let (dir, lock) = Self::prepare_dir(&config, ledger_id)?;
        Self::open_locked(config, ledger_id, dir, lock, deps)
    }

    fn prepare_dir(
        config: &StorageConfig,
        ledger_id: &str,
    ) -> Result<(PathBuf, DatabaseLock), StorageError> {
        let dir = config.ledger_dir(ledger_id)?;
        std::fs::create_dir_all(&dir).map_err(|e| StorageError::io(&dir, e))?;
        let lock = DatabaseLock::acquire(&dir)?;
        Ok((dir, lock))
    }

    fn open_locked(
        config: StorageConfig,
        ledger_id: &str,
        dir: PathBuf,
        lock: DatabaseLock,
        deps: BlockfileDependencies<KV, BS>,
    ) -> Result<Self, StorageError> {
        let codec = BlockCodec::new(deps.serializer);
        let mut checkpoint = CheckpointManager::open(&dir)?;
        let mut kv = deps.kv_store;

        let recovered = recovery::recover(&dir, &config, &codec, &mut checkpoint, &mut kv)?;

        tracing::info!(
            "[blkstorage] Opened ledger {}: height {}, active blockfile {} at offset {}",
            ledger_id,
            recovered.checkpoint.last_block_number,
            recovered.checkpoint.latest_file_suffix,
            recovered.checkpoint.latest_file_offset
        );

        Ok(Self {
            ledger_id: ledger_id.to_string(),
            dir,
            config,
            codec,
            writer: Mutex::new(WriterState {
                file: Some(recovered.writer),
                checkpoint,
                kv,
                lock: Some(lock),
                poisoned: false,
            }),
            committed: RwLock::new(CommittedState {
                checkpoint: recovered.checkpoint,
                index: recovered.index,
                closed: false,
            }),
            report: recovered.report,
        })
    }

    pub fn ledger_id(&self) -> &str {
        &self.ledger_id
    }

    /// Ledger directory.
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn config(&self) -> &StorageConfig {
        &self.config
    }

    /// Committed checkpoint.
    pub fn checkpoint_info(&self) -> CheckpointInfo {
        self.committed.read().checkpoint
    }

    /// What recovery did at open.
    pub fn recovery_report(&self) -> &RecoveryReport {
        &self.report
    }

    /// Whether an earlier append left the writer unusable.
    pub fn is_poisoned(&self) -> bool {
        self.writer.lock().poisoned
    }

    /// Sync and release the active blockfile and the directory lock.
    ///
    /// Later appends and lookups fail with `Closed`. Iterators created
    /// before the close keep reading until they finish.
    pub fn close(&self) -> Result<(), StorageError> {
        let mut writer = self.writer.lock();
        self.committed.write().closed = true;

        let file = writer.file.take();
        writer.lock = None;
        if let Some(file) = file {
            file.close()?;
            tracing::info!("[blkstorage] Closed ledger {}", self.ledger_id);
        }
        Ok(())
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.committed.read().closed {
            Err(StorageError::Closed)
        } else {
            Ok(())
        }
    }
}

impl<KV, BS> std::fmt::Debug for BlockfileManager<KV, BS>
where
    KV: KeyValueStore,
    BS: BlockSerializer,
{
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BlockfileManager")
            .field("ledger_id", &self.ledger_id)
            .field("dir", &self.dir)
            .field("checkpoint", &self.checkpoint_info())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
impl<KV, BS> BlockfileManager<KV, BS>
where
    KV: KeyValueStore,
    BS: BlockSerializer,
{
    /// Write raw bytes to the active file, bypassing the codec.
    pub(crate) fn append_raw_for_test(&self, bytes: &[u8]) -> Result<u64, StorageError> {
        let mut writer = self.writer.lock();
        let file = writer.file.as_mut().ok_or(StorageError::Closed)?;
        Ok(file.append(bytes, true)?)
    }

    /// Overwrite the persisted checkpoint without touching the committed view.
    pub(crate) fn save_checkpoint_for_test(&self, info: CheckpointInfo) -> Result<(), StorageError> {
        self.writer.lock().checkpoint.save(info)
    }

    /// Borrow the index store.
    pub(crate) fn with_kv_for_test<R>(&self, f: impl FnOnce(&mut KV) -> R) -> R {
        f(&mut self.writer.lock().kv)
    }
}
