use crate::domain::errors::KVStoreError;
use crate::ports::outbound::{BatchOperation, KeyValueStore, ScanResult};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{Read, Write};
use std::path::{Path, PathBuf};

/// Frame header: crc32 of the body followed by the body length.
const FRAME_HEADER_LEN: usize = 8;

const TAG_PUT: u8 = 0;
const TAG_DELETE: u8 = 1;

/// Superseded entries tolerated before `needs_compaction` reports true.
const COMPACTION_MIN_DEAD: usize = 1024;

/// File-backed key-value store built on an append-only journal.
///
/// Every `atomic_batch_write` appends one frame and syncs it:
///
/// ```text
/// frame := crc32(body):u32 || body_len:u32 || body
/// body  := op_count:u32 || op*
/// op    := 0:u8 || key_len:u32 || key || value_len:u32 || value   (put)
///        | 1:u8 || key_len:u32 || key                            (delete)
/// ```
///
/// On open the journal is replayed into memory. A torn or checksum-failing
/// frame ends the replay and is cut off, so a batch is either fully applied
/// or absent.
pub struct FileBackedKVStore {
    data: HashMap<Vec<u8>, Vec<u8>>,
    path: PathBuf,
    file: File,
    /// Bytes of complete frames.
    journal_len: u64,
    dead_entries: usize,
}

impl FileBackedKVStore {
    /// Open (or create) the journal at the given path.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, KVStoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(KVStoreError::io)?;
        }

        let mut file = OpenOptions::new()
            .read(true)
            .append(true)
            .create(true)
            .open(&path)
            .map_err(KVStoreError::io)?;

        let mut bytes = Vec::new();
        file.read_to_end(&mut bytes).map_err(KVStoreError::io)?;

        let replay = replay_journal(&bytes);
        if replay.valid_len < bytes.len() {
            tracing::warn!(
                "[blkstorage] Index journal {} has a torn tail: discarding {} bytes",
                path.display(),
                bytes.len() - replay.valid_len
            );
            file.set_len(replay.valid_len as u64)
                .map_err(KVStoreError::io)?;
            file.sync_all().map_err(KVStoreError::io)?;
        }

        tracing::debug!(
            "[blkstorage] Loaded {} keys from {} ({} frames)",
            replay.data.len(),
            path.display(),
            replay.frames
        );

        Ok(Self {
            data: replay.data,
            path,
            file,
            journal_len: replay.valid_len as u64,
            dead_entries: replay.dead_entries,
        })
    }

    /// Path of the journal file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Number of live keys.
    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }

    /// Whether superseded entries outnumber live ones enough to rewrite.
    pub fn needs_compaction(&self) -> bool {
        self.dead_entries >= COMPACTION_MIN_DEAD && self.dead_entries > self.data.len()
    }

    /// Rewrite the journal as a single frame holding the live keys.
    ///
    /// Written to a temp file, synced, then renamed over the journal.
    pub fn compact(&mut self) -> Result<(), KVStoreError> {
        let operations: Vec<BatchOperation> = self
            .data
            .iter()
            .map(|(k, v)| BatchOperation::put(k.clone(), v.clone()))
            .collect();
        let frame = encode_frame(&operations);

        let temp_path = self.path.with_extension("tmp");
        let mut temp = File::create(&temp_path).map_err(KVStoreError::io)?;
        temp.write_all(&frame).map_err(KVStoreError::io)?;
        temp.sync_all().map_err(KVStoreError::io)?;
        drop(temp);

        std::fs::rename(&temp_path, &self.path).map_err(KVStoreError::io)?;
        sync_parent_dir(&self.path);

        self.file = OpenOptions::new()
            .read(true)
            .append(true)
            .open(&self.path)
            .map_err(KVStoreError::io)?;

        tracing::info!(
            "[blkstorage] Compacted index journal {}: {} live keys, {} superseded entries dropped",
            self.path.display(),
            self.data.len(),
            self.dead_entries
        );
        self.journal_len = frame.len() as u64;
        self.dead_entries = 0;
        Ok(())
    }

    fn apply(&mut self, operations: Vec<BatchOperation>) {
        for op in operations {
            let replaced = match op {
                BatchOperation::Put { key, value } => self.data.insert(key, value).is_some(),
                BatchOperation::Delete { key } => self.data.remove(&key).is_some(),
            };
            if replaced {
                self.dead_entries += 1;
            }
        }
    }
}

impl KeyValueStore for FileBackedKVStore {
    fn get(&self, key: &[u8]) -> Result<Option<Vec<u8>>, KVStoreError> {
        Ok(self.data.get(key).cloned())
    }

    fn atomic_batch_write(&mut self, operations: Vec<BatchOperation>) -> Result<(), KVStoreError> {
        if operations.is_empty() {
            return Ok(());
        }

        let frame = encode_frame(&operations);
        let written = self
            .file
            .write_all(&frame)
            .and_then(|()| self.file.sync_data());
        if let Err(e) = written {
            // Cut the partial frame so later frames stay reachable on replay.
            if let Err(cut) = self.file.set_len(self.journal_len) {
                tracing::warn!(
                    "[blkstorage] Could not cut index journal {} back to {} bytes: {}",
                    self.path.display(),
                    self.journal_len,
                    cut
                );
            }
            return Err(KVStoreError::io(e));
        }
        self.journal_len += frame.len() as u64;

        self.apply(operations);
        Ok(())
    }

    fn exists(&self, key: &[u8]) -> Result<bool, KVStoreError> {
        Ok(self.data.contains_key(key))
    }

    fn prefix_scan(&self, prefix: &[u8]) -> Result<ScanResult, KVStoreError> {
        let results: Vec<_> = self
            .data
            .iter()
            .filter(|(k, _)| k.starts_with(prefix))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        Ok(results)
    }
}

fn encode_frame(operations: &[BatchOperation]) -> Vec<u8> {
    let mut body = Vec::new();
    body.extend_from_slice(&(operations.len() as u32).to_le_bytes());
    for op in operations {
        match op {
            BatchOperation::Put { key, value } => {
                body.push(TAG_PUT);
                body.extend_from_slice(&(key.len() as u32).to_le_bytes());
                body.extend_from_slice(key);
                body.extend_from_slice(&(value.len() as u32).to_le_bytes());
                body.extend_from_slice(value);
            }
            BatchOperation::Delete { key } => {
                body.push(TAG_DELETE);
                body.extend_from_slice(&(key.len() as u32).to_le_bytes());
                body.extend_from_slice(key);
            }
        }
    }

    let mut frame = Vec::with_capacity(FRAME_HEADER_LEN + body.len());
    frame.extend_from_slice(&crc32fast::hash(&body).to_le_bytes());
    frame.extend_from_slice(&(body.len() as u32).to_le_bytes());
    frame.extend_from_slice(&body);
    frame
}

struct Replay {
    data: HashMap<Vec<u8>, Vec<u8>>,
    valid_len: usize,
    frames: usize,
    dead_entries: usize,
}

fn replay_journal(bytes: &[u8]) -> Replay {
    let mut replay = Replay {
        data: HashMap::new(),
        valid_len: 0,
        frames: 0,
        dead_entries: 0,
    };

    let mut cursor = 0;
    while cursor + FRAME_HEADER_LEN <= bytes.len() {
        let crc = read_u32(bytes, cursor);
        let body_len = read_u32(bytes, cursor + 4) as usize;
        let body_start = cursor + FRAME_HEADER_LEN;
        let Some(body) = bytes.get(body_start..body_start + body_len) else {
            break;
        };
        if crc32fast::hash(body) != crc {
            break;
        }
        let Some(operations) = decode_body(body) else {
            break;
        };
        for op in operations {
            let replaced = match op {
                BatchOperation::Put { key, value } => replay.data.insert(key, value).is_some(),
                BatchOperation::Delete { key } => replay.data.remove(&key).is_some(),
            };
            if replaced {
                replay.dead_entries += 1;
            }
        }
        cursor = body_start + body_len;
        replay.valid_len = cursor;
        replay.frames += 1;
    }

    replay
}

fn decode_body(body: &[u8]) -> Option<Vec<BatchOperation>> {
    let mut cursor = 0;
    let count = read_u32_checked(body, &mut cursor)? as usize;
    let mut operations = Vec::with_capacity(count.min(body.len()));
    for _ in 0..count {
        let tag = *body.get(cursor)?;
        cursor += 1;
        let key = read_slice(body, &mut cursor)?.to_vec();
        match tag {
            TAG_PUT => {
                let value = read_slice(body, &mut cursor)?.to_vec();
                operations.push(BatchOperation::Put { key, value });
            }
            TAG_DELETE => operations.push(BatchOperation::Delete { key }),
            _ => return None,
        }
    }
    (cursor == body.len()).then_some(operations)
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    let mut buf = [0u8; 4];
    buf.copy_from_slice(&bytes[at..at + 4]);
    u32::from_le_bytes(buf)
}

fn read_u32_checked(bytes: &[u8], cursor: &mut usize) -> Option<u32> {
    let slice = bytes.get(*cursor..*cursor + 4)?;
    *cursor += 4;
    Some(u32::from_le_bytes(slice.try_into().ok()?))
}

fn read_slice<'a>(bytes: &'a [u8], cursor: &mut usize) -> Option<&'a [u8]> {
    let len = read_u32_checked(bytes, cursor)? as usize;
    let slice = bytes.get(*cursor..*cursor + len)?;
    *cursor += len;
    Some(slice)
}

/// Best-effort fsync of the directory holding `path`, so a rename survives
/// power loss.
pub(crate) fn sync_parent_dir(path: &Path) {
    #[cfg(unix)]
    if let Some(parent) = path.parent() {
        if let Ok(dir) = File::open(parent) {
            let _ = dir.sync_all();
        }
    }
    #[cfg(not(unix))]
    let _ = path;
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn journal_path(dir: &TempDir) -> PathBuf {
        dir.path().join("index.journal")
    }

    #[test]
    fn test_persists_across_reopen() {
        let dir = TempDir::new().unwrap();
        {
            let mut store = FileBackedKVStore::open(journal_path(&dir)).unwrap();
            store.put(b"a", b"1").unwrap();
            store
                .atomic_batch_write(vec![
                    BatchOperation::put(b"b".to_vec(), b"2".to_vec()),
                    BatchOperation::delete(b"a".to_vec()),
                ])
                .unwrap();
        }

        let store = FileBackedKVStore::open(journal_path(&dir)).unwrap();
        assert_eq!(store.get(b"a").unwrap(), None);
        assert_eq!(store.get(b"b").unwrap(), Some(b"2".to_vec()));
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn test_torn_frame_is_discarded() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        {
            let mut store = FileBackedKVStore::open(&path).unwrap();
            store.put(b"kept", b"yes").unwrap();
            store.put(b"torn", b"no").unwrap();
        }
        let full_len = std::fs::metadata(&path).unwrap().len();
        let file = OpenOptions::new().write(true).open(&path).unwrap();
        file.set_len(full_len - 3).unwrap();
        drop(file);

        let mut store = FileBackedKVStore::open(&path).unwrap();
        assert_eq!(store.get(b"kept").unwrap(), Some(b"yes".to_vec()));
        assert_eq!(store.get(b"torn").unwrap(), None);

        // Appends after the cut replay cleanly.
        store.put(b"after", b"ok").unwrap();
        drop(store);
        let store = FileBackedKVStore::open(&path).unwrap();
        assert_eq!(store.get(b"after").unwrap(), Some(b"ok".to_vec()));
        assert_eq!(store.len(), 2);
    }

    #[test]
    fn test_checksum_mismatch_stops_replay() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        {
            let mut store = FileBackedKVStore::open(&path).unwrap();
            store.put(b"first", b"1").unwrap();
            store.put(b"second", b"2").unwrap();
        }
        let mut bytes = std::fs::read(&path).unwrap();
        let last = bytes.len() - 1;
        bytes[last] ^= 0xFF;
        std::fs::write(&path, &bytes).unwrap();

        let store = FileBackedKVStore::open(&path).unwrap();
        assert_eq!(store.get(b"first").unwrap(), Some(b"1".to_vec()));
        assert_eq!(store.get(b"second").unwrap(), None);
    }

    #[test]
    fn test_compaction_preserves_live_keys() {
        let dir = TempDir::new().unwrap();
        let path = journal_path(&dir);
        let mut store = FileBackedKVStore::open(&path).unwrap();
        for i in 0..(COMPACTION_MIN_DEAD + 10) {
            store.put(b"counter", &(i as u64).to_le_bytes()).unwrap();
        }
        store.put(b"other", b"x").unwrap();
        assert!(store.needs_compaction());

        let before = std::fs::metadata(&path).unwrap().len();
        store.compact().unwrap();
        assert!(!store.needs_compaction());
        assert!(std::fs::metadata(&path).unwrap().len() < before);

        store.put(b"post", b"compaction").unwrap();
        drop(store);

        let store = FileBackedKVStore::open(&path).unwrap();
        assert_eq!(
            store.get(b"counter").unwrap(),
            Some(((COMPACTION_MIN_DEAD + 9) as u64).to_le_bytes().to_vec())
        );
        assert_eq!(store.get(b"other").unwrap(), Some(b"x".to_vec()));
        assert_eq!(store.get(b"post").unwrap(), Some(b"compaction".to_vec()));
    }

    #[test]
    fn test_prefix_scan() {
        let dir = TempDir::new().unwrap();
        let mut store = FileBackedKVStore::open(journal_path(&dir)).unwrap();
        store.put(b"t:tx1", b"a").unwrap();
        store.put(b"t:tx2", b"b").unwrap();
        store.put(b"n:1", b"c").unwrap();
        assert_eq!(store.prefix_scan(b"t:").unwrap().len(), 2);
    }
}
