//! The storage engine.
//!
//! A [`Db`] owns one data directory: an active append-only segment,
//! the sealed segments before it, and an in-memory index mapping every
//! live key to the position of its newest record. Reads resolve
//! through the index; writes append to the active segment and update
//! the index under one exclusive lock.

use crate::batch::WriteBatch;
use crate::data_file::{DataFile, DATA_FILE_SUFFIX, HINT_FILE_NAME, MERGE_FINISHED_FILE_NAME};
use crate::error::{EngineError, EngineResult};
use crate::index::{new_indexer, Indexer};
use crate::iterator::DbIterator;
use crate::options::{IteratorOptions, Options, WriteBatchOptions};
use crate::record::{
    decode_record_key, encode_record_key, Position, Record, RecordKind, NON_TXN_SEQ_NO,
};
use emberkv_storage::IoFactory;
use fs2::FileExt;
use parking_lot::{RwLock, RwLockWriteGuard};
use std::collections::HashMap;
use std::fs::{self, File};
use std::path::Path;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Filename of the advisory single-process lock.
pub(crate) const FILE_LOCK_NAME: &str = "LOCK";

/// Segment files guarded by the engine lock.
pub(crate) struct DbInner {
    /// Segment currently receiving appends.
    pub(crate) active: DataFile,
    /// Sealed segments by id, shared so merge can scan them while
    /// reads continue.
    pub(crate) older: HashMap<u32, Arc<DataFile>>,
}

/// Point-in-time engine statistics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Stat {
    /// Number of segment files, active included.
    pub segment_count: usize,
    /// Number of live keys in the index.
    pub key_count: usize,
    /// Lower-bound estimate of bytes a merge would reclaim.
    pub reclaimable_size: u64,
    /// Bytes the data directory holds: segments at their logical
    /// length plus auxiliary files.
    pub disk_size: u64,
}

/// An embedded log-structured key-value store.
pub struct Db {
    pub(crate) options: Options,
    pub(crate) inner: RwLock<DbInner>,
    pub(crate) index: Arc<dyn Indexer>,
    /// Last allocated transaction sequence number.
    pub(crate) seq_no: AtomicU64,
    pub(crate) merging: AtomicBool,
    pub(crate) io_factory: IoFactory,
    lock_file: File,
    /// Estimated dead bytes accumulated since open or last merge.
    reclaimable: AtomicU64,
}

impl Db {
    /// Opens the engine over `options.dir_path`, creating the
    /// directory if needed and rebuilding the index from disk.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::InvalidOptions`] for a bad
    /// configuration, [`EngineError::DatabaseLocked`] when another
    /// process holds the directory, and decode errors when replay
    /// encounters corrupt state.
    pub fn open(options: Options) -> EngineResult<Self> {
        options.validate()?;
        fs::create_dir_all(&options.dir_path)?;

        let lock_file = File::options()
            .read(true)
            .write(true)
            .create(true)
            .truncate(false)
            .open(options.dir_path.join(FILE_LOCK_NAME))?;
        lock_file
            .try_lock_exclusive()
            .map_err(|_| EngineError::DatabaseLocked)?;

        crate::merge::load_merge_files(&options.dir_path)?;

        let io_factory = IoFactory::new(options.io_kind, options.max_segment_size);
        let mut file_ids = segment_ids(&options.dir_path)?;
        file_ids.sort_unstable();

        let mut older = HashMap::new();
        let active = match file_ids.split_last() {
            Some((&active_id, sealed_ids)) => {
                for &id in sealed_ids {
                    older.insert(id, Arc::new(DataFile::open(&options.dir_path, id, &io_factory)?));
                }
                DataFile::open(&options.dir_path, active_id, &io_factory)?
            }
            None => DataFile::open(&options.dir_path, 0, &io_factory)?,
        };

        let index = new_indexer(options.index_kind);
        let db = Self {
            inner: RwLock::new(DbInner { active, older }),
            index,
            seq_no: AtomicU64::new(NON_TXN_SEQ_NO),
            merging: AtomicBool::new(false),
            io_factory,
            lock_file,
            reclaimable: AtomicU64::new(0),
            options,
        };

        db.load_index_from_hint_file()?;
        db.load_index_from_data_files(&file_ids)?;

        info!(
            dir = %db.options.dir_path.display(),
            segments = file_ids.len().max(1),
            keys = db.index.len(),
            "engine opened"
        );
        Ok(db)
    }

    /// Stores `value` under `key`, replacing any previous value.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyKey`] for an empty key, or an I/O
    /// error from the append.
    pub fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }

        let record = Record::normal(encode_record_key(key, NON_TXN_SEQ_NO), value.to_vec());
        let mut inner = self.inner.write();
        let overwriting = self.index.get(key).is_some();
        let position = self.append_record_locked(&mut inner, &record)?;

        if !self.index.put(key.to_vec(), position) {
            return Err(EngineError::IndexUpdateFailed);
        }
        if overwriting {
            // The superseded record is roughly this size: same key,
            // old value.
            self.reclaimable
                .fetch_add(record.encoded_size() as u64, Ordering::Relaxed);
        }
        Ok(())
    }

    /// Returns the value stored under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyKey`] for an empty key and
    /// [`EngineError::KeyNotFound`] when the key is absent or deleted.
    pub fn get(&self, key: &[u8]) -> EngineResult<Vec<u8>> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        let position = self.index.get(key).ok_or(EngineError::KeyNotFound)?;
        self.value_at(position)
    }

    /// Removes `key`. Deleting an absent key succeeds without writing.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyKey`] for an empty key, or an I/O
    /// error from the tombstone append.
    pub fn delete(&self, key: &[u8]) -> EngineResult<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        if self.index.get(key).is_none() {
            return Ok(());
        }

        let record = Record::tombstone(encode_record_key(key, NON_TXN_SEQ_NO));
        let mut inner = self.inner.write();
        self.append_record_locked(&mut inner, &record)?;

        if !self.index.delete(key) {
            return Err(EngineError::IndexUpdateFailed);
        }
        // The tombstone itself is dead weight the moment it lands.
        self.reclaimable
            .fetch_add(record.encoded_size() as u64, Ordering::Relaxed);
        Ok(())
    }

    /// Calls `f` for every live key-value pair over a point-in-time
    /// index snapshot, stopping early when `f` returns `false`.
    ///
    /// Values are resolved lazily, one read per visited key.
    ///
    /// # Errors
    ///
    /// Returns an error if a value read fails.
    pub fn fold(&self, mut f: impl FnMut(&[u8], Vec<u8>) -> bool) -> EngineResult<()> {
        let mut it = self.index.iter(false);
        while it.valid() {
            let value = self.value_at(it.value())?;
            if !f(it.key(), value) {
                break;
            }
            it.next();
        }
        Ok(())
    }

    /// Returns every live key in ascending order.
    #[must_use]
    pub fn list_keys(&self) -> Vec<Vec<u8>> {
        let mut it = self.index.iter(false);
        let mut keys = Vec::with_capacity(self.index.len());
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        keys
    }

    /// Creates an iterator over the live keys.
    #[must_use]
    pub fn iter(&self, options: IteratorOptions) -> DbIterator<'_> {
        DbIterator::new(self, options)
    }

    /// Creates an empty write batch bound to this engine.
    #[must_use]
    pub fn new_write_batch(&self, options: WriteBatchOptions) -> WriteBatch<'_> {
        WriteBatch::new(self, options)
    }

    /// Returns engine statistics.
    ///
    /// The reclaimable figure is a lower bound: it counts bytes known
    /// to be dead since open, not dead bytes inherited from earlier
    /// runs.
    ///
    /// # Errors
    ///
    /// Returns an error if the directory cannot be sized.
    pub fn stat(&self) -> EngineResult<Stat> {
        let inner = self.inner.read();

        // Segments are counted at their logical length: file metadata
        // lags behind the buffered backend's write buffer and runs
        // ahead of the memory-mapped backend's pre-sized capacity.
        let mut disk_size = inner.active.write_offset();
        for file in inner.older.values() {
            disk_size += file.write_offset();
        }
        for entry in fs::read_dir(&self.options.dir_path)? {
            let entry = entry?;
            let name = entry.file_name();
            if name.to_str().is_some_and(|n| n.ends_with(DATA_FILE_SUFFIX)) {
                continue;
            }
            disk_size += entry.metadata()?.len();
        }
        Ok(Stat {
            segment_count: inner.older.len() + 1,
            key_count: self.index.len(),
            reclaimable_size: self.reclaimable.load(Ordering::Relaxed),
            disk_size,
        })
    }

    /// Flushes the active segment to durable storage.
    ///
    /// # Errors
    ///
    /// Returns an error if the flush fails.
    pub fn sync(&self) -> EngineResult<()> {
        self.inner.read().active.sync()
    }

    /// Syncs and closes every segment, then releases the directory
    /// lock. Further operations fail with a closed-backend error.
    ///
    /// # Errors
    ///
    /// Returns the first close failure.
    pub fn close(&self) -> EngineResult<()> {
        let inner = self.inner.read();
        inner.active.sync()?;
        inner.active.close()?;
        for file in inner.older.values() {
            file.close()?;
        }
        fs2::FileExt::unlock(&self.lock_file)?;
        info!(dir = %self.options.dir_path.display(), "engine closed");
        Ok(())
    }

    /// Appends `record` to the active segment, rotating first when the
    /// record would not fit. Caller holds the engine write lock.
    pub(crate) fn append_record_locked(
        &self,
        inner: &mut DbInner,
        record: &Record,
    ) -> EngineResult<Position> {
        let (encoded, len) = record.encode();

        if inner.active.write_offset() + len as u64 > self.options.max_segment_size
            && inner.active.write_offset() > 0
        {
            self.rotate_active(inner)?;
        }

        let offset = inner.active.write_offset();
        inner.active.append(&encoded)?;
        if self.options.sync_writes {
            inner.active.sync()?;
        }
        Ok(Position::new(inner.active.file_id(), offset as i64))
    }

    /// Seals the active segment into the older map and opens its
    /// successor.
    pub(crate) fn rotate_active(&self, inner: &mut DbInner) -> EngineResult<()> {
        inner.active.sync()?;
        let next_id = inner.active.file_id() + 1;
        let next = DataFile::open(&self.options.dir_path, next_id, &self.io_factory)?;
        let sealed = std::mem::replace(&mut inner.active, next);
        debug!(sealed = sealed.file_id(), active = next_id, "segment rotated");
        inner.older.insert(sealed.file_id(), Arc::new(sealed));
        Ok(())
    }

    /// Acquires the engine write lock. Used by batch commit so staged
    /// records and their index application form one critical section.
    pub(crate) fn inner_write(&self) -> RwLockWriteGuard<'_, DbInner> {
        self.inner.write()
    }

    /// Allocates the next transaction sequence number.
    pub(crate) fn next_seq_no(&self) -> u64 {
        self.seq_no.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Reads the record at `position` and returns its value.
    pub(crate) fn value_at(&self, position: Position) -> EngineResult<Vec<u8>> {
        let inner = self.inner.read();
        let offset = position.offset as u64;
        let record = if position.file_id == inner.active.file_id() {
            inner.active.read_record(offset)?
        } else {
            let file = inner
                .older
                .get(&position.file_id)
                .ok_or(EngineError::DataFileNotFound {
                    file_id: position.file_id,
                })?;
            file.read_record(offset)?
        };

        match record {
            Some((record, _)) if record.kind == RecordKind::Normal => Ok(record.value),
            // A tombstone position or a position past the segment tail
            // means the key is gone.
            _ => Err(EngineError::KeyNotFound),
        }
    }

    /// Replays the hint index written by the last merge, if present.
    fn load_index_from_hint_file(&self) -> EngineResult<()> {
        if !self.options.dir_path.join(HINT_FILE_NAME).is_file() {
            return Ok(());
        }

        let hint = DataFile::hint_file(&self.options.dir_path, &self.io_factory)?;
        let mut offset = 0u64;
        let mut loaded = 0usize;
        while let Some((record, len)) = hint.read_record(offset)? {
            let position = Position::decode(&record.value)?;
            if !self.index.put(record.key, position) {
                return Err(EngineError::IndexUpdateFailed);
            }
            offset += len;
            loaded += 1;
        }
        debug!(keys = loaded, "hint index replayed");
        Ok(())
    }

    /// Replays every segment at or above the merge boundary,
    /// re-deriving the index and the last sequence number.
    ///
    /// Records carrying a nonzero sequence number are buffered per
    /// transaction and applied only when that transaction's commit
    /// marker appears; uncommitted tails are discarded.
    fn load_index_from_data_files(&self, file_ids: &[u32]) -> EngineResult<()> {
        let boundary = self.merge_boundary()?;
        let inner = self.inner.read();

        let mut pending: HashMap<u64, Vec<(RecordKind, Vec<u8>, Position)>> = HashMap::new();
        let mut max_seq = NON_TXN_SEQ_NO;
        let mut active_cursor = 0u64;

        let mut replay_ids: Vec<u32> = file_ids.to_vec();
        if replay_ids.is_empty() {
            replay_ids.push(inner.active.file_id());
        }

        for &file_id in &replay_ids {
            if file_id < boundary {
                continue;
            }
            let file: &DataFile = if file_id == inner.active.file_id() {
                &inner.active
            } else {
                inner
                    .older
                    .get(&file_id)
                    .ok_or(EngineError::DataFileNotFound { file_id })?
            };

            let mut offset = 0u64;
            while let Some((record, len)) = file.read_record(offset)? {
                let (key, seq_no) = decode_record_key(&record.key)?;
                max_seq = max_seq.max(seq_no);

                let position = Position::new(file_id, offset as i64);
                match record.kind {
                    RecordKind::TxnCommit => {
                        for (kind, key, position) in pending.remove(&seq_no).unwrap_or_default() {
                            self.apply_to_index(kind, key, position)?;
                        }
                    }
                    kind if seq_no == NON_TXN_SEQ_NO => {
                        self.apply_to_index(kind, key, position)?;
                    }
                    kind => {
                        pending.entry(seq_no).or_default().push((kind, key, position));
                    }
                }
                offset += len;
            }

            if file_id == inner.active.file_id() {
                active_cursor = offset;
            }
        }

        if !pending.is_empty() {
            warn!(
                transactions = pending.len(),
                "discarding uncommitted transaction tails"
            );
        }

        // Re-establish the active cursor at the end of the last valid
        // record, zeroing any torn tail or leftover mapped capacity.
        if active_cursor < inner.active.write_offset() {
            inner.active.truncate(active_cursor)?;
        }

        self.seq_no.store(max_seq, Ordering::SeqCst);
        Ok(())
    }

    /// Applies one replayed record to the index.
    fn apply_to_index(&self, kind: RecordKind, key: Vec<u8>, position: Position) -> EngineResult<()> {
        let ok = match kind {
            RecordKind::Normal => self.index.put(key, position),
            RecordKind::Tombstone => self.index.delete(&key),
            RecordKind::TxnCommit => true,
        };
        if !ok {
            return Err(EngineError::IndexUpdateFailed);
        }
        Ok(())
    }

    /// Returns the first non-merged segment id, or 0 when no merge has
    /// completed. Segments below the boundary are covered by the hint
    /// index and skipped during replay.
    fn merge_boundary(&self) -> EngineResult<u32> {
        if !self
            .options
            .dir_path
            .join(MERGE_FINISHED_FILE_NAME)
            .is_file()
        {
            return Ok(0);
        }

        let marker = DataFile::merge_finished_file(&self.options.dir_path, &self.io_factory)?;
        let Some((record, _)) = marker.read_record(0)? else {
            return Err(EngineError::invalid_data_dir("empty merge-finished marker"));
        };
        let text = std::str::from_utf8(&record.value)
            .map_err(|_| EngineError::invalid_data_dir("merge boundary is not UTF-8"))?;
        text.parse::<u32>()
            .map_err(|_| EngineError::invalid_data_dir("merge boundary is not a number"))
    }

    /// Forgets accumulated reclaimable bytes after a merge rewrote the
    /// sealed segments.
    pub(crate) fn reset_reclaimable(&self) {
        self.reclaimable.store(0, Ordering::Relaxed);
    }
}

impl Drop for Db {
    fn drop(&mut self) {
        // Best effort; explicit close reports errors.
        let _ = self.close();
    }
}

impl std::fmt::Debug for Db {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Db")
            .field("dir", &self.options.dir_path)
            .field("keys", &self.index.len())
            .finish_non_exhaustive()
    }
}

/// Collects the segment ids present in `dir`.
///
/// A file with the `.data` suffix whose stem is not a number means the
/// directory was tampered with, and is a hard error.
fn segment_ids(dir: &Path) -> EngineResult<Vec<u32>> {
    let mut ids = Vec::new();
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let name = entry.file_name();
        let Some(name) = name.to_str() else {
            continue;
        };
        let Some(stem) = name.strip_suffix(DATA_FILE_SUFFIX) else {
            continue;
        };
        let id = stem.parse::<u32>().map_err(|_| {
            EngineError::invalid_data_dir(format!("malformed segment filename {name:?}"))
        })?;
        ids.push(id);
    }
    Ok(ids)
}
