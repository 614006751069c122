//! Atomic write batches.
//!
//! A batch stages mutations in memory and makes them durable in one
//! commit. Every staged record is written with the batch's sequence
//! number prefixed to its key, followed by a single commit marker
//! under the same sequence number. Recovery applies a transaction only
//! after seeing its marker, so a crash mid-commit leaves no partial
//! effects.

use crate::db::Db;
use crate::error::{EngineError, EngineResult};
use crate::options::WriteBatchOptions;
use crate::record::{encode_record_key, Record, RecordKind};
use parking_lot::Mutex;
use std::collections::HashMap;
use tracing::debug;

/// Key of the per-transaction commit marker record.
const TXN_COMMIT_KEY: &[u8] = b"txn-commit";

/// A set of writes applied atomically.
///
/// Staging is last-write-wins per key. The batch holds no engine lock
/// until [`commit`](Self::commit), which runs under the same exclusive
/// lock as single-record writes.
pub struct WriteBatch<'a> {
    db: &'a Db,
    options: WriteBatchOptions,
    staged: Mutex<HashMap<Vec<u8>, Record>>,
}

impl<'a> WriteBatch<'a> {
    pub(crate) fn new(db: &'a Db, options: WriteBatchOptions) -> Self {
        Self {
            db,
            options,
            staged: Mutex::new(HashMap::new()),
        }
    }

    /// Stages a put of `value` under `key`.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyKey`] for an empty key.
    pub fn put(&self, key: &[u8], value: &[u8]) -> EngineResult<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }
        self.staged
            .lock()
            .insert(key.to_vec(), Record::normal(key.to_vec(), value.to_vec()));
        Ok(())
    }

    /// Stages a delete of `key`.
    ///
    /// Deleting a key that exists neither in the batch nor in the
    /// engine un-stages any earlier staged write and otherwise does
    /// nothing, so the commit writes no pointless tombstone.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::EmptyKey`] for an empty key.
    pub fn delete(&self, key: &[u8]) -> EngineResult<()> {
        if key.is_empty() {
            return Err(EngineError::EmptyKey);
        }

        let mut staged = self.staged.lock();
        if self.db.index.get(key).is_none() {
            staged.remove(key);
            return Ok(());
        }
        staged.insert(key.to_vec(), Record::tombstone(key.to_vec()));
        Ok(())
    }

    /// Makes every staged mutation durable and visible atomically.
    ///
    /// # Errors
    ///
    /// Returns [`EngineError::BatchTooLarge`] when the staged count
    /// exceeds the configured maximum, or an I/O error from an append;
    /// on an append error nothing becomes visible.
    pub fn commit(&self) -> EngineResult<()> {
        let mut staged = self.staged.lock();
        if staged.is_empty() {
            return Ok(());
        }
        if staged.len() > self.options.max_batch_num as usize {
            return Err(EngineError::BatchTooLarge {
                count: staged.len(),
                max: self.options.max_batch_num,
            });
        }

        // One critical section with single-record writes: appends, the
        // marker, and index application cannot interleave with them.
        let mut inner = self.db.inner_write();
        let seq_no = self.db.next_seq_no();

        let mut positions = HashMap::with_capacity(staged.len());
        for (key, record) in staged.iter() {
            let sequenced = Record {
                key: encode_record_key(&record.key, seq_no),
                value: record.value.clone(),
                kind: record.kind,
            };
            let position = self.db.append_record_locked(&mut inner, &sequenced)?;
            positions.insert(key.clone(), position);
        }

        let marker = Record {
            key: encode_record_key(TXN_COMMIT_KEY, seq_no),
            value: Vec::new(),
            kind: RecordKind::TxnCommit,
        };
        self.db.append_record_locked(&mut inner, &marker)?;

        if self.options.sync_on_commit {
            inner.active.sync()?;
        }

        for (key, record) in staged.iter() {
            let ok = match record.kind {
                RecordKind::Tombstone => self.db.index.delete(key),
                _ => self.db.index.put(key.clone(), positions[key]),
            };
            if !ok {
                return Err(EngineError::IndexUpdateFailed);
            }
        }

        debug!(seq_no, records = staged.len(), "batch committed");
        staged.clear();
        Ok(())
    }
}

impl std::fmt::Debug for WriteBatch<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteBatch")
            .field("staged", &self.staged.lock().len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use tempfile::tempdir;

    #[test]
    fn committed_batch_is_visible() {
        let dir = tempdir().unwrap();
        let db = Db::open(Options::new(dir.path())).unwrap();

        let batch = db.new_write_batch(WriteBatchOptions::default());
        batch.put(b"a", b"1").unwrap();
        batch.put(b"b", b"2").unwrap();
        batch.commit().unwrap();

        assert_eq!(db.get(b"a").unwrap(), b"1");
        assert_eq!(db.get(b"b").unwrap(), b"2");
    }

    #[test]
    fn uncommitted_batch_is_invisible() {
        let dir = tempdir().unwrap();
        let db = Db::open(Options::new(dir.path())).unwrap();

        let batch = db.new_write_batch(WriteBatchOptions::default());
        batch.put(b"ghost", b"boo").unwrap();

        assert!(matches!(db.get(b"ghost"), Err(EngineError::KeyNotFound)));
    }

    #[test]
    fn staging_is_last_write_wins() {
        let dir = tempdir().unwrap();
        let db = Db::open(Options::new(dir.path())).unwrap();

        let batch = db.new_write_batch(WriteBatchOptions::default());
        batch.put(b"k", b"first").unwrap();
        batch.put(b"k", b"second").unwrap();
        batch.commit().unwrap();

        assert_eq!(db.get(b"k").unwrap(), b"second");
    }

    #[test]
    fn delete_of_unknown_key_unstages() {
        let dir = tempdir().unwrap();
        let db = Db::open(Options::new(dir.path())).unwrap();

        let batch = db.new_write_batch(WriteBatchOptions::default());
        batch.put(b"k", b"v").unwrap();
        batch.delete(b"k").unwrap();
        batch.commit().unwrap();

        assert!(matches!(db.get(b"k"), Err(EngineError::KeyNotFound)));
        // Nothing was staged, so no transaction hit the log.
        assert_eq!(db.stat().unwrap().segment_count, 1);
    }

    #[test]
    fn batch_delete_of_existing_key_applies() {
        let dir = tempdir().unwrap();
        let db = Db::open(Options::new(dir.path())).unwrap();
        db.put(b"k", b"v").unwrap();

        let batch = db.new_write_batch(WriteBatchOptions::default());
        batch.delete(b"k").unwrap();
        batch.commit().unwrap();

        assert!(matches!(db.get(b"k"), Err(EngineError::KeyNotFound)));
    }

    #[test]
    fn oversized_batch_is_rejected() {
        let dir = tempdir().unwrap();
        let db = Db::open(Options::new(dir.path())).unwrap();

        let batch = db.new_write_batch(WriteBatchOptions::default().max_batch_num(2));
        batch.put(b"a", b"1").unwrap();
        batch.put(b"b", b"2").unwrap();
        batch.put(b"c", b"3").unwrap();

        assert!(matches!(
            batch.commit(),
            Err(EngineError::BatchTooLarge { count: 3, max: 2 })
        ));
    }

    #[test]
    fn empty_commit_is_a_no_op() {
        let dir = tempdir().unwrap();
        let db = Db::open(Options::new(dir.path())).unwrap();

        let batch = db.new_write_batch(WriteBatchOptions::default());
        batch.commit().unwrap();
        assert_eq!(db.stat().unwrap().key_count, 0);
    }

    #[test]
    fn sequence_numbers_advance_per_commit() {
        let dir = tempdir().unwrap();
        let db = Db::open(Options::new(dir.path())).unwrap();

        for i in 0..3u32 {
            let batch = db.new_write_batch(WriteBatchOptions::default());
            batch.put(format!("k{i}").as_bytes(), b"v").unwrap();
            batch.commit().unwrap();
        }
        assert_eq!(db.seq_no.load(std::sync::atomic::Ordering::SeqCst), 3);
    }
}
