//! Engine-level iteration.

use crate::db::Db;
use crate::error::EngineResult;
use crate::index::IndexIterator;
use crate::options::IteratorOptions;

/// Cursor over the live keys of a [`Db`].
///
/// Wraps an index snapshot and resolves values lazily, one disk read
/// per [`value`](Self::value) call. A non-empty prefix restricts the
/// visited keys; the cursor skips non-matching entries after every
/// motion, so `valid` and `key` only ever observe matching keys.
#[derive(Debug)]
pub struct DbIterator<'a> {
    db: &'a Db,
    index_iter: IndexIterator,
    prefix: Vec<u8>,
}

impl<'a> DbIterator<'a> {
    pub(crate) fn new(db: &'a Db, options: IteratorOptions) -> Self {
        let mut it = Self {
            index_iter: db.index.iter(options.reverse),
            prefix: options.prefix,
            db,
        };
        it.skip_to_prefix();
        it
    }

    /// Moves the cursor back to the first matching entry.
    pub fn rewind(&mut self) {
        self.index_iter.rewind();
        self.skip_to_prefix();
    }

    /// Positions the cursor on the first matching key at or beyond
    /// `target` in iteration order.
    pub fn seek(&mut self, target: &[u8]) {
        self.index_iter.seek(target);
        self.skip_to_prefix();
    }

    /// Advances to the next matching entry.
    pub fn next(&mut self) {
        self.index_iter.next();
        self.skip_to_prefix();
    }

    /// Returns true while the cursor points at an entry.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.index_iter.valid()
    }

    /// Returns the current key.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not [`valid`](Self::valid).
    #[must_use]
    pub fn key(&self) -> &[u8] {
        self.index_iter.key()
    }

    /// Reads the current value from disk.
    ///
    /// # Errors
    ///
    /// Returns an error if the read fails.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not [`valid`](Self::valid).
    pub fn value(&self) -> EngineResult<Vec<u8>> {
        self.db.value_at(self.index_iter.value())
    }

    /// Releases the snapshot.
    pub fn close(&mut self) {
        self.index_iter.close();
    }

    /// Advances past entries that do not carry the prefix.
    fn skip_to_prefix(&mut self) {
        if self.prefix.is_empty() {
            return;
        }
        while self.index_iter.valid() && !self.index_iter.key().starts_with(&self.prefix) {
            self.index_iter.next();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::options::Options;
    use tempfile::tempdir;

    fn seeded_db(dir: &std::path::Path, keys: &[&[u8]]) -> Db {
        let db = Db::open(Options::new(dir)).unwrap();
        for key in keys {
            db.put(key, key).unwrap();
        }
        db
    }

    #[test]
    fn full_scan_forward_and_reverse() {
        let dir = tempdir().unwrap();
        let db = seeded_db(dir.path(), &[b"b", b"a", b"c"]);

        let mut it = db.iter(IteratorOptions::default());
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"a".to_vec(), b"b".to_vec(), b"c".to_vec()]);

        let mut it = db.iter(IteratorOptions::default().reverse(true));
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"c".to_vec(), b"b".to_vec(), b"a".to_vec()]);
    }

    #[test]
    fn prefix_filters_every_motion() {
        let dir = tempdir().unwrap();
        let db = seeded_db(dir.path(), &[b"abcd", b"efjh", b"aefg", b"cdef", b"bcdg"]);

        let mut it = db.iter(IteratorOptions::default().prefix(b"ae".to_vec()));
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"aefg".to_vec()]);
    }

    #[test]
    fn values_resolve_through_the_engine() {
        let dir = tempdir().unwrap();
        let db = Db::open(Options::new(dir.path())).unwrap();
        db.put(b"k1", b"v1").unwrap();
        db.put(b"k2", b"v2").unwrap();

        let mut it = db.iter(IteratorOptions::default());
        assert_eq!(it.value().unwrap(), b"v1");
        it.next();
        assert_eq!(it.value().unwrap(), b"v2");
    }

    #[test]
    fn seek_then_rewind() {
        let dir = tempdir().unwrap();
        let db = seeded_db(dir.path(), &[b"alpha", b"beta", b"gamma"]);

        let mut it = db.iter(IteratorOptions::default());
        it.seek(b"b");
        assert_eq!(it.key(), b"beta");
        it.rewind();
        assert_eq!(it.key(), b"alpha");
    }
}
