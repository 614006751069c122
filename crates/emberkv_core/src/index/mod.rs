//! In-memory key index.
//!
//! The index maps every live logical key to the disk [`Position`] of
//! its most recent record. It is a replaceable implementation behind
//! the [`Indexer`] trait; the backend is chosen once, at engine
//! construction, via [`IndexKind`].

mod art;
mod btree;
mod filter;
mod hash;
mod skiplist;

pub use art::ArtIndex;
pub use btree::BTreeIndex;
pub use filter::FilteredArtIndex;
pub use hash::HashIndex;
pub use skiplist::SkipListIndex;

use crate::record::Position;
use std::sync::Arc;

/// Which index backend an engine uses.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum IndexKind {
    /// Ordered B-tree map (default).
    #[default]
    BTree,
    /// Adaptive radix tree.
    Art,
    /// Adaptive radix tree behind a probabilistic membership filter.
    ArtFiltered,
    /// Concurrent skip list.
    SkipList,
    /// Hash map; its iterator sorts a snapshot to honor ordering.
    Hash,
}

/// Core index contract.
///
/// `put` and `delete` return `false` only to signal an
/// implementation-level failure - never "key not found". Deleting an
/// absent key is checked at the engine layer before the index is
/// touched.
///
/// Implementations serialize structural mutation internally (a
/// read-write lock, or a lock-free structure with equivalent
/// guarantees), so lookups may run concurrently with each other but
/// never observe a half-applied mutation.
pub trait Indexer: Send + Sync {
    /// Maps `key` to `position`, replacing any previous mapping.
    fn put(&self, key: Vec<u8>, position: Position) -> bool;

    /// Returns the position of `key`, if present.
    fn get(&self, key: &[u8]) -> Option<Position>;

    /// Removes the mapping for `key`.
    fn delete(&self, key: &[u8]) -> bool;

    /// Returns the number of live keys.
    fn len(&self) -> usize;

    /// Returns true if no keys are indexed.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Returns a snapshot iterator over all live keys.
    ///
    /// The snapshot is taken at creation time; later mutations are not
    /// observed.
    fn iter(&self, reverse: bool) -> IndexIterator;
}

/// Constructs the index backend for `kind`.
#[must_use]
pub fn new_indexer(kind: IndexKind) -> Arc<dyn Indexer> {
    match kind {
        IndexKind::BTree => Arc::new(BTreeIndex::new()),
        IndexKind::Art => Arc::new(ArtIndex::new()),
        IndexKind::ArtFiltered => Arc::new(FilteredArtIndex::new()),
        IndexKind::SkipList => Arc::new(SkipListIndex::new()),
        IndexKind::Hash => Arc::new(HashIndex::new()),
    }
}

/// Snapshot cursor over an index.
///
/// Entries are visited in ascending key order, or descending when the
/// iterator was created with `reverse`. The cursor starts on the first
/// entry.
#[derive(Debug)]
pub struct IndexIterator {
    /// Snapshot in visit order.
    entries: Vec<(Vec<u8>, Position)>,
    reverse: bool,
    cursor: usize,
}

impl IndexIterator {
    /// Builds an iterator from an ascending-sorted snapshot.
    pub(crate) fn from_sorted(mut entries: Vec<(Vec<u8>, Position)>, reverse: bool) -> Self {
        if reverse {
            entries.reverse();
        }
        Self {
            entries,
            reverse,
            cursor: 0,
        }
    }

    /// Moves the cursor back to the first entry.
    pub fn rewind(&mut self) {
        self.cursor = 0;
    }

    /// Positions the cursor on the first key `>= target` (or `<=
    /// target` for a reverse iterator).
    pub fn seek(&mut self, target: &[u8]) {
        self.cursor = if self.reverse {
            self.entries
                .partition_point(|(key, _)| key.as_slice() > target)
        } else {
            self.entries
                .partition_point(|(key, _)| key.as_slice() < target)
        };
    }

    /// Advances the cursor by one entry.
    pub fn next(&mut self) {
        if self.cursor < self.entries.len() {
            self.cursor += 1;
        }
    }

    /// Returns true while the cursor points at an entry.
    #[must_use]
    pub fn valid(&self) -> bool {
        self.cursor < self.entries.len()
    }

    /// Returns the current key.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not [`valid`](Self::valid).
    #[must_use]
    pub fn key(&self) -> &[u8] {
        &self.entries[self.cursor].0
    }

    /// Returns the current position.
    ///
    /// # Panics
    ///
    /// Panics if the iterator is not [`valid`](Self::valid).
    #[must_use]
    pub fn value(&self) -> Position {
        self.entries[self.cursor].1
    }

    /// Releases the snapshot.
    pub fn close(&mut self) {
        self.entries = Vec::new();
        self.cursor = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(offset: i64) -> Position {
        Position::new(0, offset)
    }

    fn sample() -> Vec<(Vec<u8>, Position)> {
        vec![
            (b"aardvark".to_vec(), pos(0)),
            (b"badger".to_vec(), pos(10)),
            (b"crane".to_vec(), pos(20)),
            (b"dove".to_vec(), pos(30)),
        ]
    }

    /// Shared contract checks run against every backend.
    fn check_indexer_contract(index: &dyn Indexer) {
        assert!(index.is_empty());
        assert!(index.get(b"missing").is_none());

        assert!(index.put(b"alpha".to_vec(), pos(1)));
        assert!(index.put(b"beta".to_vec(), pos(2)));
        assert!(index.put(b"gamma".to_vec(), pos(3)));
        assert_eq!(index.len(), 3);

        assert_eq!(index.get(b"beta"), Some(pos(2)));

        // Overwrite replaces the position.
        assert!(index.put(b"beta".to_vec(), pos(22)));
        assert_eq!(index.get(b"beta"), Some(pos(22)));
        assert_eq!(index.len(), 3);

        assert!(index.delete(b"beta"));
        assert!(index.get(b"beta").is_none());
        assert_eq!(index.len(), 2);

        // Ascending iteration visits every live key exactly once.
        let mut it = index.iter(false);
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"alpha".to_vec(), b"gamma".to_vec()]);

        // Descending iteration reverses the order.
        let mut it = index.iter(true);
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(keys, vec![b"gamma".to_vec(), b"alpha".to_vec()]);
    }

    #[test]
    fn every_backend_honors_the_contract() {
        for kind in [
            IndexKind::BTree,
            IndexKind::Art,
            IndexKind::ArtFiltered,
            IndexKind::SkipList,
            IndexKind::Hash,
        ] {
            let index = new_indexer(kind);
            check_indexer_contract(index.as_ref());
        }
    }

    #[test]
    fn iterator_snapshot_ignores_later_mutations() {
        let index = new_indexer(IndexKind::BTree);
        index.put(b"one".to_vec(), pos(1));

        let it = index.iter(false);
        index.put(b"two".to_vec(), pos(2));
        index.delete(b"one");

        assert!(it.valid());
        assert_eq!(it.key(), b"one");
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn seek_forward() {
        let mut it = IndexIterator::from_sorted(sample(), false);

        it.seek(b"badger");
        assert_eq!(it.key(), b"badger");

        it.seek(b"bz");
        assert_eq!(it.key(), b"crane");

        it.seek(b"zzz");
        assert!(!it.valid());
    }

    #[test]
    fn seek_reverse() {
        let mut it = IndexIterator::from_sorted(sample(), true);
        assert_eq!(it.key(), b"dove");

        it.seek(b"crane");
        assert_eq!(it.key(), b"crane");

        it.seek(b"bz");
        assert_eq!(it.key(), b"badger");

        it.seek(b"a");
        assert!(!it.valid());
    }

    #[test]
    fn rewind_restarts_iteration() {
        let mut it = IndexIterator::from_sorted(sample(), false);
        it.next();
        it.next();
        it.rewind();
        assert_eq!(it.key(), b"aardvark");
    }

    #[test]
    fn close_invalidates() {
        let mut it = IndexIterator::from_sorted(sample(), false);
        it.close();
        assert!(!it.valid());
    }
}
