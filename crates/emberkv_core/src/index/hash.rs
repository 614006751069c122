//! Hash map index backend.

use crate::index::{IndexIterator, Indexer};
use crate::record::Position;
use parking_lot::RwLock;
use std::collections::HashMap;

/// Unordered index backed by [`HashMap`].
///
/// Point lookups are O(1); the ordering contract is honored by sorting
/// the snapshot when an iterator is created, so iteration is the
/// expensive operation here.
#[derive(Debug, Default)]
pub struct HashIndex {
    map: RwLock<HashMap<Vec<u8>, Position>>,
}

impl HashIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for HashIndex {
    fn put(&self, key: Vec<u8>, position: Position) -> bool {
        self.map.write().insert(key, position);
        true
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        self.map.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.map.write().remove(key);
        true
    }

    fn len(&self) -> usize {
        self.map.read().len()
    }

    fn iter(&self, reverse: bool) -> IndexIterator {
        let mut entries: Vec<_> = self
            .map
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        entries.sort_by(|a, b| a.0.cmp(&b.0));
        IndexIterator::from_sorted(entries, reverse)
    }
}
