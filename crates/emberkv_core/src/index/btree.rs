//! B-tree index backend.

use crate::index::{IndexIterator, Indexer};
use crate::record::Position;
use parking_lot::RwLock;
use std::collections::BTreeMap;

/// Ordered index backed by [`BTreeMap`].
///
/// The default backend: ordered iteration comes for free and lookup
/// performance is predictable across key distributions.
#[derive(Debug, Default)]
pub struct BTreeIndex {
    tree: RwLock<BTreeMap<Vec<u8>, Position>>,
}

impl BTreeIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for BTreeIndex {
    fn put(&self, key: Vec<u8>, position: Position) -> bool {
        self.tree.write().insert(key, position);
        true
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        self.tree.read().get(key).copied()
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.tree.write().remove(key);
        true
    }

    fn len(&self) -> usize {
        self.tree.read().len()
    }

    fn iter(&self, reverse: bool) -> IndexIterator {
        let entries = self
            .tree
            .read()
            .iter()
            .map(|(k, v)| (k.clone(), *v))
            .collect();
        IndexIterator::from_sorted(entries, reverse)
    }
}
