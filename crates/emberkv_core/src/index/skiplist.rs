//! Skip list index backend.

use crate::index::{IndexIterator, Indexer};
use crate::record::Position;
use crossbeam_skiplist::SkipMap;

/// Ordered index backed by a lock-free [`SkipMap`].
///
/// The skip list synchronizes internally, so mutations never block
/// concurrent lookups; there is no outer lock to take.
#[derive(Debug, Default)]
pub struct SkipListIndex {
    map: SkipMap<Vec<u8>, Position>,
}

impl SkipListIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

impl Indexer for SkipListIndex {
    fn put(&self, key: Vec<u8>, position: Position) -> bool {
        self.map.insert(key, position);
        true
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        self.map.get(key).map(|entry| *entry.value())
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.map.remove(key);
        true
    }

    fn len(&self) -> usize {
        self.map.len()
    }

    fn iter(&self, reverse: bool) -> IndexIterator {
        let entries = self
            .map
            .iter()
            .map(|entry| (entry.key().clone(), *entry.value()))
            .collect();
        IndexIterator::from_sorted(entries, reverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn ordered_iteration() {
        let index = SkipListIndex::new();
        index.put(b"c".to_vec(), Position::new(0, 2));
        index.put(b"a".to_vec(), Position::new(0, 0));
        index.put(b"b".to_vec(), Position::new(0, 1));

        let mut it = index.iter(false);
        assert_eq!(it.key(), b"a");
        it.next();
        assert_eq!(it.key(), b"b");
        it.next();
        assert_eq!(it.key(), b"c");
    }

    #[test]
    fn concurrent_writers_do_not_lose_keys() {
        let index = Arc::new(SkipListIndex::new());
        let mut handles = Vec::new();

        for t in 0..4u8 {
            let index = Arc::clone(&index);
            handles.push(thread::spawn(move || {
                for i in 0..100u32 {
                    let key = format!("{t}-{i:03}").into_bytes();
                    index.put(key, Position::new(u32::from(t), i64::from(i)));
                }
            }));
        }
        for handle in handles {
            handle.join().unwrap();
        }

        assert_eq!(index.len(), 400);
    }
}
