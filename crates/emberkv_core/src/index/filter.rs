//! Filtered radix tree index backend.
//!
//! Wraps [`ArtIndex`] with a Bloom filter so lookups for keys that
//! were never written skip the tree descent entirely. The filter only
//! ever produces false positives, so a filter hit still falls through
//! to the tree for the authoritative answer.

use crate::index::art::ArtIndex;
use crate::index::{IndexIterator, Indexer};
use crate::record::Position;
use parking_lot::RwLock;
use std::collections::hash_map::DefaultHasher;
use std::hash::Hasher;

/// Bits per expected key. At 8 hashes this keeps the false positive
/// rate near half a percent while the filter stays within capacity.
const BITS_PER_KEY: usize = 10;
const HASH_COUNT: u64 = 8;
const INITIAL_KEYS: usize = 1 << 16;

/// Fixed-size Bloom filter over key bytes.
///
/// Uses double hashing: two independent 64-bit hashes are combined as
/// `h1 + i * h2` to derive each probe, so only two hash passes are
/// paid per operation regardless of `HASH_COUNT`.
#[derive(Debug)]
struct BloomFilter {
    bits: Vec<u64>,
    nbits: u64,
}

impl BloomFilter {
    fn with_capacity(expected_keys: usize) -> Self {
        let nbits = (expected_keys * BITS_PER_KEY).max(64) as u64;
        Self {
            bits: vec![0; nbits.div_ceil(64) as usize],
            nbits,
        }
    }

    fn hash_pair(key: &[u8]) -> (u64, u64) {
        let mut h1 = DefaultHasher::new();
        h1.write(key);
        let mut h2 = DefaultHasher::new();
        h2.write(&[0xb5]);
        h2.write(key);
        // The second probe must be odd so every bit stays reachable.
        (h1.finish(), h2.finish() | 1)
    }

    fn insert(&mut self, key: &[u8]) {
        let (h1, h2) = Self::hash_pair(key);
        for i in 0..HASH_COUNT {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.nbits;
            self.bits[(bit / 64) as usize] |= 1 << (bit % 64);
        }
    }

    fn may_contain(&self, key: &[u8]) -> bool {
        let (h1, h2) = Self::hash_pair(key);
        (0..HASH_COUNT).all(|i| {
            let bit = h1.wrapping_add(i.wrapping_mul(h2)) % self.nbits;
            self.bits[(bit / 64) as usize] & (1 << (bit % 64)) != 0
        })
    }
}

/// [`ArtIndex`] guarded by a Bloom filter.
///
/// The filter is insert-only; a deleted key keeps its filter bits and
/// simply misses in the tree. Reads for never-written keys return in
/// two hash computations without touching the tree lock.
#[derive(Debug)]
pub struct FilteredArtIndex {
    filter: RwLock<BloomFilter>,
    tree: ArtIndex,
}

impl FilteredArtIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            filter: RwLock::new(BloomFilter::with_capacity(INITIAL_KEYS)),
            tree: ArtIndex::new(),
        }
    }
}

impl Default for FilteredArtIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for FilteredArtIndex {
    fn put(&self, key: Vec<u8>, position: Position) -> bool {
        self.filter.write().insert(&key);
        self.tree.put(key, position)
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        if !self.filter.read().may_contain(key) {
            return None;
        }
        self.tree.get(key)
    }

    fn delete(&self, key: &[u8]) -> bool {
        if !self.filter.read().may_contain(key) {
            // Never inserted, so there is nothing to remove.
            return true;
        }
        self.tree.delete(key)
    }

    fn len(&self) -> usize {
        self.tree.len()
    }

    fn iter(&self, reverse: bool) -> IndexIterator {
        self.tree.iter(reverse)
    }
}
