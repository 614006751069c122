//! Adaptive radix tree index backend.
//!
//! Keys are stored byte-by-byte in a radix tree whose nodes adapt
//! their child representation to their fanout: narrow nodes keep a
//! small sorted vector, wide nodes promote to a dense 256-slot table
//! for constant-time descent. Iteration walks the tree depth-first,
//! which yields keys in ascending byte order with no extra sort.

use crate::index::{IndexIterator, Indexer};
use crate::record::Position;
use parking_lot::RwLock;

/// Fanout at which a node promotes from sorted-vector to dense table.
const SPARSE_MAX: usize = 16;

/// Child representation, adapted to the node's fanout.
#[derive(Debug)]
enum Children {
    /// Sorted by child byte.
    Sparse(Vec<(u8, Box<Node>)>),
    /// One slot per possible byte; `count` tracks occupancy.
    Dense {
        slots: Vec<Option<Box<Node>>>,
        count: usize,
    },
}

impl Children {
    fn new() -> Self {
        Self::Sparse(Vec::new())
    }

    fn is_empty(&self) -> bool {
        match self {
            Self::Sparse(children) => children.is_empty(),
            Self::Dense { count, .. } => *count == 0,
        }
    }

    fn get(&self, byte: u8) -> Option<&Node> {
        match self {
            Self::Sparse(children) => children
                .binary_search_by_key(&byte, |(b, _)| *b)
                .ok()
                .map(|i| children[i].1.as_ref()),
            Self::Dense { slots, .. } => slots[byte as usize].as_deref(),
        }
    }

    fn get_mut(&mut self, byte: u8) -> Option<&mut Node> {
        match self {
            Self::Sparse(children) => children
                .binary_search_by_key(&byte, |(b, _)| *b)
                .ok()
                .map(|i| children[i].1.as_mut()),
            Self::Dense { slots, .. } => slots[byte as usize].as_deref_mut(),
        }
    }

    fn get_or_insert(&mut self, byte: u8) -> &mut Node {
        // First ensure the child exists without letting a borrow
        // escape, then look it up again to hand out the reference.
        if let Self::Sparse(children) = self {
            match children.binary_search_by_key(&byte, |(b, _)| *b) {
                Ok(_) => {}
                Err(i) if children.len() < SPARSE_MAX => {
                    children.insert(i, (byte, Box::new(Node::new())));
                }
                Err(_) => self.promote(),
            }
        }

        match self {
            Self::Sparse(children) => {
                let i = children
                    .binary_search_by_key(&byte, |(b, _)| *b)
                    .unwrap_or_else(|_| unreachable!("child inserted above"));
                children[i].1.as_mut()
            }
            Self::Dense { slots, count } => {
                let slot = &mut slots[byte as usize];
                if slot.is_none() {
                    *slot = Some(Box::new(Node::new()));
                    *count += 1;
                }
                slot.as_deref_mut().unwrap_or_else(|| unreachable!())
            }
        }
    }

    fn remove(&mut self, byte: u8) {
        match self {
            Self::Sparse(children) => {
                if let Ok(i) = children.binary_search_by_key(&byte, |(b, _)| *b) {
                    children.remove(i);
                }
            }
            Self::Dense { slots, count } => {
                if slots[byte as usize].take().is_some() {
                    *count -= 1;
                }
            }
        }
    }

    /// Widens a full sparse node into a dense table.
    fn promote(&mut self) {
        let Self::Sparse(children) = self else {
            return;
        };
        let mut slots: Vec<Option<Box<Node>>> = (0..256).map(|_| None).collect();
        let count = children.len();
        for (byte, child) in children.drain(..) {
            slots[byte as usize] = Some(child);
        }
        *self = Self::Dense { slots, count };
    }

    /// Visits children in ascending byte order.
    fn for_each_sorted<'a>(&'a self, f: &mut impl FnMut(u8, &'a Node)) {
        match self {
            Self::Sparse(children) => {
                for (byte, child) in children {
                    f(*byte, child);
                }
            }
            Self::Dense { slots, .. } => {
                for (byte, slot) in slots.iter().enumerate() {
                    if let Some(child) = slot {
                        f(byte as u8, child);
                    }
                }
            }
        }
    }
}

#[derive(Debug)]
struct Node {
    /// Position of the key terminating at this node, if any.
    value: Option<Position>,
    children: Children,
}

impl Node {
    fn new() -> Self {
        Self {
            value: None,
            children: Children::new(),
        }
    }

    fn prunable(&self) -> bool {
        self.value.is_none() && self.children.is_empty()
    }
}

#[derive(Debug)]
struct Tree {
    root: Node,
    len: usize,
}

impl Tree {
    fn insert(&mut self, key: &[u8], position: Position) -> Option<Position> {
        let mut node = &mut self.root;
        for &byte in key {
            node = node.children.get_or_insert(byte);
        }
        let previous = node.value.replace(position);
        if previous.is_none() {
            self.len += 1;
        }
        previous
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        let mut node = &self.root;
        for &byte in key {
            node = node.children.get(byte)?;
        }
        node.value
    }

    fn remove(&mut self, key: &[u8]) -> Option<Position> {
        let removed = Self::remove_from(&mut self.root, key);
        if removed.is_some() {
            self.len -= 1;
        }
        removed
    }

    /// Removes `key` below `node`, pruning branches left empty.
    fn remove_from(node: &mut Node, key: &[u8]) -> Option<Position> {
        let Some((&byte, rest)) = key.split_first() else {
            return node.value.take();
        };

        let child = node.children.get_mut(byte)?;
        let removed = Self::remove_from(child, rest);
        if removed.is_some() && child.prunable() {
            node.children.remove(byte);
        }
        removed
    }

    fn collect(&self) -> Vec<(Vec<u8>, Position)> {
        let mut out = Vec::with_capacity(self.len);
        let mut prefix = Vec::new();
        Self::walk(&self.root, &mut prefix, &mut out);
        out
    }

    /// Depth-first walk; a prefix sorts before its extensions, so the
    /// output is in ascending key order.
    fn walk(node: &Node, prefix: &mut Vec<u8>, out: &mut Vec<(Vec<u8>, Position)>) {
        if let Some(position) = node.value {
            out.push((prefix.clone(), position));
        }
        node.children.for_each_sorted(&mut |byte, child| {
            prefix.push(byte);
            Self::walk(child, prefix, out);
            prefix.pop();
        });
    }
}

/// Ordered index backed by an adaptive radix tree.
#[derive(Debug)]
pub struct ArtIndex {
    tree: RwLock<Tree>,
}

impl ArtIndex {
    /// Creates an empty index.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tree: RwLock::new(Tree {
                root: Node::new(),
                len: 0,
            }),
        }
    }
}

impl Default for ArtIndex {
    fn default() -> Self {
        Self::new()
    }
}

impl Indexer for ArtIndex {
    fn put(&self, key: Vec<u8>, position: Position) -> bool {
        self.tree.write().insert(&key, position);
        true
    }

    fn get(&self, key: &[u8]) -> Option<Position> {
        self.tree.read().get(key)
    }

    fn delete(&self, key: &[u8]) -> bool {
        self.tree.write().remove(key);
        true
    }

    fn len(&self) -> usize {
        self.tree.read().len
    }

    fn iter(&self, reverse: bool) -> IndexIterator {
        IndexIterator::from_sorted(self.tree.read().collect(), reverse)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pos(offset: i64) -> Position {
        Position::new(0, offset)
    }

    #[test]
    fn prefix_keys_coexist() {
        let index = ArtIndex::new();
        index.put(b"app".to_vec(), pos(1));
        index.put(b"apple".to_vec(), pos(2));
        index.put(b"applesauce".to_vec(), pos(3));

        assert_eq!(index.get(b"app"), Some(pos(1)));
        assert_eq!(index.get(b"apple"), Some(pos(2)));
        assert_eq!(index.get(b"applesauce"), Some(pos(3)));
        assert!(index.get(b"appl").is_none());
        assert_eq!(index.len(), 3);
    }

    #[test]
    fn iteration_is_byte_ordered_with_prefixes_first() {
        let index = ArtIndex::new();
        index.put(b"b".to_vec(), pos(0));
        index.put(b"ba".to_vec(), pos(1));
        index.put(b"a".to_vec(), pos(2));
        index.put(b"ab".to_vec(), pos(3));

        let mut it = index.iter(false);
        let mut keys = Vec::new();
        while it.valid() {
            keys.push(it.key().to_vec());
            it.next();
        }
        assert_eq!(
            keys,
            vec![b"a".to_vec(), b"ab".to_vec(), b"b".to_vec(), b"ba".to_vec()]
        );
    }

    #[test]
    fn delete_prunes_and_keeps_prefix() {
        let index = ArtIndex::new();
        index.put(b"car".to_vec(), pos(1));
        index.put(b"cart".to_vec(), pos(2));

        assert!(index.delete(b"cart"));
        assert!(index.get(b"cart").is_none());
        assert_eq!(index.get(b"car"), Some(pos(1)));
        assert_eq!(index.len(), 1);

        // Deleting an absent key is still a success at this layer.
        assert!(index.delete(b"cart"));
        assert_eq!(index.len(), 1);
    }

    #[test]
    fn wide_fanout_promotes_to_dense_node() {
        let index = ArtIndex::new();
        // 256 single-byte keys forces the root past the sparse limit.
        for byte in 0..=255u8 {
            index.put(vec![byte], pos(i64::from(byte)));
        }
        assert_eq!(index.len(), 256);

        for byte in 0..=255u8 {
            assert_eq!(index.get(&[byte]), Some(pos(i64::from(byte))));
        }

        let mut it = index.iter(false);
        let mut previous: Option<Vec<u8>> = None;
        while it.valid() {
            if let Some(prev) = &previous {
                assert!(prev.as_slice() < it.key());
            }
            previous = Some(it.key().to_vec());
            it.next();
        }
    }

    #[test]
    fn promotion_mid_descent_keeps_insertion_going() {
        let index = ArtIndex::new();
        // Two-byte keys under one shared first byte: the interior node
        // fills its sparse vector, promotes on the 17th child, and
        // later insertions descend through the promoted node.
        for second in 0..32u8 {
            index.put(vec![b'p', second], pos(i64::from(second)));
        }
        // A third level below the promoted node.
        index.put(vec![b'p', 5, b'x'], pos(1000));

        assert_eq!(index.len(), 33);
        for second in 0..32u8 {
            assert_eq!(index.get(&[b'p', second]), Some(pos(i64::from(second))));
        }
        assert_eq!(index.get(&[b'p', 5, b'x']), Some(pos(1000)));

        // Overwrite through the promoted node hits the same slot.
        index.put(vec![b'p', 20], pos(2000));
        assert_eq!(index.get(&[b'p', 20]), Some(pos(2000)));
        assert_eq!(index.len(), 33);
    }

    #[test]
    fn empty_key_is_representable() {
        // The engine rejects empty keys, but the tree itself is total.
        let index = ArtIndex::new();
        index.put(Vec::new(), pos(7));
        assert_eq!(index.get(b""), Some(pos(7)));
        assert_eq!(index.len(), 1);
    }
}
