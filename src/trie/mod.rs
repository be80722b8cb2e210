//! Hash tries over fixed-width row keys.
//!
//! Two variants share one node contract:
//!
//! - [`MemoryHashTrie`]: mutable-by-copy trie over the live write buffer,
//!   with per-leaf unsorted logs merged lazily into sorted data.
//! - [`ArrowHashTrie`]: read-only trie reconstructed from a sealed segment's
//!   persisted node table, one leaf per data page.
//!
//! Merge planning and query code is written once against [`HashTrie`] and
//! [`HashTrieNode`], or against the closed [`Trie`] / [`TrieNode`] sum types
//! when a list of segments mixes both variants.

pub mod arrow;
pub mod bucketer;
pub mod key;
pub mod memory;
pub mod snapshot;

pub use arrow::{ArrowHashTrie, ArrowNode, NodeKind, NodeTable, NodeTableBuilder};
pub use bucketer::{Bucketer, DEFAULT_LEVEL_BITS, DEFAULT_LEVEL_WIDTH};
pub use key::{parse_key, TrieKey};
pub use memory::{MemoryBranch, MemoryHashTrie, MemoryHashTrieBuilder, MemoryLeaf, MemoryNode};

use std::cmp::Ordering;

/// Width in bytes of an internal document id.
pub const IID_WIDTH: usize = 16;

/// Returns `path` extended by one bucket.
pub fn conj_path(path: &[u8], bucket: u8) -> Vec<u8> {
    let mut child = Vec::with_capacity(path.len() + 1);
    child.extend_from_slice(path);
    child.push(bucket);
    child
}

/// Read access to the byte-comparable key of each row a trie indexes.
///
/// Tries store row indices only; every operation that needs key bytes takes
/// the reader explicitly. The reader must not change the key of a row that
/// is already indexed.
pub trait KeyReader {
    /// Returns the key bytes of row `idx`.
    fn key(&self, idx: u32) -> &[u8];

    /// Number of rows available.
    fn row_count(&self) -> usize;
}

impl<T: AsRef<[u8]>> KeyReader for [T] {
    fn key(&self, idx: u32) -> &[u8] {
        self[idx as usize].as_ref()
    }

    fn row_count(&self) -> usize {
        self.len()
    }
}

impl<T: AsRef<[u8]>> KeyReader for Vec<T> {
    fn key(&self, idx: u32) -> &[u8] {
        self[idx as usize].as_ref()
    }

    fn row_count(&self) -> usize {
        self.len()
    }
}

/// Orders two rows by key bytes, then by descending row index.
///
/// The tie-break makes the most recently added row win among equal keys.
pub fn compare_rows<K: KeyReader + ?Sized>(keys: &K, left: u32, right: u32) -> Ordering {
    keys.key(left).cmp(keys.key(right)).then_with(|| right.cmp(&left))
}

/// Node contract shared by every trie variant.
pub trait HashTrieNode: Clone {
    /// Buckets chosen at each level from the root to this node.
    fn path(&self) -> &[u8];

    /// Per-bucket children of a branch, or `None` for a leaf.
    fn children(&self) -> Option<Vec<Option<Self>>>;

    /// Returns true if this node is a leaf.
    fn is_leaf(&self) -> bool {
        self.children().is_none()
    }

    /// All leaves under this node in path order.
    fn leaves(&self) -> Vec<Self> {
        let mut leaves = Vec::new();
        let mut stack = vec![self.clone()];

        while let Some(node) = stack.pop() {
            match node.children() {
                None => leaves.push(node),
                Some(children) => stack.extend(children.into_iter().rev().flatten()),
            }
        }

        leaves
    }
}

/// A trie exposing a root node.
pub trait HashTrie {
    /// Node type of this trie.
    type Node: HashTrieNode;

    /// The root, or `None` for an empty trie.
    fn root_node(&self) -> Option<Self::Node>;

    /// All leaves in path order.
    fn leaves(&self) -> Vec<Self::Node> {
        self.root_node().map(|root| root.leaves()).unwrap_or_default()
    }
}

/// Either trie variant.
#[derive(Debug, Clone)]
pub enum Trie {
    /// The live, in-memory trie of a write buffer.
    Memory(MemoryHashTrie),
    /// A trie reconstructed from a sealed segment.
    Arrow(ArrowHashTrie),
}

/// A node of either trie variant.
#[derive(Debug, Clone)]
pub enum TrieNode {
    /// Node of a [`MemoryHashTrie`].
    Memory(MemoryNode),
    /// Node of an [`ArrowHashTrie`].
    Arrow(ArrowNode),
}

impl HashTrieNode for TrieNode {
    fn path(&self) -> &[u8] {
        match self {
            TrieNode::Memory(node) => node.path(),
            TrieNode::Arrow(node) => node.path(),
        }
    }

    fn children(&self) -> Option<Vec<Option<Self>>> {
        match self {
            TrieNode::Memory(node) => node
                .children()
                .map(|children| children.into_iter().map(|c| c.map(TrieNode::Memory)).collect()),
            TrieNode::Arrow(node) => node
                .children()
                .map(|children| children.into_iter().map(|c| c.map(TrieNode::Arrow)).collect()),
        }
    }
}

impl HashTrie for Trie {
    type Node = TrieNode;

    fn root_node(&self) -> Option<TrieNode> {
        match self {
            Trie::Memory(trie) => trie.root_node().map(TrieNode::Memory),
            Trie::Arrow(trie) => trie.root_node().map(TrieNode::Arrow),
        }
    }
}

impl From<MemoryHashTrie> for Trie {
    fn from(trie: MemoryHashTrie) -> Self {
        Trie::Memory(trie)
    }
}

impl From<ArrowHashTrie> for Trie {
    fn from(trie: ArrowHashTrie) -> Self {
        Trie::Arrow(trie)
    }
}

/// Returns the sub-slice of `sorted` whose keys route through `path`.
///
/// `sorted` must be ordered by key bytes, as leaf data is.
pub fn path_slice<'a, K: KeyReader + ?Sized>(
    bucketer: &Bucketer,
    keys: &K,
    sorted: &'a [u32],
    path: &[u8],
) -> &'a [u32] {
    let start = sorted
        .partition_point(|&idx| bucketer.compare_to_path(keys.key(idx), path) == Ordering::Less);
    let len = sorted[start..]
        .partition_point(|&idx| bucketer.compare_to_path(keys.key(idx), path) == Ordering::Equal);
    &sorted[start..start + len]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_conj_path() {
        assert_eq!(conj_path(&[], 3), vec![3]);
        assert_eq!(conj_path(&[1, 2], 0), vec![1, 2, 0]);
    }

    #[test]
    fn test_compare_rows_prefers_newer_duplicate() {
        let keys = vec![[1u8, 0], [0, 5], [1, 0]];
        assert_eq!(compare_rows(&keys, 1, 0), Ordering::Less);
        assert_eq!(compare_rows(&keys, 2, 0), Ordering::Less);
        assert_eq!(compare_rows(&keys, 0, 2), Ordering::Greater);
        assert_eq!(compare_rows(&keys, 2, 2), Ordering::Equal);
    }

    #[test]
    fn test_path_slice() {
        let bucketer = Bucketer::default();
        let keys = vec![[0x00u8], [0x40], [0x50], [0x80], [0xc0]];
        let sorted = [0, 1, 2, 3, 4];

        assert_eq!(path_slice(&bucketer, &keys, &sorted, &[1]), &[1, 2]);
        assert_eq!(path_slice(&bucketer, &keys, &sorted, &[1, 1]), &[2]);
        assert_eq!(path_slice(&bucketer, &keys, &sorted, &[1, 2]), &[] as &[u32]);
        assert_eq!(path_slice(&bucketer, &keys, &sorted, &[]), &sorted);
    }

    #[test]
    fn test_mixed_trie_leaves() {
        let keys: Vec<[u8; 1]> = (0..=255u8).map(|b| [b]).collect();
        let mut memory = MemoryHashTrie::builder().page_limit(16).log_limit(4).build().unwrap();
        for idx in 0..keys.len() as u32 {
            memory = memory.add(&keys, idx);
        }
        let trie = Trie::from(memory.compact_logs(&keys));

        let leaves = trie.leaves();
        assert!(leaves.len() > 1);
        assert!(leaves.windows(2).all(|w| w[0].path() < w[1].path()));
        assert!(leaves.iter().all(|leaf| leaf.is_leaf()));
    }
}
