//! Persistent in-memory hash trie for the live write buffer.
//!
//! Every mutation returns a new trie. Untouched subtrees are shared with the
//! previous value through `Arc`, so a reader holding an older trie keeps a
//! stable snapshot while the single writer moves on.

use super::bucketer::{Bucketer, DEFAULT_LEVEL_BITS};
use super::{compare_rows, conj_path, HashTrie, HashTrieNode, KeyReader};
use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::sync::{Arc, OnceLock};

/// Default capacity of a leaf's unsorted log.
pub const DEFAULT_LOG_LIMIT: usize = 64;

/// Default row count above which a leaf splits.
pub const DEFAULT_PAGE_LIMIT: usize = 1024;

/// Default maximum trie depth.
pub const DEFAULT_MAX_LEVEL: usize = 64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct TrieConfig {
    pub(crate) bucketer: Bucketer,
    pub(crate) log_limit: usize,
    pub(crate) page_limit: usize,
    pub(crate) max_level: usize,
}

/// Builder for [`MemoryHashTrie`].
#[derive(Debug, Clone)]
pub struct MemoryHashTrieBuilder {
    log_limit: usize,
    page_limit: usize,
    level_bits: u32,
    max_level: usize,
    root_path: Vec<u8>,
}

impl Default for MemoryHashTrieBuilder {
    fn default() -> Self {
        Self {
            log_limit: DEFAULT_LOG_LIMIT,
            page_limit: DEFAULT_PAGE_LIMIT,
            level_bits: DEFAULT_LEVEL_BITS,
            max_level: DEFAULT_MAX_LEVEL,
            root_path: Vec::new(),
        }
    }
}

impl MemoryHashTrieBuilder {
    /// Sets the leaf log capacity.
    pub fn log_limit(mut self, limit: usize) -> Self {
        self.log_limit = limit;
        self
    }

    /// Sets the leaf split threshold.
    pub fn page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit;
        self
    }

    /// Sets the key bits consumed per level.
    pub fn level_bits(mut self, bits: u32) -> Self {
        self.level_bits = bits;
        self
    }

    /// Sets the maximum depth a leaf may split to.
    pub fn max_level(mut self, level: usize) -> Self {
        self.max_level = level;
        self
    }

    /// Roots the trie at `path` instead of the empty path.
    pub fn root_path(mut self, path: Vec<u8>) -> Self {
        self.root_path = path;
        self
    }

    /// Builds an empty trie, rejecting unsupported fan-outs and zero limits.
    pub fn build(self) -> Result<MemoryHashTrie> {
        let bucketer = Bucketer::new(self.level_bits)?;
        if self.log_limit == 0 || self.page_limit == 0 {
            return Err(Error::invalid_config("log_limit and page_limit must be > 0"));
        }
        if self.root_path.iter().any(|&b| b as usize >= bucketer.level_width()) {
            return Err(Error::invalid_config("root path bucket out of range"));
        }

        let config = TrieConfig {
            bucketer,
            log_limit: self.log_limit,
            page_limit: self.page_limit,
            max_level: self.max_level,
        };
        Ok(MemoryHashTrie::with_root(MemoryNode::empty_leaf(self.root_path), config))
    }
}

/// A persistent hash trie over row indices of a [`KeyReader`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryHashTrie {
    root: MemoryNode,
    config: TrieConfig,
}

impl MemoryHashTrie {
    /// Returns a builder with default limits.
    pub fn builder() -> MemoryHashTrieBuilder {
        MemoryHashTrieBuilder::default()
    }

    pub(crate) fn with_root(root: MemoryNode, config: TrieConfig) -> Self {
        Self { root, config }
    }

    pub(crate) fn config(&self) -> TrieConfig {
        self.config
    }

    /// The root node. A fresh trie's root is an empty leaf.
    pub fn root(&self) -> &MemoryNode {
        &self.root
    }

    /// The bucketer routing keys through this trie.
    pub fn bucketer(&self) -> &Bucketer {
        &self.config.bucketer
    }

    /// Leaf log capacity.
    pub fn log_limit(&self) -> usize {
        self.config.log_limit
    }

    /// Leaf split threshold.
    pub fn page_limit(&self) -> usize {
        self.config.page_limit
    }

    /// Maximum split depth.
    pub fn max_level(&self) -> usize {
        self.config.max_level
    }

    /// Returns a new trie with row `idx` appended.
    ///
    /// The leaf receiving the row compacts itself once its log reaches the
    /// log limit. Nodes of `self` are never modified.
    pub fn add<K: KeyReader + ?Sized>(&self, keys: &K, idx: u32) -> Self {
        Self { root: self.root.add(&self.config, keys, idx), config: self.config }
    }

    /// Returns a new trie with every leaf log merged into its data.
    ///
    /// Leaves with an empty log are shared unchanged.
    pub fn compact_logs<K: KeyReader + ?Sized>(&self, keys: &K) -> Self {
        Self { root: self.root.compact_logs(&self.config, keys), config: self.config }
    }

    /// Finds the leaf `key` routes to, if any.
    pub fn leaf_for_key(&self, key: &[u8]) -> Option<&Arc<MemoryLeaf>> {
        let mut node = &self.root;
        loop {
            match node {
                MemoryNode::Leaf(leaf) => return Some(leaf),
                MemoryNode::Branch(branch) => {
                    let bucket = self.config.bucketer.bucket_for(key, branch.path.len());
                    node = branch.children.get(bucket as usize)?.as_ref()?;
                }
            }
        }
    }

    /// Total rows indexed, including rows pending in logs.
    pub fn row_count(&self) -> usize {
        self.root
            .leaves()
            .iter()
            .map(|node| match node {
                MemoryNode::Leaf(leaf) => leaf.data.len() + leaf.log.len(),
                MemoryNode::Branch(_) => 0,
            })
            .sum()
    }

    /// Returns true if no row has been added.
    pub fn is_empty(&self) -> bool {
        self.row_count() == 0
    }
}

impl HashTrie for MemoryHashTrie {
    type Node = MemoryNode;

    fn root_node(&self) -> Option<MemoryNode> {
        Some(self.root.clone())
    }
}

/// A node of a [`MemoryHashTrie`].
#[derive(Debug, Clone, PartialEq)]
pub enum MemoryNode {
    /// Interior node with one optional child per bucket.
    Branch(Arc<MemoryBranch>),
    /// Terminal node holding row indices.
    Leaf(Arc<MemoryLeaf>),
}

/// Interior node of a [`MemoryHashTrie`].
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryBranch {
    path: Vec<u8>,
    children: Vec<Option<MemoryNode>>,
}

impl MemoryBranch {
    pub(crate) fn new(path: Vec<u8>, children: Vec<Option<MemoryNode>>) -> Self {
        Self { path, children }
    }

    /// Per-bucket children.
    pub fn children(&self) -> &[Option<MemoryNode>] {
        &self.children
    }
}

/// Terminal node of a [`MemoryHashTrie`].
///
/// `data` is sorted by key (newest first among equal keys); `log` holds rows
/// added since the last compaction, in arrival order.
#[derive(Debug)]
pub struct MemoryLeaf {
    path: Vec<u8>,
    data: Arc<[u32]>,
    log: Vec<u32>,
    merged: OnceLock<Arc<[u32]>>,
}

impl PartialEq for MemoryLeaf {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.data == other.data && self.log == other.log
    }
}

impl MemoryLeaf {
    pub(crate) fn new(path: Vec<u8>, data: Arc<[u32]>, log: Vec<u32>) -> Self {
        Self { path, data, log, merged: OnceLock::new() }
    }

    /// Sorted rows as of the last compaction.
    pub fn data(&self) -> &[u32] {
        &self.data
    }

    /// Rows added since the last compaction, unsorted.
    pub fn log(&self) -> &[u32] {
        &self.log
    }

    /// All rows of this leaf in comparator order.
    ///
    /// The result is computed once per leaf and cached. Racing readers may
    /// both compute it; only one fully built array is ever published.
    pub fn merged_data<K: KeyReader + ?Sized>(&self, keys: &K) -> Arc<[u32]> {
        if self.log.is_empty() {
            return self.data.clone();
        }
        self.merged.get_or_init(|| merge_sort(keys, &self.data, &self.log).into()).clone()
    }

    fn add<K: KeyReader + ?Sized>(&self, config: &TrieConfig, keys: &K, idx: u32) -> MemoryNode {
        let mut log = Vec::with_capacity(config.log_limit);
        log.extend_from_slice(&self.log);
        log.push(idx);

        let leaf = MemoryLeaf::new(self.path.clone(), self.data.clone(), log);
        if leaf.log.len() >= config.log_limit {
            leaf.compact(config, keys)
        } else {
            MemoryNode::Leaf(Arc::new(leaf))
        }
    }

    fn compact<K: KeyReader + ?Sized>(&self, config: &TrieConfig, keys: &K) -> MemoryNode {
        let data = self.merged_data(keys);

        if data.len() > config.page_limit && self.path.len() < config.max_level {
            let level = self.path.len();
            let mut buckets: Vec<Vec<u32>> = vec![Vec::new(); config.bucketer.level_width()];
            for &idx in data.iter() {
                buckets[config.bucketer.bucket_for(keys.key(idx), level) as usize].push(idx);
            }

            let children = buckets
                .into_iter()
                .enumerate()
                .map(|(bucket, rows)| {
                    if rows.is_empty() {
                        None
                    } else {
                        let leaf = MemoryLeaf::new(conj_path(&self.path, bucket as u8), rows.into(), Vec::new());
                        Some(MemoryNode::Leaf(Arc::new(leaf)))
                    }
                })
                .collect();

            MemoryNode::Branch(Arc::new(MemoryBranch::new(self.path.clone(), children)))
        } else {
            MemoryNode::Leaf(Arc::new(MemoryLeaf::new(self.path.clone(), data, Vec::new())))
        }
    }
}

/// Sorts `log` and merges it into the already sorted `data`.
fn merge_sort<K: KeyReader + ?Sized>(keys: &K, data: &[u32], log: &[u32]) -> Vec<u32> {
    let mut sorted_log = log.to_vec();
    sorted_log.sort_by(|&l, &r| compare_rows(keys, l, r));

    let mut merged = Vec::with_capacity(data.len() + sorted_log.len());
    let (mut d, mut l) = (0, 0);

    while d < data.len() && l < sorted_log.len() {
        if compare_rows(keys, data[d], sorted_log[l]) == Ordering::Less {
            merged.push(data[d]);
            d += 1;
        } else {
            merged.push(sorted_log[l]);
            l += 1;
        }
    }
    merged.extend_from_slice(&data[d..]);
    merged.extend_from_slice(&sorted_log[l..]);

    merged
}

impl MemoryNode {
    pub(crate) fn empty_leaf(path: Vec<u8>) -> Self {
        MemoryNode::Leaf(Arc::new(MemoryLeaf::new(path, Arc::from(Vec::new()), Vec::new())))
    }

    /// Returns the leaf if this node is one.
    pub fn as_leaf(&self) -> Option<&Arc<MemoryLeaf>> {
        match self {
            MemoryNode::Leaf(leaf) => Some(leaf),
            MemoryNode::Branch(_) => None,
        }
    }

    /// Returns true if both values refer to the same node allocation.
    pub fn ptr_eq(&self, other: &MemoryNode) -> bool {
        match (self, other) {
            (MemoryNode::Branch(a), MemoryNode::Branch(b)) => Arc::ptr_eq(a, b),
            (MemoryNode::Leaf(a), MemoryNode::Leaf(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    fn add<K: KeyReader + ?Sized>(&self, config: &TrieConfig, keys: &K, idx: u32) -> MemoryNode {
        match self {
            MemoryNode::Leaf(leaf) => leaf.add(config, keys, idx),
            MemoryNode::Branch(branch) => {
                let bucket = config.bucketer.bucket_for(keys.key(idx), branch.path.len()) as usize;
                let mut children = branch.children.clone();
                let child = children[bucket]
                    .take()
                    .unwrap_or_else(|| MemoryNode::empty_leaf(conj_path(&branch.path, bucket as u8)));
                children[bucket] = Some(child.add(config, keys, idx));

                MemoryNode::Branch(Arc::new(MemoryBranch::new(branch.path.clone(), children)))
            }
        }
    }

    fn compact_logs<K: KeyReader + ?Sized>(&self, config: &TrieConfig, keys: &K) -> MemoryNode {
        match self {
            MemoryNode::Leaf(leaf) if leaf.log.is_empty() => self.clone(),
            MemoryNode::Leaf(leaf) => leaf.compact(config, keys),
            MemoryNode::Branch(branch) => {
                let children: Vec<_> = branch
                    .children
                    .iter()
                    .map(|child| child.as_ref().map(|c| c.compact_logs(config, keys)))
                    .collect();

                let unchanged = children.iter().zip(branch.children.iter()).all(|(new, old)| match (new, old) {
                    (Some(new), Some(old)) => new.ptr_eq(old),
                    (None, None) => true,
                    _ => false,
                });

                if unchanged {
                    self.clone()
                } else {
                    MemoryNode::Branch(Arc::new(MemoryBranch::new(branch.path.clone(), children)))
                }
            }
        }
    }
}

impl HashTrieNode for MemoryNode {
    fn path(&self) -> &[u8] {
        match self {
            MemoryNode::Branch(branch) => &branch.path,
            MemoryNode::Leaf(leaf) => &leaf.path,
        }
    }

    fn children(&self) -> Option<Vec<Option<Self>>> {
        match self {
            MemoryNode::Branch(branch) => Some(branch.children.clone()),
            MemoryNode::Leaf(_) => None,
        }
    }
}
