//! Read-only hash trie over a sealed segment's persisted node table.
//!
//! The node table is a dense union: every row has a type id and an offset
//! into the column of its kind.
//!
//! ```text
//! type_ids:        [2,    2,    0,   2,    1        ]
//! offsets:         [0,    1,    0,   2,    0        ]
//! branch_ends:     [4]                     row 4 -> children[0..4]
//! branch_children: [Some(0), Some(1), Some(2), Some(3)]
//! leaf_page_idxs:  [0, 1, 2]
//! ```
//!
//! Rows are written in post-order, so children precede their parent and the
//! root is the last row.

use super::{conj_path, HashTrie, HashTrieNode};
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Discriminant of a node table row.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NodeKind {
    /// Absent child.
    Nil = 0,
    /// Branch over key buckets.
    Branch = 1,
    /// Leaf pointing at one data page.
    Leaf = 2,
}

impl NodeKind {
    /// Convert from a type id.
    pub fn from_type_id(id: u8) -> Option<Self> {
        match id {
            0 => Some(NodeKind::Nil),
            1 => Some(NodeKind::Branch),
            2 => Some(NodeKind::Leaf),
            _ => None,
        }
    }
}

/// Columnar node metadata of a sealed trie.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTable {
    type_ids: Vec<u8>,
    offsets: Vec<u32>,
    branch_ends: Vec<u32>,
    branch_children: Vec<Option<u32>>,
    leaf_page_idxs: Vec<u32>,
}

impl NodeTable {
    /// Number of rows.
    pub fn len(&self) -> usize {
        self.type_ids.len()
    }

    /// Returns true if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.type_ids.is_empty()
    }

    /// Number of leaf rows, equal to the number of data pages.
    pub fn leaf_count(&self) -> usize {
        self.leaf_page_idxs.len()
    }

    /// Highest data page referenced by a leaf.
    pub fn max_page_idx(&self) -> Option<u32> {
        self.leaf_page_idxs.iter().copied().max()
    }

    fn kind(&self, row: u32) -> NodeKind {
        self.type_ids
            .get(row as usize)
            .and_then(|&id| NodeKind::from_type_id(id))
            .unwrap_or(NodeKind::Nil)
    }

    fn offset(&self, row: u32) -> usize {
        self.offsets.get(row as usize).copied().unwrap_or_default() as usize
    }

    fn branch_range(&self, offset: usize) -> (usize, usize) {
        let start = if offset == 0 { 0 } else { self.branch_ends[offset - 1] as usize };
        (start, self.branch_ends[offset] as usize)
    }

    fn child_refs(&self, row: u32) -> &[Option<u32>] {
        let offset = self.offset(row);
        if offset >= self.branch_ends.len() {
            return &[];
        }
        let (start, end) = self.branch_range(offset);
        self.branch_children.get(start..end).unwrap_or(&[])
    }

    fn page_idx(&self, row: u32) -> Option<u32> {
        self.leaf_page_idxs.get(self.offset(row)).copied()
    }

    /// Checks the invariants `ArrowHashTrie` relies on, describing the first violation.
    fn check(&self, level_width: usize) -> std::result::Result<(), String> {
        if self.offsets.len() != self.type_ids.len() {
            return Err(format!("{} type ids but {} offsets", self.type_ids.len(), self.offsets.len()));
        }
        if self.branch_ends.last().copied().unwrap_or(0) as usize != self.branch_children.len() {
            return Err("branch child list does not match branch end offsets".to_string());
        }
        if self.branch_ends.windows(2).any(|w| w[0] > w[1]) {
            return Err("branch end offsets are not monotonic".to_string());
        }

        let mut branches = 0;
        let mut leaves = 0;
        let mut referenced = vec![false; self.type_ids.len()];

        for (row, &type_id) in self.type_ids.iter().enumerate() {
            let offset = self.offsets[row] as usize;
            match NodeKind::from_type_id(type_id) {
                Some(NodeKind::Nil) => {}
                Some(NodeKind::Branch) => {
                    if offset != branches {
                        return Err(format!("row {}: branch offset {} out of order", row, offset));
                    }
                    branches += 1;
                    if offset >= self.branch_ends.len() {
                        return Err(format!("row {}: branch offset {} out of range", row, offset));
                    }

                    let (start, end) = self.branch_range(offset);
                    if end - start != level_width {
                        return Err(format!("row {}: branch has {} children, expected {}", row, end - start, level_width));
                    }
                    for child in self.branch_children[start..end].iter().flatten() {
                        let child = *child as usize;
                        if child >= row {
                            return Err(format!("row {}: child {} is not written before its parent", row, child));
                        }
                        if std::mem::replace(&mut referenced[child], true) {
                            return Err(format!("row {}: child {} has more than one parent", row, child));
                        }
                    }
                }
                Some(NodeKind::Leaf) => {
                    if offset != leaves {
                        return Err(format!("row {}: leaf offset {} out of order", row, offset));
                    }
                    leaves += 1;
                    if offset >= self.leaf_page_idxs.len() {
                        return Err(format!("row {}: leaf offset {} out of range", row, offset));
                    }
                }
                None => return Err(format!("row {}: unknown node type id {}", row, type_id)),
            }
        }

        if branches != self.branch_ends.len() {
            return Err(format!("{} branch rows but {} branch lists", branches, self.branch_ends.len()));
        }
        if leaves != self.leaf_page_idxs.len() {
            return Err(format!("{} leaf rows but {} page indices", leaves, self.leaf_page_idxs.len()));
        }
        if referenced.last().copied().unwrap_or(false) {
            return Err("root row is referenced as a child".to_string());
        }

        Ok(())
    }
}

/// Appends node rows in post-order.
#[derive(Debug, Default)]
pub struct NodeTableBuilder {
    table: NodeTable,
}

impl NodeTableBuilder {
    /// Creates an empty builder.
    pub fn new() -> Self {
        Self::default()
    }

    fn push(&mut self, kind: NodeKind, offset: usize) -> u32 {
        let row = self.table.type_ids.len() as u32;
        self.table.type_ids.push(kind as u8);
        self.table.offsets.push(offset as u32);
        row
    }

    /// Appends an absent node and returns its row.
    pub fn write_nil(&mut self) -> u32 {
        self.push(NodeKind::Nil, 0)
    }

    /// Appends a branch over previously written children and returns its row.
    pub fn write_branch(&mut self, children: &[Option<u32>]) -> u32 {
        let offset = self.table.branch_ends.len();
        self.table.branch_children.extend_from_slice(children);
        self.table.branch_ends.push(self.table.branch_children.len() as u32);
        self.push(NodeKind::Branch, offset)
    }

    /// Appends a leaf for data page `page_idx` and returns its row.
    pub fn write_leaf(&mut self, page_idx: u32) -> u32 {
        let offset = self.table.leaf_page_idxs.len();
        self.table.leaf_page_idxs.push(page_idx);
        self.push(NodeKind::Leaf, offset)
    }

    /// Number of rows written so far.
    pub fn len(&self) -> usize {
        self.table.len()
    }

    /// Returns true if nothing has been written.
    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Finishes the table.
    pub fn finish(self) -> NodeTable {
        self.table
    }
}

/// Hash trie backed by a validated [`NodeTable`].
#[derive(Debug, Clone)]
pub struct ArrowHashTrie {
    table: Arc<NodeTable>,
}

impl ArrowHashTrie {
    /// Wraps `table`, validating it for a fan-out of `level_width`.
    ///
    /// Any inconsistency is reported as a corrupt segment carrying `key`.
    pub fn new(key: &str, table: NodeTable, level_width: usize) -> Result<Self> {
        table.check(level_width).map_err(|reason| Error::corrupt_segment(key, reason))?;
        Ok(Self { table: Arc::new(table) })
    }

    /// The underlying node table.
    pub fn table(&self) -> &NodeTable {
        &self.table
    }
}

impl HashTrie for ArrowHashTrie {
    type Node = ArrowNode;

    fn root_node(&self) -> Option<ArrowNode> {
        let root = self.table.len().checked_sub(1)? as u32;
        match self.table.kind(root) {
            NodeKind::Nil => None,
            _ => Some(ArrowNode { table: self.table.clone(), row: root, path: Vec::new() }),
        }
    }
}

/// A node of an [`ArrowHashTrie`], materialized on traversal.
#[derive(Debug, Clone)]
pub struct ArrowNode {
    table: Arc<NodeTable>,
    row: u32,
    path: Vec<u8>,
}

impl ArrowNode {
    /// Kind of this node.
    pub fn kind(&self) -> NodeKind {
        self.table.kind(self.row)
    }

    /// Data page holding this leaf's rows, or `None` for a branch.
    pub fn page_idx(&self) -> Option<u32> {
        match self.kind() {
            NodeKind::Leaf => self.table.page_idx(self.row),
            _ => None,
        }
    }
}

impl HashTrieNode for ArrowNode {
    fn path(&self) -> &[u8] {
        &self.path
    }

    fn children(&self) -> Option<Vec<Option<Self>>> {
        if self.kind() != NodeKind::Branch {
            return None;
        }

        let children = self
            .table
            .child_refs(self.row)
            .iter()
            .enumerate()
            .map(|(bucket, child)| {
                child.filter(|&row| self.table.kind(row) != NodeKind::Nil).map(|row| ArrowNode {
                    table: self.table.clone(),
                    row,
                    path: conj_path(&self.path, bucket as u8),
                })
            })
            .collect();

        Some(children)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_table() -> NodeTable {
        // root: [leaf p0, leaf p1, nil, branch[nil, leaf p2, nil, nil]]
        let mut builder = NodeTableBuilder::new();
        let l0 = builder.write_leaf(0);
        let l1 = builder.write_leaf(1);
        let nil = builder.write_nil();
        let l2 = builder.write_leaf(2);
        let inner = builder.write_branch(&[None, Some(l2), None, None]);
        builder.write_branch(&[Some(l0), Some(l1), Some(nil), Some(inner)]);
        builder.finish()
    }

    #[test]
    fn test_traverse() {
        let trie = ArrowHashTrie::new("l00-rc-b00", sample_table(), 4).unwrap();
        let root = trie.root_node().unwrap();
        assert_eq!(root.kind(), NodeKind::Branch);

        let children = root.children().unwrap();
        assert_eq!(children.len(), 4);
        assert!(children[2].is_none());

        let leaves = trie.leaves();
        let paths: Vec<_> = leaves.iter().map(|l| l.path().to_vec()).collect();
        assert_eq!(paths, vec![vec![0], vec![1], vec![3, 1]]);
        let pages: Vec<_> = leaves.iter().map(|l| l.page_idx().unwrap()).collect();
        assert_eq!(pages, vec![0, 1, 2]);
    }

    #[test]
    fn test_empty_and_nil_root() {
        let trie = ArrowHashTrie::new("k", NodeTable::default(), 4).unwrap();
        assert!(trie.root_node().is_none());

        let mut builder = NodeTableBuilder::new();
        builder.write_nil();
        let trie = ArrowHashTrie::new("k", builder.finish(), 4).unwrap();
        assert!(trie.root_node().is_none());
        assert!(trie.leaves().is_empty());
    }

    #[test]
    fn test_single_leaf_root() {
        let mut builder = NodeTableBuilder::new();
        builder.write_leaf(0);
        let trie = ArrowHashTrie::new("k", builder.finish(), 4).unwrap();
        let root = trie.root_node().unwrap();
        assert!(root.is_leaf());
        assert_eq!(root.page_idx(), Some(0));
    }

    #[test]
    fn test_rejects_wrong_branch_width() {
        let err = ArrowHashTrie::new("l01-rc-b00", sample_table(), 16).unwrap_err();
        assert!(matches!(err, Error::CorruptSegment { ref key, .. } if key == "l01-rc-b00"));
    }

    #[test]
    fn test_rejects_unknown_tag() {
        let mut table = sample_table();
        table.type_ids[0] = 7;
        let err = ArrowHashTrie::new("l00-rc-b01", table, 4).unwrap_err();
        assert!(err.to_string().contains("unknown node type id 7"));
    }

    #[test]
    fn test_rejects_forward_reference() {
        let mut builder = NodeTableBuilder::new();
        builder.write_branch(&[Some(1), None, None, None]);
        builder.write_leaf(0);
        builder.write_branch(&[Some(0), None, None, None]);
        let err = ArrowHashTrie::new("k", builder.finish(), 4).unwrap_err();
        assert!(matches!(err, Error::CorruptSegment { .. }));
    }

    #[test]
    fn test_rejects_leaf_count_mismatch() {
        let mut table = sample_table();
        table.leaf_page_idxs.pop();
        assert!(ArrowHashTrie::new("k", table, 4).is_err());
    }
}
