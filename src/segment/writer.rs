//! Writes tries as a data file plus a node-table metadata file.

use super::event::{Event, EventReader};
use super::file::{encode_meta_file, DataFileBuilder};
use crate::config::CompressionType;
use crate::error::Result;
use crate::trie::{Bucketer, HashTrieNode, MemoryHashTrie, MemoryNode, NodeTableBuilder};
use bytes::Bytes;
use std::cmp::Ordering;

/// Depth beyond which a selection is never split further.
const MAX_WRITE_LEVEL: usize = 64;

/// Contents of one written trie.
#[derive(Debug, Clone)]
pub struct WrittenTrie {
    /// Data file bytes.
    pub data: Bytes,
    /// Metadata file bytes.
    pub meta: Bytes,
    /// Rows written.
    pub row_count: usize,
    /// Pages (leaves) written.
    pub page_count: usize,
}

/// Serializes one trie into page and node-table form.
///
/// Nodes are appended in post-order: children first, root last.
pub struct TrieWriter {
    bucketer: Bucketer,
    data: DataFileBuilder,
    nodes: NodeTableBuilder,
    compression: CompressionType,
}

impl TrieWriter {
    /// Create a new writer
    pub fn new(bucketer: Bucketer, compression: CompressionType) -> Self {
        Self { bucketer, data: DataFileBuilder::new(compression), nodes: NodeTableBuilder::new(), compression }
    }

    /// Writes a live trie over `rows`, one page per leaf, after compacting its logs.
    pub fn write_live_trie<R: EventReader + ?Sized>(mut self, trie: &MemoryHashTrie, rows: &R) -> Result<WrittenTrie> {
        let trie = trie.compact_logs(rows);
        self.write_memory_node(trie.root(), rows)?;
        self.finish()
    }

    fn write_memory_node<R: EventReader + ?Sized>(&mut self, node: &MemoryNode, rows: &R) -> Result<u32> {
        match node {
            MemoryNode::Leaf(leaf) => {
                let events: Vec<Event> = leaf.merged_data(rows).iter().map(|&idx| rows.event(idx).clone()).collect();
                let page_idx = self.data.add_page(&events)?;
                Ok(self.nodes.write_leaf(page_idx))
            }
            MemoryNode::Branch(branch) => {
                let mut children = Vec::with_capacity(branch.children().len());
                for child in branch.children() {
                    let row = match child {
                        Some(child) => self.write_memory_node(child, rows)?,
                        None => self.nodes.write_nil(),
                    };
                    children.push(Some(row));
                }
                Ok(self.nodes.write_branch(&children))
            }
        }
    }

    /// Writes `events` as a trie nested under `part`.
    ///
    /// `events` must be sorted by iid. A selection splits by bucket while it
    /// holds more than `page_size` rows, spans more than one iid and sits
    /// above the maximum depth. Levels covered by `part` hold a single
    /// populated child with nil siblings. Empty input writes a nil root.
    pub fn write_events(mut self, events: &[Event], part: &[u8], page_size: usize) -> Result<WrittenTrie> {
        debug_assert!(events.windows(2).all(|w| w[0].iid <= w[1].iid));

        if events.is_empty() {
            self.nodes.write_nil();
        } else {
            self.write_selection(events, part, 0, page_size.max(1))?;
        }
        self.finish()
    }

    fn write_selection(&mut self, events: &[Event], part: &[u8], level: usize, page_size: usize) -> Result<u32> {
        let width = self.bucketer.level_width();

        if let Some(&bucket) = part.get(level) {
            let mut children = Vec::with_capacity(width);
            for b in 0..width {
                let row = if b == bucket as usize {
                    self.write_selection(events, part, level + 1, page_size)?
                } else {
                    self.nodes.write_nil()
                };
                children.push(Some(row));
            }
            return Ok(self.nodes.write_branch(&children));
        }

        let solo_iid = events.first().map(|e| e.iid) == events.last().map(|e| e.iid);
        if events.len() <= page_size || level >= MAX_WRITE_LEVEL || solo_iid {
            let page_idx = self.data.add_page(events)?;
            return Ok(self.nodes.write_leaf(page_idx));
        }

        let mut children = Vec::with_capacity(width);
        let mut rest = events;
        for b in 0..width as u8 {
            let len = rest.partition_point(|e| self.bucketer.bucket_for(&e.iid, level).cmp(&b) != Ordering::Greater);
            let (selection, tail) = rest.split_at(len);
            rest = tail;

            let row = if selection.is_empty() {
                self.nodes.write_nil()
            } else {
                self.write_selection(selection, part, level + 1, page_size)?
            };
            children.push(Some(row));
        }

        Ok(self.nodes.write_branch(&children))
    }

    fn finish(self) -> Result<WrittenTrie> {
        let row_count = self.data.row_count();
        let page_count = self.data.page_count();
        let table = self.nodes.finish();
        Ok(WrittenTrie {
            data: self.data.finish()?,
            meta: encode_meta_file(&table, self.compression)?,
            row_count,
            page_count,
        })
    }
}
