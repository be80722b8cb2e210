//! Binary snapshot encoding of a [`MemoryHashTrie`].
//!
//! Logs are not encoded: the trie is log-compacted first, and a decoded trie
//! holds every row in sorted leaf data.

use super::bucketer::Bucketer;
use super::memory::{MemoryBranch, MemoryHashTrie, MemoryLeaf, MemoryNode, TrieConfig};
use super::KeyReader;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Serialize, Deserialize)]
struct TrieSnapshot {
    log_limit: u64,
    page_limit: u64,
    level_bits: u32,
    max_level: u64,
    root: SnapshotNode,
}

#[derive(Debug, Serialize, Deserialize)]
enum SnapshotNode {
    Branch { children: Vec<Option<SnapshotNode>> },
    Leaf { data: Vec<u32> },
}

impl SnapshotNode {
    fn from_node(node: &MemoryNode) -> Self {
        match node {
            MemoryNode::Branch(branch) => SnapshotNode::Branch {
                children: branch.children().iter().map(|c| c.as_ref().map(Self::from_node)).collect(),
            },
            MemoryNode::Leaf(leaf) => SnapshotNode::Leaf { data: leaf.data().to_vec() },
        }
    }

    fn into_node(self, path: Vec<u8>, width: usize) -> Result<MemoryNode> {
        match self {
            SnapshotNode::Leaf { data } => {
                Ok(MemoryNode::Leaf(Arc::new(MemoryLeaf::new(path, data.into(), Vec::new()))))
            }
            SnapshotNode::Branch { children } => {
                if children.len() != width {
                    return Err(Error::corruption(format!(
                        "snapshot branch at {:?} has {} children, expected {}",
                        path,
                        children.len(),
                        width
                    )));
                }

                let children = children
                    .into_iter()
                    .enumerate()
                    .map(|(bucket, child)| {
                        child.map(|c| c.into_node(super::conj_path(&path, bucket as u8), width)).transpose()
                    })
                    .collect::<Result<Vec<_>>>()?;

                Ok(MemoryNode::Branch(Arc::new(MemoryBranch::new(path, children))))
            }
        }
    }
}

impl MemoryHashTrie {
    /// Encodes a log-compacted copy of this trie.
    pub fn encode_snapshot<K: KeyReader + ?Sized>(&self, keys: &K) -> Result<Vec<u8>> {
        let compacted = self.compact_logs(keys);
        let config = compacted.config();
        let snapshot = TrieSnapshot {
            log_limit: config.log_limit as u64,
            page_limit: config.page_limit as u64,
            level_bits: config.bucketer.level_bits(),
            max_level: config.max_level as u64,
            root: SnapshotNode::from_node(compacted.root()),
        };
        Ok(bincode::serialize(&snapshot)?)
    }

    /// Decodes a trie written by [`MemoryHashTrie::encode_snapshot`].
    pub fn decode_snapshot(bytes: &[u8]) -> Result<Self> {
        let snapshot: TrieSnapshot = bincode::deserialize(bytes)?;
        let bucketer = Bucketer::new(snapshot.level_bits)
            .map_err(|e| Error::corruption(format!("snapshot fan-out: {}", e)))?;
        if snapshot.log_limit == 0 || snapshot.page_limit == 0 {
            return Err(Error::corruption("snapshot has zero log or page limit"));
        }

        let config = TrieConfig {
            bucketer,
            log_limit: snapshot.log_limit as usize,
            page_limit: snapshot.page_limit as usize,
            max_level: snapshot.max_level as usize,
        };
        let root = snapshot.root.into_node(Vec::new(), bucketer.level_width())?;
        Ok(MemoryHashTrie::with_root(root, config))
    }
}
