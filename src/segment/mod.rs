//! Segments: tries paired with the rows they index.
//!
//! A segment is either the live write buffer (a memory trie over the live
//! relation) or a sealed trie persisted as two objects:
//!
//! ```text
//! tables/<table>/data/<trie-key>.seg    pages of events, one per leaf
//! tables/<table>/meta/<trie-key>.seg    node table
//! ```

pub mod block;
pub mod event;
pub mod file;
pub mod merge_plan;
pub mod writer;

pub use event::{Event, EventReader, Iid, InstantMicros, Op, RecencyPartition, END_OF_TIME};
pub use file::{DataFile, DataFileBuilder};
pub use merge_plan::{MergePlanNode, MergePlanTask, MergePlanner, PlanSegment};
pub use writer::{TrieWriter, WrittenTrie};

use crate::error::{Error, Result};
use crate::live::LiveSnapshot;
use crate::storage::ObjectStore;
use crate::trie::{ArrowHashTrie, HashTrie, Trie, TrieKey, TrieNode};
use std::sync::Arc;

/// Object-store directory of a table. `.` and `/` in the name become `$`.
pub fn table_path(table: &str) -> String {
    format!("tables/{}", table.replace(['.', '/'], "$"))
}

/// Object key of a trie's data file.
pub fn data_file_path(table: &str, key: &TrieKey) -> String {
    format!("{}/data/{}.seg", table_path(table), key)
}

/// Object-store directory holding a table's metadata files.
pub fn meta_file_dir(table: &str) -> String {
    format!("{}/meta/", table_path(table))
}

/// Object key of a trie's metadata file.
pub fn meta_file_path(table: &str, key: &TrieKey) -> String {
    format!("{}{}.seg", meta_file_dir(table), key)
}

/// Where a segment's rows come from.
#[derive(Debug, Clone)]
pub enum SegmentSource {
    /// Rows of a live snapshot, addressed by row index.
    Live(Arc<LiveSnapshot>),
    /// Pages of a sealed data file.
    Disk(Arc<DataFile>),
}

/// A trie plus access to the rows its leaves point at.
#[derive(Debug, Clone)]
pub struct Segment {
    key: Option<TrieKey>,
    trie: Trie,
    source: SegmentSource,
}

impl Segment {
    /// Wraps a live snapshot.
    pub fn live(snapshot: Arc<LiveSnapshot>) -> Self {
        let trie = Trie::Memory(snapshot.trie().clone());
        Self { key: None, trie, source: SegmentSource::Live(snapshot) }
    }

    /// Trie key of a sealed segment; `None` for the live buffer.
    pub fn key(&self) -> Option<&TrieKey> {
        self.key.as_ref()
    }

    /// The segment's trie.
    pub fn trie(&self) -> &Trie {
        &self.trie
    }

    /// Reads the rows of a leaf of this segment's trie, in leaf order.
    pub fn leaf_events(&self, node: &TrieNode) -> Result<Vec<Event>> {
        match (node, &self.source) {
            (TrieNode::Memory(node), SegmentSource::Live(snapshot)) => {
                let leaf = node.as_leaf().ok_or_else(|| Error::internal("expected a leaf node"))?;
                let relation = snapshot.relation();
                Ok(leaf.merged_data(relation).iter().map(|&idx| relation.event(idx).clone()).collect())
            }
            (TrieNode::Arrow(node), SegmentSource::Disk(data)) => {
                let page_idx = node.page_idx().ok_or_else(|| Error::internal("expected a leaf node"))?;
                data.read_page(page_idx)
            }
            _ => Err(Error::internal("node does not belong to this segment")),
        }
    }
}

impl PlanSegment for Segment {
    type Node = TrieNode;

    fn part(&self) -> Option<&[u8]> {
        self.key.as_ref().map(|k| k.part.as_slice()).filter(|part| !part.is_empty())
    }

    fn root_node(&self) -> Option<TrieNode> {
        self.trie.root_node()
    }
}

/// A sealed segment loaded from an object store.
#[derive(Debug, Clone)]
pub struct DiskSegment {
    key: TrieKey,
    trie: ArrowHashTrie,
    data: Arc<DataFile>,
}

impl DiskSegment {
    /// Loads the metadata and data files of `key`.
    ///
    /// A malformed node table, or one referencing pages the data file lacks,
    /// is reported as a corrupt segment.
    pub fn open(store: &dyn ObjectStore, table: &str, key: &TrieKey, level_width: usize) -> Result<Self> {
        let meta = store.get_object(&meta_file_path(table, key))?;
        let table_nodes = file::decode_meta_file(&meta).map_err(|e| match e {
            Error::Corruption(reason) | Error::Serialization(reason) => {
                Error::corrupt_segment(key.to_string(), reason)
            }
            Error::ChecksumMismatch { expected, actual } => Error::corrupt_segment(
                key.to_string(),
                format!("checksum mismatch: expected {:#x}, got {:#x}", expected, actual),
            ),
            other => other,
        })?;
        let trie = ArrowHashTrie::new(&key.to_string(), table_nodes, level_width)?;

        let data = DataFile::open(store.get_object(&data_file_path(table, key))?)?;
        if trie.table().leaf_count() > data.page_count() {
            return Err(Error::corrupt_segment(
                key.to_string(),
                format!("{} leaves but only {} data pages", trie.table().leaf_count(), data.page_count()),
            ));
        }
        if let Some(page_idx) = trie.table().max_page_idx().filter(|&idx| idx as usize >= data.page_count()) {
            return Err(Error::corrupt_segment(
                key.to_string(),
                format!("leaf refers to page {} of {}", page_idx, data.page_count()),
            ));
        }

        log::debug!("Opened segment {}/{} with {} pages", table, key, data.page_count());
        Ok(Self { key: key.clone(), trie, data: Arc::new(data) })
    }

    /// The segment's key.
    pub fn key(&self) -> &TrieKey {
        &self.key
    }

    /// The segment's trie.
    pub fn trie(&self) -> &ArrowHashTrie {
        &self.trie
    }

    /// The segment's data file.
    pub fn data(&self) -> &DataFile {
        &self.data
    }
}

impl From<DiskSegment> for Segment {
    fn from(segment: DiskSegment) -> Self {
        Segment {
            key: Some(segment.key),
            trie: Trie::Arrow(segment.trie),
            source: SegmentSource::Disk(segment.data),
        }
    }
}

/// Writes a trie's files to the store under `key`. The metadata file goes
/// last, so a listed metadata file always has its data file.
pub fn put_trie(store: &dyn ObjectStore, table: &str, key: &TrieKey, written: &WrittenTrie) -> Result<()> {
    store.put_object(&data_file_path(table, key), written.data.clone())?;
    store.put_object(&meta_file_path(table, key), written.meta.clone())?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CompressionType;
    use crate::storage::MemoryStore;
    use crate::trie::{Bucketer, HashTrieNode};

    #[test]
    fn test_paths() {
        let key = TrieKey::l0(1);
        assert_eq!(table_path("public/docs.v1"), "tables/public$docs$v1");
        assert_eq!(data_file_path("docs", &key), "tables/docs/data/l00-rc-b01.seg");
        assert_eq!(meta_file_path("docs", &key), "tables/docs/meta/l00-rc-b01.seg");
    }

    #[test]
    fn test_open_disk_segment() {
        let store = MemoryStore::new();
        let events = vec![Event::put([1u8; 16], 1, b"x".to_vec()), Event::put([200u8; 16], 2, b"y".to_vec())];
        let written = TrieWriter::new(Bucketer::default(), CompressionType::default())
            .write_events(&events, &[], 1)
            .unwrap();
        let key = TrieKey::l0(0);
        put_trie(&store, "docs", &key, &written).unwrap();

        let segment: Segment = DiskSegment::open(&store, "docs", &key, 4).unwrap().into();
        let mut rows = Vec::new();
        for leaf in segment.trie().leaves() {
            assert!(leaf.is_leaf());
            rows.extend(segment.leaf_events(&leaf).unwrap());
        }
        assert_eq!(rows, events);
        assert_eq!(PlanSegment::part(&segment), None);
    }

    #[test]
    fn test_open_corrupt_meta_reports_key() {
        let store = MemoryStore::new();
        let key = TrieKey::l0(3);
        store.put_object(&meta_file_path("docs", &key), bytes::Bytes::from_static(&[0u8; 64])).unwrap();

        let err = DiskSegment::open(&store, "docs", &key, 4).unwrap_err();
        assert!(matches!(err, Error::CorruptSegment { key, .. } if key == "l00-rc-b03"));
    }

    #[test]
    fn test_open_missing_segment() {
        let store = MemoryStore::new();
        assert!(matches!(DiskSegment::open(&store, "docs", &TrieKey::l0(0), 4), Err(Error::NotFound(_))));
    }
}
