//! The live write buffer of a table.
//!
//! A single writer appends event batches; every batch publishes a new
//! immutable [`LiveSnapshot`]. Readers clone the current snapshot `Arc` and
//! traverse it without further locking while the writer carries on.

use crate::config::Options;
use crate::error::Result;
use crate::segment::{put_trie, Event, EventReader, Segment, TrieWriter};
use crate::storage::ObjectStore;
use crate::trie::{KeyReader, MemoryHashTrie, TrieKey};
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;

/// Append-only rows of the live buffer, stored as shared immutable chunks.
///
/// Cloning shares every chunk; appending adds one chunk.
#[derive(Debug, Clone, Default)]
pub struct LiveRelation {
    chunks: Vec<Arc<[Event]>>,
    starts: Vec<u32>,
    len: u32,
}

impl LiveRelation {
    /// Creates an empty relation.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a relation with `events` appended as one chunk.
    pub fn append(&self, events: Vec<Event>) -> Self {
        let mut next = self.clone();
        if !events.is_empty() {
            next.starts.push(next.len);
            next.len += events.len() as u32;
            next.chunks.push(events.into());
        }
        next
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.len as usize
    }

    /// Returns true if there are no rows.
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Iterates rows in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Event> + '_ {
        self.chunks.iter().flat_map(|chunk| chunk.iter())
    }
}

impl KeyReader for LiveRelation {
    fn key(&self, idx: u32) -> &[u8] {
        &self.event(idx).iid
    }

    fn row_count(&self) -> usize {
        self.len()
    }
}

impl EventReader for LiveRelation {
    fn event(&self, idx: u32) -> &Event {
        let chunk = self.starts.partition_point(|&start| start <= idx) - 1;
        &self.chunks[chunk][(idx - self.starts[chunk]) as usize]
    }
}

/// An immutable view of the live buffer.
#[derive(Debug, Clone)]
pub struct LiveSnapshot {
    relation: LiveRelation,
    trie: MemoryHashTrie,
}

impl LiveSnapshot {
    /// The rows.
    pub fn relation(&self) -> &LiveRelation {
        &self.relation
    }

    /// The trie over the rows.
    pub fn trie(&self) -> &MemoryHashTrie {
        &self.trie
    }

    /// Number of rows.
    pub fn row_count(&self) -> usize {
        self.relation.len()
    }
}

/// Live write buffer of one table.
pub struct LiveTable {
    table: String,
    options: Options,
    current: RwLock<Arc<LiveSnapshot>>,
    writer: Mutex<()>,
}

impl LiveTable {
    /// Creates an empty buffer for `table`.
    pub fn new(table: impl Into<String>, options: Options) -> Result<Self> {
        options.validate()?;
        let snapshot = LiveSnapshot { relation: LiveRelation::new(), trie: options.trie_builder().build()? };
        Ok(Self {
            table: table.into(),
            options,
            current: RwLock::new(Arc::new(snapshot)),
            writer: Mutex::new(()),
        })
    }

    /// Table name.
    pub fn table(&self) -> &str {
        &self.table
    }

    /// The most recently published snapshot.
    pub fn snapshot(&self) -> Arc<LiveSnapshot> {
        self.current.read().clone()
    }

    /// The current snapshot as a mergeable segment.
    pub fn segment(&self) -> Segment {
        Segment::live(self.snapshot())
    }

    /// Appends a batch of events and publishes the resulting snapshot.
    pub fn append(&self, events: Vec<Event>) {
        let _writer = self.writer.lock();
        let base = self.snapshot();

        let start = base.relation.len() as u32;
        let relation = base.relation.append(events);
        let mut trie = base.trie.clone();
        for idx in start..relation.len() as u32 {
            trie = trie.add(&relation, idx);
        }

        *self.current.write() = Arc::new(LiveSnapshot { relation, trie });
    }

    /// Seals the buffer as the level-0 trie of `block_index` and resets it.
    pub fn finish_block(&self, store: &dyn ObjectStore, block_index: u64) -> Result<TrieKey> {
        let _writer = self.writer.lock();
        let snapshot = self.snapshot();

        let key = TrieKey::l0(block_index);
        let written = TrieWriter::new(self.options.bucketer()?, self.options.compression)
            .write_live_trie(&snapshot.trie, &snapshot.relation)?;
        put_trie(store, &self.table, &key, &written)?;

        log::info!(
            "Sealed live buffer of {} as {} ({} rows, {} pages)",
            self.table,
            key,
            written.row_count,
            written.page_count
        );

        let empty = LiveSnapshot { relation: LiveRelation::new(), trie: self.options.trie_builder().build()? };
        *self.current.write() = Arc::new(empty);

        Ok(key)
    }
}
