//! # TrieDB - Hash-Trie Indexing and Leveled Compaction
//!
//! TrieDB is the indexing and compaction core of an immutable, columnar
//! document store. Rows are identified by a 16-byte internal document id
//! (iid) and indexed by a hash trie: a bucketed radix tree over the iid.
//!
//! ## Architecture
//!
//! - **Trie**: the mutable, structurally shared [`trie::MemoryHashTrie`]
//!   behind the write buffer and the read-only [`trie::ArrowHashTrie`]
//!   rebuilt from persisted node metadata
//! - **Trie keys**: `l<level>-r<recency>[-p<part>]-b<block>` names that sort
//!   in numeric order
//! - **Segments**: a trie plus its rows, merged across segments through a
//!   merge plan
//! - **Live table**: single-writer buffer publishing immutable snapshots
//! - **Catalog**: the tries known per table, live or superseded
//! - **Compaction**: level 0 → 1 rewrites, then `W`-way merges sharded by
//!   trie bucket
//!
//! ## Example Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use triedb::catalog::TrieCatalog;
//! use triedb::compaction::{Compactor, SegmentJobExecutor};
//! use triedb::live::LiveTable;
//! use triedb::segment::Event;
//! use triedb::storage::LocalStore;
//! use triedb::Options;
//!
//! # fn main() -> Result<(), triedb::Error> {
//! let options = Options::default();
//! let store = Arc::new(LocalStore::open("./data")?);
//! let catalog = Arc::new(TrieCatalog::open("./data/catalog", 4)?);
//!
//! // Buffer writes and seal them as a level-0 trie
//! let table = LiveTable::new("docs", options.clone())?;
//! table.append(vec![Event::put([7u8; 16], 1, b"doc".to_vec())]);
//! let key = table.finish_block(&*store, 0)?;
//! catalog.add_tries("docs", vec![key])?;
//!
//! // Compact until no work remains
//! let executor = Arc::new(SegmentJobExecutor::new(store, options.clone())?);
//! Compactor::new(catalog, executor, &options)?.compact_all()?;
//! # Ok(())
//! # }
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

// Module declarations
pub mod catalog;
pub mod compaction;
pub mod config;
pub mod error;
pub mod live;
pub mod segment;
pub mod storage;
pub mod trie;

// Re-exports
pub use config::{CompressionType, Options};
pub use error::{Error, Result};
pub use trie::{parse_key, TrieKey};
