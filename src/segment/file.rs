//! Segment data and metadata files.
//!
//! Data file:
//! ```text
//! [page block 0] ... [page block N-1]   // bincode Vec<Event>, one page per leaf
//! [page index block]                    // bincode Vec<BlockHandle>
//! [footer]                              // index handle, page count, DATA_MAGIC
//! ```
//!
//! Metadata file:
//! ```text
//! [node table block]                    // bincode NodeTable
//! [footer]                              // node table handle, node count, META_MAGIC
//! ```

use super::block::{read_block, write_block, BlockHandle, Footer, DATA_MAGIC, META_MAGIC};
use super::event::Event;
use crate::config::CompressionType;
use crate::error::{Error, Result};
use crate::trie::NodeTable;
use bytes::{Bytes, BytesMut};

/// Builds a data file page by page.
pub struct DataFileBuilder {
    buf: BytesMut,
    pages: Vec<BlockHandle>,
    rows: usize,
    compression: CompressionType,
}

impl DataFileBuilder {
    /// Create a new builder
    pub fn new(compression: CompressionType) -> Self {
        Self { buf: BytesMut::new(), pages: Vec::new(), rows: 0, compression }
    }

    /// Appends one page and returns its index.
    pub fn add_page(&mut self, events: &[Event]) -> Result<u32> {
        let payload = bincode::serialize(events)?;
        let handle = write_block(&mut self.buf, &payload, self.compression)?;
        self.pages.push(handle);
        self.rows += events.len();
        Ok(self.pages.len() as u32 - 1)
    }

    /// Number of pages written so far.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Number of rows written so far.
    pub fn row_count(&self) -> usize {
        self.rows
    }

    /// Writes the page index and footer and returns the file contents.
    pub fn finish(mut self) -> Result<Bytes> {
        let index = bincode::serialize(&self.pages)?;
        let index_handle = write_block(&mut self.buf, &index, self.compression)?;
        let footer = Footer::new(index_handle, self.pages.len() as u64);
        self.buf.extend_from_slice(&footer.encode(DATA_MAGIC));
        Ok(self.buf.freeze())
    }
}

/// A sealed data file.
#[derive(Debug, Clone)]
pub struct DataFile {
    data: Bytes,
    pages: Vec<BlockHandle>,
}

impl DataFile {
    /// Opens a data file, reading its footer and page index.
    pub fn open(data: Bytes) -> Result<Self> {
        let footer = Footer::decode(&data, DATA_MAGIC)?;
        let pages: Vec<BlockHandle> = bincode::deserialize(&read_block(&data, footer.index_handle)?)?;
        if pages.len() as u64 != footer.count {
            return Err(Error::corruption(format!(
                "page index holds {} pages, footer says {}",
                pages.len(),
                footer.count
            )));
        }
        Ok(Self { data, pages })
    }

    /// Number of pages.
    pub fn page_count(&self) -> usize {
        self.pages.len()
    }

    /// Reads page `idx`.
    pub fn read_page(&self, idx: u32) -> Result<Vec<Event>> {
        let handle = self
            .pages
            .get(idx as usize)
            .ok_or_else(|| Error::corruption(format!("page {} out of range ({} pages)", idx, self.pages.len())))?;
        Ok(bincode::deserialize(&read_block(&self.data, *handle)?)?)
    }
}

/// Encodes a node table as a metadata file.
pub fn encode_meta_file(table: &NodeTable, compression: CompressionType) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    let handle = write_block(&mut buf, &bincode::serialize(table)?, compression)?;
    buf.extend_from_slice(&Footer::new(handle, table.len() as u64).encode(META_MAGIC));
    Ok(buf.freeze())
}

/// Decodes the node table of a metadata file.
pub fn decode_meta_file(data: &[u8]) -> Result<NodeTable> {
    let footer = Footer::decode(data, META_MAGIC)?;
    let table: NodeTable = bincode::deserialize(&read_block(data, footer.index_handle)?)?;
    if table.len() as u64 != footer.count {
        return Err(Error::corruption(format!(
            "node table holds {} rows, footer says {}",
            table.len(),
            footer.count
        )));
    }
    Ok(table)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::trie::NodeTableBuilder;

    #[test]
    fn test_data_file_pages() {
        let mut builder = DataFileBuilder::new(CompressionType::default());
        let first = vec![Event::put([1u8; 16], 1, b"a".to_vec()), Event::delete([2u8; 16], 2)];
        let second = vec![Event::erase([3u8; 16], 3)];
        assert_eq!(builder.add_page(&first).unwrap(), 0);
        assert_eq!(builder.add_page(&second).unwrap(), 1);
        assert_eq!(builder.row_count(), 3);

        let file = DataFile::open(builder.finish().unwrap()).unwrap();
        assert_eq!(file.page_count(), 2);
        assert_eq!(file.read_page(0).unwrap(), first);
        assert_eq!(file.read_page(1).unwrap(), second);
        assert!(file.read_page(2).is_err());
    }

    #[test]
    fn test_empty_data_file() {
        let bytes = DataFileBuilder::new(CompressionType::None).finish().unwrap();
        assert_eq!(DataFile::open(bytes).unwrap().page_count(), 0);
    }

    #[test]
    fn test_meta_file() {
        let mut nodes = NodeTableBuilder::new();
        let leaf = nodes.write_leaf(0);
        let nil = nodes.write_nil();
        nodes.write_branch(&[Some(leaf), Some(nil), None, None]);
        let table = nodes.finish();

        let bytes = encode_meta_file(&table, CompressionType::None).unwrap();
        assert_eq!(decode_meta_file(&bytes).unwrap(), table);

        assert!(DataFile::open(bytes).is_err());
    }
}
