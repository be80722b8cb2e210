//! Checksummed blocks and file footers shared by data and metadata files.
//!
//! Block format:
//! ```text
//! [payload: bytes]        // possibly compressed
//! [compression: u8]
//! [crc32: u32 LE]         // over payload + compression byte
//! ```
//!
//! Footer format (40 bytes):
//! ```text
//! [index_handle: 16 bytes]
//! [count: u64 LE]
//! [padding: 8 bytes]
//! [magic: u64 LE]
//! ```

use crate::config::CompressionType;
use crate::error::{Error, Result};
use bytes::{BufMut, BytesMut};

/// Size of the trailer appended to every block.
pub const BLOCK_TRAILER_SIZE: usize = 5;

/// Size of a file footer.
pub const FOOTER_SIZE: usize = 40;

/// Magic number of segment data files.
pub const DATA_MAGIC: u64 = 0x5452_4945_4441_5441; // "TRIEDATA"

/// Magic number of segment metadata files.
pub const META_MAGIC: u64 = 0x5452_4945_4d45_5441; // "TRIEMETA"

/// Location of a block within a file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct BlockHandle {
    /// Offset of the block in the file
    pub offset: u64,
    /// Size of the block in bytes, trailer included
    pub size: u64,
}

impl BlockHandle {
    /// Create a new BlockHandle
    pub fn new(offset: u64, size: u64) -> Self {
        Self { offset, size }
    }

    /// Encode to 16 bytes: offset then size, little-endian.
    pub fn encode(&self) -> [u8; 16] {
        let mut buf = [0u8; 16];
        buf[..8].copy_from_slice(&self.offset.to_le_bytes());
        buf[8..].copy_from_slice(&self.size.to_le_bytes());
        buf
    }

    /// Decode a BlockHandle from bytes
    pub fn decode(data: &[u8]) -> Result<Self> {
        if data.len() < 16 {
            return Err(Error::corruption("BlockHandle too short"));
        }
        Ok(Self { offset: read_u64(&data[0..8])?, size: read_u64(&data[8..16])? })
    }
}

fn read_u64(data: &[u8]) -> Result<u64> {
    let bytes: [u8; 8] = data.try_into().map_err(|_| Error::corruption("truncated u64"))?;
    Ok(u64::from_le_bytes(bytes))
}

/// Appends `payload` as a block to `buf` and returns its handle.
pub fn write_block(buf: &mut BytesMut, payload: &[u8], compression: CompressionType) -> Result<BlockHandle> {
    let offset = buf.len() as u64;

    match compression {
        CompressionType::None => buf.put_slice(payload),
        #[cfg(feature = "snappy")]
        CompressionType::Snappy => {
            let compressed = snap::raw::Encoder::new()
                .compress_vec(payload)
                .map_err(|e| Error::internal(format!("snappy compression failed: {}", e)))?;
            buf.put_slice(&compressed);
        }
    }
    buf.put_u8(compression as u8);

    let crc = crc32fast::hash(&buf[offset as usize..]);
    buf.put_u32_le(crc);

    Ok(BlockHandle::new(offset, buf.len() as u64 - offset))
}

/// Reads, verifies and decompresses the block at `handle`.
pub fn read_block(file: &[u8], handle: BlockHandle) -> Result<Vec<u8>> {
    let start = handle.offset as usize;
    let end = handle
        .offset
        .checked_add(handle.size)
        .map(|end| end as usize)
        .filter(|&end| end <= file.len() && handle.size as usize >= BLOCK_TRAILER_SIZE)
        .ok_or_else(|| {
            Error::corruption(format!(
                "block {}+{} out of bounds for file of {} bytes",
                handle.offset,
                handle.size,
                file.len()
            ))
        })?;

    let block = &file[start..end];
    let (body, crc_bytes) = block.split_at(block.len() - 4);
    let expected = u32::from_le_bytes([crc_bytes[0], crc_bytes[1], crc_bytes[2], crc_bytes[3]]);
    let actual = crc32fast::hash(body);
    if expected != actual {
        return Err(Error::ChecksumMismatch { expected, actual });
    }

    let (payload, compression) = body.split_at(body.len() - 1);
    match CompressionType::from_u8(compression[0]) {
        Some(CompressionType::None) => Ok(payload.to_vec()),
        #[cfg(feature = "snappy")]
        Some(CompressionType::Snappy) => snap::raw::Decoder::new()
            .decompress_vec(payload)
            .map_err(|e| Error::corruption(format!("snappy decompression failed: {}", e))),
        None => Err(Error::corruption(format!("unknown compression type {}", compression[0]))),
    }
}

/// Trailer of a segment file pointing at its index block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Handle of the index block.
    pub index_handle: BlockHandle,
    /// Entry count recorded by the writer (pages or nodes).
    pub count: u64,
}

impl Footer {
    /// Create a new Footer
    pub fn new(index_handle: BlockHandle, count: u64) -> Self {
        Self { index_handle, count }
    }

    /// Encode the footer with the given magic number.
    pub fn encode(&self, magic: u64) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..16].copy_from_slice(&self.index_handle.encode());
        buf[16..24].copy_from_slice(&self.count.to_le_bytes());
        buf[32..40].copy_from_slice(&magic.to_le_bytes());
        buf
    }

    /// Decodes the footer at the end of `file`, checking its magic number.
    pub fn decode(file: &[u8], magic: u64) -> Result<Self> {
        if file.len() < FOOTER_SIZE {
            return Err(Error::corruption(format!("file of {} bytes is too small for a footer", file.len())));
        }
        let data = &file[file.len() - FOOTER_SIZE..];

        let actual = read_u64(&data[32..40])?;
        if actual != magic {
            return Err(Error::corruption(format!(
                "Invalid magic number: expected {:#x}, got {:#x}",
                magic, actual
            )));
        }

        Ok(Self { index_handle: BlockHandle::decode(&data[0..16])?, count: read_u64(&data[16..24])? })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_block_roundtrip_uncompressed() {
        let mut buf = BytesMut::new();
        buf.put_slice(b"header");
        let handle = write_block(&mut buf, b"hello blocks", CompressionType::None).unwrap();
        assert_eq!(handle.offset, 6);
        assert_eq!(handle.size as usize, 12 + BLOCK_TRAILER_SIZE);
        assert_eq!(read_block(&buf, handle).unwrap(), b"hello blocks");
    }

    #[cfg(feature = "snappy")]
    #[test]
    fn test_block_roundtrip_snappy() {
        let payload = vec![7u8; 4096];
        let mut buf = BytesMut::new();
        let handle = write_block(&mut buf, &payload, CompressionType::Snappy).unwrap();
        assert!((handle.size as usize) < payload.len());
        assert_eq!(read_block(&buf, handle).unwrap(), payload);
    }

    #[test]
    fn test_block_checksum_mismatch() {
        let mut buf = BytesMut::new();
        let handle = write_block(&mut buf, b"payload", CompressionType::None).unwrap();
        buf[0] ^= 0xff;
        assert!(matches!(read_block(&buf, handle), Err(Error::ChecksumMismatch { .. })));
    }

    #[test]
    fn test_block_out_of_bounds() {
        let buf = vec![0u8; 8];
        assert!(matches!(read_block(&buf, BlockHandle::new(4, 16)), Err(Error::Corruption(_))));
    }

    #[test]
    fn test_footer() {
        let footer = Footer::new(BlockHandle::new(100, 50), 3);
        let mut file = vec![1u8; 10];
        file.extend_from_slice(&footer.encode(DATA_MAGIC));

        assert_eq!(Footer::decode(&file, DATA_MAGIC).unwrap(), footer);
        assert!(matches!(Footer::decode(&file, META_MAGIC), Err(Error::Corruption(_))));
        assert!(Footer::decode(&file[..20], DATA_MAGIC).is_err());
    }
}
