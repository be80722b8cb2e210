//! Key-to-bucket routing for hash tries.
//!
//! A key is consumed `level_bits` at a time, most significant bit first. The
//! bits consumed at level `n` select the child bucket of a branch at depth `n`.

use crate::error::{Error, Result};
use std::cmp::Ordering;

/// Default number of key bits consumed per trie level.
pub const DEFAULT_LEVEL_BITS: u32 = 2;

/// Default trie fan-out (`2^DEFAULT_LEVEL_BITS`).
pub const DEFAULT_LEVEL_WIDTH: usize = 1 << DEFAULT_LEVEL_BITS;

/// Maps key bytes to bucket indices at a given trie depth.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Bucketer {
    level_bits: u32,
}

impl Default for Bucketer {
    fn default() -> Self {
        Self { level_bits: DEFAULT_LEVEL_BITS }
    }
}

impl Bucketer {
    /// Creates a bucketer consuming `level_bits` bits per level.
    ///
    /// Only 2, 4 and 8 are supported: they divide a byte evenly, so a bucket
    /// never straddles a byte boundary.
    pub fn new(level_bits: u32) -> Result<Self> {
        match level_bits {
            2 | 4 | 8 => Ok(Self { level_bits }),
            _ => Err(Error::invalid_config(format!(
                "level_bits must be one of 2, 4 or 8, got {}",
                level_bits
            ))),
        }
    }

    /// Bits consumed per level.
    pub fn level_bits(&self) -> u32 {
        self.level_bits
    }

    /// Number of children per branch.
    pub fn level_width(&self) -> usize {
        1 << self.level_bits
    }

    fn level_mask(&self) -> u8 {
        (self.level_width() - 1) as u8
    }

    /// Deepest level a key of `key_width` bytes can be routed through.
    pub fn max_level(&self, key_width: usize) -> usize {
        key_width * 8 / self.level_bits as usize
    }

    /// Returns the bucket `key` routes to at `level`.
    ///
    /// Levels beyond the end of the key route to bucket 0.
    pub fn bucket_for(&self, key: &[u8], level: usize) -> u8 {
        let bit_idx = level * self.level_bits as usize;
        let byte_idx = bit_idx / 8;
        let bit_offset = bit_idx % 8;

        match key.get(byte_idx) {
            Some(b) => (b >> (8 - self.level_bits as usize - bit_offset)) & self.level_mask(),
            None => 0,
        }
    }

    /// Compares the bucket sequence of `key` against `path`, level by level.
    ///
    /// Returns `Equal` when `key` routes through every bucket of `path`.
    pub fn compare_to_path(&self, key: &[u8], path: &[u8]) -> Ordering {
        for (level, bucket) in path.iter().enumerate() {
            let cmp = self.bucket_for(key, level).cmp(bucket);
            if cmp != Ordering::Equal {
                return cmp;
            }
        }
        Ordering::Equal
    }

    /// Smallest key of `key_width` bytes that routes through `path`.
    pub fn start_key(&self, path: &[u8], key_width: usize) -> Vec<u8> {
        let mut key = vec![0u8; key_width];

        for (level, bucket) in path.iter().enumerate() {
            let bit_idx = level * self.level_bits as usize;
            let byte_idx = bit_idx / 8;
            let bit_offset = bit_idx % 8;

            if let Some(b) = key.get_mut(byte_idx) {
                *b |= (bucket & self.level_mask()) << (8 - self.level_bits as usize - bit_offset);
            }
        }

        key
    }

    /// Next path of the same length in bucket order, or `None` after the last one.
    pub fn increment_path(&self, path: &[u8]) -> Option<Vec<u8>> {
        let mut next = path.to_vec();

        for i in (0..next.len()).rev() {
            let incremented = (next[i] & self.level_mask()) as usize + 1;
            if incremented < self.level_width() {
                next[i] = incremented as u8;
                return Some(next);
            }
            next[i] = 0;
        }

        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rejects_unsupported_level_bits() {
        for bits in [0, 1, 3, 5, 16] {
            assert!(matches!(Bucketer::new(bits), Err(Error::InvalidConfig(_))));
        }
        for bits in [2, 4, 8] {
            assert_eq!(Bucketer::new(bits).unwrap().level_width(), 1 << bits);
        }
    }

    #[test]
    fn test_bucket_for_two_bits() {
        let bucketer = Bucketer::default();
        // 0b10_01_11_00
        let key = [0x9c, 0xff];
        assert_eq!(bucketer.bucket_for(&key, 0), 2);
        assert_eq!(bucketer.bucket_for(&key, 1), 1);
        assert_eq!(bucketer.bucket_for(&key, 2), 3);
        assert_eq!(bucketer.bucket_for(&key, 3), 0);
        assert_eq!(bucketer.bucket_for(&key, 4), 3);
        assert_eq!(bucketer.bucket_for(&key, 8), 0);
    }

    #[test]
    fn test_bucket_for_wider_levels() {
        let key = [0xab, 0xcd];
        let nibbles = Bucketer::new(4).unwrap();
        assert_eq!(nibbles.bucket_for(&key, 0), 0xa);
        assert_eq!(nibbles.bucket_for(&key, 3), 0xd);

        let bytes = Bucketer::new(8).unwrap();
        assert_eq!(bytes.bucket_for(&key, 1), 0xcd);
        assert_eq!(bytes.max_level(16), 16);
    }

    #[test]
    fn test_compare_to_path() {
        let bucketer = Bucketer::default();
        let key = [0x9c];
        assert_eq!(bucketer.compare_to_path(&key, &[]), Ordering::Equal);
        assert_eq!(bucketer.compare_to_path(&key, &[2, 1]), Ordering::Equal);
        assert_eq!(bucketer.compare_to_path(&key, &[2, 2]), Ordering::Less);
        assert_eq!(bucketer.compare_to_path(&key, &[1, 3]), Ordering::Greater);
    }

    #[test]
    fn test_start_key_routes_to_path() {
        let bucketer = Bucketer::default();
        let path = [3, 0, 2, 1, 1];
        let key = bucketer.start_key(&path, 16);
        assert_eq!(key.len(), 16);
        assert_eq!(bucketer.compare_to_path(&key, &path), Ordering::Equal);
        assert_eq!(key[0], 0b11_00_10_01);
        assert_eq!(key[1], 0b01_00_00_00);
    }

    #[test]
    fn test_increment_path() {
        let bucketer = Bucketer::default();
        assert_eq!(bucketer.increment_path(&[0, 1]), Some(vec![0, 2]));
        assert_eq!(bucketer.increment_path(&[0, 3]), Some(vec![1, 0]));
        assert_eq!(bucketer.increment_path(&[3, 3]), None);
        assert_eq!(bucketer.increment_path(&[]), None);
    }
}
