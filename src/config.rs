//! Configuration options for the TrieDB core.

use crate::segment::RecencyPartition;
use crate::trie::{Bucketer, MemoryHashTrie, MemoryHashTrieBuilder};

/// Configuration options shared by the write buffer, segment writer and compactor.
#[derive(Debug, Clone)]
pub struct Options {
    /// Bits of the key consumed per trie level. Fan-out is `2^level_bits`.
    /// Must be one of 2, 4 or 8.
    /// Default: 2 (fan-out 4)
    pub level_bits: u32,

    /// Capacity of a mutable leaf's unsorted log before it is merged into `data`.
    /// Default: 64
    pub log_limit: usize,

    /// Row count above which a mutable leaf splits into a branch on log compaction.
    /// Default: 1024
    pub page_limit: usize,

    /// Maximum trie depth.
    /// Default: 64 (a 16-byte key at 2 bits per level)
    pub max_level: usize,

    /// Maximum rows per page in compaction output segments.
    /// Default: 1024
    pub output_page_size: usize,

    /// Compression algorithm for persisted blocks.
    /// Default: CompressionType::Snappy
    pub compression: CompressionType,

    /// Time bucket used to split historical rows out of "current" segments
    /// when rewriting level 0 into level 1. `None` keeps everything current.
    /// Default: None
    pub recency_partition: Option<RecencyPartition>,

    /// Number of compaction jobs executed in parallel.
    /// Default: 1
    pub compaction_threads: usize,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            level_bits: 2,
            log_limit: 64,
            page_limit: 1024,
            max_level: 64,
            output_page_size: 1024,
            compression: CompressionType::default(),
            recency_partition: None,
            compaction_threads: 1,
        }
    }
}

/// Compression algorithms supported for persisted blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum CompressionType {
    /// No compression.
    None = 0,

    /// Snappy compression (fast, moderate compression ratio).
    #[cfg(feature = "snappy")]
    Snappy = 1,
}

impl CompressionType {
    /// Convert from u8
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(CompressionType::None),
            #[cfg(feature = "snappy")]
            1 => Some(CompressionType::Snappy),
            _ => None,
        }
    }
}

impl Default for CompressionType {
    fn default() -> Self {
        #[cfg(feature = "snappy")]
        return CompressionType::Snappy;

        #[cfg(not(feature = "snappy"))]
        CompressionType::None
    }
}

impl Options {
    /// Creates a new Options with default values.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the number of key bits consumed per trie level.
    pub fn level_bits(mut self, bits: u32) -> Self {
        self.level_bits = bits;
        self
    }

    /// Sets the mutable leaf log capacity.
    pub fn log_limit(mut self, limit: usize) -> Self {
        self.log_limit = limit;
        self
    }

    /// Sets the mutable leaf split threshold.
    pub fn page_limit(mut self, limit: usize) -> Self {
        self.page_limit = limit;
        self
    }

    /// Sets the page size used when writing compaction outputs.
    pub fn output_page_size(mut self, size: usize) -> Self {
        self.output_page_size = size;
        self
    }

    /// Sets the compression algorithm.
    pub fn compression(mut self, compression: CompressionType) -> Self {
        self.compression = compression;
        self
    }

    /// Enables recency partitioning with the given bucket width.
    pub fn recency_partition(mut self, partition: RecencyPartition) -> Self {
        self.recency_partition = Some(partition);
        self
    }

    /// Sets the number of parallel compaction jobs.
    pub fn compaction_threads(mut self, threads: usize) -> Self {
        self.compaction_threads = threads;
        self
    }

    /// Returns the bucketer for the configured fan-out.
    pub fn bucketer(&self) -> crate::Result<Bucketer> {
        Bucketer::new(self.level_bits)
    }

    /// Returns a memory trie builder carrying these options.
    pub fn trie_builder(&self) -> MemoryHashTrieBuilder {
        MemoryHashTrie::builder()
            .log_limit(self.log_limit)
            .page_limit(self.page_limit)
            .level_bits(self.level_bits)
            .max_level(self.max_level)
    }

    /// Validates the options and returns an error if any are invalid.
    pub fn validate(&self) -> crate::Result<()> {
        self.bucketer()?;
        if self.log_limit == 0 {
            return Err(crate::Error::invalid_config("log_limit must be > 0"));
        }
        if self.page_limit == 0 {
            return Err(crate::Error::invalid_config("page_limit must be > 0"));
        }
        if self.output_page_size == 0 {
            return Err(crate::Error::invalid_config("output_page_size must be > 0"));
        }
        if self.max_level == 0 {
            return Err(crate::Error::invalid_config("max_level must be > 0"));
        }
        if self.compaction_threads == 0 {
            return Err(crate::Error::invalid_config("compaction_threads must be > 0"));
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_options() {
        let opts = Options::default();
        assert_eq!(opts.level_bits, 2);
        assert_eq!(opts.log_limit, 64);
        assert_eq!(opts.page_limit, 1024);
        assert_eq!(opts.max_level, 64);
        assert!(opts.recency_partition.is_none());
    }

    #[test]
    fn test_options_builder() {
        let opts = Options::new()
            .level_bits(4)
            .log_limit(8)
            .page_limit(32)
            .recency_partition(RecencyPartition::Week)
            .compaction_threads(4);

        assert_eq!(opts.level_bits, 4);
        assert_eq!(opts.log_limit, 8);
        assert_eq!(opts.page_limit, 32);
        assert_eq!(opts.recency_partition, Some(RecencyPartition::Week));
        assert_eq!(opts.compaction_threads, 4);
    }

    #[test]
    fn test_options_validation() {
        let mut opts = Options::default();
        assert!(opts.validate().is_ok());

        opts.level_bits = 3;
        assert!(matches!(opts.validate(), Err(crate::Error::InvalidConfig(_))));

        opts.level_bits = 8;
        assert!(opts.validate().is_ok());

        opts.log_limit = 0;
        assert!(opts.validate().is_err());
    }
}
