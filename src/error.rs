//! Error types for the TrieDB indexing and compaction core.

use std::io;
use thiserror::Error;

/// The result type used throughout TrieDB.
pub type Result<T> = std::result::Result<T, Error>;

/// The error type for TrieDB operations.
#[derive(Debug, Error)]
pub enum Error {
    /// An I/O error occurred.
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Data corruption was detected outside a specific segment.
    #[error("Data corruption: {0}")]
    Corruption(String),

    /// A persisted segment could not be opened because its metadata is malformed.
    #[error("Corrupt segment {key}: {reason}")]
    CorruptSegment {
        /// The trie key of the offending segment.
        key: String,
        /// What was wrong with it.
        reason: String,
    },

    /// A trie key string (or one of its components) is malformed.
    #[error("Invalid trie key: {0}")]
    InvalidKey(String),

    /// An unsupported configuration was supplied (e.g. a fan-out outside 2/4/8 bits).
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// An invalid argument was provided.
    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    /// The requested object or table was not found.
    #[error("Not found: {0}")]
    NotFound(String),

    /// A serialization or deserialization error occurred.
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// A checksum mismatch was detected.
    #[error("Checksum mismatch: expected {expected:#x}, got {actual:#x}")]
    ChecksumMismatch {
        /// The expected checksum value.
        expected: u32,
        /// The actual checksum value.
        actual: u32,
    },

    /// An internal error occurred.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Creates a new corruption error.
    pub fn corruption(msg: impl Into<String>) -> Self {
        Error::Corruption(msg.into())
    }

    /// Creates a new corrupt-segment error for the given trie key.
    pub fn corrupt_segment(key: impl Into<String>, reason: impl Into<String>) -> Self {
        Error::CorruptSegment { key: key.into(), reason: reason.into() }
    }

    /// Creates a new invalid key error.
    pub fn invalid_key(msg: impl Into<String>) -> Self {
        Error::InvalidKey(msg.into())
    }

    /// Creates a new invalid configuration error.
    pub fn invalid_config(msg: impl Into<String>) -> Self {
        Error::InvalidConfig(msg.into())
    }

    /// Creates a new invalid argument error.
    pub fn invalid_argument(msg: impl Into<String>) -> Self {
        Error::InvalidArgument(msg.into())
    }

    /// Creates a new not found error.
    pub fn not_found(msg: impl Into<String>) -> Self {
        Error::NotFound(msg.into())
    }

    /// Creates a new internal error.
    pub fn internal(msg: impl Into<String>) -> Self {
        Error::Internal(msg.into())
    }
}

impl From<bincode::Error> for Error {
    fn from(err: bincode::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::Serialization(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::corruption("test corruption");
        assert_eq!(err.to_string(), "Data corruption: test corruption");

        let err = Error::ChecksumMismatch { expected: 0x12345678, actual: 0x87654321 };
        assert!(err.to_string().contains("0x12345678"));
        assert!(err.to_string().contains("0x87654321"));
    }

    #[test]
    fn test_corrupt_segment_carries_key() {
        let err = Error::corrupt_segment("l00-rc-b00", "unknown node tag 7");
        assert!(matches!(&err, Error::CorruptSegment { key, .. } if key == "l00-rc-b00"));
        assert_eq!(err.to_string(), "Corrupt segment l00-rc-b00: unknown node tag 7");
    }

    #[test]
    fn test_error_from_io() {
        let io_err = io::Error::new(io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
