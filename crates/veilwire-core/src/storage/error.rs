//! Storage error types.
//!
//! Defines errors that can occur during storage operations:
//! - `Io`: Underlying storage system errors
//! - `Serialization`: Failed to encode/decode a record
//! - `CorruptRecord`: A loaded record is structurally invalid

use thiserror::Error;

/// Errors that can occur during storage operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    /// I/O error (file system, database, etc.)
    #[error("I/O error: {0}")]
    Io(String),

    /// Serialization or deserialization failed
    #[error("serialization error: {0}")]
    Serialization(String),

    /// A loaded record is structurally invalid (bad key length, unknown
    /// role byte). Indicates corruption or a version mismatch.
    #[error("corrupt record: {0}")]
    CorruptRecord(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        StorageError::Io(err.to_string())
    }
}
