//! Error types for transport key operations

use thiserror::Error;

/// Errors from transport key operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TransportKeyError {
    /// Secret buffer has the wrong length (storage corruption or a version
    /// mismatch; fatal)
    #[error("invalid secret length: expected {expected}, got {actual}")]
    InvalidSecretLength {
        /// Expected secret length in bytes
        expected: usize,
        /// Actual secret length in bytes
        actual: usize,
    },

    /// Connection number does not fit the tag encoding
    #[error("connection number out of range: {connection}")]
    ConnectionNumberOutOfRange {
        /// The rejected connection number
        connection: u64,
    },

    /// Record authentication failed (wrong keys or tampered bytes)
    #[error("record MAC mismatch")]
    MacMismatch,

    /// Record payload is shorter than the trailing MAC
    #[error("record payload too short: {actual} bytes, need at least {min}")]
    RecordTooShort {
        /// Actual payload length
        actual: usize,
        /// Minimum payload length (the MAC length)
        min: usize,
    },
}
