//! Record framing errors

use thiserror::Error;

/// Convenience alias for framing results
pub type Result<T> = std::result::Result<T, ProtocolError>;

/// Errors raised while encoding or decoding records
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer ends before the record does (header or payload)
    #[error("record truncated: need {expected} bytes, have {actual}")]
    RecordTruncated {
        /// Bytes required to finish the record
        expected: usize,
        /// Bytes available
        actual: usize,
    },

    /// Version byte is not the supported protocol version.
    /// Fatal for the connection: framing cannot be resynchronized.
    #[error("unsupported protocol version: {0:#04x}")]
    UnsupportedVersion(u8),

    /// Header declares a payload larger than the fixed maximum.
    /// Fatal for the connection.
    #[error("record payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Declared or actual payload size
        size: usize,
        /// The fixed maximum payload size
        max: usize,
    },
}
