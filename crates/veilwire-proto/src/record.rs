//! Record header and record framing with zero-copy parsing.
//!
//! The `RecordHeader` is a fixed 4-byte structure serialized as raw binary
//! (big-endian length). Parsing validates everything before a single payload
//! byte is copied, so malformed framing is rejected without allocation.

use bytes::{BufMut, Bytes};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Fixed 4-byte record header
///
/// Layout on the wire:
/// `[version: 1 byte] [record type: 1 byte] [payload length: 2 bytes BE]`
///
/// Fields are stored as raw bytes to avoid alignment issues; all bit
/// patterns are structurally valid, so casting from untrusted network bytes
/// cannot misbehave. Semantic validation (version, length bound) happens in
/// [`RecordHeader::from_bytes`].
#[repr(C)]
#[derive(Clone, Copy, Debug, PartialEq, Eq, FromBytes, IntoBytes, KnownLayout, Immutable)]
pub struct RecordHeader {
    version: u8,
    record_type: u8,
    payload_length: [u8; 2],
}

impl RecordHeader {
    /// Size of the serialized header (4 bytes)
    pub const SIZE: usize = 4;

    /// Current protocol version
    pub const VERSION: u8 = 0x01;

    /// Maximum record payload size (48 KiB, fits the 16-bit length field)
    pub const MAX_PAYLOAD_LENGTH: u16 = 48 * 1024;

    /// Create a header for a record of `payload_length` bytes.
    ///
    /// # Errors
    ///
    /// `PayloadTooLarge` if `payload_length` exceeds
    /// [`Self::MAX_PAYLOAD_LENGTH`].
    pub fn new(record_type: u8, payload_length: u16) -> Result<Self> {
        if payload_length > Self::MAX_PAYLOAD_LENGTH {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload_length as usize,
                max: Self::MAX_PAYLOAD_LENGTH as usize,
            });
        }
        Ok(Self {
            version: Self::VERSION,
            record_type,
            payload_length: payload_length.to_be_bytes(),
        })
    }

    /// Parse a header from network bytes (zero-copy).
    ///
    /// Validation order: buffer size, version, payload length bound.
    /// Cheapest checks first, failing fast on garbage.
    ///
    /// # Errors
    ///
    /// - `RecordTruncated` if fewer than 4 bytes are available
    /// - `UnsupportedVersion` if the version byte is unknown (fatal)
    /// - `PayloadTooLarge` if the declared length exceeds the maximum (fatal)
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::RecordTruncated {
                expected: Self::SIZE,
                actual: bytes.len(),
            })?
            .0;

        if header.version != Self::VERSION {
            return Err(ProtocolError::UnsupportedVersion(header.version));
        }

        if header.payload_length() > Self::MAX_PAYLOAD_LENGTH {
            return Err(ProtocolError::PayloadTooLarge {
                size: header.payload_length() as usize,
                max: Self::MAX_PAYLOAD_LENGTH as usize,
            });
        }

        Ok(header)
    }

    /// Serialize the header to bytes.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Protocol version byte (currently 0x01).
    #[must_use]
    pub fn version(&self) -> u8 {
        self.version
    }

    /// Record type byte. Opaque to the framing layer.
    #[must_use]
    pub fn record_type(&self) -> u8 {
        self.record_type
    }

    /// Payload length in bytes (max 48 KiB).
    #[must_use]
    pub fn payload_length(&self) -> u16 {
        u16::from_be_bytes(self.payload_length)
    }
}

/// Complete wire record
///
/// Layout on the wire: `[RecordHeader: 4 bytes] + [payload: variable]`.
///
/// Holds raw payload bytes: for inbound records this is the sealed
/// ciphertext, decrypted later by the connection's keys; the framer never
/// interprets it.
///
/// # Invariants
///
/// - `payload.len()` equals `header.payload_length()`; enforced by
///   [`Record::new`] and verified by [`Record::decode`]
/// - `payload.len()` never exceeds [`RecordHeader::MAX_PAYLOAD_LENGTH`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    /// Record header (4 bytes)
    pub header: RecordHeader,
    /// Raw payload bytes (sealed ciphertext for protected records)
    pub payload: Bytes,
}

impl Record {
    /// Create a record, deriving the header's length field from the payload.
    ///
    /// # Errors
    ///
    /// `PayloadTooLarge` if the payload exceeds the fixed maximum.
    pub fn new(record_type: u8, payload: impl Into<Bytes>) -> Result<Self> {
        let payload = payload.into();
        let length =
            u16::try_from(payload.len()).map_err(|_| ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: RecordHeader::MAX_PAYLOAD_LENGTH as usize,
            })?;
        let header = RecordHeader::new(record_type, length)?;
        Ok(Self { header, payload })
    }

    /// Total encoded size of this record (header + payload).
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        RecordHeader::SIZE + self.payload.len()
    }

    /// Encode the record into a buffer.
    pub fn encode(&self, dst: &mut impl BufMut) {
        debug_assert_eq!(self.payload.len(), self.header.payload_length() as usize);
        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
    }

    /// Decode one record from the front of `bytes`.
    ///
    /// Returns the record and the number of bytes consumed, so callers can
    /// scan a stream of concatenated records. Trailing bytes are ignored.
    ///
    /// # Errors
    ///
    /// - `ProtocolError` if the header is invalid (version, length bound)
    /// - `RecordTruncated` if the buffer ends before the declared payload
    pub fn decode(bytes: &[u8]) -> Result<(Self, usize)> {
        let header = *RecordHeader::from_bytes(bytes)?;

        let payload_length = header.payload_length() as usize;
        let total = RecordHeader::SIZE + payload_length;

        if bytes.len() < total {
            return Err(ProtocolError::RecordTruncated {
                expected: total,
                actual: bytes.len(),
            });
        }

        let payload = Bytes::copy_from_slice(&bytes[RecordHeader::SIZE..total]);
        debug_assert_eq!(payload.len(), payload_length);

        Ok((Self { header, payload }, total))
    }
}
