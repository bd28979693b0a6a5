//! Error types for the period store and connection recognition

use thiserror::Error;

use crate::{
    endpoint::{ContactId, TransportId},
    storage::StorageError,
};

/// Errors from period store operations
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// No keys exist for this contact and transport: the caller cannot
    /// connect yet. Not a crash: the pair may simply not have completed a
    /// handshake.
    #[error("no endpoint for contact {contact} on transport {transport}")]
    NoEndpoint {
        /// The unknown contact
        contact: ContactId,
        /// The unknown transport
        transport: TransportId,
    },

    /// An endpoint for this pair already exists; endpoints are immutable and
    /// added exactly once per handshake.
    #[error("endpoint already exists for contact {contact} on transport {transport}")]
    EndpointExists {
        /// The duplicated contact
        contact: ContactId,
        /// The duplicated transport
        transport: TransportId,
    },

    /// The outgoing connection counter reached the tag codec's bound for the
    /// current period. The caller must wait for the next period.
    #[error("outgoing connection numbers exhausted for contact {contact} on transport {transport}")]
    CounterExhausted {
        /// The exhausted contact
        contact: ContactId,
        /// The exhausted transport
        transport: TransportId,
    },

    /// A persisted secret has the wrong length or format. Fatal: indicates
    /// storage corruption or a version mismatch, and must be surfaced to the
    /// operator.
    #[error(
        "corrupt secret for contact {contact} transport {transport} period {period}: {detail}"
    )]
    CorruptSecret {
        /// Owning contact
        contact: ContactId,
        /// Owning transport
        transport: TransportId,
        /// Period index of the corrupt record
        period: u64,
        /// What was wrong with it
        detail: String,
    },

    /// The persistence layer failed; the attempted update was not applied.
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Why an inbound tag was not accepted.
///
/// A rejected tag is never retried: tags are single-use, and a peer whose
/// connection was rejected redials with a fresh tag from its own counter.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum Rejection {
    /// No known (contact, transport, period, role) candidate produced a
    /// structural match: noise, an unrelated protocol, or a removed contact
    #[error("tag not recognized by any known endpoint")]
    Unrecognized,

    /// The connection number fell below the replay window's low edge
    #[error("connection number {connection} below the replay window")]
    TooOld {
        /// The stale connection number
        connection: u64,
    },

    /// The connection number was already accepted once in this period
    #[error("connection number {connection} already accepted")]
    Duplicate {
        /// The replayed connection number
        connection: u64,
    },

    /// The tag matched this node's own outgoing key: someone reflected one
    /// of our tags back at us
    #[error("tag matches our own outgoing key")]
    Echoed,
}

/// Errors from recognizing an inbound tag
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecognizeError {
    /// The tag was rejected; the caller drops the connection
    #[error("tag rejected: {0}")]
    Rejected(#[from] Rejection),

    /// The persistence layer failed while committing the acceptance; the
    /// window was not advanced
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),
}
