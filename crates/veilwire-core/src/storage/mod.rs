//! Storage abstraction for endpoints and key periods
//!
//! Trait-based abstraction for persisting the period table. The trait is
//! synchronous (no async): every operation is a bounded in-memory or local
//! disk access, and the period store serializes mutations itself.

mod error;
mod memory;
mod redb;

use serde::{Deserialize, Serialize};
use veilwire_crypto::Role;
use zeroize::Zeroize;

pub use self::redb::RedbStorage;
use crate::{
    endpoint::{ContactId, Endpoint, TransportId},
    window::ReplayWindow,
};
pub use error::StorageError;
pub use memory::MemoryStorage;

/// Persistence key of one period record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PeriodKey {
    /// Owning contact
    pub contact: ContactId,
    /// Owning transport
    pub transport: TransportId,
    /// Period index
    pub period: u64,
}

/// Persisted form of an [`Endpoint`].
///
/// The role is stored as a byte so the storage format has no dependency on
/// in-memory enum layout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredEndpoint {
    /// Contact identifier
    pub contact: u32,
    /// Transport identifier
    pub transport: u32,
    /// Reference timestamp for period arithmetic (Unix millis)
    pub epoch_ms: u64,
    /// Estimated clock difference with the peer (millis)
    pub clock_difference_ms: u64,
    /// Maximum transport latency (millis)
    pub max_latency_ms: u64,
    /// Handshake role: 0 = initiator, 1 = responder
    pub role: u8,
}

const ROLE_INITIATOR: u8 = 0;
const ROLE_RESPONDER: u8 = 1;

impl StoredEndpoint {
    /// Convert an in-memory endpoint for persistence.
    pub fn from_endpoint(endpoint: &Endpoint) -> Self {
        Self {
            contact: endpoint.contact.0,
            transport: endpoint.transport.0,
            epoch_ms: endpoint.epoch_ms,
            clock_difference_ms: endpoint.clock_difference_ms,
            max_latency_ms: endpoint.max_latency_ms,
            role: match endpoint.role {
                Role::Initiator => ROLE_INITIATOR,
                Role::Responder => ROLE_RESPONDER,
            },
        }
    }

    /// Rebuild the in-memory endpoint.
    ///
    /// # Errors
    ///
    /// `CorruptRecord` if the role byte is unknown.
    pub fn to_endpoint(&self) -> Result<Endpoint, StorageError> {
        let role = match self.role {
            ROLE_INITIATOR => Role::Initiator,
            ROLE_RESPONDER => Role::Responder,
            other => {
                return Err(StorageError::CorruptRecord(format!("unknown role byte {other}")));
            },
        };
        Ok(Endpoint {
            contact: ContactId(self.contact),
            transport: TransportId(self.transport),
            epoch_ms: self.epoch_ms,
            clock_difference_ms: self.clock_difference_ms,
            max_latency_ms: self.max_latency_ms,
            role,
        })
    }
}

/// Persisted form of one key period: the secret, the outgoing connection
/// counter, and the inbound replay window.
///
/// The secret is stored as raw bytes; its length is validated when the
/// period table is loaded, so a truncated or corrupted value surfaces as an
/// operator-visible error rather than a panic.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredPeriod {
    /// Period secret bytes
    pub secret: Vec<u8>,
    /// Next outgoing connection number
    pub outgoing: u64,
    /// Inbound replay window state
    pub window: ReplayWindow,
}

impl Drop for StoredPeriod {
    fn drop(&mut self) {
        self.secret.zeroize();
    }
}

// Secrets never appear in logs or panic messages
impl std::fmt::Debug for StoredPeriod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StoredPeriod")
            .field("outgoing", &self.outgoing)
            .field("window", &self.window)
            .finish_non_exhaustive()
    }
}

/// Storage abstraction for the period table
///
/// Must be Clone (handles are shared across call paths), Send + Sync
/// (thread-safe), and synchronous. Implementations typically share internal
/// state via Arc, so clones access the same underlying storage.
///
/// Each method is atomic: a failed `put_period` must leave the previous
/// record intact, so a window update or counter increment is either fully
/// applied or not at all.
///
/// # Panics
///
/// Implementations may panic if internal synchronization primitives are
/// poisoned (a thread panicked while holding a lock). Acceptable for
/// test/simulation backends; durable backends rely on their own locking.
pub trait Storage: Clone + Send + Sync + 'static {
    /// Persist an endpoint. Overwrites any existing record for the pair.
    fn put_endpoint(&self, endpoint: &StoredEndpoint) -> Result<(), StorageError>;

    /// Load all persisted endpoints. Order is not guaranteed.
    fn load_endpoints(&self) -> Result<Vec<StoredEndpoint>, StorageError>;

    /// Persist a period record. Overwrites any existing record for the key.
    fn put_period(&self, key: PeriodKey, period: &StoredPeriod) -> Result<(), StorageError>;

    /// Load all persisted period records. Order is not guaranteed.
    fn load_periods(&self) -> Result<Vec<(PeriodKey, StoredPeriod)>, StorageError>;

    /// Delete one period record. Deleting a missing record is a no-op.
    fn remove_period(&self, key: PeriodKey) -> Result<(), StorageError>;

    /// Delete an endpoint and all its period records in one atomic step.
    fn remove_endpoint_state(
        &self,
        contact: ContactId,
        transport: TransportId,
    ) -> Result<(), StorageError>;

    /// Delete every endpoint and period record belonging to a contact, on
    /// all transports, in one atomic step.
    fn remove_contact_state(&self, contact: ContactId) -> Result<(), StorageError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn endpoint_conversion_round_trip() {
        let endpoint = Endpoint {
            contact: ContactId(3),
            transport: TransportId(9),
            epoch_ms: 1_700_000_000_000,
            clock_difference_ms: 60_000,
            max_latency_ms: 30_000,
            role: Role::Responder,
        };

        let stored = StoredEndpoint::from_endpoint(&endpoint);
        assert_eq!(stored.to_endpoint().unwrap(), endpoint);
    }

    #[test]
    fn unknown_role_byte_is_corrupt() {
        let stored = StoredEndpoint {
            contact: 1,
            transport: 1,
            epoch_ms: 0,
            clock_difference_ms: 0,
            max_latency_ms: 0,
            role: 7,
        };
        assert!(matches!(stored.to_endpoint(), Err(StorageError::CorruptRecord(_))));
    }
}
