//! Per-connection context returned by allocation and recognition

use bytes::Bytes;
use thiserror::Error;
use veilwire_crypto::{
    KeyPurpose, PeriodSecret, RECORD_MAC_LENGTH, Role, SubKey, TAG_LENGTH, TransportKeyError,
    derive_sub_key, encode_tag, open_record, seal_record,
};
use veilwire_proto::{ProtocolError, Record, RecordHeader};

use crate::endpoint::{ContactId, TransportId};

/// Errors from sealing or opening a record through a connection context
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum RecordError {
    /// Framing-level failure (payload over the wire maximum)
    #[error(transparent)]
    Protocol(#[from] ProtocolError),

    /// Cryptographic failure (MAC mismatch, short payload)
    #[error(transparent)]
    Crypto(#[from] TransportKeyError),
}

/// Everything needed to handle one connection: identity, keys and the
/// connection number.
///
/// Ephemeral, never persisted. Returned by outgoing allocation (where
/// `role` is this node's own role) and by inbound recognition (where `role`
/// is the peer's). In both cases `role` identifies the connection's
/// *sender* side, whose sub-keys protect every byte after the tag:
/// connections are simplex, written by the side that produced the tag.
#[derive(Clone)]
pub struct ConnectionContext {
    contact: ContactId,
    transport: TransportId,
    period: u64,
    secret: PeriodSecret,
    connection: u64,
    role: Role,
}

impl ConnectionContext {
    /// Assemble a context. Crate-internal: contexts are only ever produced
    /// by the period store.
    pub(crate) fn new(
        contact: ContactId,
        transport: TransportId,
        period: u64,
        secret: PeriodSecret,
        connection: u64,
        role: Role,
    ) -> Self {
        Self { contact, transport, period, secret, connection, role }
    }

    /// The contact on the far side of this connection.
    pub fn contact(&self) -> ContactId {
        self.contact
    }

    /// The transport carrying this connection.
    pub fn transport(&self) -> TransportId {
        self.transport
    }

    /// The key period this connection belongs to.
    pub fn period(&self) -> u64 {
        self.period
    }

    /// The period secret in use. Zeroized when the context is dropped.
    pub fn period_secret(&self) -> &PeriodSecret {
        &self.secret
    }

    /// This connection's number within its period and direction.
    pub fn connection(&self) -> u64 {
        self.connection
    }

    /// Role of the connection's sender side.
    pub fn role(&self) -> Role {
        self.role
    }

    /// The tag key protecting this connection's tag.
    pub fn tag_key(&self) -> SubKey {
        derive_sub_key(&self.secret, self.role, KeyPurpose::Tag)
    }

    /// The frame key encrypting this connection's record payloads.
    pub fn frame_key(&self) -> SubKey {
        derive_sub_key(&self.secret, self.role, KeyPurpose::Frame)
    }

    /// The MAC key authenticating this connection's records.
    pub fn mac_key(&self) -> SubKey {
        derive_sub_key(&self.secret, self.role, KeyPurpose::Mac)
    }

    /// The wire tag opening this connection.
    ///
    /// Written once by the sender as the connection's first bytes.
    pub fn tag(&self) -> [u8; TAG_LENGTH] {
        let Ok(tag) = encode_tag(&self.tag_key(), self.connection) else {
            unreachable!("connection numbers are bounded at allocation time");
        };
        tag
    }

    /// Seal a plaintext into the `sequence`-th record of this connection.
    ///
    /// # Errors
    ///
    /// `PayloadTooLarge` if the plaintext plus MAC exceeds the record
    /// maximum.
    pub fn seal_record(
        &self,
        sequence: u64,
        record_type: u8,
        plaintext: &[u8],
    ) -> Result<Record, RecordError> {
        let sealed_len = plaintext.len() + RECORD_MAC_LENGTH;
        let length = u16::try_from(sealed_len).map_err(|_| ProtocolError::PayloadTooLarge {
            size: sealed_len,
            max: RecordHeader::MAX_PAYLOAD_LENGTH as usize,
        })?;
        let header = RecordHeader::new(record_type, length)?;

        let sealed = seal_record(
            &self.frame_key(),
            &self.mac_key(),
            self.connection,
            sequence,
            &header.to_bytes(),
            plaintext,
        )?;

        debug_assert_eq!(sealed.len(), header.payload_length() as usize);
        Ok(Record { header, payload: Bytes::from(sealed) })
    }

    /// Open the `sequence`-th record of this connection.
    ///
    /// # Errors
    ///
    /// `Crypto(MacMismatch)` if the record was tampered with, reordered, or
    /// sealed under different keys; fatal for the connection.
    pub fn open_record(&self, sequence: u64, record: &Record) -> Result<Vec<u8>, RecordError> {
        let plaintext = open_record(
            &self.frame_key(),
            &self.mac_key(),
            self.connection,
            sequence,
            &record.header.to_bytes(),
            &record.payload,
        )?;
        Ok(plaintext)
    }
}

// Contexts carry a period secret; keep it out of Debug output
impl std::fmt::Debug for ConnectionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConnectionContext")
            .field("contact", &self.contact)
            .field("transport", &self.transport)
            .field("period", &self.period)
            .field("connection", &self.connection)
            .field("role", &self.role)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use veilwire_crypto::SECRET_LENGTH;

    use super::*;

    fn test_context(role: Role) -> ConnectionContext {
        ConnectionContext::new(
            ContactId(1),
            TransportId(2),
            0,
            PeriodSecret::new([7; SECRET_LENGTH]),
            3,
            role,
        )
    }

    #[test]
    fn seal_open_round_trip() {
        let sender = test_context(Role::Initiator);
        let record = sender.seal_record(0, 1, b"sync payload").unwrap();
        assert_eq!(record.header.record_type(), 1);

        // The receiving side recognizes the same (secret, role) pair
        let receiver = test_context(Role::Initiator);
        let plaintext = receiver.open_record(0, &record).unwrap();
        assert_eq!(plaintext, b"sync payload");
    }

    #[test]
    fn wire_round_trip_through_framing() {
        let sender = test_context(Role::Initiator);
        let record = sender.seal_record(2, 0, b"framed").unwrap();

        let mut wire = Vec::new();
        record.encode(&mut wire);
        let (parsed, _) = Record::decode(&wire).unwrap();

        let plaintext = test_context(Role::Initiator).open_record(2, &parsed).unwrap();
        assert_eq!(plaintext, b"framed");
    }

    #[test]
    fn roles_produce_disjoint_keys() {
        let initiator = test_context(Role::Initiator);
        let responder = test_context(Role::Responder);
        assert_ne!(initiator.tag().as_slice(), responder.tag().as_slice());

        let record = initiator.seal_record(0, 0, b"direction matters").unwrap();
        assert!(responder.open_record(0, &record).is_err());
    }

    #[test]
    fn wrong_sequence_is_rejected() {
        let ctx = test_context(Role::Initiator);
        let record = ctx.seal_record(0, 0, b"payload").unwrap();
        assert_eq!(
            ctx.open_record(1, &record),
            Err(RecordError::Crypto(TransportKeyError::MacMismatch))
        );
    }

    #[test]
    fn oversized_plaintext_is_rejected() {
        let ctx = test_context(Role::Initiator);
        let oversized = vec![0u8; RecordHeader::MAX_PAYLOAD_LENGTH as usize];
        assert!(matches!(
            ctx.seal_record(0, 0, &oversized),
            Err(RecordError::Protocol(ProtocolError::PayloadTooLarge { .. }))
        ));
    }

    #[test]
    fn debug_output_never_contains_key_material() {
        let ctx = test_context(Role::Initiator);
        let debug = format!("{ctx:?}");
        assert!(!debug.contains("secret"));
        assert!(debug.contains("connection"));
    }
}
