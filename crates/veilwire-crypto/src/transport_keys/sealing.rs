//! Record payload sealing with ChaCha20 + HMAC-SHA256
//!
//! After the tag, a connection carries length-prefixed records whose payloads
//! are sealed here: encrypted with ChaCha20 under the period's frame key and
//! authenticated with a truncated HMAC-SHA256 under the MAC key
//! (encrypt-then-MAC). All functions are pure.
//!
//! # Security
//!
//! - Nonce uniqueness: the 12-byte nonce is connection number ‖ record
//!   sequence. Connection numbers are never reused within a (period, role)
//!   key and sequences increase per record, so no (key, nonce) pair repeats.
//! - The MAC covers the connection number, the record sequence, the
//!   cleartext record header and the ciphertext, binding every record to its
//!   position in a specific connection.
//! - MAC verification is constant-time and happens before any decryption.

use chacha20::{
    ChaCha20,
    cipher::{KeyIvInit, StreamCipher, generic_array::GenericArray},
};
use hmac::{Hmac, Mac};
use sha2::Sha256;

use super::{
    derivation::SubKey,
    error::TransportKeyError,
    tag::MAX_CONNECTION_NUMBER,
};

type HmacSha256 = Hmac<Sha256>;

/// Length of the truncated record MAC appended to each sealed payload
pub const RECORD_MAC_LENGTH: usize = 16;

/// Seal a record payload: encrypt, then append the truncated MAC.
///
/// `header` is the cleartext record header that will precede the payload on
/// the wire; it is authenticated but not encrypted. `sequence` is the
/// zero-based index of this record within the connection.
///
/// # Errors
///
/// `ConnectionNumberOutOfRange` if `connection` exceeds the tag codec's
/// bound (the nonce carries the same 32-bit counter).
pub fn seal_record(
    frame_key: &SubKey,
    mac_key: &SubKey,
    connection: u64,
    sequence: u64,
    header: &[u8],
    plaintext: &[u8],
) -> Result<Vec<u8>, TransportKeyError> {
    if connection > MAX_CONNECTION_NUMBER {
        return Err(TransportKeyError::ConnectionNumberOutOfRange { connection });
    }

    let mut sealed = Vec::with_capacity(plaintext.len() + RECORD_MAC_LENGTH);
    sealed.extend_from_slice(plaintext);

    let nonce = build_nonce(connection as u32, sequence);
    let mut cipher = ChaCha20::new(
        GenericArray::from_slice(frame_key.as_bytes()),
        GenericArray::from_slice(&nonce),
    );
    cipher.apply_keystream(&mut sealed);

    let mac = record_mac(mac_key, connection as u32, sequence, header, &sealed);
    let digest = mac.finalize().into_bytes();
    sealed.extend_from_slice(&digest[..RECORD_MAC_LENGTH]);

    Ok(sealed)
}

/// Open a sealed record payload: verify the MAC, then decrypt.
///
/// # Errors
///
/// - `RecordTooShort` if the payload cannot even hold the MAC
/// - `MacMismatch` if authentication fails (wrong keys, wrong position, or
///   tampered bytes); fatal for the connection
/// - `ConnectionNumberOutOfRange` as in [`seal_record`]
pub fn open_record(
    frame_key: &SubKey,
    mac_key: &SubKey,
    connection: u64,
    sequence: u64,
    header: &[u8],
    payload: &[u8],
) -> Result<Vec<u8>, TransportKeyError> {
    if connection > MAX_CONNECTION_NUMBER {
        return Err(TransportKeyError::ConnectionNumberOutOfRange { connection });
    }
    if payload.len() < RECORD_MAC_LENGTH {
        return Err(TransportKeyError::RecordTooShort {
            actual: payload.len(),
            min: RECORD_MAC_LENGTH,
        });
    }

    let (ciphertext, tag) = payload.split_at(payload.len() - RECORD_MAC_LENGTH);

    let mac = record_mac(mac_key, connection as u32, sequence, header, ciphertext);
    mac.verify_truncated_left(tag).map_err(|_| TransportKeyError::MacMismatch)?;

    let mut plaintext = ciphertext.to_vec();
    let nonce = build_nonce(connection as u32, sequence);
    let mut cipher = ChaCha20::new(
        GenericArray::from_slice(frame_key.as_bytes()),
        GenericArray::from_slice(&nonce),
    );
    cipher.apply_keystream(&mut plaintext);

    Ok(plaintext)
}

/// Build the 12-byte ChaCha20 nonce.
///
/// Structure:
/// - bytes 0-3: connection number (big-endian)
/// - bytes 4-11: record sequence (big-endian)
fn build_nonce(connection: u32, sequence: u64) -> [u8; 12] {
    let mut nonce = [0u8; 12];
    nonce[..4].copy_from_slice(&connection.to_be_bytes());
    nonce[4..].copy_from_slice(&sequence.to_be_bytes());
    nonce
}

/// HMAC over connection ‖ sequence ‖ header ‖ ciphertext.
fn record_mac(
    mac_key: &SubKey,
    connection: u32,
    sequence: u64,
    header: &[u8],
    ciphertext: &[u8],
) -> HmacSha256 {
    let Ok(mut mac) = HmacSha256::new_from_slice(mac_key.as_bytes()) else {
        unreachable!("HMAC-SHA256 accepts any key size");
    };
    mac.update(&connection.to_be_bytes());
    mac.update(&sequence.to_be_bytes());
    mac.update(header);
    mac.update(ciphertext);
    mac
}

#[cfg(test)]
mod tests {
    use super::{super::derivation::SECRET_LENGTH, *};

    fn test_keys() -> (SubKey, SubKey) {
        (SubKey::new([1; SECRET_LENGTH]), SubKey::new([2; SECRET_LENGTH]))
    }

    const HEADER: &[u8] = &[1, 0, 0, 29];

    #[test]
    fn seal_open_round_trip() {
        let (frame_key, mac_key) = test_keys();
        let plaintext = b"record payload under test";

        let sealed = seal_record(&frame_key, &mac_key, 3, 0, HEADER, plaintext).unwrap();
        assert_eq!(sealed.len(), plaintext.len() + RECORD_MAC_LENGTH);

        let opened = open_record(&frame_key, &mac_key, 3, 0, HEADER, &sealed).unwrap();
        assert_eq!(opened, plaintext);
    }

    #[test]
    fn empty_payload_round_trips() {
        let (frame_key, mac_key) = test_keys();
        let sealed = seal_record(&frame_key, &mac_key, 0, 0, HEADER, b"").unwrap();
        assert_eq!(sealed.len(), RECORD_MAC_LENGTH);
        let opened = open_record(&frame_key, &mac_key, 0, 0, HEADER, &sealed).unwrap();
        assert!(opened.is_empty());
    }

    #[test]
    fn ciphertext_differs_from_plaintext() {
        let (frame_key, mac_key) = test_keys();
        let plaintext = b"not for the wire in the clear";
        let sealed = seal_record(&frame_key, &mac_key, 0, 0, HEADER, plaintext).unwrap();
        assert_ne!(&sealed[..plaintext.len()], plaintext.as_slice());
    }

    #[test]
    fn wrong_frame_key_garbles_but_wrong_mac_key_rejects() {
        let (frame_key, mac_key) = test_keys();
        let sealed = seal_record(&frame_key, &mac_key, 0, 0, HEADER, b"payload").unwrap();

        let other = SubKey::new([9; SECRET_LENGTH]);
        let result = open_record(&frame_key, &other, 0, 0, HEADER, &sealed);
        assert_eq!(result, Err(TransportKeyError::MacMismatch));
    }

    #[test]
    fn tampered_ciphertext_is_rejected() {
        let (frame_key, mac_key) = test_keys();
        let mut sealed = seal_record(&frame_key, &mac_key, 0, 0, HEADER, b"payload").unwrap();
        sealed[0] ^= 0xFF;
        let result = open_record(&frame_key, &mac_key, 0, 0, HEADER, &sealed);
        assert_eq!(result, Err(TransportKeyError::MacMismatch));
    }

    #[test]
    fn tampered_mac_is_rejected() {
        let (frame_key, mac_key) = test_keys();
        let mut sealed = seal_record(&frame_key, &mac_key, 0, 0, HEADER, b"payload").unwrap();
        let last = sealed.len() - 1;
        sealed[last] ^= 0x01;
        let result = open_record(&frame_key, &mac_key, 0, 0, HEADER, &sealed);
        assert_eq!(result, Err(TransportKeyError::MacMismatch));
    }

    #[test]
    fn wrong_sequence_is_rejected() {
        let (frame_key, mac_key) = test_keys();
        let sealed = seal_record(&frame_key, &mac_key, 0, 5, HEADER, b"payload").unwrap();
        let result = open_record(&frame_key, &mac_key, 0, 6, HEADER, &sealed);
        assert_eq!(result, Err(TransportKeyError::MacMismatch), "reordered records must fail");
    }

    #[test]
    fn wrong_connection_is_rejected() {
        let (frame_key, mac_key) = test_keys();
        let sealed = seal_record(&frame_key, &mac_key, 1, 0, HEADER, b"payload").unwrap();
        let result = open_record(&frame_key, &mac_key, 2, 0, HEADER, &sealed);
        assert_eq!(result, Err(TransportKeyError::MacMismatch));
    }

    #[test]
    fn wrong_header_is_rejected() {
        let (frame_key, mac_key) = test_keys();
        let sealed = seal_record(&frame_key, &mac_key, 0, 0, HEADER, b"payload").unwrap();
        let result = open_record(&frame_key, &mac_key, 0, 0, &[1, 0, 0, 30], &sealed);
        assert_eq!(result, Err(TransportKeyError::MacMismatch));
    }

    #[test]
    fn truncated_payload_is_rejected() {
        let (frame_key, mac_key) = test_keys();
        let result = open_record(&frame_key, &mac_key, 0, 0, HEADER, &[0u8; 7]);
        assert_eq!(
            result,
            Err(TransportKeyError::RecordTooShort { actual: 7, min: RECORD_MAC_LENGTH })
        );
    }

    #[test]
    fn distinct_records_have_distinct_keystreams() {
        let (frame_key, mac_key) = test_keys();
        let sealed_a = seal_record(&frame_key, &mac_key, 0, 0, HEADER, b"same bytes").unwrap();
        let sealed_b = seal_record(&frame_key, &mac_key, 0, 1, HEADER, b"same bytes").unwrap();
        assert_ne!(
            sealed_a[..10],
            sealed_b[..10],
            "sequence must be bound into the keystream nonce"
        );
    }

    #[test]
    fn rejects_out_of_range_connection_number() {
        let (frame_key, mac_key) = test_keys();
        let over = MAX_CONNECTION_NUMBER + 1;
        let result = seal_record(&frame_key, &mac_key, over, 0, HEADER, b"x");
        assert_eq!(
            result,
            Err(TransportKeyError::ConnectionNumberOutOfRange { connection: over })
        );
    }
}
