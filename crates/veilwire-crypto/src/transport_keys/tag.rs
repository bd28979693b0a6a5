//! Connection tag codec
//!
//! A tag is the first bytes of every connection: one AES block carrying the
//! connection number in encrypted form. To an observer without the tag key
//! every tag is indistinguishable from 16 random bytes; the receiving side
//! recognizes tags by trial decryption against the tag keys of all plausible
//! (contact, transport, period, role) candidates.
//!
//! # Security
//!
//! - The plaintext block is the connection number followed by 12 zero bytes.
//!   Trial decryption under an unrelated key yields a uniformly random
//!   block, so a false structural match requires 96 zero bits by chance:
//!   probability 2^-96 per trial, negligible even across millions of trials.
//! - Encryption is a single raw block with fixed (zero) IV semantics. This
//!   is safe because every (period, role) pair has a distinct tag key and a
//!   connection number is never encoded twice under the same key.

use aes::{
    Aes256,
    cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray},
};

use super::{derivation::SubKey, error::TransportKeyError};

/// Tag length in bytes: the block size of the tag cipher
pub const TAG_LENGTH: usize = 16;

/// Zero padding bytes in the tag plaintext block (96 bits of structural
/// check)
const TAG_PADDING_LENGTH: usize = 12;

/// Highest encodable connection number (the block carries a 32-bit counter)
pub const MAX_CONNECTION_NUMBER: u64 = u32::MAX as u64;

/// Encode a connection number into an opaque 16-byte tag.
///
/// # Errors
///
/// `ConnectionNumberOutOfRange` if `connection` exceeds
/// [`MAX_CONNECTION_NUMBER`]. Counters are bounded at allocation time, so
/// hitting this from a connection context is a bug in the caller.
pub fn encode_tag(
    tag_key: &SubKey,
    connection: u64,
) -> Result<[u8; TAG_LENGTH], TransportKeyError> {
    if connection > MAX_CONNECTION_NUMBER {
        return Err(TransportKeyError::ConnectionNumberOutOfRange { connection });
    }

    let mut block = [0u8; TAG_LENGTH];
    block[..4].copy_from_slice(&(connection as u32).to_be_bytes());

    let cipher = Aes256::new(GenericArray::from_slice(tag_key.as_bytes()));
    let mut buf = GenericArray::clone_from_slice(&block);
    cipher.encrypt_block(&mut buf);

    let mut tag = [0u8; TAG_LENGTH];
    tag.copy_from_slice(&buf);
    Ok(tag)
}

/// Trial-decrypt an observed tag under a candidate tag key.
///
/// Returns the connection number only if the decrypted block's 12 padding
/// bytes are exactly zero; `None` means the tag was not produced under this
/// key (or is noise).
pub fn decode_tag(tag_key: &SubKey, tag: &[u8; TAG_LENGTH]) -> Option<u64> {
    decode_tag_padded(tag_key, tag, TAG_PADDING_LENGTH)
}

/// Trial decryption with an explicit padding width.
///
/// The public [`decode_tag`] always checks the full 96-bit padding; the
/// width is a parameter here so the false-acceptance rate is measurable in
/// tests with a narrow stub padding.
fn decode_tag_padded(tag_key: &SubKey, tag: &[u8; TAG_LENGTH], padding: usize) -> Option<u64> {
    debug_assert!(padding <= TAG_LENGTH - 4);

    let cipher = Aes256::new(GenericArray::from_slice(tag_key.as_bytes()));
    let mut block = GenericArray::clone_from_slice(tag);
    cipher.decrypt_block(&mut block);

    if block[TAG_LENGTH - padding..].iter().any(|&b| b != 0) {
        return None;
    }

    let connection = u32::from_be_bytes([block[0], block[1], block[2], block[3]]);
    Some(u64::from(connection))
}
