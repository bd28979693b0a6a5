//! Transport keys: secret derivation, tag encoding and record sealing
//!
//! This module implements the cryptographic half of connection recognition:
//!
//! - Period secret chain: a one-way HKDF chain rolls each contact's secret
//!   forward once per time period, giving forward secrecy at period
//!   boundaries
//! - Sub-key derivation: each period secret yields independent tag, frame
//!   and MAC keys per role via domain-separated labels
//! - Tag codec: a connection number is encrypted into one opaque AES block
//!   that the receiving side recognizes by trial decryption
//! - Record sealing: record payloads are encrypted with ChaCha20 under the
//!   frame key and authenticated with HMAC-SHA256 under the MAC key
//!
//! # Architecture
//!
//! ```text
//! PeriodSecret[n]
//!        │
//!        ▼ HKDF-Expand (role x purpose labels)
//! SubKey{Tag} ── encode_tag ──► 16-byte wire tag
//! SubKey{Frame, Mac} ── seal_record ──► ciphertext ‖ MAC
//! ```

pub mod derivation;
pub mod error;
pub mod sealing;
pub mod tag;

pub use derivation::{
    KeyPurpose, PeriodSecret, Role, SECRET_LENGTH, SubKey, derive_next_period_secret,
    derive_root_secret, derive_sub_key,
};
pub use error::TransportKeyError;
pub use sealing::{RECORD_MAC_LENGTH, open_record, seal_record};
pub use tag::{MAX_CONNECTION_NUMBER, TAG_LENGTH, decode_tag, encode_tag};
