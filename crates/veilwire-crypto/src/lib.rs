//! Veilwire Cryptographic Primitives
//!
//! Cryptographic building blocks for the Veilwire transport protocol. Pure
//! functions with deterministic outputs; no clocks, no randomness, no I/O.
//!
//! # Key Lifecycle
//!
//! This section describes the key hierarchy from the handshake master secret
//! to the per-record keys of a single connection. Each contact+transport pair
//! shares a master secret established once at key agreement. The master secret
//! anchors a forward-only chain of period secrets, one per time period, and
//! each period secret fans out into role-specific sub-keys.
//!
//! ```text
//! Master Secret (per contact + transport, from handshake)
//!        │
//!        ▼
//! HKDF → Period Secret 0 → Period Secret 1 → ... (one-way roll)
//!        │
//!        ▼
//! HKDF → Tag Key / Frame Key / MAC Key (per role)
//!        │
//!        ▼
//! Tag encryption + record sealing (per connection)
//! ```
//!
//! # Security
//!
//! Forward secrecy across periods:
//! - Rolling a period secret forward is one-way; period N's secret cannot be
//!   recovered from period N+1's
//! - Retired secrets are zeroized when dropped
//!
//! Traffic-analysis resistance:
//! - Connection tags are a single AES block of an encrypted counter, so every
//!   tag is indistinguishable from random bytes to an observer without the
//!   tag key
//! - Recognition is by trial decryption with a 96-bit structural padding
//!   check, bounding false acceptance at 2^-96 per trial
//!
//! Role separation:
//! - Initiator and responder derive disjoint sub-keys from the same period
//!   secret, so the two directions of a pairwise relationship never share
//!   keys

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod transport_keys;

pub use transport_keys::{
    KeyPurpose, MAX_CONNECTION_NUMBER, PeriodSecret, RECORD_MAC_LENGTH, Role, SECRET_LENGTH,
    SubKey, TAG_LENGTH, TransportKeyError, decode_tag, derive_next_period_secret,
    derive_root_secret, derive_sub_key, encode_tag, open_record, seal_record,
};
