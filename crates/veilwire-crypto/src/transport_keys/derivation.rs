//! Key derivation for transport secrets using HKDF
//!
//! # Security Properties
//!
//! - Forward secrecy: rolling a period secret forward is one-way
//! - Role isolation: initiator and responder sub-keys are independent
//! - Purpose isolation: tag, frame and MAC keys are independent
//! - Determinism: same inputs always produce the same output

use hkdf::Hkdf;
use sha2::Sha256;
use zeroize::Zeroize;

use super::error::TransportKeyError;

/// Length of a period secret and of every derived sub-key (32 bytes)
pub const SECRET_LENGTH: usize = 32;

/// Label for deriving the period-0 secret from the handshake master secret
const ROOT_LABEL: &[u8] = b"veilwireRootV1";

/// Label for rolling a period secret forward by one period
const ROTATE_LABEL: &[u8] = b"veilwireRotateV1";

/// Label for deriving a tag key
const TAG_KEY_LABEL: &[u8] = b"veilwireTagV1";

/// Label for deriving a frame key
const FRAME_KEY_LABEL: &[u8] = b"veilwireFrameV1";

/// Label for deriving a MAC key
const MAC_KEY_LABEL: &[u8] = b"veilwireMacV1";

/// Which of the two contacts in a pairwise relationship a key belongs to.
///
/// The role is fixed at handshake time and decides which half of the derived
/// sub-keys each side uses for its outgoing connections. Never a bare bool:
/// every call site that needs directionality consumes this enum.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    /// The side that initiated the handshake
    Initiator,
    /// The side that responded to the handshake
    Responder,
}

impl Role {
    /// The other side's role.
    pub fn opposite(self) -> Self {
        match self {
            Self::Initiator => Self::Responder,
            Self::Responder => Self::Initiator,
        }
    }

    /// Domain-separation byte mixed into sub-key derivation.
    fn context_byte(self) -> u8 {
        match self {
            Self::Initiator => 0,
            Self::Responder => 1,
        }
    }
}

/// Which sub-key to derive from a period secret.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyPurpose {
    /// Key for encoding and recognizing connection tags
    Tag,
    /// Key for encrypting record payloads
    Frame,
    /// Key for authenticating records
    Mac,
}

impl KeyPurpose {
    fn label(self) -> &'static [u8] {
        match self {
            Self::Tag => TAG_KEY_LABEL,
            Self::Frame => FRAME_KEY_LABEL,
            Self::Mac => MAC_KEY_LABEL,
        }
    }
}

/// A period secret: the per-(contact, transport, period) root of all
/// connection keys for that period.
///
/// Sensitive material. The buffer is zeroized on drop; copies handed to
/// callers (e.g. inside a connection context) carry the same guarantee.
#[derive(Clone)]
pub struct PeriodSecret([u8; SECRET_LENGTH]);

impl PeriodSecret {
    /// Wrap an existing 32-byte secret.
    pub fn new(bytes: [u8; SECRET_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Wrap a secret loaded from storage, validating its length.
    ///
    /// # Errors
    ///
    /// `InvalidSecretLength` if the slice is not exactly 32 bytes. A persisted
    /// secret with the wrong length indicates storage corruption or a version
    /// mismatch and must be surfaced to the operator.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, TransportKeyError> {
        let buf: [u8; SECRET_LENGTH] =
            bytes.try_into().map_err(|_| TransportKeyError::InvalidSecretLength {
                expected: SECRET_LENGTH,
                actual: bytes.len(),
            })?;
        Ok(Self(buf))
    }

    /// Raw secret bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_LENGTH] {
        &self.0
    }
}

impl Drop for PeriodSecret {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

// Secrets never appear in logs or panic messages
impl std::fmt::Debug for PeriodSecret {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("PeriodSecret(..)")
    }
}

/// A derived sub-key (tag, frame or MAC key) for one role within one period.
///
/// Zeroized on drop, like [`PeriodSecret`].
#[derive(Clone)]
pub struct SubKey([u8; SECRET_LENGTH]);

impl SubKey {
    /// Wrap an existing 32-byte key.
    pub fn new(bytes: [u8; SECRET_LENGTH]) -> Self {
        Self(bytes)
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; SECRET_LENGTH] {
        &self.0
    }
}

impl Drop for SubKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for SubKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str("SubKey(..)")
    }
}

/// Derive the period-0 secret for a transport from the handshake master
/// secret.
///
/// Keeps the master secret itself out of the period table: compromise of a
/// materialized period never reveals the master secret. Callers should
/// zeroize the master secret buffer once all transports have been derived.
pub fn derive_root_secret(master_secret: &[u8], transport_id: u32) -> PeriodSecret {
    let mut info = Vec::with_capacity(ROOT_LABEL.len() + 4);
    info.extend_from_slice(ROOT_LABEL);
    info.extend_from_slice(&transport_id.to_be_bytes());
    PeriodSecret(expand(master_secret, &info))
}

/// Roll a period secret forward to the next period.
///
/// One-way: the output is a deterministic function of the input, but the
/// input cannot be recomputed from the output. The period index is mixed in
/// so that chains cannot be cross-spliced even under key-compromise
/// hypotheticals.
pub fn derive_next_period_secret(secret: &PeriodSecret, next_period: u64) -> PeriodSecret {
    let mut info = Vec::with_capacity(ROTATE_LABEL.len() + 8);
    info.extend_from_slice(ROTATE_LABEL);
    info.extend_from_slice(&next_period.to_be_bytes());
    PeriodSecret(expand(&secret.0, &info))
}

/// Derive one of the six role-specific sub-keys from a period secret.
///
/// The six (role x purpose) keys of a period are cryptographically
/// independent even though they share a parent secret: each derivation uses
/// a distinct purpose label and role byte.
pub fn derive_sub_key(secret: &PeriodSecret, role: Role, purpose: KeyPurpose) -> SubKey {
    let label = purpose.label();
    let mut info = Vec::with_capacity(label.len() + 1);
    info.extend_from_slice(label);
    info.push(role.context_byte());
    SubKey(expand(&secret.0, &info))
}

/// HKDF-SHA256 extract-and-expand to a fixed 32-byte output.
fn expand(ikm: &[u8], info: &[u8]) -> [u8; SECRET_LENGTH] {
    let hkdf = Hkdf::<Sha256>::new(None, ikm);
    let mut okm = [0u8; SECRET_LENGTH];
    let Ok(()) = hkdf.expand(info, &mut okm) else {
        unreachable!("32 bytes is a valid HKDF-SHA256 output length");
    };
    okm
}
