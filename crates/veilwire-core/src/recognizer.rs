//! Inbound tag recognition
//!
//! The receiving side of a connection has no plaintext clue about who is
//! connecting: the first 16 bytes are indistinguishable from noise. The
//! recognizer trial-decrypts those bytes against every plausible candidate
//! key and either produces a connection context or rejects the tag.
//!
//! # Performance contract
//!
//! One `recognize` call performs at most
//! contacts x transports x tolerated periods x 2 roles
//! trial decryptions (each one AES block), exiting early on the first
//! structural match. The 96-bit padding check makes a false structural
//! match cryptographically negligible, so the loop almost always runs to
//! completion only for genuinely unrecognized tags.

use std::sync::Arc;

use veilwire_crypto::{TAG_LENGTH, decode_tag};

use crate::{
    context::ConnectionContext,
    error::{RecognizeError, Rejection},
    storage::Storage,
    store::PeriodStore,
};

/// Recognizes inbound connection tags against the period store's candidate
/// keys.
///
/// Holds a shared handle to the store; any number of transport threads may
/// call [`ConnectionRecognizer::recognize`] concurrently. Trials run
/// lock-free on a snapshot; only a successful acceptance takes the store's
/// write lock.
pub struct ConnectionRecognizer<S: Storage> {
    store: Arc<PeriodStore<S>>,
}

impl<S: Storage> ConnectionRecognizer<S> {
    /// Create a recognizer over a shared period store.
    pub fn new(store: Arc<PeriodStore<S>>) -> Self {
        Self { store }
    }

    /// Recognize an inbound tag.
    ///
    /// Returns the connection context on acceptance. Rejections are final
    /// for this tag: tags are single-use, and the peer redials with a fresh
    /// tag from its own counter.
    ///
    /// # Errors
    ///
    /// - `Rejected(Unrecognized)`: no candidate matched (noise, an
    ///   unrelated protocol, or a removed contact)
    /// - `Rejected(TooOld | Duplicate)`: matched, but failed the replay
    ///   window
    /// - `Rejected(Echoed)`: our own outgoing tag reflected back at us
    /// - `Storage`: the acceptance could not be committed; the window was
    ///   not advanced
    pub fn recognize(&self, tag: &[u8; TAG_LENGTH]) -> Result<ConnectionContext, RecognizeError> {
        let candidates = self.store.tag_candidates();

        let mut matched = None;
        for candidate in candidates {
            if let Some(connection) = decode_tag(&candidate.tag_key, tag) {
                matched = Some((candidate, connection));
                break;
            }
        }

        let Some((candidate, connection)) = matched else {
            tracing::trace!("tag did not match any candidate");
            return Err(Rejection::Unrecognized.into());
        };

        if candidate.key_role == candidate.our_role {
            // Structurally valid under OUR outgoing key: someone replayed
            // one of our own tags back at us
            tracing::warn!(
                contact = %candidate.contact,
                transport = %candidate.transport,
                period = candidate.period,
                connection,
                "inbound tag matches our own outgoing key; rejecting echo"
            );
            return Err(Rejection::Echoed.into());
        }

        let context = self.store.commit_acceptance(
            candidate.contact,
            candidate.transport,
            candidate.period,
            connection,
        )?;

        tracing::debug!(
            contact = %context.contact(),
            transport = %context.transport(),
            period = context.period(),
            connection = context.connection(),
            "inbound connection recognized"
        );
        Ok(context)
    }
}
