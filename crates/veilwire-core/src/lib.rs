//! Veilwire Transport Security Core
//!
//! The recognition and key-lifecycle engine of the Veilwire messenger:
//! derives and rotates per-contact transport secrets, allocates outgoing
//! connection numbers, recognizes inbound connection tags, and enforces
//! replay protection, all without leaking a byte of routing information to
//! whoever watches the wire.
//!
//! # Architecture
//!
//! ```text
//!                 ┌────────────────┐
//!   handshake ──► │  PeriodStore   │ ◄── scheduler (roll_periods)
//!                 │  (owns secrets,│
//!                 │  counters,     │
//!                 │  windows)      │
//!                 └──┬─────────▲───┘
//!        candidates  │         │  accept / allocate
//!                 ┌──▼─────────┴───┐
//!   tag bytes ──► │  Connection    │ ──► ConnectionContext
//!                 │  Recognizer    │
//!                 └────────────────┘
//! ```
//!
//! The store is an explicit handle passed to every component that needs it;
//! there is no ambient global state. Persistence goes through the
//! [`storage::Storage`] trait, with in-memory and redb backends.
//!
//! # Flow
//!
//! 1. A handshake produces an [`Endpoint`] and a master secret;
//!    [`PeriodStore::add_endpoint`] materializes period 0
//! 2. A scheduler periodically calls [`PeriodStore::roll_periods`] to
//!    derive new period secrets and retire old ones
//! 3. Outgoing connections call [`PeriodStore::allocate_outgoing`] for a
//!    [`ConnectionContext`]
//! 4. Inbound tags go to [`ConnectionRecognizer::recognize`], which answers
//!    with a context or a final [`Rejection`]

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod context;
mod endpoint;
mod error;
mod recognizer;
mod store;
pub mod storage;
mod window;

pub use context::{ConnectionContext, RecordError};
pub use endpoint::{ContactId, Endpoint, PERIOD_LENGTH_MS, TransportId};
pub use error::{RecognizeError, Rejection, StoreError};
pub use recognizer::ConnectionRecognizer;
pub use store::PeriodStore;
// Role is fixed at handshake time and appears throughout the public API
pub use veilwire_crypto::Role;
pub use window::{ReplayWindow, WINDOW_SIZE, WindowCheck};
