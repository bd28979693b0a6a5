//! Veilwire Wire Framing
//!
//! The minimal record layer carried inside every Veilwire connection. A
//! connection's wire form is one fixed-length tag (see `veilwire-crypto`)
//! followed by zero or more records, each a small fixed header plus an
//! encrypted payload:
//!
//! ```text
//! [tag: 16 bytes] [record] [record] ...
//!
//! record = [version: 1] [type: 1] [payload length: 2, BE] [payload: N]
//! ```
//!
//! Record *types* are opaque at this layer; the synchronization protocol
//! above assigns their meanings. This crate only guarantees structural
//! validity: version match, bounded payload length, exact framing. Payload
//! confidentiality and authenticity are the sealing layer's job.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

mod errors;
mod record;

pub use errors::{ProtocolError, Result};
pub use record::{Record, RecordHeader};
