//! Contact, transport and endpoint identity types

use veilwire_crypto::Role;

/// Length of one key period in milliseconds (one hour).
///
/// Fixed protocol-wide; per-endpoint clock and latency figures widen the
/// retirement tolerance instead (see [`Endpoint::tolerance_span`]).
pub const PERIOD_LENGTH_MS: u64 = 60 * 60 * 1000;

/// Identifies a contact this node has exchanged keys with.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ContactId(pub u32);

impl std::fmt::Display for ContactId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifies a transport (e.g. onion, mesh, LAN) shared with a contact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TransportId(pub u32);

impl std::fmt::Display for TransportId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The immutable per-(contact, transport) record established at handshake
/// time, anchoring all future secret derivation.
///
/// Created once at key agreement and never mutated; deleted when the contact
/// or transport is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Endpoint {
    /// The contact on the far side
    pub contact: ContactId,
    /// The transport the keys belong to
    pub transport: TransportId,
    /// Reference timestamp for period arithmetic (Unix millis)
    pub epoch_ms: u64,
    /// Estimated absolute clock difference with the peer (millis)
    pub clock_difference_ms: u64,
    /// The transport's maximum expected latency (millis)
    pub max_latency_ms: u64,
    /// Which side of the handshake this node was
    pub role: Role,
}

impl Endpoint {
    /// The key period that `now_ms` falls into, relative to this endpoint's
    /// epoch. Times before the epoch clamp to period 0 (a peer's clock may
    /// run behind ours; periods never move backward).
    pub fn period_index(&self, now_ms: u64) -> u64 {
        now_ms.saturating_sub(self.epoch_ms) / PERIOD_LENGTH_MS
    }

    /// How many past periods to keep materialized for recognition.
    ///
    /// Peers with worse clocks or slower transports may present tags from
    /// further in the past, so their endpoints retain more history. Always
    /// at least one period behind current.
    pub fn tolerance_span(&self) -> u64 {
        1 + (2 * self.clock_difference_ms + self.max_latency_ms) / PERIOD_LENGTH_MS
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn endpoint(epoch_ms: u64, clock_difference_ms: u64, max_latency_ms: u64) -> Endpoint {
        Endpoint {
            contact: ContactId(1),
            transport: TransportId(1),
            epoch_ms,
            clock_difference_ms,
            max_latency_ms,
            role: Role::Initiator,
        }
    }

    #[test]
    fn period_index_advances_hourly() {
        let ep = endpoint(1_000_000, 0, 0);
        assert_eq!(ep.period_index(1_000_000), 0);
        assert_eq!(ep.period_index(1_000_000 + PERIOD_LENGTH_MS - 1), 0);
        assert_eq!(ep.period_index(1_000_000 + PERIOD_LENGTH_MS), 1);
        assert_eq!(ep.period_index(1_000_000 + 2 * PERIOD_LENGTH_MS), 2);
    }

    #[test]
    fn period_index_clamps_before_epoch() {
        let ep = endpoint(1_000_000, 0, 0);
        assert_eq!(ep.period_index(0), 0);
    }

    #[test]
    fn ideal_peer_gets_minimum_tolerance() {
        assert_eq!(endpoint(0, 0, 0).tolerance_span(), 1);
    }

    #[test]
    fn bad_clock_widens_tolerance() {
        // 2 x 1h clock difference = two extra periods of tolerance
        let ep = endpoint(0, PERIOD_LENGTH_MS, 0);
        assert_eq!(ep.tolerance_span(), 3);
    }

    #[test]
    fn slow_transport_widens_tolerance() {
        let ep = endpoint(0, 0, PERIOD_LENGTH_MS / 2);
        assert_eq!(ep.tolerance_span(), 1);
        let ep = endpoint(0, 0, PERIOD_LENGTH_MS);
        assert_eq!(ep.tolerance_span(), 2);
    }
}
