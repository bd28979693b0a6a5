//! The period store: lifecycle of per-contact key periods
//!
//! Owns every materialized period secret and is the only component that
//! mutates counters and replay windows. Handles are shared explicitly (no
//! ambient global state): the connection recognizer reads candidates from
//! the store and reports acceptances back to it.
//!
//! # Concurrency
//!
//! Outgoing allocation and inbound recognition run on independent I/O
//! threads. Recognition trials are read-mostly: they snapshot candidate tag
//! keys under the read lock and trial-decrypt without any lock held. Every
//! mutation (counter increment, window commit, period roll) takes the
//! write lock, persists the new record first, and only then updates memory,
//! so a storage failure never leaves a period half-updated.

use std::{
    collections::{BTreeMap, HashMap},
    sync::RwLock,
};

use veilwire_crypto::{
    KeyPurpose, MAX_CONNECTION_NUMBER, PeriodSecret, Role, SubKey, derive_next_period_secret,
    derive_root_secret, derive_sub_key,
};

use crate::{
    context::ConnectionContext,
    endpoint::{ContactId, Endpoint, TransportId},
    error::{RecognizeError, Rejection, StoreError},
    storage::{PeriodKey, Storage, StoredEndpoint, StoredPeriod},
    window::{ReplayWindow, WindowCheck},
};

/// Tag keys for both roles of one period, derived once at materialization
/// so recognition never re-runs the KDF per trial.
struct TagKeyPair {
    initiator: SubKey,
    responder: SubKey,
}

impl TagKeyPair {
    fn derive(secret: &PeriodSecret) -> Self {
        Self {
            initiator: derive_sub_key(secret, Role::Initiator, KeyPurpose::Tag),
            responder: derive_sub_key(secret, Role::Responder, KeyPurpose::Tag),
        }
    }

    fn for_role(&self, role: Role) -> &SubKey {
        match role {
            Role::Initiator => &self.initiator,
            Role::Responder => &self.responder,
        }
    }
}

/// One materialized period in memory.
struct PeriodState {
    secret: PeriodSecret,
    outgoing: u64,
    window: ReplayWindow,
    tag_keys: TagKeyPair,
}

impl PeriodState {
    fn new(secret: PeriodSecret) -> Self {
        let tag_keys = TagKeyPair::derive(&secret);
        Self { secret, outgoing: 0, window: ReplayWindow::new(), tag_keys }
    }

    fn to_stored(&self) -> StoredPeriod {
        StoredPeriod {
            secret: self.secret.as_bytes().to_vec(),
            outgoing: self.outgoing,
            window: self.window,
        }
    }
}

/// All state for one (contact, transport) pair.
struct EndpointState {
    endpoint: Endpoint,
    /// The period that contains "now" as of the last roll; outgoing
    /// connections allocate from here. The next period may already be
    /// materialized for inbound skew absorption, but is never allocated
    /// from.
    current_period: u64,
    periods: BTreeMap<u64, PeriodState>,
}

struct StoreInner {
    endpoints: HashMap<(ContactId, TransportId), EndpointState>,
}

/// A candidate for one recognition trial: one (endpoint, period, role) tag
/// key, snapshotted out of the store so trial decryption runs lock-free.
pub(crate) struct TagCandidate {
    pub(crate) contact: ContactId,
    pub(crate) transport: TransportId,
    pub(crate) period: u64,
    pub(crate) key_role: Role,
    pub(crate) our_role: Role,
    pub(crate) tag_key: SubKey,
}

/// Durable table of materialized key periods for every known
/// (contact, transport) pair.
///
/// All operations complete in bounded time: KDF invocations plus one
/// storage round-trip. Nothing here blocks on the network.
pub struct PeriodStore<S: Storage> {
    storage: S,
    inner: RwLock<StoreInner>,
}

impl<S: Storage> PeriodStore<S> {
    /// Open the store, loading all persisted endpoints and periods.
    ///
    /// # Errors
    ///
    /// - `CorruptSecret` if a persisted secret has the wrong length
    /// - `Storage` if the backend fails
    pub fn open(storage: S) -> Result<Self, StoreError> {
        let mut endpoints: HashMap<(ContactId, TransportId), EndpointState> = HashMap::new();

        for stored in storage.load_endpoints()? {
            let endpoint = stored.to_endpoint()?;
            endpoints.insert(
                (endpoint.contact, endpoint.transport),
                EndpointState { endpoint, current_period: 0, periods: BTreeMap::new() },
            );
        }

        for (key, stored) in storage.load_periods()? {
            let Some(state) = endpoints.get_mut(&(key.contact, key.transport)) else {
                // A period without its endpoint: harmless leftover, but worth
                // operator attention
                tracing::warn!(
                    contact = %key.contact,
                    transport = %key.transport,
                    period = key.period,
                    "orphaned period record in storage; ignoring"
                );
                continue;
            };
            let secret = PeriodSecret::from_slice(&stored.secret).map_err(|e| {
                StoreError::CorruptSecret {
                    contact: key.contact,
                    transport: key.transport,
                    period: key.period,
                    detail: e.to_string(),
                }
            })?;
            let tag_keys = TagKeyPair::derive(&secret);
            state.periods.insert(
                key.period,
                PeriodState {
                    secret,
                    outgoing: stored.outgoing,
                    window: stored.window,
                    tag_keys,
                },
            );
        }

        // The highest materialized period is the pre-staged next one (when
        // more than one exists); until the first roll, treat its predecessor
        // as current
        for state in endpoints.values_mut() {
            if let (Some(&first), Some(&last)) =
                (state.periods.keys().next(), state.periods.keys().next_back())
            {
                state.current_period = last.saturating_sub(1).max(first);
            }
        }

        Ok(Self { storage, inner: RwLock::new(StoreInner { endpoints }) })
    }

    /// Add a freshly handshaken endpoint and materialize period 0 from its
    /// master secret.
    ///
    /// The caller should zeroize `master_secret` once every transport's
    /// endpoint has been added. Follow with [`Self::roll_periods`] to bring
    /// the pair up to the current period.
    ///
    /// # Errors
    ///
    /// - `EndpointExists` if the pair already has keys
    /// - `Storage` if persisting fails (nothing is added)
    pub fn add_endpoint(
        &self,
        endpoint: Endpoint,
        master_secret: &[u8],
    ) -> Result<(), StoreError> {
        let mut inner = self.write_lock();
        let key = (endpoint.contact, endpoint.transport);
        if inner.endpoints.contains_key(&key) {
            return Err(StoreError::EndpointExists {
                contact: endpoint.contact,
                transport: endpoint.transport,
            });
        }

        let secret = derive_root_secret(master_secret, endpoint.transport.0);
        let state = PeriodState::new(secret);

        self.storage.put_endpoint(&StoredEndpoint::from_endpoint(&endpoint))?;
        self.storage.put_period(
            PeriodKey { contact: endpoint.contact, transport: endpoint.transport, period: 0 },
            &state.to_stored(),
        )?;

        tracing::debug!(
            contact = %endpoint.contact,
            transport = %endpoint.transport,
            "endpoint added, period 0 materialized"
        );

        inner.endpoints.insert(
            key,
            EndpointState {
                endpoint,
                current_period: 0,
                periods: BTreeMap::from([(0, state)]),
            },
        );
        Ok(())
    }

    /// Bring every endpoint's period table up to date with `now_ms`.
    ///
    /// Materializes any missing periods up to current + 1 (so next-period
    /// material exists before peers with fast clocks need it) and retires
    /// periods that fell out of the endpoint's tolerance span, zeroizing
    /// their secrets. Invoked by an external scheduler; periods never move
    /// backward, so a clock step into the past is a no-op.
    ///
    /// # Errors
    ///
    /// `Storage` if the backend fails; already-committed period updates
    /// remain valid, the in-memory table never runs ahead of storage.
    pub fn roll_periods(&self, now_ms: u64) -> Result<(), StoreError> {
        let mut inner = self.write_lock();

        for ((contact, transport), state) in &mut inner.endpoints {
            let target = state.endpoint.period_index(now_ms);

            let Some(&highest) = state.periods.keys().next_back() else {
                debug_assert!(false, "endpoint without materialized periods");
                tracing::error!(
                    contact = %contact,
                    transport = %transport,
                    "endpoint has no materialized periods; skipping roll"
                );
                continue;
            };

            // Materialize forward to target + 1
            for period in (highest + 1)..=(target + 1) {
                let Some(previous) = state.periods.get(&(period - 1)) else {
                    unreachable!("periods are materialized contiguously");
                };
                let secret = derive_next_period_secret(&previous.secret, period);
                let fresh = PeriodState::new(secret);
                self.storage.put_period(
                    PeriodKey { contact: *contact, transport: *transport, period },
                    &fresh.to_stored(),
                )?;
                state.periods.insert(period, fresh);
            }

            // Retire periods below the tolerance floor
            let floor = target.saturating_sub(state.endpoint.tolerance_span());
            let retired: Vec<u64> = state.periods.range(..floor).map(|(&p, _)| p).collect();
            for period in retired {
                self.storage.remove_period(PeriodKey {
                    contact: *contact,
                    transport: *transport,
                    period,
                })?;
                // Dropping the state zeroizes the secret and its sub-keys
                state.periods.remove(&period);
                tracing::debug!(
                    contact = %contact,
                    transport = %transport,
                    period,
                    "retired key period"
                );
            }

            if state.current_period != target {
                tracing::debug!(
                    contact = %contact,
                    transport = %transport,
                    from = state.current_period,
                    to = target,
                    "rolled to new current period"
                );
            }
            state.current_period = target;
        }
        Ok(())
    }

    /// Allocate the next outgoing connection for a pair.
    ///
    /// Returns a context for the current period with the next connection
    /// number, incrementing the persisted counter first. The pre-staged
    /// next period is never allocated from.
    ///
    /// # Errors
    ///
    /// - `NoEndpoint` if the pair is unknown ("cannot connect yet")
    /// - `CounterExhausted` if this period's counter hit the tag codec's
    ///   bound
    /// - `Storage` if persisting the increment fails (the number is not
    ///   consumed)
    pub fn allocate_outgoing(
        &self,
        contact: ContactId,
        transport: TransportId,
    ) -> Result<ConnectionContext, StoreError> {
        let mut inner = self.write_lock();
        let state = inner
            .endpoints
            .get_mut(&(contact, transport))
            .ok_or(StoreError::NoEndpoint { contact, transport })?;

        let period = state.current_period;
        let role = state.endpoint.role;
        let Some(period_state) = state.periods.get_mut(&period) else {
            debug_assert!(false, "current period is always materialized");
            return Err(StoreError::NoEndpoint { contact, transport });
        };

        if period_state.outgoing > MAX_CONNECTION_NUMBER {
            return Err(StoreError::CounterExhausted { contact, transport });
        }
        let connection = period_state.outgoing;

        let mut stored = period_state.to_stored();
        stored.outgoing = connection + 1;
        self.storage.put_period(PeriodKey { contact, transport, period }, &stored)?;
        period_state.outgoing = connection + 1;

        Ok(ConnectionContext::new(
            contact,
            transport,
            period,
            period_state.secret.clone(),
            connection,
            role,
        ))
    }

    /// Remove one endpoint and zeroize all its period secrets.
    ///
    /// # Errors
    ///
    /// - `NoEndpoint` if the pair is unknown
    /// - `Storage` if the backend fails (state is kept)
    pub fn remove_endpoint(
        &self,
        contact: ContactId,
        transport: TransportId,
    ) -> Result<(), StoreError> {
        let mut inner = self.write_lock();
        if !inner.endpoints.contains_key(&(contact, transport)) {
            return Err(StoreError::NoEndpoint { contact, transport });
        }
        self.storage.remove_endpoint_state(contact, transport)?;
        // Dropping the state zeroizes every period secret
        inner.endpoints.remove(&(contact, transport));
        tracing::debug!(%contact, %transport, "endpoint removed");
        Ok(())
    }

    /// Remove a contact's endpoints on every transport, zeroizing all
    /// secrets. Removing an unknown contact is a no-op.
    ///
    /// # Errors
    ///
    /// `Storage` if the backend fails (state is kept).
    pub fn remove_contact(&self, contact: ContactId) -> Result<(), StoreError> {
        let mut inner = self.write_lock();
        self.storage.remove_contact_state(contact)?;
        inner.endpoints.retain(|&(c, _), _| c != contact);
        tracing::debug!(%contact, "contact removed");
        Ok(())
    }

    /// Snapshot every recognition candidate: each materialized period of
    /// each endpoint contributes both roles' tag keys.
    ///
    /// The snapshot is bounded by
    /// contacts x transports x (tolerance + 2) periods x 2 roles,
    /// which is also the trial bound of the recognizer.
    pub(crate) fn tag_candidates(&self) -> Vec<TagCandidate> {
        let inner = self.read_lock();
        let mut candidates = Vec::new();
        for ((contact, transport), state) in &inner.endpoints {
            for (&period, period_state) in &state.periods {
                for key_role in [Role::Initiator, Role::Responder] {
                    candidates.push(TagCandidate {
                        contact: *contact,
                        transport: *transport,
                        period,
                        key_role,
                        our_role: state.endpoint.role,
                        tag_key: period_state.tag_keys.for_role(key_role).clone(),
                    });
                }
            }
        }
        candidates
    }

    /// Commit the acceptance of a recognized connection number, advancing
    /// the replay window.
    ///
    /// Re-validates under the write lock: between the lock-free trial and
    /// this commit, the period may have been retired or the same number
    /// accepted by a concurrent recognition. Exactly one caller wins.
    pub(crate) fn commit_acceptance(
        &self,
        contact: ContactId,
        transport: TransportId,
        period: u64,
        connection: u64,
    ) -> Result<ConnectionContext, RecognizeError> {
        let mut inner = self.write_lock();
        let Some(state) = inner.endpoints.get_mut(&(contact, transport)) else {
            return Err(Rejection::Unrecognized.into());
        };
        let peer_role = state.endpoint.role.opposite();
        let Some(period_state) = state.periods.get_mut(&period) else {
            // Retired between trial and commit
            return Err(Rejection::Unrecognized.into());
        };

        match period_state.window.check(connection) {
            WindowCheck::BelowWindow => Err(Rejection::TooOld { connection }.into()),
            WindowCheck::Duplicate => Err(Rejection::Duplicate { connection }.into()),
            WindowCheck::Fresh => {
                let mut window = period_state.window;
                window.record(connection);

                let mut stored = period_state.to_stored();
                stored.window = window;
                self.storage.put_period(PeriodKey { contact, transport, period }, &stored)?;
                period_state.window = window;

                Ok(ConnectionContext::new(
                    contact,
                    transport,
                    period,
                    period_state.secret.clone(),
                    connection,
                    peer_role,
                ))
            },
        }
    }

    /// Materialized period indices for a pair, lowest first. Intended for
    /// diagnostics and tests.
    pub fn materialized_periods(
        &self,
        contact: ContactId,
        transport: TransportId,
    ) -> Vec<u64> {
        let inner = self.read_lock();
        inner
            .endpoints
            .get(&(contact, transport))
            .map(|state| state.periods.keys().copied().collect())
            .unwrap_or_default()
    }

    #[allow(clippy::expect_used, reason = "a poisoned lock means a panic already in flight")]
    fn read_lock(&self) -> std::sync::RwLockReadGuard<'_, StoreInner> {
        self.inner.read().expect("period store lock poisoned")
    }

    #[allow(clippy::expect_used, reason = "a poisoned lock means a panic already in flight")]
    fn write_lock(&self) -> std::sync::RwLockWriteGuard<'_, StoreInner> {
        self.inner.write().expect("period store lock poisoned")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{endpoint::PERIOD_LENGTH_MS, storage::MemoryStorage};

    const EPOCH_MS: u64 = 1_700_000_000_000;
    const MASTER: &[u8] = b"master_secret_material_under_test";

    fn test_endpoint() -> Endpoint {
        Endpoint {
            contact: ContactId(1),
            transport: TransportId(2),
            epoch_ms: EPOCH_MS,
            clock_difference_ms: 0,
            max_latency_ms: 0,
            role: Role::Initiator,
        }
    }

    fn open_store() -> PeriodStore<MemoryStorage> {
        PeriodStore::open(MemoryStorage::new()).unwrap()
    }

    #[test]
    fn add_endpoint_materializes_period_zero() {
        let store = open_store();
        store.add_endpoint(test_endpoint(), MASTER).unwrap();
        assert_eq!(store.materialized_periods(ContactId(1), TransportId(2)), vec![0]);
    }

    #[test]
    fn duplicate_endpoint_is_rejected() {
        let store = open_store();
        store.add_endpoint(test_endpoint(), MASTER).unwrap();
        assert_eq!(
            store.add_endpoint(test_endpoint(), MASTER),
            Err(StoreError::EndpointExists { contact: ContactId(1), transport: TransportId(2) })
        );
    }

    #[test]
    fn allocate_without_endpoint_fails() {
        let store = open_store();
        assert_eq!(
            store.allocate_outgoing(ContactId(9), TransportId(9)).unwrap_err(),
            StoreError::NoEndpoint { contact: ContactId(9), transport: TransportId(9) }
        );
    }

    #[test]
    fn allocation_counts_up_from_zero() {
        let store = open_store();
        store.add_endpoint(test_endpoint(), MASTER).unwrap();

        let first = store.allocate_outgoing(ContactId(1), TransportId(2)).unwrap();
        let second = store.allocate_outgoing(ContactId(1), TransportId(2)).unwrap();

        assert_eq!(first.connection(), 0);
        assert_eq!(second.connection(), 1);
        assert_eq!(first.period(), 0);
        assert_eq!(first.role(), Role::Initiator);
    }

    #[test]
    fn roll_materializes_current_plus_one_and_retires_old() {
        let store = open_store();
        store.add_endpoint(test_endpoint(), MASTER).unwrap();

        // Two hours later: current period 2, tolerance 1 → keep 1..=3
        store.roll_periods(EPOCH_MS + 2 * PERIOD_LENGTH_MS).unwrap();
        assert_eq!(store.materialized_periods(ContactId(1), TransportId(2)), vec![1, 2, 3]);

        let ctx = store.allocate_outgoing(ContactId(1), TransportId(2)).unwrap();
        assert_eq!(ctx.period(), 2);
    }

    #[test]
    fn roll_is_idempotent_within_a_period() {
        let store = open_store();
        store.add_endpoint(test_endpoint(), MASTER).unwrap();
        store.roll_periods(EPOCH_MS + PERIOD_LENGTH_MS).unwrap();
        let before = store.materialized_periods(ContactId(1), TransportId(2));
        store.roll_periods(EPOCH_MS + PERIOD_LENGTH_MS + 1).unwrap();
        assert_eq!(store.materialized_periods(ContactId(1), TransportId(2)), before);
    }

    #[test]
    fn clock_step_backwards_never_rolls_back() {
        let store = open_store();
        store.add_endpoint(test_endpoint(), MASTER).unwrap();
        store.roll_periods(EPOCH_MS + 3 * PERIOD_LENGTH_MS).unwrap();
        let before = store.materialized_periods(ContactId(1), TransportId(2));

        store.roll_periods(EPOCH_MS).unwrap();
        assert_eq!(store.materialized_periods(ContactId(1), TransportId(2)), before);
    }

    #[test]
    fn rolled_period_has_a_fresh_secret_and_counter() {
        let store = open_store();
        store.add_endpoint(test_endpoint(), MASTER).unwrap();
        let before = store.allocate_outgoing(ContactId(1), TransportId(2)).unwrap();

        store.roll_periods(EPOCH_MS + 2 * PERIOD_LENGTH_MS).unwrap();
        let after = store.allocate_outgoing(ContactId(1), TransportId(2)).unwrap();

        assert_ne!(
            before.period_secret().as_bytes(),
            after.period_secret().as_bytes(),
            "each period must use a distinct secret"
        );
        assert_eq!(after.connection(), 0, "counters restart per period");
    }

    #[test]
    fn wide_tolerance_keeps_more_periods() {
        let store = open_store();
        let endpoint = Endpoint {
            clock_difference_ms: PERIOD_LENGTH_MS,
            ..test_endpoint()
        };
        store.add_endpoint(endpoint, MASTER).unwrap();

        // Tolerance span is 3: at period 5, periods 2..=6 stay materialized
        store.roll_periods(EPOCH_MS + 5 * PERIOD_LENGTH_MS).unwrap();
        assert_eq!(
            store.materialized_periods(ContactId(1), TransportId(2)),
            vec![2, 3, 4, 5, 6]
        );
    }

    #[test]
    fn state_reloads_from_storage() {
        let storage = MemoryStorage::new();
        {
            let store = PeriodStore::open(storage.clone()).unwrap();
            store.add_endpoint(test_endpoint(), MASTER).unwrap();
            store.roll_periods(EPOCH_MS + PERIOD_LENGTH_MS).unwrap();
            store.allocate_outgoing(ContactId(1), TransportId(2)).unwrap();
        }

        let reopened = PeriodStore::open(storage).unwrap();
        assert_eq!(store_periods(&reopened), vec![0, 1, 2]);

        // Counter continues where it left off: no connection number reuse
        // across restarts
        let ctx = reopened.allocate_outgoing(ContactId(1), TransportId(2)).unwrap();
        assert_eq!(ctx.period(), 1);
        assert_eq!(ctx.connection(), 1);
    }

    fn store_periods(store: &PeriodStore<MemoryStorage>) -> Vec<u64> {
        store.materialized_periods(ContactId(1), TransportId(2))
    }

    #[test]
    fn corrupt_persisted_secret_surfaces_on_open() {
        let storage = MemoryStorage::new();
        {
            let store = PeriodStore::open(storage.clone()).unwrap();
            store.add_endpoint(test_endpoint(), MASTER).unwrap();
        }
        storage
            .put_period(
                PeriodKey { contact: ContactId(1), transport: TransportId(2), period: 0 },
                &StoredPeriod {
                    secret: vec![0u8; 7],
                    outgoing: 0,
                    window: ReplayWindow::new(),
                },
            )
            .unwrap();

        assert!(matches!(
            PeriodStore::open(storage),
            Err(StoreError::CorruptSecret { period: 0, .. })
        ));
    }

    #[test]
    fn remove_endpoint_forgets_the_pair() {
        let store = open_store();
        store.add_endpoint(test_endpoint(), MASTER).unwrap();
        store.remove_endpoint(ContactId(1), TransportId(2)).unwrap();

        assert!(store.materialized_periods(ContactId(1), TransportId(2)).is_empty());
        assert!(matches!(
            store.allocate_outgoing(ContactId(1), TransportId(2)),
            Err(StoreError::NoEndpoint { .. })
        ));
        assert!(matches!(
            store.remove_endpoint(ContactId(1), TransportId(2)),
            Err(StoreError::NoEndpoint { .. })
        ));
    }

    #[test]
    fn remove_contact_spans_transports() {
        let store = open_store();
        store.add_endpoint(test_endpoint(), MASTER).unwrap();
        store
            .add_endpoint(
                Endpoint { transport: TransportId(3), ..test_endpoint() },
                MASTER,
            )
            .unwrap();
        store
            .add_endpoint(
                Endpoint { contact: ContactId(5), ..test_endpoint() },
                b"other_master_secret_material_here",
            )
            .unwrap();

        store.remove_contact(ContactId(1)).unwrap();

        assert!(store.materialized_periods(ContactId(1), TransportId(2)).is_empty());
        assert!(store.materialized_periods(ContactId(1), TransportId(3)).is_empty());
        assert_eq!(store.materialized_periods(ContactId(5), TransportId(2)), vec![0]);
    }

    #[test]
    fn candidate_count_matches_trial_bound() {
        let store = open_store();
        store.add_endpoint(test_endpoint(), MASTER).unwrap();
        store.roll_periods(EPOCH_MS + 2 * PERIOD_LENGTH_MS).unwrap();

        // 1 contact x 1 transport x 3 periods x 2 roles
        assert_eq!(store.tag_candidates().len(), 6);
    }
}
