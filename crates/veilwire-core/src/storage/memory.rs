//! In-memory storage implementation for testing and simulation

use std::{
    collections::BTreeMap,
    sync::{Arc, Mutex},
};

use super::{PeriodKey, Storage, StorageError, StoredEndpoint, StoredPeriod};
use crate::endpoint::{ContactId, TransportId};

/// In-memory storage implementation for testing and simulation
///
/// Uses `BTreeMap` so load order is deterministic. All state is wrapped in
/// Arc<Mutex<>> to allow Clone and concurrent access. Thread-safe through
/// Mutex, but uses `lock().expect()` which will panic if the mutex is
/// poisoned - acceptable for test code.
#[derive(Clone)]
pub struct MemoryStorage {
    inner: Arc<Mutex<MemoryStorageInner>>,
}

struct MemoryStorageInner {
    endpoints: BTreeMap<(u32, u32), StoredEndpoint>,
    periods: BTreeMap<(u32, u32, u64), StoredPeriod>,
}

impl MemoryStorage {
    /// Create a new empty `MemoryStorage`
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(MemoryStorageInner {
                endpoints: BTreeMap::new(),
                periods: BTreeMap::new(),
            })),
        }
    }

    /// Number of persisted period records.
    ///
    /// Useful for debugging and testing.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex is poisoned (a thread panicked while
    /// holding the lock). This is acceptable for test/simulation code.
    #[allow(clippy::expect_used)]
    pub fn period_count(&self) -> usize {
        self.inner.lock().expect("Mutex poisoned").periods.len()
    }
}

impl Default for MemoryStorage {
    fn default() -> Self {
        Self::new()
    }
}

#[allow(clippy::expect_used, reason = "poisoned mutex is acceptable for the test backend")]
impl Storage for MemoryStorage {
    fn put_endpoint(&self, endpoint: &StoredEndpoint) -> Result<(), StorageError> {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .endpoints
            .insert((endpoint.contact, endpoint.transport), endpoint.clone());
        Ok(())
    }

    fn load_endpoints(&self) -> Result<Vec<StoredEndpoint>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner.endpoints.values().cloned().collect())
    }

    fn put_period(&self, key: PeriodKey, period: &StoredPeriod) -> Result<(), StorageError> {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .periods
            .insert((key.contact.0, key.transport.0, key.period), period.clone());
        Ok(())
    }

    fn load_periods(&self) -> Result<Vec<(PeriodKey, StoredPeriod)>, StorageError> {
        let inner = self.inner.lock().expect("Mutex poisoned");
        Ok(inner
            .periods
            .iter()
            .map(|(&(contact, transport, period), stored)| {
                let key = PeriodKey {
                    contact: ContactId(contact),
                    transport: TransportId(transport),
                    period,
                };
                (key, stored.clone())
            })
            .collect())
    }

    fn remove_period(&self, key: PeriodKey) -> Result<(), StorageError> {
        self.inner
            .lock()
            .expect("Mutex poisoned")
            .periods
            .remove(&(key.contact.0, key.transport.0, key.period));
        Ok(())
    }

    fn remove_endpoint_state(
        &self,
        contact: ContactId,
        transport: TransportId,
    ) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.endpoints.remove(&(contact.0, transport.0));
        inner
            .periods
            .retain(|&(c, t, _), _| !(c == contact.0 && t == transport.0));
        Ok(())
    }

    fn remove_contact_state(&self, contact: ContactId) -> Result<(), StorageError> {
        let mut inner = self.inner.lock().expect("Mutex poisoned");
        inner.endpoints.retain(|&(c, _), _| c != contact.0);
        inner.periods.retain(|&(c, _, _), _| c != contact.0);
        Ok(())
    }
}
