//! Redb-backed durable storage implementation.
//!
//! Uses Redb's ACID transactions with Copy-on-Write for crash safety.
//! All state survives process restarts: counters continue where they left
//! off and replay windows keep their history, so a restart can never cause
//! a connection number to be issued or accepted twice.

use std::{path::Path, sync::Arc};

use redb::{Database, ReadableTable, TableDefinition};

use super::{PeriodKey, Storage, StorageError, StoredEndpoint, StoredPeriod};
use crate::endpoint::{ContactId, TransportId};

/// Table: endpoints
/// Key: (contact: u32, transport: u32) as big-endian bytes [8 bytes]
/// Value: CBOR-encoded StoredEndpoint
const ENDPOINTS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("endpoints");

/// Table: periods
/// Key: (contact: u32, transport: u32, period: u64) as big-endian bytes
/// [16 bytes]
/// Value: CBOR-encoded StoredPeriod
const PERIODS: TableDefinition<&[u8], &[u8]> = TableDefinition::new("periods");

/// Durable storage backed by Redb.
///
/// Thread-safe through Redb's internal locking. Clone is cheap (Arc).
#[derive(Clone)]
pub struct RedbStorage {
    db: Arc<Database>,
}

impl RedbStorage {
    /// Open or create a Redb database at the given path.
    ///
    /// Creates tables if they don't exist (ENDPOINTS, PERIODS).
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Io` if the database cannot be opened or
    /// created.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let db = Database::create(path.as_ref()).map_err(|e| StorageError::Io(e.to_string()))?;

        let txn = db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let _ = txn.open_table(ENDPOINTS).map_err(|e| StorageError::Io(e.to_string()))?;
            let _ = txn.open_table(PERIODS).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;

        Ok(Self { db: Arc::new(db) })
    }
}

impl Storage for RedbStorage {
    fn put_endpoint(&self, endpoint: &StoredEndpoint) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(ENDPOINTS).map_err(|e| StorageError::Io(e.to_string()))?;

            let mut bytes = Vec::new();
            ciborium::into_writer(endpoint, &mut bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            let key = encode_endpoint_key(endpoint.contact, endpoint.transport);
            table
                .insert(key.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    fn load_endpoints(&self) -> Result<Vec<StoredEndpoint>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(ENDPOINTS).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut endpoints = Vec::new();
        for result in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
            let (_, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            let endpoint: StoredEndpoint = ciborium::from_reader(value.value())
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            endpoints.push(endpoint);
        }
        Ok(endpoints)
    }

    fn put_period(&self, key: PeriodKey, period: &StoredPeriod) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(PERIODS).map_err(|e| StorageError::Io(e.to_string()))?;

            let mut bytes = Vec::new();
            ciborium::into_writer(period, &mut bytes)
                .map_err(|e| StorageError::Serialization(e.to_string()))?;

            let encoded = encode_period_key(key);
            table
                .insert(encoded.as_slice(), bytes.as_slice())
                .map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    fn load_periods(&self) -> Result<Vec<(PeriodKey, StoredPeriod)>, StorageError> {
        let txn = self.db.begin_read().map_err(|e| StorageError::Io(e.to_string()))?;
        let table = txn.open_table(PERIODS).map_err(|e| StorageError::Io(e.to_string()))?;

        let mut periods = Vec::new();
        for result in table.iter().map_err(|e| StorageError::Io(e.to_string()))? {
            let (key, value) = result.map_err(|e| StorageError::Io(e.to_string()))?;
            let decoded_key = decode_period_key(key.value())?;
            let period: StoredPeriod = ciborium::from_reader(value.value())
                .map_err(|e| StorageError::Serialization(e.to_string()))?;
            periods.push((decoded_key, period));
        }
        Ok(periods)
    }

    fn remove_period(&self, key: PeriodKey) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut table =
                txn.open_table(PERIODS).map_err(|e| StorageError::Io(e.to_string()))?;
            let encoded = encode_period_key(key);
            table.remove(encoded.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    fn remove_endpoint_state(
        &self,
        contact: ContactId,
        transport: TransportId,
    ) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut endpoints =
                txn.open_table(ENDPOINTS).map_err(|e| StorageError::Io(e.to_string()))?;
            let key = encode_endpoint_key(contact.0, transport.0);
            endpoints.remove(key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;

            let mut periods =
                txn.open_table(PERIODS).map_err(|e| StorageError::Io(e.to_string()))?;
            let start = encode_period_key(PeriodKey { contact, transport, period: 0 });
            let end = encode_period_key(PeriodKey { contact, transport, period: u64::MAX });
            remove_range(&mut periods, &start, &end)?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }

    fn remove_contact_state(&self, contact: ContactId) -> Result<(), StorageError> {
        let txn = self.db.begin_write().map_err(|e| StorageError::Io(e.to_string()))?;
        {
            let mut endpoints =
                txn.open_table(ENDPOINTS).map_err(|e| StorageError::Io(e.to_string()))?;
            let start = encode_endpoint_key(contact.0, 0);
            let end = encode_endpoint_key(contact.0, u32::MAX);
            remove_range(&mut endpoints, &start, &end)?;

            let mut periods =
                txn.open_table(PERIODS).map_err(|e| StorageError::Io(e.to_string()))?;
            let start = encode_period_key(PeriodKey {
                contact,
                transport: TransportId(0),
                period: 0,
            });
            let end = encode_period_key(PeriodKey {
                contact,
                transport: TransportId(u32::MAX),
                period: u64::MAX,
            });
            remove_range(&mut periods, &start, &end)?;
        }
        txn.commit().map_err(|e| StorageError::Io(e.to_string()))?;
        Ok(())
    }
}

/// Remove every key in `[start, end]` from a table.
fn remove_range(
    table: &mut redb::Table<'_, &'static [u8], &'static [u8]>,
    start: &[u8],
    end: &[u8],
) -> Result<(), StorageError> {
    // Collect first: removing while the range iterator borrows the table is
    // not possible
    let mut doomed = Vec::new();
    for result in table.range(start..=end).map_err(|e| StorageError::Io(e.to_string()))? {
        let (key, _) = result.map_err(|e| StorageError::Io(e.to_string()))?;
        doomed.push(key.value().to_vec());
    }
    for key in doomed {
        table.remove(key.as_slice()).map_err(|e| StorageError::Io(e.to_string()))?;
    }
    Ok(())
}

/// Encode (contact, transport) as an 8-byte big-endian key.
///
/// Layout: [contact: 4 bytes BE][transport: 4 bytes BE]
/// This ensures lexicographic ordering matches numeric ordering, so one
/// contact's endpoints form a contiguous key range.
fn encode_endpoint_key(contact: u32, transport: u32) -> [u8; 8] {
    let mut key = [0u8; 8];
    key[..4].copy_from_slice(&contact.to_be_bytes());
    key[4..].copy_from_slice(&transport.to_be_bytes());
    key
}

/// Encode (contact, transport, period) as a 16-byte big-endian key.
fn encode_period_key(key: PeriodKey) -> [u8; 16] {
    let mut bytes = [0u8; 16];
    bytes[..4].copy_from_slice(&key.contact.0.to_be_bytes());
    bytes[4..8].copy_from_slice(&key.transport.0.to_be_bytes());
    bytes[8..].copy_from_slice(&key.period.to_be_bytes());
    bytes
}

/// Decode a period key back to (contact, transport, period).
fn decode_period_key(key: &[u8]) -> Result<PeriodKey, StorageError> {
    if key.len() != 16 {
        return Err(StorageError::CorruptRecord(format!(
            "period key has length {}, expected 16",
            key.len()
        )));
    }
    let contact = u32::from_be_bytes([key[0], key[1], key[2], key[3]]);
    let transport = u32::from_be_bytes([key[4], key[5], key[6], key[7]]);
    let period = u64::from_be_bytes([
        key[8], key[9], key[10], key[11], key[12], key[13], key[14], key[15],
    ]);
    Ok(PeriodKey {
        contact: ContactId(contact),
        transport: TransportId(transport),
        period,
    })
}

#[cfg(test)]
mod tests {
    use tempfile::tempdir;

    use super::*;
    use crate::window::ReplayWindow;

    fn stored_endpoint(contact: u32, transport: u32) -> StoredEndpoint {
        StoredEndpoint {
            contact,
            transport,
            epoch_ms: 1_700_000_000_000,
            clock_difference_ms: 60_000,
            max_latency_ms: 30_000,
            role: 0,
        }
    }

    fn stored_period(fill: u8, outgoing: u64) -> StoredPeriod {
        StoredPeriod { secret: vec![fill; 32], outgoing, window: ReplayWindow::new() }
    }

    fn key(contact: u32, transport: u32, period: u64) -> PeriodKey {
        PeriodKey {
            contact: ContactId(contact),
            transport: TransportId(transport),
            period,
        }
    }

    #[test]
    fn period_key_encoding_round_trip() {
        let original = key(0x0102_0304, 0x0506_0708, 42);
        let encoded = encode_period_key(original);
        assert_eq!(encoded.len(), 16);
        assert_eq!(decode_period_key(&encoded).unwrap(), original);
    }

    #[test]
    fn period_keys_order_lexicographically() {
        let a = encode_period_key(key(1, 1, 5));
        let b = encode_period_key(key(1, 1, 6));
        let c = encode_period_key(key(1, 2, 0));
        assert!(a < b);
        assert!(b < c);
    }

    #[test]
    fn endpoint_round_trip() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();

        storage.put_endpoint(&stored_endpoint(1, 2)).unwrap();
        let endpoints = storage.load_endpoints().unwrap();
        assert_eq!(endpoints, vec![stored_endpoint(1, 2)]);
    }

    #[test]
    fn period_round_trip_and_overwrite() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();

        storage.put_period(key(1, 2, 0), &stored_period(0xAA, 0)).unwrap();
        storage.put_period(key(1, 2, 0), &stored_period(0xAA, 7)).unwrap();

        let periods = storage.load_periods().unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].0, key(1, 2, 0));
        assert_eq!(periods[0].1.outgoing, 7);
    }

    #[test]
    fn state_survives_reopen() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("test.redb");

        {
            let storage = RedbStorage::open(&path).unwrap();
            storage.put_endpoint(&stored_endpoint(1, 2)).unwrap();
            storage.put_period(key(1, 2, 3), &stored_period(0x55, 9)).unwrap();
        }

        let storage = RedbStorage::open(&path).unwrap();
        assert_eq!(storage.load_endpoints().unwrap().len(), 1);
        let periods = storage.load_periods().unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].1.outgoing, 9);
    }

    #[test]
    fn remove_endpoint_state_is_scoped_to_the_pair() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();

        storage.put_endpoint(&stored_endpoint(1, 2)).unwrap();
        storage.put_endpoint(&stored_endpoint(1, 3)).unwrap();
        storage.put_period(key(1, 2, 0), &stored_period(1, 0)).unwrap();
        storage.put_period(key(1, 2, 1), &stored_period(2, 0)).unwrap();
        storage.put_period(key(1, 3, 0), &stored_period(3, 0)).unwrap();

        storage.remove_endpoint_state(ContactId(1), TransportId(2)).unwrap();

        assert_eq!(storage.load_endpoints().unwrap().len(), 1);
        let periods = storage.load_periods().unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].0, key(1, 3, 0));
    }

    #[test]
    fn remove_contact_state_spans_transports() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();

        storage.put_endpoint(&stored_endpoint(1, 2)).unwrap();
        storage.put_endpoint(&stored_endpoint(1, u32::MAX)).unwrap();
        storage.put_endpoint(&stored_endpoint(2, 2)).unwrap();
        storage.put_period(key(1, 2, 0), &stored_period(1, 0)).unwrap();
        storage.put_period(key(1, u32::MAX, u64::MAX), &stored_period(2, 0)).unwrap();
        storage.put_period(key(2, 2, 0), &stored_period(3, 0)).unwrap();

        storage.remove_contact_state(ContactId(1)).unwrap();

        let endpoints = storage.load_endpoints().unwrap();
        assert_eq!(endpoints.len(), 1);
        assert_eq!(endpoints[0].contact, 2);
        let periods = storage.load_periods().unwrap();
        assert_eq!(periods.len(), 1);
        assert_eq!(periods[0].0, key(2, 2, 0));
    }

    #[test]
    fn remove_missing_period_is_a_noop() {
        let dir = tempdir().unwrap();
        let storage = RedbStorage::open(dir.path().join("test.redb")).unwrap();
        storage.remove_period(key(9, 9, 9)).unwrap();
    }
}
