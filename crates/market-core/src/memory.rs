use std::{
    collections::{BTreeMap, BTreeSet},
    sync::{Arc, Mutex, MutexGuard},
};

use time::OffsetDateTime;

use crate::{
    clock::{Clock, SystemClock},
    price::{InstrumentId, Price, PriceEntry},
    store::{
        validate_instrument_name, InstrumentCatalog, InstrumentRecord, PriceStore, StorageError,
    },
};

#[derive(Debug, Default)]
struct Tables {
    instruments: BTreeMap<InstrumentId, InstrumentRecord>,
    prices: BTreeMap<(InstrumentId, OffsetDateTime), Price>,
    failing_writes: BTreeSet<InstrumentId>,
    failing_reads: BTreeSet<InstrumentId>,
}

/// In-process store with the same semantics as the SQLite store.
pub struct MemoryPriceStore {
    clock: Arc<dyn Clock>,
    tables: Mutex<Tables>,
}

impl Default for MemoryPriceStore {
    fn default() -> Self {
        Self::new(Arc::new(SystemClock))
    }
}

impl MemoryPriceStore {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            tables: Mutex::new(Tables::default()),
        }
    }

    pub fn with_instruments(clock: Arc<dyn Clock>, ids: &[i64]) -> Self {
        let store = Self::new(clock);
        {
            let mut tables = store.lock();
            for &id in ids {
                let id = InstrumentId(id);
                tables.instruments.insert(
                    id,
                    InstrumentRecord {
                        id,
                        name: format!("instrument-{id}"),
                        color: None,
                    },
                );
            }
        }
        store
    }

    /// Makes every subsequent `write_price` for `id` fail with a backend error.
    pub fn fail_writes_for(&self, id: InstrumentId) {
        self.lock().failing_writes.insert(id);
    }

    /// Makes every subsequent read for `id` fail with a backend error.
    pub fn fail_reads_for(&self, id: InstrumentId) {
        self.lock().failing_reads.insert(id);
    }

    pub fn clear_faults(&self) {
        let mut tables = self.lock();
        tables.failing_writes.clear();
        tables.failing_reads.clear();
    }

    pub fn entries_for(&self, id: InstrumentId) -> Vec<PriceEntry> {
        self.lock()
            .prices
            .range((id, OffsetDateTime::UNIX_EPOCH)..)
            .take_while(|((entry_id, _), _)| *entry_id == id)
            .map(|((_, valid_after), price)| PriceEntry::new(*price, *valid_after))
            .collect()
    }

    fn lock(&self) -> MutexGuard<'_, Tables> {
        self.tables
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn checked_read(&self, id: InstrumentId) -> Result<MutexGuard<'_, Tables>, StorageError> {
        let tables = self.lock();
        if tables.failing_reads.contains(&id) {
            return Err(StorageError::Backend(format!(
                "injected read fault for instrument {id}"
            )));
        }
        if !tables.instruments.contains_key(&id) {
            return Err(StorageError::UnknownInstrument(id));
        }
        Ok(tables)
    }
}

impl PriceStore for MemoryPriceStore {
    fn read_current(&self, id: InstrumentId) -> Result<Option<PriceEntry>, StorageError> {
        Ok(self.read_history(id, 1)?.into_iter().next())
    }

    fn read_history(
        &self,
        id: InstrumentId,
        limit: usize,
    ) -> Result<Vec<PriceEntry>, StorageError> {
        let now = self.clock.now();
        let tables = self.checked_read(id)?;
        let entries = tables
            .prices
            .range((id, OffsetDateTime::UNIX_EPOCH)..=(id, now))
            .rev()
            .take(limit)
            .map(|((_, valid_after), price)| PriceEntry::new(*price, *valid_after))
            .collect();
        Ok(entries)
    }

    fn read_future(&self, id: InstrumentId, limit: usize) -> Result<Vec<PriceEntry>, StorageError> {
        let now = self.clock.now();
        let tables = self.checked_read(id)?;
        let entries = tables
            .prices
            .range((id, now)..)
            .take_while(|((entry_id, _), _)| *entry_id == id)
            .filter(|((_, valid_after), _)| *valid_after > now)
            .take(limit)
            .map(|((_, valid_after), price)| PriceEntry::new(*price, *valid_after))
            .collect();
        Ok(entries)
    }

    fn write_price(
        &self,
        id: InstrumentId,
        valid_after: OffsetDateTime,
        price: Price,
    ) -> Result<(), StorageError> {
        let mut tables = self.lock();
        if tables.failing_writes.contains(&id) {
            return Err(StorageError::Backend(format!(
                "injected write fault for instrument {id}"
            )));
        }
        if !tables.instruments.contains_key(&id) {
            return Err(StorageError::UnknownInstrument(id));
        }
        if tables.prices.contains_key(&(id, valid_after)) {
            return Err(StorageError::Conflict(format!(
                "instrument {id} already has a price valid after {valid_after}"
            )));
        }
        tables.prices.insert((id, valid_after), price);
        Ok(())
    }

    fn list_instrument_ids(&self) -> Result<Vec<InstrumentId>, StorageError> {
        Ok(self.lock().instruments.keys().copied().collect())
    }
}

impl InstrumentCatalog for MemoryPriceStore {
    fn list_instruments(&self) -> Result<Vec<InstrumentRecord>, StorageError> {
        Ok(self.lock().instruments.values().cloned().collect())
    }

    fn create_instrument(
        &self,
        name: &str,
        color: Option<&str>,
    ) -> Result<InstrumentId, StorageError> {
        let name = validate_instrument_name(name)?;
        let mut tables = self.lock();
        let id = tables
            .instruments
            .keys()
            .next_back()
            .map_or(InstrumentId(1), |last| InstrumentId(last.0 + 1));
        tables.instruments.insert(
            id,
            InstrumentRecord {
                id,
                name: name.to_owned(),
                color: color.map(str::to_owned),
            },
        );
        Ok(id)
    }

    fn get_instrument(&self, id: InstrumentId) -> Result<InstrumentRecord, StorageError> {
        self.lock()
            .instruments
            .get(&id)
            .cloned()
            .ok_or(StorageError::UnknownInstrument(id))
    }

    fn rename_instrument(
        &self,
        id: InstrumentId,
        name: &str,
    ) -> Result<InstrumentRecord, StorageError> {
        let name = validate_instrument_name(name)?;
        let mut tables = self.lock();
        let record = tables
            .instruments
            .get_mut(&id)
            .ok_or(StorageError::UnknownInstrument(id))?;
        record.name = name.to_owned();
        Ok(record.clone())
    }
}
