use std::{fmt, path::Path, sync::Arc, time::Duration};

use market_core::{
    validate_instrument_name, Clock, InstrumentCatalog, InstrumentId, InstrumentRecord, Price,
    PriceEntry, PriceStore, StorageError, SystemClock,
};
use r2d2::{Pool, PooledConnection};
use r2d2_sqlite::SqliteConnectionManager;
use rusqlite::{ffi, params, Connection, OptionalExtension};
use time::OffsetDateTime;

use crate::schema::SCHEMA;

pub type DbPool = Pool<SqliteConnectionManager>;

const BUSY_TIMEOUT: Duration = Duration::from_secs(5);

fn prepare_connection(conn: &mut Connection) -> Result<(), rusqlite::Error> {
    conn.busy_timeout(BUSY_TIMEOUT)?;
    conn.execute_batch("PRAGMA foreign_keys = ON;")
}

fn backend(err: impl fmt::Display) -> StorageError {
    StorageError::Backend(err.to_string())
}

fn to_nanos(at: OffsetDateTime) -> Result<i64, StorageError> {
    i64::try_from(at.unix_timestamp_nanos())
        .map_err(|_| StorageError::bad_value("valid_after", at.to_string()))
}

fn from_nanos(nanos: i64) -> Result<OffsetDateTime, StorageError> {
    OffsetDateTime::from_unix_timestamp_nanos(i128::from(nanos))
        .map_err(|_| StorageError::bad_value("valid_after", nanos.to_string()))
}

fn parse_price(text: &str) -> Result<Price, StorageError> {
    text.parse::<Price>()
        .map_err(|_| StorageError::bad_value("price", text))
}

fn sql_limit(limit: usize) -> i64 {
    i64::try_from(limit).unwrap_or(i64::MAX)
}

fn map_write_error(
    id: InstrumentId,
    valid_after: OffsetDateTime,
    err: rusqlite::Error,
) -> StorageError {
    if let rusqlite::Error::SqliteFailure(failure, _) = &err {
        match failure.extended_code {
            ffi::SQLITE_CONSTRAINT_PRIMARYKEY => {
                return StorageError::Conflict(format!(
                    "instrument {id} already has a price valid after {valid_after}"
                ));
            }
            ffi::SQLITE_CONSTRAINT_FOREIGNKEY => return StorageError::UnknownInstrument(id),
            _ => {}
        }
    }
    backend(err)
}

/// SQLite-backed price series and instrument catalog.
///
/// Every call checks a connection out of the pool and returns it before
/// returning, so no connection outlives a single operation.
pub struct SqlitePriceStore {
    pool: DbPool,
    clock: Arc<dyn Clock>,
}

impl SqlitePriceStore {
    /// Opens (creating if needed) the database at `path` and ensures the schema.
    pub fn open(path: impl AsRef<Path>, pool_size: u32) -> Result<Self, StorageError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|parent| !parent.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(backend)?;
        }

        let manager = SqliteConnectionManager::file(path).with_init(prepare_connection);
        let pool = Pool::builder()
            .max_size(pool_size.max(1))
            .build(manager)
            .map_err(backend)?;

        tracing::info!(path = %path.display(), pool_size, "opened price database");
        Self::from_pool(pool)
    }

    /// Single-connection in-memory database. The connection never idles out,
    /// otherwise the data would vanish with it.
    pub fn open_in_memory() -> Result<Self, StorageError> {
        let manager = SqliteConnectionManager::memory().with_init(prepare_connection);
        let pool = Pool::builder()
            .max_size(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .build(manager)
            .map_err(backend)?;
        Self::from_pool(pool)
    }

    fn from_pool(pool: DbPool) -> Result<Self, StorageError> {
        let store = Self {
            pool,
            clock: Arc::new(SystemClock),
        };
        store.init_schema()?;
        Ok(store)
    }

    /// Replaces the clock used to split history from future entries.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn init_schema(&self) -> Result<(), StorageError> {
        self.connection()?.execute_batch(SCHEMA).map_err(backend)
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn connection(&self) -> Result<PooledConnection<SqliteConnectionManager>, StorageError> {
        self.pool.get().map_err(backend)
    }

    fn ensure_known(conn: &Connection, id: InstrumentId) -> Result<(), StorageError> {
        conn.query_row("SELECT 1 FROM stocks WHERE id = ?1", params![id.0], |_| Ok(()))
            .optional()
            .map_err(backend)?
            .ok_or(StorageError::UnknownInstrument(id))
    }

    fn query_entries(
        &self,
        id: InstrumentId,
        sql: &str,
        limit: usize,
    ) -> Result<Vec<PriceEntry>, StorageError> {
        let now = to_nanos(self.clock.now())?;
        let conn = self.connection()?;
        Self::ensure_known(&conn, id)?;

        let mut stmt = conn.prepare(sql).map_err(backend)?;
        let rows: Vec<(String, i64)> = stmt
            .query_map(params![id.0, now, sql_limit(limit)], |row| {
                Ok((row.get(0)?, row.get(1)?))
            })
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;

        rows.into_iter()
            .map(|(price, valid_after)| {
                Ok::<_, StorageError>(PriceEntry::new(
                    parse_price(&price)?,
                    from_nanos(valid_after)?,
                ))
            })
            .collect()
    }
}

impl fmt::Debug for SqlitePriceStore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SqlitePriceStore")
            .field("pool", &self.pool.state())
            .finish_non_exhaustive()
    }
}

impl PriceStore for SqlitePriceStore {
    fn read_current(&self, id: InstrumentId) -> Result<Option<PriceEntry>, StorageError> {
        Ok(self.read_history(id, 1)?.into_iter().next())
    }

    fn read_history(
        &self,
        id: InstrumentId,
        limit: usize,
    ) -> Result<Vec<PriceEntry>, StorageError> {
        self.query_entries(
            id,
            "SELECT price, valid_after FROM prices
             WHERE stock_id = ?1 AND valid_after <= ?2
             ORDER BY valid_after DESC
             LIMIT ?3",
            limit,
        )
    }

    fn read_future(&self, id: InstrumentId, limit: usize) -> Result<Vec<PriceEntry>, StorageError> {
        self.query_entries(
            id,
            "SELECT price, valid_after FROM prices
             WHERE stock_id = ?1 AND valid_after > ?2
             ORDER BY valid_after ASC
             LIMIT ?3",
            limit,
        )
    }

    fn write_price(
        &self,
        id: InstrumentId,
        valid_after: OffsetDateTime,
        price: Price,
    ) -> Result<(), StorageError> {
        let nanos = to_nanos(valid_after)?;
        self.connection()?
            .execute(
                "INSERT INTO prices (stock_id, valid_after, price) VALUES (?1, ?2, ?3)",
                params![id.0, nanos, price.to_string()],
            )
            .map(|_| ())
            .map_err(|err| map_write_error(id, valid_after, err))
    }

    fn list_instrument_ids(&self) -> Result<Vec<InstrumentId>, StorageError> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT id FROM stocks ORDER BY id")
            .map_err(backend)?;
        let ids = stmt
            .query_map([], |row| row.get::<_, i64>(0).map(InstrumentId))
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        Ok(ids)
    }
}

impl InstrumentCatalog for SqlitePriceStore {
    fn list_instruments(&self) -> Result<Vec<InstrumentRecord>, StorageError> {
        let conn = self.connection()?;
        let mut stmt = conn
            .prepare("SELECT id, name, color FROM stocks ORDER BY id")
            .map_err(backend)?;
        let records = stmt
            .query_map([], |row| {
                Ok(InstrumentRecord {
                    id: InstrumentId(row.get(0)?),
                    name: row.get(1)?,
                    color: row.get(2)?,
                })
            })
            .map_err(backend)?
            .collect::<Result<Vec<_>, _>>()
            .map_err(backend)?;
        Ok(records)
    }

    fn create_instrument(
        &self,
        name: &str,
        color: Option<&str>,
    ) -> Result<InstrumentId, StorageError> {
        let name = validate_instrument_name(name)?;
        let created_at = to_nanos(self.clock.now())?;
        let conn = self.connection()?;
        conn.execute(
            "INSERT INTO stocks (name, color, created_at) VALUES (?1, ?2, ?3)",
            params![name, color, created_at],
        )
        .map_err(backend)?;

        let id = InstrumentId(conn.last_insert_rowid());
        tracing::info!(instrument = %id, name, "created instrument");
        Ok(id)
    }

    fn get_instrument(&self, id: InstrumentId) -> Result<InstrumentRecord, StorageError> {
        self.connection()?
            .query_row(
                "SELECT id, name, color FROM stocks WHERE id = ?1",
                params![id.0],
                |row| {
                    Ok(InstrumentRecord {
                        id: InstrumentId(row.get(0)?),
                        name: row.get(1)?,
                        color: row.get(2)?,
                    })
                },
            )
            .optional()
            .map_err(backend)?
            .ok_or(StorageError::UnknownInstrument(id))
    }

    fn rename_instrument(
        &self,
        id: InstrumentId,
        name: &str,
    ) -> Result<InstrumentRecord, StorageError> {
        let name = validate_instrument_name(name)?;
        let changed = self
            .connection()?
            .execute("UPDATE stocks SET name = ?1 WHERE id = ?2", params![name, id.0])
            .map_err(backend)?;
        if changed == 0 {
            return Err(StorageError::UnknownInstrument(id));
        }

        tracing::info!(instrument = %id, name, "renamed instrument");
        self.get_instrument(id)
    }
}
