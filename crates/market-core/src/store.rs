use serde::{Deserialize, Serialize};
use thiserror::Error;
use time::OffsetDateTime;

use crate::price::{InstrumentId, Price, PriceEntry};

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StorageError {
    #[error("unknown instrument {0}")]
    UnknownInstrument(InstrumentId),
    #[error("not found: {0}")]
    NotFound(String),
    /// A stored value could not be decoded.
    #[error("bad value for {column}: {value}")]
    BadValue { column: String, value: String },
    #[error("invalid instrument name {0:?}")]
    InvalidName(String),
    #[error("conflicting write: {0}")]
    Conflict(String),
    #[error("storage backend failure: {0}")]
    Backend(String),
}

impl StorageError {
    pub fn bad_value(column: impl Into<String>, value: impl Into<String>) -> Self {
        Self::BadValue {
            column: column.into(),
            value: value.into(),
        }
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::UnknownInstrument(_) => "unknown-instrument",
            Self::NotFound(_) => "not-found",
            Self::BadValue { .. } => "bad-value",
            Self::InvalidName(_) => "invalid-name",
            Self::Conflict(_) => "conflict",
            Self::Backend(_) => "backend",
        }
    }
}

/// Persistent price series, keyed by `(instrument, valid_after)`.
///
/// "Now" for the current/history/future split is the store's own clock, the
/// same way a database would compare against its `UTC_TIMESTAMP()`.
pub trait PriceStore: Send + Sync {
    fn read_current(&self, id: InstrumentId) -> Result<Option<PriceEntry>, StorageError>;

    /// Entries with `valid_after <= now`, most recent first.
    fn read_history(&self, id: InstrumentId, limit: usize)
        -> Result<Vec<PriceEntry>, StorageError>;

    /// Entries with `valid_after > now`, soonest first.
    fn read_future(&self, id: InstrumentId, limit: usize) -> Result<Vec<PriceEntry>, StorageError>;

    /// Inserts a new entry. Never overwrites an existing `(id, valid_after)`.
    fn write_price(
        &self,
        id: InstrumentId,
        valid_after: OffsetDateTime,
        price: Price,
    ) -> Result<(), StorageError>;

    /// Ids in ascending order.
    fn list_instrument_ids(&self) -> Result<Vec<InstrumentId>, StorageError>;
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InstrumentRecord {
    pub id: InstrumentId,
    pub name: String,
    pub color: Option<String>,
}

pub trait InstrumentCatalog: Send + Sync {
    fn list_instruments(&self) -> Result<Vec<InstrumentRecord>, StorageError>;

    fn create_instrument(
        &self,
        name: &str,
        color: Option<&str>,
    ) -> Result<InstrumentId, StorageError>;

    fn get_instrument(&self, id: InstrumentId) -> Result<InstrumentRecord, StorageError>;

    /// Renames an existing instrument and returns the updated record.
    fn rename_instrument(
        &self,
        id: InstrumentId,
        name: &str,
    ) -> Result<InstrumentRecord, StorageError>;
}

pub fn validate_instrument_name(name: &str) -> Result<&str, StorageError> {
    let trimmed = name.trim();
    if trimmed.is_empty() {
        return Err(StorageError::InvalidName(name.to_owned()));
    }
    Ok(trimmed)
}
