use std::{fmt, sync::Arc};

use thiserror::Error;
use time::OffsetDateTime;

use crate::{
    price::{InstrumentId, Price, PriceEntry},
    store::{PriceStore, StorageError},
};

pub const DEFAULT_HISTORY_WINDOW: usize = 10;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("unable to refresh instrument {id} from storage")]
pub struct RefreshError {
    pub id: InstrumentId,
    #[source]
    pub source: StorageError,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PushError {
    #[error("unable to write new price for instrument {id}")]
    WriteFailed {
        id: InstrumentId,
        #[source]
        source: StorageError,
    },
    /// The price reached storage but the local window could not be reloaded.
    #[error("price for instrument {id} was stored but the local window is stale")]
    RefreshFailed {
        id: InstrumentId,
        #[source]
        source: RefreshError,
    },
}

impl PushError {
    pub fn instrument(&self) -> InstrumentId {
        match self {
            Self::WriteFailed { id, .. } | Self::RefreshFailed { id, .. } => *id,
        }
    }

    pub fn landed(&self) -> bool {
        matches!(self, Self::RefreshFailed { .. })
    }

    pub fn kind(&self) -> &'static str {
        match self {
            Self::WriteFailed { .. } => "write-failed",
            Self::RefreshFailed { .. } => "refresh-failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("push listener failed: {0}")]
pub struct ListenerError(pub String);

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self(message.into())
    }
}

pub trait PushListener: Send + Sync {
    fn on_push(
        &self,
        instrument: &Instrument,
        price: Price,
        valid_after: OffsetDateTime,
    ) -> Result<(), ListenerError>;
}

/// Ordered set of listeners shared by every instrument the engine tracks.
#[derive(Clone, Default)]
pub struct PushListeners {
    listeners: Vec<Arc<dyn PushListener>>,
}

impl PushListeners {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, listener: Arc<dyn PushListener>) {
        self.listeners.push(listener);
    }

    pub fn len(&self) -> usize {
        self.listeners.len()
    }

    pub fn is_empty(&self) -> bool {
        self.listeners.is_empty()
    }

    fn notify(&self, instrument: &Instrument, price: Price, valid_after: OffsetDateTime) -> usize {
        let mut failures = 0;
        for (position, listener) in self.listeners.iter().enumerate() {
            if let Err(err) = listener.on_push(instrument, price, valid_after) {
                failures += 1;
                tracing::warn!(
                    instrument = %instrument.id(),
                    listener = position,
                    error = %err,
                    "push listener failed"
                );
            }
        }
        failures
    }
}

impl fmt::Debug for PushListeners {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PushListeners")
            .field("len", &self.listeners.len())
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PushOutcome {
    pub entry: PriceEntry,
    pub listener_failures: usize,
}

/// In-memory projection of one instrument's recent prices.
#[derive(Debug, Clone)]
pub struct Instrument {
    id: InstrumentId,
    history_window: usize,
    prices: Vec<PriceEntry>,
    listeners: PushListeners,
    stale: bool,
}

impl Instrument {
    pub fn new(id: InstrumentId, history_window: usize, listeners: PushListeners) -> Self {
        Self {
            id,
            history_window: history_window.max(1),
            prices: Vec::new(),
            listeners,
            stale: true,
        }
    }

    pub fn load(
        id: InstrumentId,
        store: &dyn PriceStore,
        history_window: usize,
        listeners: PushListeners,
    ) -> Result<Self, RefreshError> {
        let mut instrument = Self::new(id, history_window, listeners);
        instrument.refresh(store)?;
        Ok(instrument)
    }

    pub fn id(&self) -> InstrumentId {
        self.id
    }

    pub fn history_window(&self) -> usize {
        self.history_window
    }

    /// Ascending by `valid_after`.
    pub fn prices(&self) -> &[PriceEntry] {
        &self.prices
    }

    pub fn latest_price(&self) -> Option<&PriceEntry> {
        self.prices.last()
    }

    pub fn current_at(&self, now: OffsetDateTime) -> Option<&PriceEntry> {
        self.prices.iter().rev().find(|entry| entry.is_current_at(now))
    }

    pub fn preview_at(&self, now: OffsetDateTime) -> Option<&PriceEntry> {
        self.prices.iter().find(|entry| entry.is_preview_at(now))
    }

    /// True until the first successful refresh and after any failed one. A
    /// stale window must not be used to derive the next price.
    pub fn is_stale(&self) -> bool {
        self.stale
    }

    pub fn listeners_mut(&mut self) -> &mut PushListeners {
        &mut self.listeners
    }

    /// Reloads the price window. On failure the window is left empty and the
    /// instrument stays stale until a later refresh succeeds.
    pub fn refresh(&mut self, store: &dyn PriceStore) -> Result<(), RefreshError> {
        self.prices.clear();
        self.stale = true;

        let history = store
            .read_history(self.id, self.history_window)
            .map_err(|source| RefreshError {
                id: self.id,
                source,
            })?;
        let future = store
            .read_future(self.id, self.history_window)
            .map_err(|source| RefreshError {
                id: self.id,
                source,
            })?;

        let mut prices: Vec<PriceEntry> = history.into_iter().rev().chain(future).collect();
        prices.sort_by_key(|entry| entry.valid_after);
        prices.dedup_by_key(|entry| entry.valid_after);
        let excess = prices.len().saturating_sub(self.history_window);
        prices.drain(..excess);

        self.prices = prices;
        self.stale = false;
        Ok(())
    }

    pub fn push(
        &mut self,
        store: &dyn PriceStore,
        price: Price,
        valid_after: OffsetDateTime,
    ) -> Result<PushOutcome, PushError> {
        store
            .write_price(self.id, valid_after, price)
            .map_err(|source| PushError::WriteFailed {
                id: self.id,
                source,
            })?;
        self.refresh(store)
            .map_err(|source| PushError::RefreshFailed {
                id: self.id,
                source,
            })?;

        let listener_failures = self.listeners.notify(&*self, price, valid_after);
        Ok(PushOutcome {
            entry: PriceEntry::new(price, valid_after),
            listener_failures,
        })
    }
}
