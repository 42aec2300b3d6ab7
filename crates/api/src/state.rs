use std::sync::Arc;

use market_core::{
    Instrument, InstrumentCatalog, InstrumentId, ListenerError, Price, PriceStore, PushListener,
};
use runtime::{EngineError, EngineHandle};
use serde::Serialize;
use time::OffsetDateTime;
use tokio::sync::broadcast;

const PRICE_EVENT_CAPACITY: usize = 256;

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PriceEvent {
    pub instrument: InstrumentId,
    pub price: Price,
    #[serde(with = "time::serde::rfc3339")]
    pub valid_after: OffsetDateTime,
}

#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum SocketMessage {
    Connected { running: bool, tracked: usize },
    Price(PriceEvent),
}

/// Forwards every push into the websocket fan-out channel.
#[derive(Clone, Debug)]
pub struct PriceBroadcaster {
    events_tx: broadcast::Sender<PriceEvent>,
}

impl PushListener for PriceBroadcaster {
    fn on_push(
        &self,
        instrument: &Instrument,
        price: Price,
        valid_after: OffsetDateTime,
    ) -> Result<(), ListenerError> {
        // no open sockets is not a failure
        let _ = self.events_tx.send(PriceEvent {
            instrument: instrument.id(),
            price,
            valid_after,
        });
        Ok(())
    }
}

#[derive(Clone)]
pub struct AppState {
    engine: EngineHandle,
    prices: Arc<dyn PriceStore>,
    catalog: Arc<dyn InstrumentCatalog>,
    events_tx: broadcast::Sender<PriceEvent>,
}

impl AppState {
    pub fn new(
        engine: EngineHandle,
        prices: Arc<dyn PriceStore>,
        catalog: Arc<dyn InstrumentCatalog>,
    ) -> Self {
        let (events_tx, _) = broadcast::channel(PRICE_EVENT_CAPACITY);
        Self {
            engine,
            prices,
            catalog,
            events_tx,
        }
    }

    /// Builds the state and registers its broadcaster with the engine so
    /// every push reaches connected sockets.
    pub async fn connect(
        engine: EngineHandle,
        prices: Arc<dyn PriceStore>,
        catalog: Arc<dyn InstrumentCatalog>,
    ) -> Result<Self, EngineError> {
        let state = Self::new(engine, prices, catalog);
        state.engine.add_listener(Arc::new(state.broadcaster())).await?;
        Ok(state)
    }

    pub fn broadcaster(&self) -> PriceBroadcaster {
        PriceBroadcaster {
            events_tx: self.events_tx.clone(),
        }
    }

    pub fn engine(&self) -> &EngineHandle {
        &self.engine
    }

    pub fn prices(&self) -> &dyn PriceStore {
        self.prices.as_ref()
    }

    pub fn catalog(&self) -> &dyn InstrumentCatalog {
        self.catalog.as_ref()
    }

    pub fn subscribe_prices(&self) -> broadcast::Receiver<PriceEvent> {
        self.events_tx.subscribe()
    }
}

impl std::fmt::Debug for AppState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppState")
            .field("engine", &self.engine)
            .field("subscribers", &self.events_tx.receiver_count())
            .finish_non_exhaustive()
    }
}
