mod clock;
mod instrument;
mod memory;
mod price;
mod store;

pub use clock::{Clock, ManualClock, SystemClock};
pub use instrument::{
    Instrument, ListenerError, PushError, PushListener, PushListeners, PushOutcome, RefreshError,
    DEFAULT_HISTORY_WINDOW,
};
pub use memory::MemoryPriceStore;
pub use price::{InstrumentId, Price, PriceEntry};
pub use store::{
    validate_instrument_name, InstrumentCatalog, InstrumentRecord, PriceStore, StorageError,
};
