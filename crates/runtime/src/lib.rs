pub mod engine;
pub mod events;
pub mod handle;
pub mod metrics;

pub use engine::{EngineConfig, MarketEngine, DEFAULT_INTERVAL, DEFAULT_START_DELAY};
pub use events::EngineEvent;
pub use handle::{EngineError, EngineHandle, EngineStatus, TickLatency};
pub use metrics::{LatencyPercentiles, TickLatencyMetrics};
