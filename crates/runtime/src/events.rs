use market_core::{InstrumentId, Price};
use serde::Serialize;
use time::OffsetDateTime;

/// Lifecycle and tick progress, fanned out to subscribers in the order the
/// engine produced them.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum EngineEvent {
    Started {
        #[serde(with = "time::serde::rfc3339")]
        first_tick_at: OffsetDateTime,
    },
    Stopped,
    Reloaded {
        count: usize,
    },
    TickStarted {
        tick: u64,
    },
    PricePushed {
        tick: u64,
        instrument: InstrumentId,
        price: Price,
        #[serde(with = "time::serde::rfc3339")]
        valid_after: OffsetDateTime,
    },
    PushFailed {
        tick: u64,
        instrument: InstrumentId,
        kind: &'static str,
        message: String,
    },
    /// A stale instrument could not be reloaded, so no price was generated
    /// for it this tick.
    RefreshFailed {
        tick: u64,
        instrument: InstrumentId,
        message: String,
    },
    TickCompleted {
        tick: u64,
        pushed: usize,
        failed: usize,
    },
    Rescheduled {
        tick: u64,
        #[serde(with = "time::serde::rfc3339")]
        next_tick_at: OffsetDateTime,
    },
    RescheduleSkipped {
        tick: u64,
    },
}

impl EngineEvent {
    pub fn tick(&self) -> Option<u64> {
        match self {
            Self::TickStarted { tick }
            | Self::PricePushed { tick, .. }
            | Self::PushFailed { tick, .. }
            | Self::RefreshFailed { tick, .. }
            | Self::TickCompleted { tick, .. }
            | Self::Rescheduled { tick, .. }
            | Self::RescheduleSkipped { tick } => Some(*tick),
            Self::Started { .. } | Self::Stopped | Self::Reloaded { .. } => None,
        }
    }
}
