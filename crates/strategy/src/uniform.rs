use market_core::{Instrument, Price};
use rand::Rng;
use rust_decimal::{prelude::ToPrimitive, Decimal};

use crate::{
    config::{require_non_negative, require_positive_step, ConfigError},
    generator::{GenerationContext, PriceGenerator},
};

/// Draws uniformly from `low, low + step, ..., <= high`, ignoring history
/// once the instrument has any.
#[derive(Debug, Clone, PartialEq)]
pub struct UniformGenerator {
    low: Price,
    high: Price,
    step: Price,
    start_value: Price,
    admissible_count: u64,
}

impl UniformGenerator {
    pub fn new(low: Price, high: Price, step: Price) -> Result<Self, ConfigError> {
        require_positive_step(step)?;
        require_non_negative("low", low)?;
        if high < low {
            return Err(ConfigError::EmptyRange { low, high });
        }

        let span = high - low;
        let admissible_count = span
            .checked_div(step)
            .map(|steps| steps.floor())
            .and_then(|steps| steps.to_u64())
            .and_then(|steps| steps.checked_add(1))
            .ok_or(ConfigError::TooManySteps { span, step })?;

        Ok(Self {
            low,
            high,
            step,
            start_value: low,
            admissible_count,
        })
    }

    pub fn with_start_value(mut self, start_value: Price) -> Result<Self, ConfigError> {
        if start_value < self.low || start_value > self.high {
            return Err(ConfigError::StartOutsideRange {
                start: start_value,
                low: self.low,
                high: self.high,
            });
        }
        self.start_value = start_value;
        Ok(self)
    }

    pub fn start_value(&self) -> Price {
        self.start_value
    }

    pub fn admissible_count(&self) -> u64 {
        self.admissible_count
    }
}

impl PriceGenerator for UniformGenerator {
    fn generate(&self, instrument: &Instrument, ctx: &mut GenerationContext<'_>) -> Price {
        if instrument.latest_price().is_none() {
            return self.start_value;
        }

        let index = ctx.rng.gen_range(0..self.admissible_count);
        // bounded by high - low at construction
        Decimal::from(index)
            .checked_mul(self.step)
            .and_then(|offset| self.low.checked_add(offset))
            .unwrap_or(self.low)
    }
}
