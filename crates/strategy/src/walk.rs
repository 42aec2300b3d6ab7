use market_core::{Instrument, Price};
use rand::Rng;
use rand_distr::StandardNormal;
use rust_decimal::{
    prelude::{FromPrimitive, ToPrimitive},
    Decimal,
};

use crate::{
    config::{require_non_negative, require_positive_step, steps_in, ConfigError},
    generator::{GenerationContext, PriceGenerator},
};

fn last_price(instrument: &Instrument) -> Option<Price> {
    instrument.latest_price().map(|entry| entry.price)
}

fn validate_walk(start_value: Price, min_value: Price, step: Price) -> Result<(), ConfigError> {
    require_positive_step(step)?;
    require_non_negative("min_value", min_value)?;
    if start_value < min_value {
        return Err(ConfigError::StartBelowMinimum {
            start: start_value,
            min: min_value,
        });
    }
    Ok(())
}

/// Uniform step within `[max(min, last - max_change), last + max_change)`.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundedRandomWalk {
    start_value: Price,
    min_value: Price,
    max_change: Price,
    step: Price,
}

impl BoundedRandomWalk {
    pub fn new(
        start_value: Price,
        min_value: Price,
        max_change: Price,
        step: Price,
    ) -> Result<Self, ConfigError> {
        validate_walk(start_value, min_value, step)?;
        if max_change < Decimal::ZERO {
            return Err(ConfigError::NegativeMaxChange(max_change));
        }
        // the widest band is two max_changes, its candidates must fit a u64
        let width = max_change
            .checked_mul(Decimal::from(2))
            .ok_or(ConfigError::TooManySteps {
                span: max_change,
                step,
            })?;
        steps_in(width, step)?;

        Ok(Self {
            start_value,
            min_value,
            max_change,
            step,
        })
    }

    /// Saturates at the `Decimal` limits instead of overflowing.
    pub fn bounds(&self, last: Price) -> (Price, Price) {
        let lower = last
            .checked_sub(self.max_change)
            .unwrap_or(Decimal::MIN)
            .max(self.min_value);
        let upper = last.checked_add(self.max_change).unwrap_or(Decimal::MAX);
        (lower, upper)
    }
}

impl PriceGenerator for BoundedRandomWalk {
    fn generate(&self, instrument: &Instrument, ctx: &mut GenerationContext<'_>) -> Price {
        let Some(last) = last_price(instrument) else {
            return self.start_value;
        };

        let (lower, upper) = self.bounds(last);
        if upper <= lower {
            return lower;
        }
        let candidates = match steps_in(upper - lower, self.step) {
            Ok(0) | Err(_) => return lower,
            Ok(candidates) => candidates,
        };

        let index = ctx.rng.gen_range(0..candidates);
        Decimal::from(index)
            .checked_mul(self.step)
            .and_then(|offset| lower.checked_add(offset))
            .unwrap_or(lower)
    }
}

/// Normal step of width `sigma` around the last price, snapped to `step`.
#[derive(Debug, Clone, PartialEq)]
pub struct GaussianRandomWalk {
    start_value: Price,
    sigma: f64,
    step: Price,
    floor: Price,
}

impl GaussianRandomWalk {
    pub fn new(
        start_value: Price,
        min_value: Price,
        sigma: f64,
        step: Price,
    ) -> Result<Self, ConfigError> {
        validate_walk(start_value, min_value, step)?;
        if !sigma.is_finite() || sigma < 0.0 {
            return Err(ConfigError::InvalidSigma(sigma));
        }

        // smallest multiple of step that is >= min_value
        let floor = min_value
            .checked_div(step)
            .and_then(|steps| steps.ceil().checked_mul(step))
            .ok_or(ConfigError::TooManySteps {
                span: min_value,
                step,
            })?;

        Ok(Self {
            start_value,
            sigma,
            step,
            floor,
        })
    }

    pub fn floor(&self) -> Price {
        self.floor
    }

    fn snap(&self, sample: f64) -> Option<Price> {
        let step = self.step.to_f64()?;
        let steps = (sample / step).round();
        if !steps.is_finite() {
            return None;
        }
        Decimal::from_f64(steps)?.checked_mul(self.step)
    }
}

impl PriceGenerator for GaussianRandomWalk {
    fn generate(&self, instrument: &Instrument, ctx: &mut GenerationContext<'_>) -> Price {
        let Some(last) = last_price(instrument) else {
            return self.start_value;
        };

        let z: f64 = ctx.rng.sample(StandardNormal);
        let sample = last.to_f64().unwrap_or(0.0) + self.sigma * z;
        let snapped = self.snap(sample).unwrap_or(self.floor);

        snapped.max(self.floor)
    }
}
