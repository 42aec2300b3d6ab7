use market_core::Price;
use rust_decimal::{prelude::ToPrimitive, Decimal};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::{
    generator::Generator,
    uniform::UniformGenerator,
    walk::{BoundedRandomWalk, GaussianRandomWalk},
};

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("step must be positive, got {0}")]
    NonPositiveStep(Price),
    #[error("price range is empty: low {low} is above high {high}")]
    EmptyRange { low: Price, high: Price },
    #[error("max_change must not be negative, got {0}")]
    NegativeMaxChange(Price),
    #[error("sigma must be finite and not negative, got {0}")]
    InvalidSigma(f64),
    #[error("start_value {start} is below min_value {min}")]
    StartBelowMinimum { start: Price, min: Price },
    #[error("start_value {start} is outside the admissible range {low}..={high}")]
    StartOutsideRange { start: Price, low: Price, high: Price },
    #[error("{0} must not be negative")]
    NegativePrice(&'static str),
    #[error("a span of {span} holds too many steps of {step}")]
    TooManySteps { span: Price, step: Price },
}

pub(crate) fn require_positive_step(step: Price) -> Result<(), ConfigError> {
    if step <= Decimal::ZERO {
        return Err(ConfigError::NonPositiveStep(step));
    }
    Ok(())
}

/// Number of whole `step`s in `span`, rounded up, if it fits a `u64`.
pub(crate) fn steps_in(span: Price, step: Price) -> Result<u64, ConfigError> {
    span.checked_div(step)
        .map(|steps| steps.ceil())
        .and_then(|steps| steps.to_u64())
        .ok_or(ConfigError::TooManySteps { span, step })
}

pub(crate) fn require_non_negative(name: &'static str, value: Price) -> Result<(), ConfigError> {
    if value < Decimal::ZERO {
        return Err(ConfigError::NegativePrice(name));
    }
    Ok(())
}

/// Generator selection as it appears in configuration files and env vars.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "kebab-case")]
pub enum GeneratorConfig {
    Uniform {
        low: Price,
        high: Price,
        #[serde(default = "unit_step")]
        step: Price,
        #[serde(default)]
        start_value: Option<Price>,
    },
    BoundedWalk {
        start_value: Price,
        min_value: Price,
        max_change: Price,
        #[serde(default = "cent_step")]
        step: Price,
    },
    GaussianWalk {
        start_value: Price,
        min_value: Price,
        sigma: f64,
        #[serde(default = "cent_step")]
        step: Price,
    },
}

fn unit_step() -> Price {
    Decimal::ONE
}

fn cent_step() -> Price {
    Decimal::new(1, 2)
}

impl Default for GeneratorConfig {
    fn default() -> Self {
        Self::Uniform {
            low: Decimal::ONE,
            high: Decimal::from(9),
            step: Decimal::ONE,
            start_value: None,
        }
    }
}

impl GeneratorConfig {
    pub fn build(&self) -> Result<Generator, ConfigError> {
        let generator: Generator = match *self {
            Self::Uniform {
                low,
                high,
                step,
                start_value,
            } => {
                let generator = UniformGenerator::new(low, high, step)?;
                match start_value {
                    Some(start_value) => generator.with_start_value(start_value)?.into(),
                    None => generator.into(),
                }
            }
            Self::BoundedWalk {
                start_value,
                min_value,
                max_change,
                step,
            } => BoundedRandomWalk::new(start_value, min_value, max_change, step)?.into(),
            Self::GaussianWalk {
                start_value,
                min_value,
                sigma,
                step,
            } => GaussianRandomWalk::new(start_value, min_value, sigma, step)?.into(),
        };
        Ok(generator)
    }
}
