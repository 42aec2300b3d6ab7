use std::fmt;

use market_core::{Instrument, Price};
use rand::RngCore;
use time::OffsetDateTime;

use crate::{
    uniform::UniformGenerator,
    walk::{BoundedRandomWalk, GaussianRandomWalk},
};

/// Per-instrument inputs for one generation step.
pub struct GenerationContext<'a> {
    pub now: OffsetDateTime,
    pub valid_after: OffsetDateTime,
    pub rng: &'a mut dyn RngCore,
}

impl<'a> GenerationContext<'a> {
    pub fn new(now: OffsetDateTime, valid_after: OffsetDateTime, rng: &'a mut dyn RngCore) -> Self {
        Self {
            now,
            valid_after,
            rng,
        }
    }
}

impl fmt::Debug for GenerationContext<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("GenerationContext")
            .field("now", &self.now)
            .field("valid_after", &self.valid_after)
            .finish_non_exhaustive()
    }
}

/// Computes the next price of an instrument. Reads the instrument, never
/// mutates it, never touches storage.
pub trait PriceGenerator: Send + Sync + fmt::Debug {
    fn generate(&self, instrument: &Instrument, ctx: &mut GenerationContext<'_>) -> Price;
}

#[derive(Debug, Clone, PartialEq)]
pub enum Generator {
    Uniform(UniformGenerator),
    BoundedWalk(BoundedRandomWalk),
    GaussianWalk(GaussianRandomWalk),
}

impl Generator {
    pub fn name(&self) -> &'static str {
        match self {
            Self::Uniform(_) => "uniform",
            Self::BoundedWalk(_) => "bounded-walk",
            Self::GaussianWalk(_) => "gaussian-walk",
        }
    }
}

impl PriceGenerator for Generator {
    fn generate(&self, instrument: &Instrument, ctx: &mut GenerationContext<'_>) -> Price {
        match self {
            Self::Uniform(generator) => generator.generate(instrument, ctx),
            Self::BoundedWalk(generator) => generator.generate(instrument, ctx),
            Self::GaussianWalk(generator) => generator.generate(instrument, ctx),
        }
    }
}

impl From<UniformGenerator> for Generator {
    fn from(generator: UniformGenerator) -> Self {
        Self::Uniform(generator)
    }
}

impl From<BoundedRandomWalk> for Generator {
    fn from(generator: BoundedRandomWalk) -> Self {
        Self::BoundedWalk(generator)
    }
}

impl From<GaussianRandomWalk> for Generator {
    fn from(generator: GaussianRandomWalk) -> Self {
        Self::GaussianWalk(generator)
    }
}
