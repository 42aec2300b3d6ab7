pub mod config;
pub mod generator;
pub mod uniform;
pub mod walk;

pub use config::{ConfigError, GeneratorConfig};
pub use generator::{GenerationContext, Generator, PriceGenerator};
pub use uniform::UniformGenerator;
pub use walk::{BoundedRandomWalk, GaussianRandomWalk};
