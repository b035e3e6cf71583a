#![doc = include_str!("../README.md")]

#[cfg(test)]
mod tests;

mod consts;
pub use consts::logg_to_mass;

mod config;
pub use config::{BoundSpec, CalibrationBounds, DataSelection, FitConfig, Weighting};

mod data;
pub use data::{Filter, MemoryObject, ObjectData, PhotometricPoint, SpectrumRecord};

mod error;
pub use error::{ConfigError, GridError, SamplerError};

mod gauss;

mod grid;
pub use grid::{ArrayModelGrid, GridHandle, InterpolatedGrid, ModelGrid};

mod likelihood;
pub use likelihood::LogLikelihood;

pub mod model;
pub use model::extinction::CrossSectionTable;

mod params;
pub use params::{ParamRef, ParamRegistry};

mod prior;
pub use prior::PriorTransform;

mod fit;
pub use fit::{FitInputs, FitModel};

mod sampler;
pub use sampler::{
    Coordinator, MemorySink, NestedSampler, PosteriorRecord, RunMetadata, SampleSink, SamplerRun,
    SamplingProblem,
};

pub use ndarray;
