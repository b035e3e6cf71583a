//! Free-parameter registry: resolves the declarative [`crate::FitConfig`]
//! into an ordered parameter list with bounds, fixed values, normal priors
//! and a flat cube index.

mod binding;
mod registry;

pub use binding::ParamRef;
pub use registry::{
    DatasetSummary, FilterSummary, GridInfo, ParamRegistry, RegistryBuilder, SpectrumSummary,
};
