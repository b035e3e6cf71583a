//! Forward model: atmosphere grid plus blackbody disks, extinction,
//! flux scaling and observational degradation.

pub mod broaden;
pub mod evaluator;
pub mod extinction;
pub mod planck;

pub use evaluator::{
    BinaryCombine, Component, DatasetShape, DiskBindings, FluxScaling, ForwardModel, ModelFamily,
};
