//! Boundary to external nested-sampling engines and posterior storage.
//!
//! The core hands an engine exactly two callables, the prior transform
//! and the log-likelihood, plus the dimensionality. Everything about the
//! sampling algorithm itself, parallel workers and checkpointing lives
//! behind the [`NestedSampler`] trait.

use std::collections::BTreeMap;

use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};

use crate::error::SamplerError;
use crate::likelihood::LogLikelihood;
use crate::prior::PriorTransform;

/// The fit as seen by a sampling engine.
pub struct SamplingProblem<'a> {
    likelihood: &'a LogLikelihood,
    transform: &'a PriorTransform,
    names: &'a [String],
}

impl<'a> SamplingProblem<'a> {
    pub(crate) fn new(
        likelihood: &'a LogLikelihood,
        transform: &'a PriorTransform,
        names: &'a [String],
    ) -> Self {
        Self {
            likelihood,
            transform,
            names,
        }
    }

    pub fn ndim(&self) -> usize {
        self.transform.ndim()
    }

    pub fn names(&self) -> &[String] {
        self.names
    }

    /// Unit cube to physical parameters.
    pub fn prior_transform(&self, cube: &[f64]) -> Vec<f64> {
        self.transform.transform(cube)
    }

    /// In-place variant for engines that own the buffer.
    pub fn prior_transform_in_place(&self, cube: &mut [f64]) {
        self.transform.transform_in_place(cube);
    }

    /// Log-likelihood of a physical parameter vector; finite or `-inf`.
    pub fn ln_like(&self, params: &[f64]) -> f64 {
        self.likelihood.ln_like(params)
    }
}

/// Raw output of a sampling engine.
#[derive(Clone, Debug)]
pub struct SamplerRun {
    /// Equally weighted posterior samples, one row per sample.
    pub samples: Array2<f64>,
    /// Log-likelihood per sample row.
    pub ln_prob: Array1<f64>,
    /// Log-evidence and its uncertainty.
    pub ln_z: f64,
    pub ln_z_error: f64,
}

/// External nested-sampling engine.
pub trait NestedSampler {
    /// Engine name stored alongside the posterior.
    fn name(&self) -> &str;

    fn run(&self, problem: &SamplingProblem<'_>) -> Result<SamplerRun, SamplerError>;
}

/// Role of this process in a multi-process run. Only the leader talks
/// to the sample sink; workers compute likelihoods for the engine.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Coordinator {
    Leader,
    Worker,
}

impl Coordinator {
    pub fn is_leader(&self) -> bool {
        matches!(self, Self::Leader)
    }
}

/// Run-level metadata stored with the posterior.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct RunMetadata {
    pub model: String,
    pub ln_evidence: f64,
    pub ln_evidence_error: f64,
    pub parallax: (f64, f64),
    pub binary: bool,
    pub ext_filter: Option<String>,
}

/// Complete posterior of one sampling run, as handed to the sink.
///
/// Fixed parameters are appended as constant columns, so `samples` has
/// one column per name in `names`.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PosteriorRecord {
    pub tag: String,
    pub sampler: String,
    pub samples: Array2<f64>,
    pub ln_prob: Array1<f64>,
    pub names: Vec<String>,
    pub bounds: BTreeMap<String, (f64, f64)>,
    pub normal_priors: BTreeMap<String, (f64, f64)>,
    pub fixed_params: Vec<(String, f64)>,
    /// Names of the per-spectrum calibration scaling parameters.
    pub spec_labels: Vec<String>,
    /// Maximum-likelihood sample.
    pub best: Vec<f64>,
    pub metadata: RunMetadata,
}

/// Posterior storage collaborator.
pub trait SampleSink {
    fn store(&mut self, record: &PosteriorRecord) -> Result<(), SamplerError>;
}

/// In-memory sink, mostly for tests and interactive use.
#[derive(Clone, Debug, Default)]
pub struct MemorySink {
    pub records: Vec<PosteriorRecord>,
}

impl SampleSink for MemorySink {
    fn store(&mut self, record: &PosteriorRecord) -> Result<(), SamplerError> {
        self.records.push(record.clone());
        Ok(())
    }
}
