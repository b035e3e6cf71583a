//! Maps the unit hypercube sampled by a nested-sampling engine to
//! physical parameter values.

use ordered_float::NotNan;

use crate::error::ConfigError;
use crate::gauss::normal_ppf;
use crate::params::ParamRegistry;

/// Prior of a single free parameter.
///
/// A normal prior takes precedence over a uniform bound when both are
/// configured for the same parameter.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum PriorKind {
    Uniform { lo: NotNan<f64>, hi: NotNan<f64> },
    Normal { mean: NotNan<f64>, sigma: NotNan<f64> },
}

impl PriorKind {
    fn transform(&self, u: f64) -> f64 {
        match self {
            Self::Uniform { lo, hi } => {
                let (lo, hi) = (lo.into_inner(), hi.into_inner());
                lo + (hi - lo) * u
            }
            Self::Normal { mean, sigma } => normal_ppf(u, mean.into_inner(), sigma.into_inner()),
        }
    }
}

/// Per-parameter prior transform, in cube order.
///
/// Pure apart from buffer reuse and `Sync`, so parallel engine workers
/// can share one instance.
#[derive(Clone, Debug)]
pub struct PriorTransform {
    kinds: Vec<PriorKind>,
}

impl PriorTransform {
    pub fn from_registry(registry: &ParamRegistry) -> Result<Self, ConfigError> {
        let normal_priors = registry.normal_priors();
        let kinds = registry
            .names()
            .iter()
            .zip(registry.bounds().iter())
            .map(|(name, bound)| {
                if let Some(&(mean, sigma)) = normal_priors.get(name) {
                    return Ok(PriorKind::Normal {
                        mean: NotNan::new(mean)
                            .map_err(|_| ConfigError::MissingPrior(name.clone()))?,
                        sigma: NotNan::new(sigma)
                            .map_err(|_| ConfigError::MissingPrior(name.clone()))?,
                    });
                }
                match *bound {
                    Some((lo, hi)) => Ok(PriorKind::Uniform {
                        lo: NotNan::new(lo).map_err(|_| ConfigError::MissingPrior(name.clone()))?,
                        hi: NotNan::new(hi).map_err(|_| ConfigError::MissingPrior(name.clone()))?,
                    }),
                    None => Err(ConfigError::MissingPrior(name.clone())),
                }
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { kinds })
    }

    pub fn ndim(&self) -> usize {
        self.kinds.len()
    }

    /// In-place variant for engines that own the sample buffer.
    pub fn transform_in_place(&self, cube: &mut [f64]) {
        for (value, kind) in cube.iter_mut().zip(self.kinds.iter()) {
            *value = kind.transform(*value);
        }
    }

    /// Owning variant for engines that hand out an immutable cube.
    pub fn transform(&self, cube: &[f64]) -> Vec<f64> {
        cube.iter()
            .zip(self.kinds.iter())
            .map(|(&u, kind)| kind.transform(u))
            .collect()
    }
}
