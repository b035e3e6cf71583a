//! User-facing fit configuration.
//!
//! The configuration is declarative: it names the model grid, the prior
//! bounds, the datasets to include, and the optional nuisance parameters.
//! [`crate::ParamRegistry`] resolves it into a flat cube layout.

use std::collections::BTreeMap;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Prior bound for a single parameter.
///
/// `Pair` bounds switch the fit into binary mode: the parameter is split
/// into `_0`/`_1` components, one per co-added atmosphere. A `None`
/// component adopts the grid extent. `Components` bounds describe lists of
/// blackbody components (`disk_teff`, `disk_radius`, or `teff`/`radius`
/// with the `planck` model).
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub enum BoundSpec {
    /// Uniform prior between the two values; equal values fix the parameter.
    Range(f64, f64),
    /// Adopt the extent of the model grid.
    Grid,
    /// Two-component bound for a binary (or asymmetric single) object.
    Pair(Option<(f64, f64)>, Option<(f64, f64)>),
    /// One bound per blackbody component.
    Components(Vec<(f64, f64)>),
}

impl BoundSpec {
    pub fn is_pair(&self) -> bool {
        matches!(self, Self::Pair(_, _))
    }

    /// The plain range, if this is a `Range` bound.
    pub fn as_range(&self) -> Option<(f64, f64)> {
        match self {
            Self::Range(lo, hi) => Some((*lo, *hi)),
            _ => None,
        }
    }
}

/// Per-spectrum calibration bounds: a multiplicative flux scaling and a
/// relative inflation of the uncertainties. Either can be left out.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct CalibrationBounds {
    pub scaling: Option<(f64, f64)>,
    pub error: Option<(f64, f64)>,
}

/// Which of the stored datasets take part in the fit.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub enum DataSelection {
    #[default]
    All,
    None,
    Named(Vec<String>),
}

impl DataSelection {
    /// Filter the available dataset names, preserving their stored order.
    pub fn select<'a>(&self, available: impl Iterator<Item = &'a str>) -> Vec<String> {
        match self {
            Self::All => available.map(Into::into).collect(),
            Self::None => Vec::new(),
            Self::Named(names) => available
                .filter(|item| names.iter().any(|name| name == item))
                .map(Into::into)
                .collect(),
        }
    }

    pub fn is_none(&self) -> bool {
        matches!(self, Self::None)
    }
}

/// Relative weighting of the per-dataset log-likelihood terms.
///
/// `Auto` weights photometry by the filter FWHM and spectra by the local
/// wavelength spacing `lambda / R`, which balances few-point photometry
/// against spectra with many pixels.
#[derive(Clone, Debug, Default, Serialize, Deserialize, JsonSchema, PartialEq)]
pub enum Weighting {
    #[default]
    Off,
    Auto,
    Explicit(BTreeMap<String, f64>),
}

/// Full configuration of a model fit.
#[derive(Clone, Debug, Serialize, Deserialize, JsonSchema, PartialEq)]
pub struct FitConfig {
    /// Atmospheric model tag, or the special families `planck` / `powerlaw`.
    pub model: String,
    /// Uniform or log-uniform prior bounds per parameter name.
    pub bounds: BTreeMap<String, BoundSpec>,
    /// Normal priors as (mean, sigma) per parameter name. Accepts the
    /// derived `mass` parameter and `ratio_<filter>` flux ratios.
    pub normal_priors: BTreeMap<String, (f64, f64)>,
    /// Calibration bounds keyed by spectrum name.
    pub calibration: BTreeMap<String, CalibrationBounds>,
    /// Photometric filters to include.
    pub inc_phot: DataSelection,
    /// Spectra to include.
    pub inc_spec: DataSelection,
    /// Spectra whose covariances are modeled with a Gaussian process.
    pub fit_corr: Vec<String>,
    /// Relative weighting of the likelihood terms.
    pub weighting: Weighting,
    /// Fit the ISM extinction in this filter instead of the V band.
    pub ext_filter: Option<String>,
}

impl FitConfig {
    pub fn new(model: impl Into<String>) -> Self {
        Self {
            model: model.into(),
            bounds: BTreeMap::new(),
            normal_priors: BTreeMap::new(),
            calibration: BTreeMap::new(),
            inc_phot: DataSelection::All,
            inc_spec: DataSelection::All,
            fit_corr: Vec::new(),
            weighting: Weighting::Off,
            ext_filter: None,
        }
    }

    pub fn with_bound(mut self, name: &str, bound: BoundSpec) -> Self {
        self.bounds.insert(name.into(), bound);
        self
    }

    pub fn with_normal_prior(mut self, name: &str, mean: f64, sigma: f64) -> Self {
        self.normal_priors.insert(name.into(), (mean, sigma));
        self
    }

    pub fn is_planck(&self) -> bool {
        self.model == "planck"
    }

    pub fn is_powerlaw(&self) -> bool {
        self.model == "powerlaw"
    }

    /// Whether the model family requires a grid interpolation.
    pub fn needs_grid(&self) -> bool {
        !self.is_planck() && !self.is_powerlaw()
    }
}
