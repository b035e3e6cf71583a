//! Log-likelihood over all included datasets, the sampling hot path.
//!
//! The value is a finite float or exactly `-inf`, never NaN: grid
//! misses, non-positive-definite covariances and ordering violations
//! all reject the sample instead of raising.

use ndarray::Array1;
use nalgebra::{Cholesky, DMatrix, DVector};

use crate::consts::logg_to_mass;
use crate::model::{DiskBindings, ForwardModel};
use crate::params::ParamRef;

const LN_TWO_PI: f64 = 1.837_877_066_409_345_5;

/// Covariance treatment of one spectrum.
pub enum CovarianceMode {
    /// Measured covariance matrix with its precomputed inverse and
    /// log-determinant.
    Supplied {
        cov: DMatrix<f64>,
        inv: DMatrix<f64>,
        ln_det: f64,
    },
    /// Squared-exponential Gaussian-process kernel with fitted
    /// correlation length (log10 um) and amplitude.
    GaussianProcess {
        corr_len: ParamRef,
        corr_amp: ParamRef,
    },
    /// Independent pixels.
    Independent,
}

/// One photometric likelihood term.
pub struct PhotTerm {
    pub model: ForwardModel,
    pub flux: f64,
    pub sigma: f64,
    pub weight: f64,
    /// Fractional per-filter or per-instrument error inflation.
    pub err_infl: Option<ParamRef>,
}

/// One spectroscopic likelihood term.
pub struct SpecTerm {
    pub model: ForwardModel,
    pub wavel: Array1<f64>,
    pub flux: Array1<f64>,
    pub sigma: Array1<f64>,
    pub cov: CovarianceMode,
    pub weight: f64,
    /// Multiplicative calibration of the observed fluxes.
    pub scaling: Option<ParamRef>,
    /// Fractional error inflation, relative to the model flux.
    pub err_infl: Option<ParamRef>,
}

/// Extra prior contribution beyond the per-parameter transform.
pub enum PriorTerm {
    /// Normal penalty on a free parameter.
    Param { index: usize, mean: f64, sigma: f64 },
    /// Normal penalty on the mass derived from surface gravity and
    /// radius.
    Mass {
        logg: ParamRef,
        radius: ParamRef,
        mean: f64,
        sigma: f64,
    },
    /// Normal penalty on the component flux ratio in one filter.
    FluxRatioNormal {
        model: ForwardModel,
        mean: f64,
        sigma: f64,
    },
    /// Hard bounds on the component flux ratio in one filter.
    FluxRatioUniform { model: ForwardModel, lo: f64, hi: f64 },
}

/// Ordering chain for blackbody disk components, anchored at the
/// atmosphere's own temperature and radius.
pub struct DiskOrdering {
    pub atm_teff: ParamRef,
    pub atm_radius: ParamRef,
    pub disks: Vec<DiskBindings>,
}

/// Aggregated log-likelihood function.
#[derive(Default)]
pub struct LogLikelihood {
    pub phot: Vec<PhotTerm>,
    pub spec: Vec<SpecTerm>,
    pub priors: Vec<PriorTerm>,
    /// `(teff, radius)` bindings per planck component; temperatures must
    /// strictly decrease and radii strictly increase along the list.
    pub planck_ordering: Vec<(ParamRef, ParamRef)>,
    pub disk_ordering: Option<DiskOrdering>,
}

impl LogLikelihood {
    /// The hot path: log-likelihood of one bound sample vector.
    pub fn ln_like(&self, cube: &[f64]) -> f64 {
        if !self.orderings_hold(cube) {
            return f64::NEG_INFINITY;
        }

        let mut total = 0.0;
        for prior in &self.priors {
            match self.prior_term(prior, cube) {
                Some(term) => total += term,
                None => return f64::NEG_INFINITY,
            }
        }
        for term in &self.phot {
            match self.phot_term(term, cube) {
                Some(contribution) => total += contribution,
                None => return f64::NEG_INFINITY,
            }
        }
        for term in &self.spec {
            match self.spec_term(term, cube) {
                Some(contribution) => total += contribution,
                None => return f64::NEG_INFINITY,
            }
        }

        if total.is_nan() {
            f64::NEG_INFINITY
        } else {
            total
        }
    }

    fn orderings_hold(&self, cube: &[f64]) -> bool {
        for pair in self.planck_ordering.windows(2) {
            let (hot_teff, inner_radius) = (pair[0].0.value(cube), pair[0].1.value(cube));
            let (cool_teff, outer_radius) = (pair[1].0.value(cube), pair[1].1.value(cube));
            if cool_teff > hot_teff || inner_radius > outer_radius {
                return false;
            }
        }
        if let Some(ordering) = &self.disk_ordering {
            let mut prev_teff = ordering.atm_teff.value(cube);
            let mut prev_radius = ordering.atm_radius.value(cube);
            for disk in &ordering.disks {
                let teff = disk.teff.value(cube);
                let radius = disk.radius.value(cube);
                if teff > prev_teff || radius < prev_radius {
                    return false;
                }
                prev_teff = teff;
                prev_radius = radius;
            }
        }
        true
    }

    fn prior_term(&self, prior: &PriorTerm, cube: &[f64]) -> Option<f64> {
        match prior {
            PriorTerm::Param { index, mean, sigma } => {
                let x = cube[*index];
                Some(-0.5 * ((x - mean) / sigma).powi(2))
            }
            PriorTerm::Mass {
                logg,
                radius,
                mean,
                sigma,
            } => {
                let mass = logg_to_mass(logg.value(cube), radius.value(cube));
                Some(-0.5 * ((mass - mean) / sigma).powi(2))
            }
            PriorTerm::FluxRatioNormal { model, mean, sigma } => {
                let ratio = self.flux_ratio(model, cube)?;
                Some(-0.5 * ((ratio - mean) / sigma).powi(2))
            }
            PriorTerm::FluxRatioUniform { model, lo, hi } => {
                let ratio = self.flux_ratio(model, cube)?;
                if ratio < *lo || ratio > *hi {
                    None
                } else {
                    Some(0.0)
                }
            }
        }
    }

    fn flux_ratio(&self, model: &ForwardModel, cube: &[f64]) -> Option<f64> {
        let primary = model.component_photometric_flux(0, cube).ok()?;
        let secondary = model.component_photometric_flux(1, cube).ok()?;
        Some(secondary / primary)
    }

    fn phot_term(&self, term: &PhotTerm, cube: &[f64]) -> Option<f64> {
        let model_flux = term.model.photometric_flux(cube).ok()?;
        let mut var = term.sigma * term.sigma;
        if let Some(inflation) = &term.err_infl {
            let e = inflation.value(cube);
            var *= 1.0 + e * e;
        }
        let residual = term.flux - model_flux;
        Some(term.weight * (-0.5 * residual * residual / var - 0.5 * (LN_TWO_PI + f64::ln(var))))
    }

    fn spec_term(&self, term: &SpecTerm, cube: &[f64]) -> Option<f64> {
        let model_flux = term.model.spectral_flux(cube).ok()?;
        let scaling = term.scaling.map_or(1.0, |s| s.value(cube));
        let inflation = term.err_infl.map(|e| e.value(cube));

        match &term.cov {
            CovarianceMode::Independent => {
                let mut sum = 0.0;
                for i in 0..term.flux.len() {
                    let model = model_flux[i];
                    if model.is_nan() {
                        continue;
                    }
                    let data = scaling * term.flux[i];
                    let sigma = term.sigma[i];
                    let mut var = sigma * sigma;
                    if let Some(e) = inflation {
                        var += (e * model) * (e * model);
                    }
                    let residual = data - model;
                    sum += -0.5 * residual * residual / var - 0.5 * (LN_TWO_PI + f64::ln(var));
                }
                Some(term.weight * sum)
            }
            CovarianceMode::Supplied { cov, inv, ln_det } => {
                let n = term.flux.len();
                let residual = DVector::from_fn(n, |i, _| {
                    let model = model_flux[i];
                    if model.is_nan() {
                        0.0
                    } else {
                        scaling * term.flux[i] - model
                    }
                });
                if let Some(e) = inflation {
                    // rescale the covariance for the inflated variances
                    let ratio = DVector::from_fn(n, |i, _| {
                        let sigma = term.sigma[i];
                        let model = if model_flux[i].is_nan() { 0.0 } else { model_flux[i] };
                        f64::sqrt(sigma * sigma + (e * model) * (e * model)) / sigma
                    });
                    let mut inflated = cov.clone();
                    for i in 0..n {
                        for j in 0..n {
                            inflated[(i, j)] *= ratio[i] * ratio[j];
                        }
                    }
                    let chol = Cholesky::new(inflated)?;
                    let quad = residual.dot(&chol.solve(&residual));
                    let ln_det = 2.0 * (0..n).map(|i| f64::ln(chol.l_dirty()[(i, i)])).sum::<f64>();
                    Some(term.weight * (-0.5 * quad - 0.5 * (ln_det + n as f64 * LN_TWO_PI)))
                } else {
                    let quad = residual.dot(&(inv * &residual));
                    Some(term.weight * (-0.5 * quad - 0.5 * (ln_det + n as f64 * LN_TWO_PI)))
                }
            }
            CovarianceMode::GaussianProcess { corr_len, corr_amp } => {
                let n = term.flux.len();
                let length = 10f64.powf(corr_len.value(cube));
                let amp = corr_amp.value(cube);
                let amp2 = amp * amp;
                let sigma = DVector::from_fn(n, |i, _| {
                    let s = term.sigma[i];
                    match inflation {
                        Some(e) if !model_flux[i].is_nan() => {
                            f64::sqrt(s * s + (e * model_flux[i]) * (e * model_flux[i]))
                        }
                        _ => s,
                    }
                });
                let mut kernel = DMatrix::zeros(n, n);
                for i in 0..n {
                    for j in 0..=i {
                        let dl = term.wavel[i] - term.wavel[j];
                        let mut k = amp2 * sigma[i] * sigma[j]
                            * f64::exp(-0.5 * dl * dl / (length * length));
                        if i == j {
                            k += (1.0 - amp2) * sigma[i] * sigma[i];
                        }
                        kernel[(i, j)] = k;
                        kernel[(j, i)] = k;
                    }
                }
                let residual = DVector::from_fn(n, |i, _| {
                    let model = model_flux[i];
                    if model.is_nan() {
                        0.0
                    } else {
                        scaling * term.flux[i] - model
                    }
                });
                let chol = Cholesky::new(kernel)?;
                let quad = residual.dot(&chol.solve(&residual));
                let ln_det = 2.0 * (0..n).map(|i| f64::ln(chol.l_dirty()[(i, i)])).sum::<f64>();
                Some(term.weight * (-0.5 * quad - 0.5 * (ln_det + n as f64 * LN_TWO_PI)))
            }
        }
    }
}
