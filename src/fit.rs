//! Wires configuration, data and model grid into a runnable fit.
//!
//! [`FitModel::new`] performs every expensive, fallible step up front:
//! data selection, registry construction, per-dataset grid interpolation
//! and likelihood-term assembly. Afterwards the model is immutable and
//! the likelihood is safe to evaluate from parallel engine workers.

use std::sync::Arc;

use itertools::Itertools;
use log::{info, warn};
use nalgebra::{Cholesky, DMatrix};
use ndarray::{s, Array1, Array2};

use crate::config::{FitConfig, Weighting};
use crate::data::{Filter, ObjectData, PhotometricPoint, SpectrumRecord};
use crate::error::{ConfigError, SamplerError};
use crate::grid::ModelGrid;
use crate::likelihood::{CovarianceMode, LogLikelihood, PhotTerm, PriorTerm, SpecTerm};
use crate::model::broaden::create_wavelengths;
use crate::model::extinction::{
    CrossSectionTable, ExtinctionLaw, IsmExtinction, LogNormalGrains, NoExtinction, PowerLawGrains,
};
use crate::model::{
    BinaryCombine, Component, DatasetShape, DiskBindings, FluxScaling, ForwardModel, ModelFamily,
};
use crate::params::{
    DatasetSummary, FilterSummary, GridInfo, ParamRef, ParamRegistry, RegistryBuilder,
    SpectrumSummary,
};
use crate::prior::PriorTransform;
use crate::sampler::{
    Coordinator, NestedSampler, PosteriorRecord, RunMetadata, SampleSink, SamplingProblem,
};

/// Sampling density of analytic model spectra, points per resolution
/// element relative to the dataset resolution.
const ANALYTIC_OVERSAMPLING: f64 = 4.0;
const MIN_ANALYTIC_RESOLUTION: f64 = 500.0;

/// Relative padding of the model wavelength window around a dataset.
const WINDOW_PADDING: f64 = 0.1;

/// Collaborators of one fit.
pub struct FitInputs<'a> {
    pub object: &'a dyn ObjectData,
    pub grid: Option<&'a dyn ModelGrid>,
    /// Cross-sections for the log-normal grain extinction model.
    pub lognorm_dust: Option<Arc<CrossSectionTable>>,
    /// Cross-sections for the power-law grain extinction model.
    pub powerlaw_dust: Option<Arc<CrossSectionTable>>,
    /// Filter profiles beyond the object's own photometry, for
    /// flux-ratio priors and `ext_filter`.
    pub extra_filters: Vec<Filter>,
}

impl<'a> FitInputs<'a> {
    pub fn new(object: &'a dyn ObjectData, grid: Option<&'a dyn ModelGrid>) -> Self {
        Self {
            object,
            grid,
            lognorm_dust: None,
            powerlaw_dust: None,
            extra_filters: Vec::new(),
        }
    }
}

/// A fully assembled fit: registry, prior transform and likelihood.
pub struct FitModel {
    config: FitConfig,
    registry: ParamRegistry,
    transform: PriorTransform,
    likelihood: LogLikelihood,
    parallax: (f64, f64),
    object_name: String,
}

impl FitModel {
    pub fn new(config: FitConfig, inputs: FitInputs<'_>) -> Result<Self, ConfigError> {
        if config.model.eq_ignore_ascii_case("bt-settl") {
            warn!("the 'bt-settl' grid name is deprecated, use 'bt-settl-cifist'");
        }

        let object = inputs.object;
        let photometry: Vec<&PhotometricPoint> = {
            let names = config
                .inc_phot
                .select(object.photometry().iter().map(|p| p.filter.name()));
            object
                .photometry()
                .iter()
                .filter(|p| names.iter().any(|n| n == p.filter.name()))
                .collect()
        };
        let mut spectra: Vec<&SpectrumRecord> = {
            let names = config
                .inc_spec
                .select(object.spectra().iter().map(|s| s.name.as_str()));
            object
                .spectra()
                .iter()
                .filter(|s| names.iter().any(|n| *n == s.name))
                .collect()
        };
        if config.is_powerlaw() && !spectra.is_empty() {
            warn!("spectra are ignored with the 'powerlaw' model");
            spectra.clear();
        }
        if photometry.is_empty() && spectra.is_empty() {
            return Err(ConfigError::NoDataSelected);
        }

        let summary = DatasetSummary {
            filters: photometry
                .iter()
                .map(|p| FilterSummary {
                    name: p.filter.name().into(),
                    instrument: p.filter.instrument().into(),
                })
                .collect(),
            spectra: spectra
                .iter()
                .map(|s| SpectrumSummary {
                    name: s.name.clone(),
                    has_covariance: s.covariance.is_some(),
                })
                .collect(),
        };

        let grid_info = match (config.needs_grid(), inputs.grid) {
            (true, Some(grid)) => Some(GridInfo {
                parameters: grid.parameter_names(),
                bounds: grid.bounds(),
            }),
            (true, None) => return Err(ConfigError::MissingGrid(config.model.clone())),
            (false, _) => None,
        };

        let registry =
            RegistryBuilder::new(&config, grid_info.as_ref(), &summary, object.parallax())
                .build()?;
        let transform = PriorTransform::from_registry(&registry)?;
        info!(
            "fitting {} free parameters: {}",
            registry.len(),
            registry.names().iter().join(", ")
        );

        let assembler = Assembler::new(&config, &registry, &inputs, &photometry)?;
        let mut likelihood = LogLikelihood::default();

        for point in &photometry {
            likelihood
                .phot
                .push(assembler.phot_term(point, &config.weighting)?);
        }
        for spectrum in &spectra {
            likelihood
                .spec
                .push(assembler.spec_term(spectrum, &config)?);
        }
        assembler.priors(&config, &mut likelihood)?;
        assembler.orderings(&mut likelihood);

        Ok(Self {
            config,
            registry,
            transform,
            likelihood,
            parallax: object.parallax(),
            object_name: object.name().into(),
        })
    }

    pub fn n_dim(&self) -> usize {
        self.registry.len()
    }

    pub fn names(&self) -> &[String] {
        self.registry.names()
    }

    pub fn registry(&self) -> &ParamRegistry {
        &self.registry
    }

    pub fn prior_transform(&self) -> &PriorTransform {
        &self.transform
    }

    /// Log-likelihood of a bound (physical) parameter vector.
    pub fn ln_like(&self, params: &[f64]) -> f64 {
        self.likelihood.ln_like(params)
    }

    pub fn object_name(&self) -> &str {
        &self.object_name
    }

    /// Run a nested-sampling engine and hand the posterior to the sink.
    ///
    /// Fixed parameters are appended as constant columns. Only the
    /// leader stores the record; workers return it without side effects.
    pub fn run_sampler(
        &self,
        engine: &dyn NestedSampler,
        tag: &str,
        coordinator: Coordinator,
        sink: &mut dyn SampleSink,
    ) -> Result<PosteriorRecord, SamplerError> {
        let problem = SamplingProblem::new(&self.likelihood, &self.transform, self.registry.names());
        let run = engine.run(&problem)?;

        let n_samples = run.samples.nrows();
        let n_free = self.registry.len();
        let fixed = self.registry.fixed_params();
        let mut samples = Array2::zeros((n_samples, n_free + fixed.len()));
        samples
            .slice_mut(s![.., ..n_free])
            .assign(&run.samples);
        let mut names = self.registry.names().to_vec();
        for (offset, (name, value)) in fixed.iter().enumerate() {
            samples
                .slice_mut(s![.., n_free + offset])
                .fill(*value);
            names.push(name.clone());
        }

        let best_row = run
            .ln_prob
            .iter()
            .enumerate()
            .fold((0, f64::NEG_INFINITY), |acc, (i, &lp)| {
                if lp > acc.1 { (i, lp) } else { acc }
            })
            .0;
        let best = samples.row(best_row).to_vec();
        let spec_labels = names
            .iter()
            .filter(|name| name.starts_with("scaling_"))
            .cloned()
            .collect();

        let record = PosteriorRecord {
            tag: tag.into(),
            sampler: engine.name().into(),
            ln_prob: Array1::from_iter(run.ln_prob.iter().copied()),
            samples,
            names,
            bounds: self.registry.bounds_table(),
            normal_priors: self.registry.normal_priors().clone(),
            fixed_params: self.registry.fixed_params().to_vec(),
            spec_labels,
            best,
            metadata: RunMetadata {
                model: self.config.model.clone(),
                ln_evidence: run.ln_z,
                ln_evidence_error: run.ln_z_error,
                parallax: self.parallax,
                binary: self.registry.is_binary(),
                ext_filter: self.config.ext_filter.clone(),
            },
        };
        if coordinator.is_leader() {
            sink.store(&record)?;
        }
        Ok(record)
    }
}

/// Builds forward models and likelihood terms from the frozen registry.
struct Assembler<'a> {
    registry: &'a ParamRegistry,
    inputs: &'a FitInputs<'a>,
    family: ModelFamily,
    components: Vec<Component>,
    combine: BinaryCombine,
    shared_scaling: FluxScaling,
    disks: Vec<DiskBindings>,
    disk_parallax: Option<ParamRef>,
    flux_offset: Option<ParamRef>,
    filters: Vec<&'a Filter>,
}

impl<'a> Assembler<'a> {
    fn new(
        config: &FitConfig,
        registry: &'a ParamRegistry,
        inputs: &'a FitInputs<'a>,
        photometry: &[&'a PhotometricPoint],
    ) -> Result<Self, ConfigError> {
        let family = if config.is_planck() {
            ModelFamily::Planck
        } else if config.is_powerlaw() {
            ModelFamily::PowerLaw
        } else {
            ModelFamily::Grid
        };

        let mut filters: Vec<&Filter> = photometry.iter().map(|p| &p.filter).collect();
        filters.extend(inputs.extra_filters.iter());

        let parallax_ref = registry
            .param_ref("parallax")
            .or_else(|| registry.param_ref("parallax_0"));

        let scaling_for = |suffix: Option<usize>| -> FluxScaling {
            if let Some(scaling) = registry.param_ref("flux_scaling") {
                return FluxScaling::Linear(scaling);
            }
            if let Some(scaling) = registry.param_ref("log_flux_scaling") {
                return FluxScaling::Log(scaling);
            }
            let key = |base: &str| match suffix {
                Some(i) => format!("{base}_{i}"),
                None => base.into(),
            };
            let radius = registry.param_ref(&key("radius"));
            let parallax = registry.param_ref(&key("parallax")).or(parallax_ref);
            match (radius, parallax) {
                (Some(radius), Some(parallax)) => FluxScaling::RadiusParallax { radius, parallax },
                _ => FluxScaling::None,
            }
        };

        let extinction_for = |suffix: Option<usize>| -> Result<ExtinctionLaw, ConfigError> {
            let key = |base: &str| match suffix {
                Some(i) => format!("{base}_{i}"),
                None => base.into(),
            };
            let av_base = match &config.ext_filter {
                Some(filter) => format!("phot_ext_{filter}"),
                None => "ism_ext".into(),
            };
            let av = registry
                .param_ref(&key(&av_base))
                .or_else(|| registry.param_ref(&av_base));
            if let Some(av) = av {
                let ext_wavel = match &config.ext_filter {
                    Some(name) => Some(
                        filters
                            .iter()
                            .find(|f| f.name() == name)
                            .ok_or_else(|| ConfigError::UnknownName(name.clone(), "filter"))?
                            .mean_wavelength(),
                    ),
                    None => None,
                };
                return Ok(ExtinctionLaw::from(IsmExtinction {
                    av,
                    rv: registry.param_ref("ism_red"),
                    ext_wavel,
                }));
            }
            if let Some(av) = registry.param_ref("lognorm_ext") {
                let table = inputs
                    .lognorm_dust
                    .clone()
                    .ok_or(ConfigError::MissingCrossSections("lognorm"))?;
                return Ok(ExtinctionLaw::from(LogNormalGrains {
                    table,
                    log_radius: registry
                        .param_ref("lognorm_radius")
                        .ok_or_else(|| ConfigError::MissingPrior("lognorm_radius".into()))?,
                    sigma: registry
                        .param_ref("lognorm_sigma")
                        .ok_or_else(|| ConfigError::MissingPrior("lognorm_sigma".into()))?,
                    av,
                }));
            }
            if let Some(av) = registry.param_ref("powerlaw_ext") {
                let table = inputs
                    .powerlaw_dust
                    .clone()
                    .ok_or(ConfigError::MissingCrossSections("powerlaw"))?;
                return Ok(ExtinctionLaw::from(PowerLawGrains {
                    table,
                    log_max_radius: registry
                        .param_ref("powerlaw_max")
                        .ok_or_else(|| ConfigError::MissingPrior("powerlaw_max".into()))?,
                    exponent: registry
                        .param_ref("powerlaw_exp")
                        .ok_or_else(|| ConfigError::MissingPrior("powerlaw_exp".into()))?,
                    av,
                }));
            }
            Ok(ExtinctionLaw::from(NoExtinction))
        };

        let bind = |name: &str| -> Result<ParamRef, ConfigError> {
            registry
                .param_ref(name)
                .ok_or_else(|| ConfigError::MissingPrior(name.into()))
        };

        let mut components = Vec::new();
        let mut combine = BinaryCombine::Sum;
        let mut shared_scaling = FluxScaling::None;
        match family {
            ModelFamily::Grid if registry.is_binary() => {
                let per_component_radius = registry.param_ref("radius_0").is_some();
                if let (false, Some(weight)) =
                    (per_component_radius, registry.param_ref("spec_weight"))
                {
                    combine = BinaryCombine::SpecWeight(weight);
                    shared_scaling = scaling_for(None);
                }
                for i in 0..2 {
                    let grid_params = registry
                        .grid_params()
                        .iter()
                        .skip(i)
                        .step_by(2)
                        .map(|name| bind(name))
                        .collect::<Result<Vec<_>, _>>()?;
                    let scaling = if matches!(combine, BinaryCombine::SpecWeight(_)) {
                        FluxScaling::None
                    } else {
                        scaling_for(Some(i))
                    };
                    components.push(Component {
                        grid_params,
                        scaling,
                        extinction: extinction_for(Some(i))?,
                    });
                }
            }
            ModelFamily::Grid => {
                components.push(Component {
                    grid_params: registry
                        .grid_params()
                        .iter()
                        .map(|name| bind(name))
                        .collect::<Result<Vec<_>, _>>()?,
                    scaling: scaling_for(None),
                    extinction: extinction_for(None)?,
                });
            }
            ModelFamily::Planck => {
                for i in 0..registry.n_planck() {
                    let (teff, radius) = if registry.n_planck() == 1 {
                        (bind("teff")?, bind("radius")?)
                    } else {
                        (bind(&format!("teff_{i}"))?, bind(&format!("radius_{i}"))?)
                    };
                    let parallax =
                        parallax_ref.ok_or_else(|| ConfigError::MissingPrior("parallax".into()))?;
                    components.push(Component {
                        grid_params: vec![teff],
                        scaling: FluxScaling::RadiusParallax { radius, parallax },
                        extinction: extinction_for(None)?,
                    });
                }
            }
            ModelFamily::PowerLaw => {
                components.push(Component {
                    grid_params: vec![
                        bind("log_powerlaw_a")?,
                        bind("log_powerlaw_b")?,
                        bind("log_powerlaw_c")?,
                    ],
                    scaling: FluxScaling::None,
                    extinction: ExtinctionLaw::from(NoExtinction),
                });
            }
        }

        let mut disks = Vec::new();
        if registry.n_disk() == 1 {
            disks.push(DiskBindings {
                teff: bind("disk_teff")?,
                radius: bind("disk_radius")?,
            });
        } else {
            for i in 0..registry.n_disk() {
                disks.push(DiskBindings {
                    teff: bind(&format!("disk_teff_{i}"))?,
                    radius: bind(&format!("disk_radius_{i}"))?,
                });
            }
        }

        Ok(Self {
            registry,
            inputs,
            family,
            components,
            combine,
            shared_scaling,
            disks,
            disk_parallax: parallax_ref,
            flux_offset: registry.param_ref("flux_offset"),
            filters,
        })
    }

    fn padded(range: (f64, f64)) -> (f64, f64) {
        (
            range.0 * (1.0 - WINDOW_PADDING),
            range.1 * (1.0 + WINDOW_PADDING),
        )
    }

    /// Forward model for one dataset window.
    fn forward_model(
        &self,
        wavel_range: (f64, f64),
        resolution: f64,
        shape: DatasetShape,
    ) -> Result<ForwardModel, ConfigError> {
        let window = Self::padded(wavel_range);
        let (handle, model_wavel) = match self.family {
            ModelFamily::Grid => {
                let grid = self
                    .inputs
                    .grid
                    .ok_or_else(|| ConfigError::MissingGrid(self.registry.model().into()))?;
                let handle = grid.interpolate(window, self.registry.teff_range())?;
                let model_wavel = handle.wavelengths().clone();
                (Some(handle), model_wavel)
            }
            ModelFamily::Planck | ModelFamily::PowerLaw => {
                let sampling =
                    (ANALYTIC_OVERSAMPLING * resolution).max(MIN_ANALYTIC_RESOLUTION);
                (None, create_wavelengths(window, sampling))
            }
        };
        Ok(ForwardModel {
            family: self.family,
            handle,
            model_wavel,
            components: self.components.clone(),
            combine: self.combine,
            shared_scaling: self.shared_scaling,
            disks: self.disks.clone(),
            disk_parallax: self.disk_parallax,
            flux_offset: self.flux_offset,
            shape,
        })
    }

    fn phot_term(
        &self,
        point: &PhotometricPoint,
        weighting: &Weighting,
    ) -> Result<PhotTerm, ConfigError> {
        let filter = &point.filter;
        let weight = match weighting {
            Weighting::Off => 1.0,
            Weighting::Auto => filter.fwhm(),
            Weighting::Explicit(weights) => {
                weights.get(filter.name()).copied().unwrap_or(1.0)
            }
        };
        let err_infl = self
            .registry
            .param_ref(&format!("{}_error", filter.name()))
            .or_else(|| self.registry.param_ref(&format!("{}_error", filter.instrument())));
        let model = self.forward_model(
            filter.range(),
            MIN_ANALYTIC_RESOLUTION,
            DatasetShape::Photometric {
                filter: filter.clone(),
            },
        )?;
        Ok(PhotTerm {
            model,
            flux: point.flux,
            sigma: point.sigma,
            weight,
            err_infl,
        })
    }

    fn spec_term(
        &self,
        spectrum: &SpectrumRecord,
        config: &FitConfig,
    ) -> Result<SpecTerm, ConfigError> {
        let name = &spectrum.name;
        let n = spectrum.len();
        let range = (spectrum.wavel[0], spectrum.wavel[n - 1]);

        let suffixed = |base: &str| {
            self.registry
                .param_ref(base)
                .or_else(|| self.registry.param_ref(&format!("{base}_{name}")))
        };
        let shape = DatasetShape::Spectral {
            wavel: spectrum.wavel.clone(),
            resolution: spectrum.resolution,
            vsini: suffixed("vsini"),
            rad_vel: suffixed("rad_vel"),
        };
        let model = self.forward_model(range, spectrum.resolution, shape)?;

        let cov = if let Some(covariance) = &spectrum.covariance {
            let cov = DMatrix::from_fn(n, n, |i, j| covariance[[i, j]]);
            let chol = Cholesky::new(cov.clone())
                .ok_or_else(|| ConfigError::SingularCovariance(name.clone()))?;
            let ln_det = 2.0 * (0..n).map(|i| f64::ln(chol.l_dirty()[(i, i)])).sum::<f64>();
            let inv = match &spectrum.inv_covariance {
                Some(inv) => DMatrix::from_fn(n, n, |i, j| inv[[i, j]]),
                None => chol.inverse(),
            };
            CovarianceMode::Supplied { cov, inv, ln_det }
        } else if config.fit_corr.iter().any(|flagged| flagged == name) {
            CovarianceMode::GaussianProcess {
                corr_len: self
                    .registry
                    .param_ref(&format!("corr_len_{name}"))
                    .ok_or_else(|| ConfigError::MissingPrior(format!("corr_len_{name}")))?,
                corr_amp: self
                    .registry
                    .param_ref(&format!("corr_amp_{name}"))
                    .ok_or_else(|| ConfigError::MissingPrior(format!("corr_amp_{name}")))?,
            }
        } else {
            CovarianceMode::Independent
        };

        let weight = match &config.weighting {
            Weighting::Off => 1.0,
            Weighting::Auto => {
                spectrum.wavel.iter().sum::<f64>() / n as f64 / spectrum.resolution
            }
            Weighting::Explicit(weights) => weights.get(name).copied().unwrap_or(1.0),
        };

        Ok(SpecTerm {
            model,
            wavel: spectrum.wavel.clone(),
            flux: spectrum.flux.clone(),
            sigma: spectrum.sigma.clone(),
            cov,
            weight,
            scaling: self.registry.param_ref(&format!("scaling_{name}")),
            err_infl: self.registry.param_ref(&format!("error_{name}")),
        })
    }

    /// Normal-prior penalties, the derived mass prior and flux-ratio
    /// priors.
    fn priors(
        &self,
        config: &FitConfig,
        likelihood: &mut LogLikelihood,
    ) -> Result<(), ConfigError> {
        for (name, &(mean, sigma)) in self.registry.normal_priors() {
            if name == "mass" {
                let (Some(logg), Some(radius)) = (
                    self.registry.param_ref("logg"),
                    self.registry.param_ref("radius"),
                ) else {
                    warn!("mass prior requires 'logg' and 'radius', skipping");
                    continue;
                };
                likelihood.priors.push(PriorTerm::Mass {
                    logg,
                    radius,
                    mean,
                    sigma,
                });
            } else if let Some(filter) = name.strip_prefix("ratio_") {
                let model = self.ratio_model(filter)?;
                likelihood
                    .priors
                    .push(PriorTerm::FluxRatioNormal { model, mean, sigma });
            } else if let Some(index) = self.registry.index(name) {
                likelihood.priors.push(PriorTerm::Param { index, mean, sigma });
            }
        }
        for (name, spec) in &config.bounds {
            let Some(filter) = name.strip_prefix("ratio_") else {
                continue;
            };
            let Some((lo, hi)) = spec.as_range() else {
                continue;
            };
            let model = self.ratio_model(filter)?;
            likelihood
                .priors
                .push(PriorTerm::FluxRatioUniform { model, lo, hi });
        }
        Ok(())
    }

    /// Photometric forward model backing a flux-ratio prior.
    fn ratio_model(&self, filter_name: &str) -> Result<ForwardModel, ConfigError> {
        if self.components.len() < 2 {
            return Err(ConfigError::UnknownName(
                format!("ratio_{filter_name}"),
                "binary flux-ratio prior",
            ));
        }
        let filter = self
            .filters
            .iter()
            .find(|f| f.name() == filter_name)
            .ok_or_else(|| ConfigError::UnknownName(filter_name.into(), "filter"))?;
        self.forward_model(
            filter.range(),
            MIN_ANALYTIC_RESOLUTION,
            DatasetShape::Photometric {
                filter: (*filter).clone(),
            },
        )
    }

    fn orderings(&self, likelihood: &mut LogLikelihood) {
        if self.family == ModelFamily::Planck && self.registry.n_planck() > 1 {
            likelihood.planck_ordering = self
                .components
                .iter()
                .map(|component| {
                    let radius = match component.scaling {
                        FluxScaling::RadiusParallax { radius, .. } => radius,
                        _ => ParamRef::Fixed(f64::NAN),
                    };
                    (component.grid_params[0], radius)
                })
                .collect();
        }
        if !self.disks.is_empty() {
            let suffix = if self.registry.is_binary() { "_0" } else { "" };
            let atm_teff = self.registry.param_ref(&format!("teff{suffix}"));
            let atm_radius = self
                .registry
                .param_ref("radius")
                .or_else(|| self.registry.param_ref("radius_0"));
            if let (Some(atm_teff), Some(atm_radius)) = (atm_teff, atm_radius) {
                likelihood.disk_ordering = Some(crate::likelihood::DiskOrdering {
                    atm_teff,
                    atm_radius,
                    disks: self.disks.clone(),
                });
            }
        }
    }
}
