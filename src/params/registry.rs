use std::collections::{BTreeMap, HashMap, HashSet};

use log::warn;

use crate::config::{BoundSpec, FitConfig};
use crate::error::ConfigError;
use crate::params::ParamRef;

/// Names and extents of the mandatory parameters of a model grid.
#[derive(Clone, Debug)]
pub struct GridInfo {
    /// Grid parameter names in axis order.
    pub parameters: Vec<String>,
    /// Extent of every axis.
    pub bounds: BTreeMap<String, (f64, f64)>,
}

/// The filters taking part in the fit, in stored order.
#[derive(Clone, Debug)]
pub struct FilterSummary {
    pub name: String,
    pub instrument: String,
}

/// The spectra taking part in the fit, in stored order.
#[derive(Clone, Debug)]
pub struct SpectrumSummary {
    pub name: String,
    pub has_covariance: bool,
}

/// Datasets seen by the registry builder, already filtered by the
/// configured data selection.
#[derive(Clone, Debug, Default)]
pub struct DatasetSummary {
    pub filters: Vec<FilterSummary>,
    pub spectra: Vec<SpectrumSummary>,
}

const DEFAULT_RADIUS_BOUND: (f64, f64) = (0.5, 5.0);
const DEFAULT_CORR_LEN_BOUND: (f64, f64) = (-3.0, 0.0);
const DEFAULT_CORR_AMP_BOUND: (f64, f64) = (0.0, 1.0);

#[derive(Clone, Debug)]
struct Entry {
    name: String,
    /// `None` when the parameter is constrained by a normal prior only.
    bound: Option<(f64, f64)>,
}

/// Frozen output of the registry builder.
///
/// Free parameters keep the order in which the builder added them; the
/// cube index is the bijective name-to-position map over that order.
#[derive(Clone, Debug)]
pub struct ParamRegistry {
    names: Vec<String>,
    bounds: Vec<Option<(f64, f64)>>,
    cube_index: HashMap<String, usize>,
    fixed: Vec<(String, f64)>,
    normal_priors: BTreeMap<String, (f64, f64)>,
    model: String,
    binary: bool,
    n_planck: usize,
    n_disk: usize,
    grid_params: Vec<String>,
    teff_range: Option<(f64, f64)>,
}

impl ParamRegistry {
    pub fn len(&self) -> usize {
        self.names.len()
    }

    pub fn is_empty(&self) -> bool {
        self.names.is_empty()
    }

    /// Ordered free-parameter names.
    pub fn names(&self) -> &[String] {
        &self.names
    }

    /// Per-parameter uniform bounds, aligned with [`Self::names`].
    pub fn bounds(&self) -> &[Option<(f64, f64)>] {
        &self.bounds
    }

    pub fn index(&self, name: &str) -> Option<usize> {
        self.cube_index.get(name).copied()
    }

    /// Resolve a name to a binding: free parameters become cube references,
    /// fixed parameters become constants.
    pub fn param_ref(&self, name: &str) -> Option<ParamRef> {
        if let Some(&index) = self.cube_index.get(name) {
            return Some(ParamRef::Cube(index));
        }
        self.fixed
            .iter()
            .find(|(fixed_name, _)| fixed_name == name)
            .map(|&(_, value)| ParamRef::Fixed(value))
    }

    /// Bounds keyed by name, for the sample sink.
    pub fn bounds_table(&self) -> BTreeMap<String, (f64, f64)> {
        self.names
            .iter()
            .zip(self.bounds.iter())
            .filter_map(|(name, bound)| bound.map(|b| (name.clone(), b)))
            .collect()
    }

    pub fn fixed_params(&self) -> &[(String, f64)] {
        &self.fixed
    }

    /// Normal priors keyed by name. Includes the derived `mass` prior and
    /// `ratio_<filter>` flux-ratio priors, which have no cube index.
    pub fn normal_priors(&self) -> &BTreeMap<String, (f64, f64)> {
        &self.normal_priors
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn is_binary(&self) -> bool {
        self.binary
    }

    pub fn n_planck(&self) -> usize {
        self.n_planck
    }

    pub fn n_disk(&self) -> usize {
        self.n_disk
    }

    /// Mandatory grid parameter names, suffixed in binary mode.
    pub fn grid_params(&self) -> &[String] {
        &self.grid_params
    }

    /// Union of all effective-temperature bounds, used to restrict the
    /// grid interpolation windows.
    pub fn teff_range(&self) -> Option<(f64, f64)> {
        self.teff_range
    }
}

/// Builds a [`ParamRegistry`] through an ordered pipeline of resolution
/// steps. Later steps assume earlier ones are complete, so the step
/// order is part of the contract: it fixes the cube layout.
pub struct RegistryBuilder<'a> {
    config: &'a FitConfig,
    grid: Option<&'a GridInfo>,
    datasets: &'a DatasetSummary,
    parallax: (f64, f64),
    entries: Vec<Entry>,
    consumed: HashSet<String>,
    binary: bool,
    n_planck: usize,
    n_disk: usize,
}

impl<'a> RegistryBuilder<'a> {
    pub fn new(
        config: &'a FitConfig,
        grid: Option<&'a GridInfo>,
        datasets: &'a DatasetSummary,
        parallax: (f64, f64),
    ) -> Self {
        Self {
            config,
            grid,
            datasets,
            parallax,
            entries: Vec::new(),
            consumed: HashSet::new(),
            binary: false,
            n_planck: 0,
            n_disk: 0,
        }
    }

    pub fn build(mut self) -> Result<ParamRegistry, ConfigError> {
        self.seed_mandatory()?;
        self.flux_normalization()?;
        self.disk_components()?;
        self.binary_weight()?;
        self.spectrum_calibration()?;
        self.extinction()?;
        self.broadening_and_inflation()?;
        self.reject_unknown_bounds()?;
        Ok(self.freeze())
    }

    fn bound_spec(&mut self, name: &str) -> Option<BoundSpec> {
        let spec = self.config.bounds.get(name).cloned();
        if spec.is_some() {
            self.consumed.insert(name.into());
        }
        spec
    }

    fn push(&mut self, name: impl Into<String>, bound: Option<(f64, f64)>) -> Result<(), ConfigError> {
        let name = name.into();
        if let Some((lo, hi)) = bound {
            if lo > hi {
                return Err(ConfigError::InvalidBound {
                    parameter: name,
                    lo,
                    hi,
                });
            }
        }
        self.entries.push(Entry { name, bound });
        Ok(())
    }

    /// Steps 1 and 2: mandatory parameters, with binary splitting.
    fn seed_mandatory(&mut self) -> Result<(), ConfigError> {
        if self.config.is_planck() {
            return self.seed_planck();
        }
        if self.config.is_powerlaw() {
            for name in ["log_powerlaw_a", "log_powerlaw_b", "log_powerlaw_c"] {
                let bound = match self.bound_spec(name) {
                    Some(BoundSpec::Range(lo, hi)) => (lo, hi),
                    Some(_) | None => {
                        return Err(ConfigError::MissingBound {
                            model: "powerlaw".into(),
                            parameter: name.into(),
                        });
                    }
                };
                self.push(name, Some(bound))?;
            }
            return Ok(());
        }

        let grid = self
            .grid
            .ok_or_else(|| ConfigError::MissingGrid(self.config.model.clone()))?;
        let grid_names = grid.parameters.clone();
        let grid_bounds = grid.bounds.clone();

        // A pair bound on any mandatory parameter switches to binary mode.
        self.binary = grid_names
            .iter()
            .chain(std::iter::once(&"radius".to_string()))
            .any(|name| {
                self.config
                    .bounds
                    .get(name)
                    .is_some_and(BoundSpec::is_pair)
            });

        for name in &grid_names {
            let extent = grid_bounds[name];
            let spec = self.bound_spec(name);
            if self.binary {
                let (b0, b1) = match spec {
                    Some(BoundSpec::Pair(first, second)) => (
                        clip_to_extent(name, first.unwrap_or(extent), extent),
                        clip_to_extent(name, second.unwrap_or(extent), extent),
                    ),
                    Some(BoundSpec::Range(lo, hi)) => {
                        let clipped = clip_to_extent(name, (lo, hi), extent);
                        (clipped, clipped)
                    }
                    Some(BoundSpec::Grid) | None => (extent, extent),
                    Some(other) => return Err(invalid_spec(name, &other)),
                };
                self.push(format!("{name}_0"), Some(b0))?;
                self.push(format!("{name}_1"), Some(b1))?;
            } else {
                let bound = match spec {
                    Some(BoundSpec::Range(lo, hi)) => clip_to_extent(name, (lo, hi), extent),
                    Some(BoundSpec::Grid) | None => extent,
                    Some(other) => return Err(invalid_spec(name, &other)),
                };
                self.push(name.clone(), Some(bound))?;
            }
        }
        Ok(())
    }

    fn seed_planck(&mut self) -> Result<(), ConfigError> {
        let missing = |parameter: &str| ConfigError::MissingBound {
            model: "planck".into(),
            parameter: parameter.into(),
        };
        let teff = self.bound_spec("teff").ok_or_else(|| missing("teff"))?;
        let radius = self.bound_spec("radius").ok_or_else(|| missing("radius"))?;
        self.consumed.insert("radius".into());
        match (teff, radius) {
            (BoundSpec::Range(t_lo, t_hi), BoundSpec::Range(r_lo, r_hi)) => {
                self.n_planck = 1;
                self.push("teff", Some((t_lo, t_hi)))?;
                self.push("radius", Some((r_lo, r_hi)))?;
            }
            (BoundSpec::Components(teffs), BoundSpec::Components(radii)) => {
                if teffs.len() != radii.len() {
                    return Err(ConfigError::ComponentCountMismatch {
                        first: "teff".into(),
                        second: "radius".into(),
                        n_first: teffs.len(),
                        n_second: radii.len(),
                    });
                }
                self.n_planck = teffs.len();
                for (i, (teff_bound, radius_bound)) in
                    teffs.into_iter().zip(radii.into_iter()).enumerate()
                {
                    self.push(format!("teff_{i}"), Some(teff_bound))?;
                    self.push(format!("radius_{i}"), Some(radius_bound))?;
                }
            }
            _ => return Err(missing("teff")),
        }
        Ok(())
    }

    /// Step 3: radius + parallax, or a direct flux-scaling factor.
    fn flux_normalization(&mut self) -> Result<(), ConfigError> {
        if self.config.is_powerlaw() {
            return Ok(());
        }

        let scaling = self.bound_spec("flux_scaling");
        let log_scaling = self.bound_spec("log_flux_scaling");
        if scaling.is_some() && log_scaling.is_some() {
            return Err(ConfigError::ConflictingScaling);
        }

        if !self.config.is_planck() {
            if let Some(spec) = scaling.or(log_scaling.clone()) {
                let name = if log_scaling.is_some() {
                    "log_flux_scaling"
                } else {
                    "flux_scaling"
                };
                if self.config.bounds.contains_key("radius") {
                    warn!("'radius' bound is ignored when '{name}' is fitted");
                    self.consumed.insert("radius".into());
                }
                let bound = spec
                    .as_range()
                    .ok_or_else(|| invalid_spec(name, &spec))?;
                self.push(name, Some(bound))?;
                self.add_flux_offset()?;
                return Ok(());
            }

            match self.bound_spec("radius") {
                Some(BoundSpec::Pair(first, second)) => {
                    self.push("radius_0", Some(first.unwrap_or(DEFAULT_RADIUS_BOUND)))?;
                    self.push("radius_1", Some(second.unwrap_or(DEFAULT_RADIUS_BOUND)))?;
                }
                Some(BoundSpec::Range(lo, hi)) => self.push("radius", Some((lo, hi)))?,
                None => self.push("radius", Some(DEFAULT_RADIUS_BOUND))?,
                Some(other) => return Err(invalid_spec("radius", &other)),
            }
        }

        match self.bound_spec("parallax") {
            Some(BoundSpec::Pair(first, second)) if self.binary => {
                let fallback = (self.parallax.0 - 5.0 * self.parallax.1)
                    .max(f64::MIN_POSITIVE);
                let default = (fallback, self.parallax.0 + 5.0 * self.parallax.1);
                self.push("parallax_0", Some(first.unwrap_or(default)))?;
                self.push("parallax_1", Some(second.unwrap_or(default)))?;
            }
            Some(BoundSpec::Range(lo, hi)) => self.push("parallax", Some((lo, hi)))?,
            None => self.push("parallax", None)?,
            Some(other) => return Err(invalid_spec("parallax", &other)),
        }

        self.add_flux_offset()
    }

    fn add_flux_offset(&mut self) -> Result<(), ConfigError> {
        if let Some(spec) = self.bound_spec("flux_offset") {
            let bound = spec
                .as_range()
                .ok_or_else(|| invalid_spec("flux_offset", &spec))?;
            self.push("flux_offset", Some(bound))?;
        }
        Ok(())
    }

    /// Step 4: blackbody disk components.
    fn disk_components(&mut self) -> Result<(), ConfigError> {
        if self.config.is_planck() || self.config.is_powerlaw() {
            return Ok(());
        }
        let teff = self.bound_spec("disk_teff");
        let radius = self.bound_spec("disk_radius");
        match (teff, radius) {
            (None, None) => Ok(()),
            (Some(BoundSpec::Range(t_lo, t_hi)), Some(BoundSpec::Range(r_lo, r_hi))) => {
                self.n_disk = 1;
                self.push("disk_teff", Some((t_lo, t_hi)))?;
                self.push("disk_radius", Some((r_lo, r_hi)))
            }
            (Some(BoundSpec::Components(teffs)), Some(BoundSpec::Components(radii))) => {
                if teffs.len() != radii.len() {
                    return Err(ConfigError::ComponentCountMismatch {
                        first: "disk_teff".into(),
                        second: "disk_radius".into(),
                        n_first: teffs.len(),
                        n_second: radii.len(),
                    });
                }
                self.n_disk = teffs.len();
                for (i, (teff_bound, radius_bound)) in
                    teffs.into_iter().zip(radii.into_iter()).enumerate()
                {
                    self.push(format!("disk_teff_{i}"), Some(teff_bound))?;
                    self.push(format!("disk_radius_{i}"), Some(radius_bound))?;
                }
                Ok(())
            }
            (Some(_), None) => Err(ConfigError::MissingBound {
                model: self.config.model.clone(),
                parameter: "disk_radius".into(),
            }),
            (None, Some(_)) => Err(ConfigError::MissingBound {
                model: self.config.model.clone(),
                parameter: "disk_teff".into(),
            }),
            (Some(first), Some(second)) => {
                let n_first = component_count(&first);
                let n_second = component_count(&second);
                Err(ConfigError::ComponentCountMismatch {
                    first: "disk_teff".into(),
                    second: "disk_radius".into(),
                    n_first,
                    n_second,
                })
            }
        }
    }

    /// Step 5: the `spec_weight` mixing parameter when two atmospheres
    /// share a single radius.
    fn binary_weight(&mut self) -> Result<(), ConfigError> {
        if !self.binary {
            return Ok(());
        }
        let shared_radius = self.entries.iter().any(|entry| entry.name == "radius");
        if !shared_radius {
            return Ok(());
        }
        let bound = match self.bound_spec("spec_weight") {
            Some(spec) => spec
                .as_range()
                .ok_or_else(|| invalid_spec("spec_weight", &spec))?,
            None => (0.0, 1.0),
        };
        self.push("spec_weight", Some(bound))
    }

    /// Step 6: per-spectrum calibration and Gaussian-process parameters.
    fn spectrum_calibration(&mut self) -> Result<(), ConfigError> {
        let spectra = self.datasets.spectra.clone();
        for spectrum in &spectra {
            if let Some(calibration) = self.config.calibration.get(&spectrum.name) {
                if let Some(bound) = calibration.scaling {
                    self.push(format!("scaling_{}", spectrum.name), Some(bound))?;
                }
                if let Some(bound) = calibration.error {
                    self.push(format!("error_{}", spectrum.name), Some(bound))?;
                }
            }
        }
        for spectrum in &spectra {
            if !self.config.fit_corr.iter().any(|name| *name == spectrum.name) {
                continue;
            }
            if spectrum.has_covariance {
                warn!(
                    "spectrum '{}' has a covariance matrix, ignoring its fit_corr flag",
                    spectrum.name
                );
                continue;
            }
            let corr_len = format!("corr_len_{}", spectrum.name);
            let corr_amp = format!("corr_amp_{}", spectrum.name);
            let len_bound = self
                .range_override(&corr_len)?
                .unwrap_or(DEFAULT_CORR_LEN_BOUND);
            let amp_bound = self
                .range_override(&corr_amp)?
                .unwrap_or(DEFAULT_CORR_AMP_BOUND);
            self.push(corr_len, Some(len_bound))?;
            self.push(corr_amp, Some(amp_bound))?;
        }
        Ok(())
    }

    fn range_override(&mut self, name: &str) -> Result<Option<(f64, f64)>, ConfigError> {
        match self.bound_spec(name) {
            Some(spec) => spec
                .as_range()
                .map(Some)
                .ok_or_else(|| invalid_spec(name, &spec)),
            None => Ok(None),
        }
    }

    /// Step 7: exactly one extinction family.
    fn extinction(&mut self) -> Result<(), ConfigError> {
        let has_ism = self.config.bounds.contains_key("ism_ext");
        let lognorm_keys = ["lognorm_radius", "lognorm_sigma", "lognorm_ext"];
        let powerlaw_keys = ["powerlaw_max", "powerlaw_exp", "powerlaw_ext"];
        let has_lognorm = lognorm_keys
            .iter()
            .any(|key| self.config.bounds.contains_key(*key));
        let has_powerlaw = powerlaw_keys
            .iter()
            .any(|key| self.config.bounds.contains_key(*key));

        match (has_ism, has_lognorm, has_powerlaw) {
            (true, true, _) => return Err(ConfigError::ConflictingExtinction("ism", "lognorm")),
            (true, _, true) => return Err(ConfigError::ConflictingExtinction("ism", "powerlaw")),
            (_, true, true) => {
                return Err(ConfigError::ConflictingExtinction("lognorm", "powerlaw"));
            }
            _ => {}
        }

        if has_ism {
            let av_name = match &self.config.ext_filter {
                Some(filter) => format!("phot_ext_{filter}"),
                None => "ism_ext".into(),
            };
            match self.bound_spec("ism_ext") {
                Some(BoundSpec::Pair(first, second)) if self.binary => {
                    let fallback = first.or(second).ok_or_else(|| {
                        ConfigError::MissingBound {
                            model: self.config.model.clone(),
                            parameter: "ism_ext".into(),
                        }
                    })?;
                    self.push(format!("{av_name}_0"), Some(first.unwrap_or(fallback)))?;
                    self.push(format!("{av_name}_1"), Some(second.unwrap_or(fallback)))?;
                }
                Some(BoundSpec::Range(lo, hi)) => self.push(av_name, Some((lo, hi)))?,
                Some(other) => return Err(invalid_spec("ism_ext", &other)),
                None => unreachable!(),
            }
            if let Some(bound) = self.range_override("ism_red")? {
                self.push("ism_red", Some(bound))?;
            }
        } else if has_lognorm {
            self.grain_family("lognorm", &lognorm_keys)?;
        } else if has_powerlaw {
            self.grain_family("powerlaw", &powerlaw_keys)?;
        }
        Ok(())
    }

    /// Grain size parameters are sampled uniformly in log space, so the
    /// stored bound is the log10 of the configured one.
    fn grain_family(&mut self, family: &str, keys: &[&str; 3]) -> Result<(), ConfigError> {
        for key in keys {
            let bound = self.range_override(key)?.ok_or_else(|| {
                ConfigError::MissingBound {
                    model: self.config.model.clone(),
                    parameter: (*key).into(),
                }
            })?;
            let size_key = format!("{family}_{}", if family == "lognorm" { "radius" } else { "max" });
            let bound = if *key == size_key {
                (f64::log10(bound.0), f64::log10(bound.1))
            } else {
                bound
            };
            self.push(*key, Some(bound))?;
        }
        Ok(())
    }

    /// Step 8: broadening and error-inflation nuisance parameters.
    fn broadening_and_inflation(&mut self) -> Result<(), ConfigError> {
        let mut seen = HashSet::new();
        let filters = self.datasets.filters.clone();
        for filter in &filters {
            let filter_key = format!("{}_error", filter.name);
            let instrument_key = format!("{}_error", filter.instrument);
            let key = if self.config.bounds.contains_key(&filter_key) {
                filter_key
            } else if self.config.bounds.contains_key(&instrument_key) {
                instrument_key
            } else {
                continue;
            };
            if !seen.insert(key.clone()) {
                continue;
            }
            let bound = self
                .range_override(&key)?
                .ok_or_else(|| invalid_spec(&key, &BoundSpec::Grid))?;
            self.push(key, Some(bound))?;
        }

        if self.datasets.spectra.is_empty() {
            return Ok(());
        }
        for base in ["vsini", "rad_vel"] {
            if let Some(bound) = self.range_override(base)? {
                self.push(base, Some(bound))?;
            } else {
                let spectra = self.datasets.spectra.clone();
                for spectrum in &spectra {
                    let key = format!("{base}_{}", spectrum.name);
                    if let Some(bound) = self.range_override(&key)? {
                        self.push(key, Some(bound))?;
                    }
                }
            }
        }
        Ok(())
    }

    fn reject_unknown_bounds(&self) -> Result<(), ConfigError> {
        for key in self.config.bounds.keys() {
            // ratio_<filter> bounds are derived flux-ratio priors, read
            // by the likelihood rather than sampled
            if key.starts_with("ratio_") {
                continue;
            }
            if !self.consumed.contains(key) {
                return Err(ConfigError::UnknownName(key.clone(), "parameter"));
            }
        }
        Ok(())
    }

    /// Steps 9 and 10: fixed-parameter resolution, the auto parallax
    /// prior, and the frozen registry.
    fn freeze(self) -> ParamRegistry {
        let mut names = Vec::new();
        let mut bounds = Vec::new();
        let mut fixed = Vec::new();
        for entry in self.entries {
            match entry.bound {
                Some((lo, hi)) if lo == hi => fixed.push((entry.name, lo)),
                bound => {
                    names.push(entry.name);
                    bounds.push(bound);
                }
            }
        }

        let mut normal_priors = self.config.normal_priors.clone();
        for name in ["parallax", "parallax_0", "parallax_1"] {
            let position = names.iter().position(|free| free == name);
            let Some(index) = position else { continue };
            if bounds[index].is_none() && !normal_priors.contains_key(name) {
                normal_priors.insert(name.into(), self.parallax);
            }
        }

        let cube_index = names
            .iter()
            .enumerate()
            .map(|(index, name)| (name.clone(), index))
            .collect();

        let grid_params = match self.grid {
            Some(grid) if self.binary => grid
                .parameters
                .iter()
                .flat_map(|name| [format!("{name}_0"), format!("{name}_1")])
                .collect(),
            Some(grid) => grid.parameters.clone(),
            None => Vec::new(),
        };

        let teff_range = teff_extent(&names, &bounds, &fixed);

        ParamRegistry {
            names,
            bounds,
            cube_index,
            fixed,
            normal_priors,
            model: self.config.model.clone(),
            binary: self.binary,
            n_planck: self.n_planck,
            n_disk: self.n_disk,
            grid_params,
            teff_range,
        }
    }
}

fn component_count(spec: &BoundSpec) -> usize {
    match spec {
        BoundSpec::Components(list) => list.len(),
        _ => 1,
    }
}

fn invalid_spec(name: &str, spec: &BoundSpec) -> ConfigError {
    let (lo, hi) = spec.as_range().unwrap_or((f64::NAN, f64::NAN));
    ConfigError::InvalidBound {
        parameter: name.into(),
        lo,
        hi,
    }
}

fn clip_to_extent(name: &str, user: (f64, f64), extent: (f64, f64)) -> (f64, f64) {
    let clipped = (user.0.max(extent.0), user.1.min(extent.1));
    if clipped != user {
        warn!(
            "bound ({}, {}) of '{name}' clipped to the grid extent ({}, {})",
            user.0, user.1, clipped.0, clipped.1
        );
    }
    clipped
}

fn teff_extent(
    names: &[String],
    bounds: &[Option<(f64, f64)>],
    fixed: &[(String, f64)],
) -> Option<(f64, f64)> {
    let is_teff = |name: &str| {
        name == "teff" || name == "teff_0" || name == "teff_1" || {
            name.strip_prefix("teff_")
                .is_some_and(|suffix| suffix.parse::<usize>().is_ok())
        }
    };
    let mut extent: Option<(f64, f64)> = None;
    let mut fold = |lo: f64, hi: f64| {
        extent = Some(match extent {
            Some((e_lo, e_hi)) => (e_lo.min(lo), e_hi.max(hi)),
            None => (lo, hi),
        });
    };
    for (name, bound) in names.iter().zip(bounds.iter()) {
        if let (true, Some((lo, hi))) = (is_teff(name), bound) {
            fold(*lo, *hi);
        }
    }
    for (name, value) in fixed {
        if is_teff(name) {
            fold(*value, *value);
        }
    }
    extent
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::CalibrationBounds;

    fn toy_grid() -> GridInfo {
        GridInfo {
            parameters: vec!["teff".into(), "logg".into()],
            bounds: [
                ("teff".to_string(), (1000.0, 3000.0)),
                ("logg".to_string(), (3.0, 6.0)),
            ]
            .into_iter()
            .collect(),
        }
    }

    fn one_filter() -> DatasetSummary {
        DatasetSummary {
            filters: vec![FilterSummary {
                name: "Paranal/NACO.Mp".into(),
                instrument: "Paranal/NACO".into(),
            }],
            spectra: Vec::new(),
        }
    }

    fn build(config: &FitConfig, datasets: &DatasetSummary) -> ParamRegistry {
        let grid = toy_grid();
        RegistryBuilder::new(config, Some(&grid), datasets, (25.0, 0.5))
            .build()
            .unwrap()
    }

    #[test]
    fn single_atmosphere_parameter_order() {
        let config = FitConfig::new("ames-dusty")
            .with_bound("teff", BoundSpec::Range(2000.0, 2500.0))
            .with_bound("logg", BoundSpec::Range(3.5, 5.5));
        let registry = build(&config, &one_filter());
        assert_eq!(registry.names(), ["teff", "logg", "radius", "parallax"]);
        assert_eq!(registry.bounds()[2], Some((0.5, 5.0)));
        assert_eq!(
            registry.normal_priors().get("parallax"),
            Some(&(25.0, 0.5))
        );
        assert!(!registry.is_binary());
    }

    #[test]
    fn bounds_clip_to_grid_extent() {
        let config = FitConfig::new("ames-dusty")
            .with_bound("teff", BoundSpec::Range(500.0, 5000.0));
        let registry = build(&config, &one_filter());
        assert_eq!(registry.bounds()[0], Some((1000.0, 3000.0)));
    }

    #[test]
    fn pair_bound_splits_every_mandatory_parameter() {
        let config = FitConfig::new("ames-dusty").with_bound(
            "teff",
            BoundSpec::Pair(Some((1000.0, 1500.0)), Some((1300.0, 1800.0))),
        );
        let registry = build(&config, &one_filter());
        assert!(registry.is_binary());
        assert!(registry.index("teff").is_none());
        assert_eq!(registry.index("teff_0"), Some(0));
        assert_eq!(registry.index("teff_1"), Some(1));
        assert_eq!(registry.bounds()[0], Some((1000.0, 1500.0)));
        assert_eq!(registry.bounds()[1], Some((1300.0, 1800.0)));
        // logg duplicates the grid extent per component
        assert_eq!(registry.index("logg_0"), Some(2));
        assert_eq!(registry.index("logg_1"), Some(3));
        // shared radius brings in the mixing weight
        assert!(registry.index("spec_weight").is_some());
    }

    #[test]
    fn planck_components_interleave() {
        let config = FitConfig::new("planck")
            .with_bound(
                "teff",
                BoundSpec::Components(vec![(1000.0, 1400.0), (1200.0, 1600.0)]),
            )
            .with_bound(
                "radius",
                BoundSpec::Components(vec![(0.8, 1.5), (1.2, 2.0)]),
            );
        let registry = RegistryBuilder::new(&config, None, &one_filter(), (25.0, 0.5))
            .build()
            .unwrap();
        assert_eq!(
            registry.names(),
            ["teff_0", "radius_0", "teff_1", "radius_1", "parallax"]
        );
        assert_eq!(registry.n_planck(), 2);
    }

    #[test]
    fn fixed_parameter_leaves_the_cube() {
        let config = FitConfig::new("ames-dusty")
            .with_bound("teff", BoundSpec::Range(2000.0, 2500.0))
            .with_bound("logg", BoundSpec::Range(4.0, 4.0));
        let registry = build(&config, &one_filter());
        assert_eq!(registry.names(), ["teff", "radius", "parallax"]);
        assert_eq!(registry.fixed_params(), [("logg".to_string(), 4.0)]);
        assert_eq!(registry.param_ref("logg"), Some(ParamRef::Fixed(4.0)));
        assert_eq!(registry.param_ref("teff"), Some(ParamRef::Cube(0)));
    }

    #[test]
    fn conflicting_scalings_rejected() {
        let config = FitConfig::new("ames-dusty")
            .with_bound("flux_scaling", BoundSpec::Range(0.5, 2.0))
            .with_bound("log_flux_scaling", BoundSpec::Range(-1.0, 1.0));
        let grid = toy_grid();
        let err = RegistryBuilder::new(&config, Some(&grid), &one_filter(), (25.0, 0.5))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingScaling));
    }

    #[test]
    fn two_extinction_families_rejected() {
        let config = FitConfig::new("ames-dusty")
            .with_bound("ism_ext", BoundSpec::Range(0.0, 5.0))
            .with_bound("lognorm_radius", BoundSpec::Range(0.01, 10.0))
            .with_bound("lognorm_sigma", BoundSpec::Range(1.2, 5.0))
            .with_bound("lognorm_ext", BoundSpec::Range(0.0, 5.0));
        let grid = toy_grid();
        let err = RegistryBuilder::new(&config, Some(&grid), &one_filter(), (25.0, 0.5))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::ConflictingExtinction(_, _)));
    }

    #[test]
    fn grain_sizes_move_to_log_space() {
        let config = FitConfig::new("ames-dusty")
            .with_bound("lognorm_radius", BoundSpec::Range(0.001, 10.0))
            .with_bound("lognorm_sigma", BoundSpec::Range(1.2, 5.0))
            .with_bound("lognorm_ext", BoundSpec::Range(0.0, 5.0));
        let registry = build(&config, &one_filter());
        let index = registry.index("lognorm_radius").unwrap();
        let (lo, hi) = registry.bounds()[index].unwrap();
        assert_eq!((lo, hi), (-3.0, 1.0));
    }

    #[test]
    fn spectrum_calibration_and_gp_parameters() {
        let mut config = FitConfig::new("ames-dusty");
        config.calibration.insert(
            "GRAVITY".into(),
            CalibrationBounds {
                scaling: Some((0.5, 1.5)),
                error: Some((0.0, 1.0)),
            },
        );
        config.fit_corr.push("GRAVITY".into());
        let datasets = DatasetSummary {
            filters: Vec::new(),
            spectra: vec![SpectrumSummary {
                name: "GRAVITY".into(),
                has_covariance: false,
            }],
        };
        let registry = build(&config, &datasets);
        for name in [
            "scaling_GRAVITY",
            "error_GRAVITY",
            "corr_len_GRAVITY",
            "corr_amp_GRAVITY",
        ] {
            assert!(registry.index(name).is_some(), "missing {name}");
        }
        let corr_len = registry.index("corr_len_GRAVITY").unwrap();
        assert_eq!(registry.bounds()[corr_len], Some((-3.0, 0.0)));
    }

    #[test]
    fn fit_corr_ignored_when_covariance_supplied() {
        let mut config = FitConfig::new("ames-dusty");
        config.fit_corr.push("GRAVITY".into());
        let datasets = DatasetSummary {
            filters: Vec::new(),
            spectra: vec![SpectrumSummary {
                name: "GRAVITY".into(),
                has_covariance: true,
            }],
        };
        let registry = build(&config, &datasets);
        assert!(registry.index("corr_len_GRAVITY").is_none());
    }

    #[test]
    fn instrument_error_inflation_added_once() {
        let config = FitConfig::new("ames-dusty")
            .with_bound("Paranal/NACO_error", BoundSpec::Range(0.0, 1.0));
        let datasets = DatasetSummary {
            filters: vec![
                FilterSummary {
                    name: "Paranal/NACO.Lp".into(),
                    instrument: "Paranal/NACO".into(),
                },
                FilterSummary {
                    name: "Paranal/NACO.Mp".into(),
                    instrument: "Paranal/NACO".into(),
                },
            ],
            spectra: Vec::new(),
        };
        let registry = build(&config, &datasets);
        let count = registry
            .names()
            .iter()
            .filter(|name| name.as_str() == "Paranal/NACO_error")
            .count();
        assert_eq!(count, 1);
    }

    #[test]
    fn unknown_bound_name_rejected() {
        let config = FitConfig::new("ames-dusty").with_bound("tefff", BoundSpec::Range(1.0, 2.0));
        let grid = toy_grid();
        let err = RegistryBuilder::new(&config, Some(&grid), &one_filter(), (25.0, 0.5))
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::UnknownName(name, _) if name == "tefff"));
    }

    #[test]
    fn ext_filter_renames_the_extinction_parameter() {
        let mut config = FitConfig::new("ames-dusty")
            .with_bound("ism_ext", BoundSpec::Range(0.0, 5.0));
        config.ext_filter = Some("2MASS/2MASS.Ks".into());
        let registry = build(&config, &one_filter());
        assert!(registry.index("ism_ext").is_none());
        assert!(registry.index("phot_ext_2MASS/2MASS.Ks").is_some());
    }

    #[test]
    fn teff_range_spans_both_components() {
        let config = FitConfig::new("ames-dusty").with_bound(
            "teff",
            BoundSpec::Pair(Some((1200.0, 1500.0)), Some((1800.0, 2200.0))),
        );
        let registry = build(&config, &one_filter());
        assert_eq!(registry.teff_range(), Some((1200.0, 2200.0)));
    }
}
