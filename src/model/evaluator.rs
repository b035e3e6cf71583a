//! Assembles the predicted flux for one dataset from pre-resolved
//! parameter bindings.
//!
//! One [`ForwardModel`] exists per included filter or spectrum. All grid
//! handles and bindings are resolved at setup; evaluation reads the bound
//! sample vector only.

use std::sync::Arc;

use ndarray::Array1;

use crate::consts::radius_distance_scale;
use crate::data::Filter;
use crate::error::GridError;
use crate::grid::GridHandle;
use crate::model::broaden::{resample, rotational_broadening, smooth_to_resolution};
use crate::model::extinction::{AttenuateFlux, ExtinctionLaw};
use crate::model::planck::planck_flux;
use crate::params::ParamRef;

/// How a model spectrum is scaled to the observed flux level.
#[derive(Clone, Copy, Debug)]
pub enum FluxScaling {
    /// Dilution by `(radius / distance)^2` from radius (Rjup) and
    /// parallax (mas).
    RadiusParallax { radius: ParamRef, parallax: ParamRef },
    /// Direct multiplicative factor.
    Linear(ParamRef),
    /// Multiplicative factor sampled in log10.
    Log(ParamRef),
    /// No scaling (shared scaling applied elsewhere, or none at all).
    None,
}

impl FluxScaling {
    fn factor(&self, cube: &[f64]) -> f64 {
        match self {
            Self::RadiusParallax { radius, parallax } => {
                radius_distance_scale(radius.value(cube), parallax.value(cube))
            }
            Self::Linear(scaling) => scaling.value(cube),
            Self::Log(scaling) => 10f64.powf(scaling.value(cube)),
            Self::None => 1.0,
        }
    }
}

/// Which family produces the base spectrum.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ModelFamily {
    /// Interpolated atmosphere grid.
    Grid,
    /// Analytic blackbody components.
    Planck,
    /// `log10 f = a + b * (log10 lambda)^c`, photometry only.
    PowerLaw,
}

/// One atmosphere component with its bindings.
#[derive(Clone, Debug)]
pub struct Component {
    /// Grid-parameter bindings in handle axis order; `[teff]` for the
    /// planck family, `[a, b, c]` for the power law.
    pub grid_params: Vec<ParamRef>,
    pub scaling: FluxScaling,
    pub extinction: ExtinctionLaw,
}

/// How multiple atmosphere components merge.
#[derive(Clone, Copy, Debug)]
pub enum BinaryCombine {
    /// Single component, or independent addition of separately scaled
    /// components.
    Sum,
    /// Convex combination `w * f_0 + (1 - w) * f_1` of two spectra of
    /// the same object, sharing one radius.
    SpecWeight(ParamRef),
}

/// One blackbody disk component.
#[derive(Clone, Copy, Debug)]
pub struct DiskBindings {
    pub teff: ParamRef,
    pub radius: ParamRef,
}

/// Dataset-specific output stage.
#[derive(Clone, Debug)]
pub enum DatasetShape {
    Photometric {
        filter: Filter,
    },
    Spectral {
        /// Native wavelength grid of the observed spectrum.
        wavel: Array1<f64>,
        resolution: f64,
        vsini: Option<ParamRef>,
        rad_vel: Option<ParamRef>,
    },
}

/// Forward model for a single dataset.
#[derive(Clone)]
pub struct ForwardModel {
    pub family: ModelFamily,
    /// Pre-interpolated grid window; `None` for analytic families.
    pub handle: Option<Arc<dyn GridHandle>>,
    /// Wavelengths on which the model flux is assembled.
    pub model_wavel: Array1<f64>,
    pub components: Vec<Component>,
    pub combine: BinaryCombine,
    /// Scaling applied after the components are combined, used with
    /// `SpecWeight` where one radius is shared.
    pub shared_scaling: FluxScaling,
    pub disks: Vec<DiskBindings>,
    /// Parallax binding for the disk dilution factors.
    pub disk_parallax: Option<ParamRef>,
    pub flux_offset: Option<ParamRef>,
    pub shape: DatasetShape,
}

impl ForwardModel {
    fn base_flux(&self, component: &Component, cube: &[f64]) -> Result<Array1<f64>, GridError> {
        match self.family {
            ModelFamily::Grid => {
                let values: Vec<f64> = component
                    .grid_params
                    .iter()
                    .map(|param| param.value(cube))
                    .collect();
                let handle = self.handle.as_ref().ok_or(GridError::WrongParameterCount {
                    expected: values.len(),
                    actual: 0,
                })?;
                handle.flux_at(&values)
            }
            ModelFamily::Planck => Ok(planck_flux(
                &self.model_wavel,
                component.grid_params[0].value(cube),
            )),
            ModelFamily::PowerLaw => {
                let a = component.grid_params[0].value(cube);
                let b = component.grid_params[1].value(cube);
                let c = component.grid_params[2].value(cube);
                Ok(self
                    .model_wavel
                    .mapv(|w| 10f64.powf(a + b * f64::log10(w).powf(c))))
            }
        }
    }

    /// Scaled and extincted flux of one component, including its share
    /// of the mixing weight.
    fn scaled_component(&self, index: usize, cube: &[f64]) -> Result<Array1<f64>, GridError> {
        let component = &self.components[index];
        let mut flux = self.base_flux(component, cube)?;
        let mut factor = component.scaling.factor(cube);
        if let BinaryCombine::SpecWeight(weight) = &self.combine {
            let weight = weight.value(cube);
            factor *= if index == 0 { weight } else { 1.0 - weight };
        }
        factor *= self.shared_scaling.factor(cube);
        flux *= factor;
        component.extinction.apply(&self.model_wavel, &mut flux, cube)?;
        Ok(flux)
    }

    /// Total model flux on `model_wavel`: components, disks, offset.
    fn assemble(&self, cube: &[f64]) -> Result<Array1<f64>, GridError> {
        let mut total = self.scaled_component(0, cube)?;
        for index in 1..self.components.len() {
            total += &self.scaled_component(index, cube)?;
        }
        if !self.disks.is_empty() {
            let parallax = self
                .disk_parallax
                .map(|p| p.value(cube))
                .unwrap_or(f64::NAN);
            for disk in &self.disks {
                let mut flux = planck_flux(&self.model_wavel, disk.teff.value(cube));
                flux *= radius_distance_scale(disk.radius.value(cube), parallax);
                self.components[0]
                    .extinction
                    .apply(&self.model_wavel, &mut flux, cube)?;
                total += &flux;
            }
        }
        if let Some(offset) = &self.flux_offset {
            total += offset.value(cube);
        }
        Ok(total)
    }

    /// Band-integrated model flux for a photometric dataset.
    pub fn photometric_flux(&self, cube: &[f64]) -> Result<f64, GridError> {
        let flux = self.assemble(cube)?;
        match &self.shape {
            DatasetShape::Photometric { filter } => {
                Ok(filter.synthetic_flux(&self.model_wavel, &flux))
            }
            DatasetShape::Spectral { .. } => {
                unreachable!("photometric flux requested from a spectral dataset model")
            }
        }
    }

    /// Band-integrated flux of a single component, for flux-ratio priors.
    pub fn component_photometric_flux(
        &self,
        index: usize,
        cube: &[f64],
    ) -> Result<f64, GridError> {
        let flux = self.scaled_component(index, cube)?;
        match &self.shape {
            DatasetShape::Photometric { filter } => {
                Ok(filter.synthetic_flux(&self.model_wavel, &flux))
            }
            DatasetShape::Spectral { .. } => {
                unreachable!("photometric flux requested from a spectral dataset model")
            }
        }
    }

    /// Model flux degraded and resampled onto the observed wavelengths.
    pub fn spectral_flux(&self, cube: &[f64]) -> Result<Array1<f64>, GridError> {
        let mut flux = self.assemble(cube)?;
        match &self.shape {
            DatasetShape::Spectral {
                wavel,
                resolution,
                vsini,
                rad_vel,
            } => {
                if let Some(vsini) = vsini {
                    flux = rotational_broadening(&self.model_wavel, &flux, vsini.value(cube));
                }
                flux = smooth_to_resolution(&self.model_wavel, &flux, *resolution);
                let shift = rad_vel.map_or(0.0, |rv| rv.value(cube));
                Ok(resample(&self.model_wavel, &flux, wavel, shift))
            }
            DatasetShape::Photometric { .. } => {
                unreachable!("spectral flux requested from a photometric dataset model")
            }
        }
    }
}
