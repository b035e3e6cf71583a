//! Wavelength-dependent extinction: the analytic Cardelli ISM law and
//! tabulated grain cross-sections for log-normal and power-law size
//! distributions.

use std::sync::Arc;

use enum_dispatch::enum_dispatch;
use ndarray::{Array1, Array3};

use crate::error::GridError;
use crate::params::ParamRef;

/// Reference wavelength of the V band (um), where A_V is defined.
const V_BAND: f64 = 0.55;

const DEFAULT_RV: f64 = 3.1;

/// Cardelli, Clayton & Mathis (1989) coefficients, A_lambda / A_V =
/// a(x) + b(x) / R_V with x = 1 / lambda in inverse um.
///
/// The infrared power law is extrapolated below x = 0.3 and the curve is
/// clamped at x = 8 in the far UV.
fn ccm89_ratio(wavel: f64, rv: f64) -> f64 {
    let x = (1.0 / wavel).min(8.0);
    let (a, b) = if x < 1.1 {
        let p = x.powf(1.61);
        (0.574 * p, -0.527 * p)
    } else if x < 3.3 {
        let y = x - 1.82;
        let a = 1.0
            + y * (0.17699
                + y * (-0.50447
                    + y * (-0.02427
                        + y * (0.72085
                            + y * (0.01979 + y * (-0.77530 + y * 0.32999))))));
        let b = y
            * (1.41338
                + y * (2.28305
                    + y * (1.07233
                        + y * (-5.38434
                            + y * (-0.62251 + y * (5.30260 + y * -2.09002))))));
        (a, b)
    } else {
        let (fa, fb) = if x >= 5.9 {
            let y = x - 5.9;
            (
                -0.04473 * y * y - 0.009779 * y * y * y,
                0.2130 * y * y + 0.1207 * y * y * y,
            )
        } else {
            (0.0, 0.0)
        };
        (
            1.752 - 0.316 * x - 0.104 / ((x - 4.67).powi(2) + 0.341) + fa,
            -3.090 + 1.825 * x + 1.206 / ((x - 4.62).powi(2) + 0.263) + fb,
        )
    };
    a + b / rv
}

/// Tabulated grain extinction cross-sections on a rectangular
/// (size parameter, distribution shape, wavelength) lattice.
///
/// For a log-normal size distribution the axes are the log10 geometric
/// mean radius (um) and the geometric sigma; for a power law they are
/// the log10 maximum radius (um) and the exponent.
#[derive(Clone, Debug)]
pub struct CrossSectionTable {
    size: Vec<f64>,
    shape: Vec<f64>,
    wavel: Vec<f64>,
    data: Array3<f64>,
}

impl CrossSectionTable {
    pub fn new(
        size: Vec<f64>,
        shape: Vec<f64>,
        wavel: Vec<f64>,
        data: Array3<f64>,
    ) -> Result<Self, GridError> {
        let expected = [size.len(), shape.len(), wavel.len()];
        if size.is_empty() || shape.is_empty() {
            return Err(GridError::EmptyAxis("grain size".into()));
        }
        if wavel.len() < 2 {
            return Err(GridError::EmptyAxis("wavelength".into()));
        }
        if data.shape() != expected {
            return Err(GridError::ShapeMismatch {
                expected: expected.to_vec(),
                actual: data.shape().to_vec(),
            });
        }
        Ok(Self {
            size,
            shape,
            wavel,
            data,
        })
    }

    fn locate(axis: &[f64], name: &'static str, value: f64) -> Result<(usize, f64), GridError> {
        let n = axis.len();
        if value < axis[0] || value > axis[n - 1] {
            return Err(GridError::OutOfBounds {
                name: name.into(),
                value,
                lo: axis[0],
                hi: axis[n - 1],
            });
        }
        if n == 1 {
            return Ok((0, 0.0));
        }
        let cell = axis.partition_point(|&p| p <= value).clamp(1, n - 1) - 1;
        Ok((cell, (value - axis[cell]) / (axis[cell + 1] - axis[cell])))
    }

    /// Cross-section at one wavelength, bilinear in (size, shape) and
    /// linear in wavelength. Wavelengths beyond the table are clamped.
    pub fn cross_section(
        &self,
        size: f64,
        shape: f64,
        wavel: f64,
    ) -> Result<f64, GridError> {
        let (i, fi) = Self::locate(&self.size, "grain size", size)?;
        let (j, fj) = Self::locate(&self.shape, "distribution shape", shape)?;
        let wavel = wavel.clamp(self.wavel[0], self.wavel[self.wavel.len() - 1]);
        let (k, fk) = Self::locate(&self.wavel, "wavelength", wavel)?;
        let i1 = (i + 1).min(self.size.len() - 1);
        let j1 = (j + 1).min(self.shape.len() - 1);
        let k1 = (k + 1).min(self.wavel.len() - 1);
        let at = |i, j, k| self.data[[i, j, k]];
        let plane = |k| {
            (1.0 - fi) * ((1.0 - fj) * at(i, j, k) + fj * at(i, j1, k))
                + fi * ((1.0 - fj) * at(i1, j, k) + fj * at(i1, j1, k))
        };
        Ok((1.0 - fk) * plane(k) + fk * plane(k1))
    }
}

/// Attenuate a model flux in place, reading the extinction parameters
/// from the bound sample vector.
#[enum_dispatch]
pub trait AttenuateFlux {
    fn apply(
        &self,
        wavel: &Array1<f64>,
        flux: &mut Array1<f64>,
        cube: &[f64],
    ) -> Result<(), GridError>;
}

#[derive(Clone, Copy, Debug, Default)]
pub struct NoExtinction;

impl AttenuateFlux for NoExtinction {
    fn apply(&self, _: &Array1<f64>, _: &mut Array1<f64>, _: &[f64]) -> Result<(), GridError> {
        Ok(())
    }
}

/// ISM extinction with the Cardelli law.
///
/// When `ext_wavel` is set, the fitted extinction parameter is the
/// extinction in a photometric filter at that wavelength instead of A_V.
#[derive(Clone, Copy, Debug)]
pub struct IsmExtinction {
    pub av: ParamRef,
    pub rv: Option<ParamRef>,
    pub ext_wavel: Option<f64>,
}

impl AttenuateFlux for IsmExtinction {
    fn apply(
        &self,
        wavel: &Array1<f64>,
        flux: &mut Array1<f64>,
        cube: &[f64],
    ) -> Result<(), GridError> {
        let rv = self.rv.map_or(DEFAULT_RV, |rv| rv.value(cube));
        let mut av = self.av.value(cube);
        if let Some(ext_wavel) = self.ext_wavel {
            av /= ccm89_ratio(ext_wavel, rv);
        }
        for (w, f) in wavel.iter().zip(flux.iter_mut()) {
            *f *= 10f64.powf(-0.4 * av * ccm89_ratio(*w, rv));
        }
        Ok(())
    }
}

fn apply_grains(
    table: &CrossSectionTable,
    size: f64,
    shape: f64,
    av: f64,
    wavel: &Array1<f64>,
    flux: &mut Array1<f64>,
) -> Result<(), GridError> {
    let reference = table.cross_section(size, shape, V_BAND)?;
    for (w, f) in wavel.iter().zip(flux.iter_mut()) {
        let ratio = table.cross_section(size, shape, *w)? / reference;
        *f *= 10f64.powf(-0.4 * av * ratio);
    }
    Ok(())
}

/// Grain extinction with a log-normal size distribution. `log_radius`
/// is sampled in log10 um.
#[derive(Clone, Debug)]
pub struct LogNormalGrains {
    pub table: Arc<CrossSectionTable>,
    pub log_radius: ParamRef,
    pub sigma: ParamRef,
    pub av: ParamRef,
}

impl AttenuateFlux for LogNormalGrains {
    fn apply(
        &self,
        wavel: &Array1<f64>,
        flux: &mut Array1<f64>,
        cube: &[f64],
    ) -> Result<(), GridError> {
        apply_grains(
            &self.table,
            self.log_radius.value(cube),
            self.sigma.value(cube),
            self.av.value(cube),
            wavel,
            flux,
        )
    }
}

/// Grain extinction with a power-law size distribution. `log_max_radius`
/// is sampled in log10 um.
#[derive(Clone, Debug)]
pub struct PowerLawGrains {
    pub table: Arc<CrossSectionTable>,
    pub log_max_radius: ParamRef,
    pub exponent: ParamRef,
    pub av: ParamRef,
}

impl AttenuateFlux for PowerLawGrains {
    fn apply(
        &self,
        wavel: &Array1<f64>,
        flux: &mut Array1<f64>,
        cube: &[f64],
    ) -> Result<(), GridError> {
        apply_grains(
            &self.table,
            self.log_max_radius.value(cube),
            self.exponent.value(cube),
            self.av.value(cube),
            wavel,
            flux,
        )
    }
}

/// Active extinction model, exactly zero or one per fit component.
#[enum_dispatch(AttenuateFlux)]
#[derive(Clone, Debug)]
pub enum ExtinctionLaw {
    NoExtinction,
    IsmExtinction,
    LogNormalGrains,
    PowerLawGrains,
}

impl Default for ExtinctionLaw {
    fn default() -> Self {
        Self::NoExtinction(NoExtinction)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{array, Array3};

    #[test]
    fn v_band_ratio_is_unity() {
        assert_relative_eq!(ccm89_ratio(V_BAND, 3.1), 1.0, max_relative = 0.02);
    }

    #[test]
    fn extinction_decreases_into_the_infrared() {
        let visible = ccm89_ratio(0.55, 3.1);
        let j_band = ccm89_ratio(1.25, 3.1);
        let k_band = ccm89_ratio(2.2, 3.1);
        assert!(visible > j_band);
        assert!(j_band > k_band);
        assert!(k_band > 0.0);
    }

    #[test]
    fn ism_dims_one_magnitude_per_av_in_v() {
        let law = IsmExtinction {
            av: ParamRef::Fixed(2.5),
            rv: None,
            ext_wavel: None,
        };
        let wavel = array![V_BAND];
        let mut flux = array![1.0];
        law.apply(&wavel, &mut flux, &[]).unwrap();
        assert_relative_eq!(flux[0], 10f64.powf(-0.4 * 2.5), max_relative = 0.05);
    }

    #[test]
    fn filter_referenced_extinction_matches_at_that_wavelength() {
        let ks = 2.15;
        let law = IsmExtinction {
            av: ParamRef::Fixed(1.0),
            rv: None,
            ext_wavel: Some(ks),
        };
        let wavel = array![ks];
        let mut flux = array![1.0];
        law.apply(&wavel, &mut flux, &[]).unwrap();
        // one magnitude of extinction in the reference filter itself
        assert_relative_eq!(flux[0], 10f64.powf(-0.4), max_relative = 1e-10);
    }

    fn flat_table() -> CrossSectionTable {
        // cross-section halves from 0.5 um to 5 um
        CrossSectionTable::new(
            vec![-2.0, 0.0],
            vec![1.0, 5.0],
            vec![0.5, 5.0],
            Array3::from_shape_fn((2, 2, 2), |(_, _, k)| if k == 0 { 2.0 } else { 1.0 }),
        )
        .unwrap()
    }

    #[test]
    fn grain_extinction_normalized_in_v() {
        let table = flat_table();
        let sigma_v = table.cross_section(-1.0, 2.0, V_BAND).unwrap();
        let law = LogNormalGrains {
            table: Arc::new(table),
            log_radius: ParamRef::Fixed(-1.0),
            sigma: ParamRef::Fixed(2.0),
            av: ParamRef::Fixed(1.0),
        };
        let wavel = array![0.5, 5.0];
        let mut flux = array![1.0, 1.0];
        law.apply(&wavel, &mut flux, &[]).unwrap();
        let expected_0 = 10f64.powf(-0.4 * 2.0 / sigma_v);
        let expected_1 = 10f64.powf(-0.4 * 1.0 / sigma_v);
        assert_relative_eq!(flux[0], expected_0, max_relative = 1e-10);
        assert_relative_eq!(flux[1], expected_1, max_relative = 1e-10);
    }

    #[test]
    fn grain_size_outside_the_table_is_an_error() {
        let law = PowerLawGrains {
            table: Arc::new(flat_table()),
            log_max_radius: ParamRef::Fixed(1.5),
            exponent: ParamRef::Fixed(2.0),
            av: ParamRef::Fixed(1.0),
        };
        let wavel = array![1.0];
        let mut flux = array![1.0];
        let err = law.apply(&wavel, &mut flux, &[]).unwrap_err();
        assert!(matches!(err, GridError::OutOfBounds { .. }));
    }
}
