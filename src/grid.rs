//! Model-grid collaborator interface and the in-crate multilinear
//! interpolator.
//!
//! Interpolation setup is the expensive step, so it happens once per
//! dataset at fit construction: [`ModelGrid::interpolate`] cuts a
//! wavelength window (and optionally a teff window) out of the full cube
//! and returns a [`GridHandle`] whose `flux_at` is cheap enough for the
//! likelihood hot path.

use std::collections::BTreeMap;
use std::sync::Arc;

use ndarray::{Array1, ArrayD, Axis, Ix1, Slice};

use crate::error::GridError;

/// Pre-interpolated grid for one dataset window.
pub trait GridHandle: Send + Sync {
    /// Grid parameter names, in the order `flux_at` expects.
    fn parameter_names(&self) -> &[String];

    /// Stored extent per parameter, aligned with `parameter_names`.
    fn bounds(&self) -> &[(f64, f64)];

    /// Wavelengths of the returned flux arrays (um).
    fn wavelengths(&self) -> &Array1<f64>;

    /// Interpolated flux at the given parameter coordinates.
    ///
    /// Coordinates outside the stored box fail with
    /// [`GridError::OutOfBounds`]; the likelihood maps that to `-inf`.
    fn flux_at(&self, params: &[f64]) -> Result<Array1<f64>, GridError>;
}

/// Full model grid, able to produce per-dataset handles.
pub trait ModelGrid: Send + Sync {
    fn name(&self) -> &str;

    fn parameter_names(&self) -> Vec<String>;

    fn bounds(&self) -> BTreeMap<String, (f64, f64)>;

    /// Cut a handle covering the wavelength window, optionally restricted
    /// to the teff points needed for the given range.
    fn interpolate(
        &self,
        wavel_range: (f64, f64),
        teff_range: Option<(f64, f64)>,
    ) -> Result<Arc<dyn GridHandle>, GridError>;
}

/// Multilinear interpolator over a rectangular parameter lattice.
///
/// The flux cube has one axis per parameter plus a trailing wavelength
/// axis. Single-point axes are allowed and contribute weight one.
#[derive(Clone, Debug)]
pub struct InterpolatedGrid {
    names: Vec<String>,
    axes: Vec<Vec<f64>>,
    bounds: Vec<(f64, f64)>,
    wavelengths: Array1<f64>,
    flux: ArrayD<f64>,
}

impl InterpolatedGrid {
    pub fn new(
        axes: Vec<(String, Vec<f64>)>,
        wavelengths: Array1<f64>,
        flux: ArrayD<f64>,
    ) -> Result<Self, GridError> {
        let mut expected: Vec<usize> = Vec::with_capacity(axes.len() + 1);
        for (name, points) in &axes {
            if points.is_empty() {
                return Err(GridError::EmptyAxis(name.clone()));
            }
            expected.push(points.len());
        }
        expected.push(wavelengths.len());
        if flux.shape() != expected.as_slice() {
            return Err(GridError::ShapeMismatch {
                expected,
                actual: flux.shape().to_vec(),
            });
        }
        let bounds = axes
            .iter()
            .map(|(_, points)| (points[0], points[points.len() - 1]))
            .collect();
        let (names, axes) = axes.into_iter().unzip();
        Ok(Self {
            names,
            axes,
            bounds,
            wavelengths,
            flux,
        })
    }

    /// Cell index and fractional position of a value on one axis.
    fn locate(&self, axis: usize, value: f64) -> Result<(usize, f64), GridError> {
        let points = &self.axes[axis];
        let (lo, hi) = self.bounds[axis];
        if value < lo || value > hi {
            return Err(GridError::OutOfBounds {
                name: self.names[axis].clone(),
                value,
                lo,
                hi,
            });
        }
        if points.len() == 1 {
            return Ok((0, 0.0));
        }
        let cell = points
            .partition_point(|&p| p <= value)
            .clamp(1, points.len() - 1)
            - 1;
        let frac = (value - points[cell]) / (points[cell + 1] - points[cell]);
        Ok((cell, frac))
    }
}

impl GridHandle for InterpolatedGrid {
    fn parameter_names(&self) -> &[String] {
        &self.names
    }

    fn bounds(&self) -> &[(f64, f64)] {
        &self.bounds
    }

    fn wavelengths(&self) -> &Array1<f64> {
        &self.wavelengths
    }

    fn flux_at(&self, params: &[f64]) -> Result<Array1<f64>, GridError> {
        if params.len() != self.axes.len() {
            return Err(GridError::WrongParameterCount {
                expected: self.axes.len(),
                actual: params.len(),
            });
        }
        let cells: Vec<(usize, f64)> = params
            .iter()
            .enumerate()
            .map(|(axis, &value)| self.locate(axis, value))
            .collect::<Result<_, _>>()?;

        let n_axes = self.axes.len();
        let mut result = Array1::zeros(self.wavelengths.len());
        for corner in 0..(1usize << n_axes) {
            let mut weight = 1.0;
            let mut view = self.flux.view();
            for (axis, &(cell, frac)) in cells.iter().enumerate() {
                let upper = corner >> axis & 1 == 1;
                weight *= if upper { frac } else { 1.0 - frac };
                let index = if upper && self.axes[axis].len() > 1 {
                    cell + 1
                } else {
                    cell
                };
                view = view.index_axis_move(Axis(0), index);
            }
            if weight == 0.0 {
                continue;
            }
            let row = view
                .into_dimensionality::<Ix1>()
                .expect("flux cube dimensionality is checked at construction");
            result.zip_mut_with(&row, |r, &f| *r += weight * f);
        }
        Ok(result)
    }
}

/// In-memory [`ModelGrid`] over a full flux cube.
#[derive(Clone, Debug)]
pub struct ArrayModelGrid {
    name: String,
    axes: Vec<(String, Vec<f64>)>,
    wavelengths: Array1<f64>,
    flux: ArrayD<f64>,
}

impl ArrayModelGrid {
    pub fn new(
        name: impl Into<String>,
        axes: Vec<(String, Vec<f64>)>,
        wavelengths: Array1<f64>,
        flux: ArrayD<f64>,
    ) -> Result<Self, GridError> {
        // Validates the cube shape up front.
        InterpolatedGrid::new(axes.clone(), wavelengths.clone(), flux.clone())?;
        Ok(Self {
            name: name.into(),
            axes,
            wavelengths,
            flux,
        })
    }
}

impl ModelGrid for ArrayModelGrid {
    fn name(&self) -> &str {
        &self.name
    }

    fn parameter_names(&self) -> Vec<String> {
        self.axes.iter().map(|(name, _)| name.clone()).collect()
    }

    fn bounds(&self) -> BTreeMap<String, (f64, f64)> {
        self.axes
            .iter()
            .map(|(name, points)| (name.clone(), (points[0], points[points.len() - 1])))
            .collect()
    }

    fn interpolate(
        &self,
        wavel_range: (f64, f64),
        teff_range: Option<(f64, f64)>,
    ) -> Result<Arc<dyn GridHandle>, GridError> {
        let wavel = self
            .wavelengths
            .as_slice()
            .expect("grid wavelengths are contiguous");
        // Keep one point beyond each edge so the window edges interpolate.
        let w_start = wavel.partition_point(|&w| w < wavel_range.0).saturating_sub(1);
        let w_end = wavel
            .partition_point(|&w| w <= wavel_range.1)
            .saturating_add(1)
            .min(wavel.len());
        if w_start >= w_end {
            return Err(GridError::EmptyAxis("wavelength".into()));
        }

        let mut axes = self.axes.clone();
        let mut slices: Vec<(usize, usize)> = axes
            .iter()
            .map(|(_, points)| (0, points.len()))
            .collect();
        if let Some((t_lo, t_hi)) = teff_range {
            if let Some(axis) = axes.iter().position(|(name, _)| name == "teff") {
                let points = &axes[axis].1;
                let start = points.partition_point(|&p| p <= t_lo).saturating_sub(1);
                let end = points
                    .partition_point(|&p| p < t_hi)
                    .saturating_add(1)
                    .min(points.len());
                if start >= end {
                    return Err(GridError::EmptyAxis("teff".into()));
                }
                slices[axis] = (start, end);
                axes[axis].1 = points[start..end].to_vec();
            }
        }

        let n_axes = axes.len();
        let flux = self
            .flux
            .slice_each_axis(|descr| {
                let axis = descr.axis.index();
                let (start, end) = if axis < n_axes {
                    slices[axis]
                } else {
                    (w_start, w_end)
                };
                Slice::from(start..end)
            })
            .to_owned();
        let wavelengths = self.wavelengths.slice(ndarray::s![w_start..w_end]).to_owned();
        Ok(Arc::new(InterpolatedGrid::new(axes, wavelengths, flux)?))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::Array;

    /// 3x2 lattice in (teff, logg) over four wavelengths with flux
    /// linear in both parameters, so multilinear interpolation is exact.
    fn linear_grid() -> ArrayModelGrid {
        let teff = vec![1000.0, 2000.0, 3000.0];
        let logg = vec![4.0, 5.0];
        let wavel = Array1::linspace(1.0, 4.0, 4);
        let flux = Array::from_shape_fn((3, 2, 4), |(i, j, k)| {
            1e-3 * teff[i] + logg[j] + 0.1 * (k as f64)
        })
        .into_dyn();
        ArrayModelGrid::new(
            "linear",
            vec![("teff".into(), teff), ("logg".into(), logg)],
            wavel,
            flux,
        )
        .unwrap()
    }

    #[test]
    fn interpolation_is_exact_for_linear_flux() {
        let handle = linear_grid().interpolate((1.0, 4.0), None).unwrap();
        let flux = handle.flux_at(&[1500.0, 4.3]).unwrap();
        for (k, &f) in flux.iter().enumerate() {
            assert_relative_eq!(f, 1.5 + 4.3 + 0.1 * k as f64, max_relative = 1e-12);
        }
    }

    #[test]
    fn grid_points_reproduce_stored_flux() {
        let handle = linear_grid().interpolate((1.0, 4.0), None).unwrap();
        let flux = handle.flux_at(&[2000.0, 5.0]).unwrap();
        assert_relative_eq!(flux[0], 2.0 + 5.0, max_relative = 1e-12);
    }

    #[test]
    fn out_of_bounds_is_an_error_not_a_panic() {
        let handle = linear_grid().interpolate((1.0, 4.0), None).unwrap();
        let err = handle.flux_at(&[3500.0, 4.5]).unwrap_err();
        assert!(matches!(err, GridError::OutOfBounds { name, .. } if name == "teff"));
    }

    #[test]
    fn teff_window_restricts_the_handle_bounds() {
        let handle = linear_grid()
            .interpolate((1.0, 4.0), Some((1200.0, 1800.0)))
            .unwrap();
        assert_eq!(handle.bounds()[0], (1000.0, 2000.0));
        assert!(handle.flux_at(&[2500.0, 4.5]).is_err());
        assert!(handle.flux_at(&[1500.0, 4.5]).is_ok());
    }

    #[test]
    fn wavelength_window_keeps_edge_points() {
        let handle = linear_grid().interpolate((1.9, 3.1), None).unwrap();
        let wavel = handle.wavelengths();
        assert_eq!(wavel.len(), 4);
    }

    #[test]
    fn wrong_parameter_count_is_rejected() {
        let handle = linear_grid().interpolate((1.0, 4.0), None).unwrap();
        assert_eq!(
            handle.flux_at(&[1500.0]).unwrap_err(),
            GridError::WrongParameterCount {
                expected: 2,
                actual: 1
            }
        );
    }
}
