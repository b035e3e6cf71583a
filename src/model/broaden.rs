//! Observational degradation of model spectra: rotational broadening,
//! radial-velocity shift, instrumental smoothing and resampling.
//!
//! Broadening and smoothing assume a logarithmically spaced wavelength
//! grid, where a constant pixel step corresponds to a constant velocity
//! step.

use ndarray::Array1;

use crate::consts::SPEED_OF_LIGHT;

/// Logarithmically spaced wavelengths covering the range, sampled at two
/// points per resolution element.
pub fn create_wavelengths(range: (f64, f64), resolution: f64) -> Array1<f64> {
    let step = 1.0 + 0.5 / resolution;
    let mut wavel = vec![range.0];
    while *wavel.last().expect("seeded with the lower edge") < range.1 {
        wavel.push(wavel.last().expect("seeded with the lower edge") * step);
    }
    Array1::from_vec(wavel)
}

/// Mean logarithmic pixel spacing d(ln lambda).
fn log_spacing(wavel: &Array1<f64>) -> f64 {
    let n = wavel.len();
    (f64::ln(wavel[n - 1]) - f64::ln(wavel[0])) / (n - 1) as f64
}

/// Convolution with clamped edges ("nearest" boundary handling).
fn convolve(flux: &Array1<f64>, kernel: &[f64]) -> Array1<f64> {
    let n = flux.len();
    let radius = kernel.len() / 2;
    Array1::from_shape_fn(n, |i| {
        kernel
            .iter()
            .enumerate()
            .map(|(k, &weight)| {
                let j = (i + k).saturating_sub(radius).min(n - 1);
                weight * flux[j]
            })
            .sum()
    })
}

/// Smooth a spectrum to the requested resolving power.
///
/// The line-spread function is a Gaussian with a FWHM of one resolution
/// element. Returns the input unchanged when the grid already resolves
/// less than the target.
pub fn smooth_to_resolution(
    wavel: &Array1<f64>,
    flux: &Array1<f64>,
    resolution: f64,
) -> Array1<f64> {
    if wavel.len() < 2 {
        return flux.clone();
    }
    let sigma_lsf = 1.0 / resolution / (2.0 * f64::sqrt(2.0 * f64::ln(2.0)));
    let sigma_pix = sigma_lsf / log_spacing(wavel);
    if sigma_pix < 0.1 {
        return flux.clone();
    }
    let radius = (4.0 * sigma_pix).ceil() as usize;
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|k| {
            let x = (k as f64 - radius as f64) / sigma_pix;
            f64::exp(-0.5 * x * x)
        })
        .collect();
    let norm: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|w| *w /= norm);
    convolve(flux, &kernel)
}

/// Rotationally broaden a spectrum with the classical broadening kernel
/// and a linear limb-darkening coefficient of 0.6.
///
/// `vsini` is in km s-1. A no-op when the kernel would be narrower than
/// one pixel.
pub fn rotational_broadening(wavel: &Array1<f64>, flux: &Array1<f64>, vsini: f64) -> Array1<f64> {
    const EPSILON: f64 = 0.6;
    if wavel.len() < 2 || vsini <= 0.0 {
        return flux.clone();
    }
    let vsini = vsini * 1e3;
    let dv = SPEED_OF_LIGHT * log_spacing(wavel);
    let radius = (vsini / dv).floor() as usize;
    if radius == 0 {
        return flux.clone();
    }
    let mut kernel: Vec<f64> = (0..=2 * radius)
        .map(|k| {
            let v = (k as f64 - radius as f64) * dv / vsini;
            let arg = 1.0 - v * v;
            if arg <= 0.0 {
                0.0
            } else {
                2.0 * (1.0 - EPSILON) * f64::sqrt(arg)
                    + 0.5 * std::f64::consts::PI * EPSILON * arg
            }
        })
        .collect();
    let norm: f64 = kernel.iter().sum();
    kernel.iter_mut().for_each(|w| *w /= norm);
    convolve(flux, &kernel)
}

/// Linearly resample a spectrum onto the target wavelengths, optionally
/// shifting by a radial velocity (km s-1) first.
///
/// Target points outside the source range become NaN; the likelihood
/// excludes them through NaN-aware summation.
pub fn resample(
    from_wavel: &Array1<f64>,
    from_flux: &Array1<f64>,
    to_wavel: &Array1<f64>,
    rad_vel: f64,
) -> Array1<f64> {
    let shift = 1.0 + rad_vel * 1e3 / SPEED_OF_LIGHT;
    let n = from_wavel.len();
    to_wavel.mapv(|w| {
        let w = w / shift;
        if n < 2 || w < from_wavel[0] || w > from_wavel[n - 1] {
            return f64::NAN;
        }
        let idx = from_wavel
            .as_slice()
            .expect("model wavelengths are contiguous")
            .partition_point(|&x| x < w)
            .clamp(1, n - 1);
        let (w0, w1) = (from_wavel[idx - 1], from_wavel[idx]);
        let frac = (w - w0) / (w1 - w0);
        from_flux[idx - 1] * (1.0 - frac) + from_flux[idx] * frac
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn wavelength_grid_is_log_spaced() {
        let wavel = create_wavelengths((1.0, 2.0), 100.0);
        assert!(wavel[0] <= 1.0 + 1e-12);
        assert!(*wavel.last().unwrap() >= 2.0);
        let ratio0 = wavel[1] / wavel[0];
        let ratio1 = wavel[wavel.len() - 1] / wavel[wavel.len() - 2];
        assert_relative_eq!(ratio0, ratio1, max_relative = 1e-12);
    }

    #[test]
    fn smoothing_preserves_a_flat_spectrum() {
        let wavel = create_wavelengths((1.0, 1.5), 1000.0);
        let flux = Array1::from_elem(wavel.len(), 3.0e-15);
        let smoothed = smooth_to_resolution(&wavel, &flux, 100.0);
        for &f in smoothed.iter() {
            assert_relative_eq!(f, 3.0e-15, max_relative = 1e-10);
        }
    }

    #[test]
    fn smoothing_spreads_an_emission_line() {
        let wavel = create_wavelengths((1.0, 1.5), 10_000.0);
        let mut flux = Array1::zeros(wavel.len());
        let center = wavel.len() / 2;
        flux[center] = 1.0;
        let smoothed = smooth_to_resolution(&wavel, &flux, 200.0);
        assert!(smoothed[center] < 0.5);
        assert!(smoothed[center - 1] > 0.0);
        // kernel is normalized
        assert_relative_eq!(smoothed.sum(), 1.0, max_relative = 1e-8);
    }

    #[test]
    fn broadening_preserves_a_flat_spectrum() {
        let wavel = create_wavelengths((2.0, 2.4), 5000.0);
        let flux = Array1::from_elem(wavel.len(), 1.0);
        let broadened = rotational_broadening(&wavel, &flux, 40.0);
        for &f in broadened.iter() {
            assert_relative_eq!(f, 1.0, max_relative = 1e-10);
        }
    }

    #[test]
    fn narrow_kernel_is_a_no_op() {
        let wavel = create_wavelengths((2.0, 2.4), 100.0);
        let flux = Array1::linspace(0.0, 1.0, wavel.len());
        // one pixel is c / (2 * 100) = 1500 km/s wide
        let broadened = rotational_broadening(&wavel, &flux, 10.0);
        assert_eq!(broadened, flux);
    }

    #[test]
    fn resampling_interpolates_linearly() {
        let from = array![1.0, 2.0, 3.0];
        let flux = array![10.0, 20.0, 30.0];
        let to = array![1.5, 2.5];
        let out = resample(&from, &flux, &to, 0.0);
        assert_relative_eq!(out[0], 15.0, max_relative = 1e-12);
        assert_relative_eq!(out[1], 25.0, max_relative = 1e-12);
    }

    #[test]
    fn resampling_outside_the_range_is_nan() {
        let from = array![1.0, 2.0];
        let flux = array![10.0, 20.0];
        let out = resample(&from, &flux, &array![0.5, 1.5, 2.5], 0.0);
        assert!(out[0].is_nan());
        assert_relative_eq!(out[1], 15.0, max_relative = 1e-12);
        assert!(out[2].is_nan());
    }

    #[test]
    fn radial_velocity_shifts_the_spectrum_redward() {
        let from = Array1::linspace(1.0, 1.1, 1000);
        let flux = from.mapv(|w| w);
        let to = array![1.05];
        let rv = 100.0; // km/s
        let out = resample(&from, &flux, &to, rv);
        let expected = 1.05 / (1.0 + 1e5 / SPEED_OF_LIGHT);
        assert_relative_eq!(out[0], expected, max_relative = 1e-8);
    }
}
