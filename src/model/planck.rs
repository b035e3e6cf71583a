//! Blackbody flux, used for disk components and the `planck` model family.

use ndarray::Array1;

use crate::consts::{BOLTZMANN_CONSTANT, PLANCK_CONSTANT, SPEED_OF_LIGHT};

/// Surface flux of a blackbody, `pi B_lambda`, in W m-2 um-1.
///
/// The caller scales by the dilution factor `(radius / distance)^2`.
pub fn planck_flux(wavel: &Array1<f64>, teff: f64) -> Array1<f64> {
    wavel.mapv(|w| {
        let lambda = w * 1e-6;
        let exponent = PLANCK_CONSTANT * SPEED_OF_LIGHT / (lambda * BOLTZMANN_CONSTANT * teff);
        let radiance = 2.0 * PLANCK_CONSTANT * SPEED_OF_LIGHT * SPEED_OF_LIGHT
            / lambda.powi(5)
            / f64::exp_m1(exponent);
        // per-m to per-um
        std::f64::consts::PI * radiance * 1e-6
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::array;

    #[test]
    fn wien_peak_moves_with_temperature() {
        let wavel = Array1::linspace(0.3, 30.0, 2000);
        let peak = |teff: f64| {
            let flux = planck_flux(&wavel, teff);
            let (argmax, _) = flux
                .iter()
                .enumerate()
                .fold((0, f64::NEG_INFINITY), |acc, (i, &f)| {
                    if f > acc.1 { (i, f) } else { acc }
                });
            wavel[argmax]
        };
        // Wien: lambda_max = 2898 um K / T
        assert_relative_eq!(peak(1000.0), 2.898, max_relative = 0.02);
        assert_relative_eq!(peak(2000.0), 1.449, max_relative = 0.02);
    }

    #[test]
    fn hotter_is_brighter_everywhere() {
        let wavel = array![0.5, 1.0, 2.0, 5.0, 10.0];
        let cool = planck_flux(&wavel, 1200.0);
        let hot = planck_flux(&wavel, 1800.0);
        for (c, h) in cool.iter().zip(hot.iter()) {
            assert!(h > c);
        }
    }
}
