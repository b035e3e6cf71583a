//! Inverse CDF of the standard normal distribution.
//!
//! Acklam's rational approximation refined with one Halley step against
//! `libm::erfc`, accurate to about 1e-9 relative in the far tails and
//! much better in the bulk. The prior transform calls this once per
//! normal-prior parameter per sample.

use std::f64::consts::{PI, SQRT_2};

const P_LOW: f64 = 0.024_25;
const P_HIGH: f64 = 1.0 - P_LOW;

const A: [f64; 6] = [
    -3.969_683_028_665_376e1,
    2.209_460_984_245_205e2,
    -2.759_285_104_469_687e2,
    1.383_577_518_672_690e2,
    -3.066_479_806_614_716e1,
    2.506_628_277_459_239,
];

const B: [f64; 5] = [
    -5.447_609_879_822_406e1,
    1.615_858_368_580_409e2,
    -1.556_989_798_598_866e2,
    6.680_131_188_771_972e1,
    -1.328_068_155_288_572e1,
];

const C: [f64; 6] = [
    -7.784_894_002_430_293e-3,
    -3.223_964_580_411_365e-1,
    -2.400_758_277_161_838,
    -2.549_732_539_343_734,
    4.374_664_141_464_968,
    2.938_163_982_698_783,
];

const D: [f64; 4] = [
    7.784_695_709_041_462e-3,
    3.224_671_290_700_398e-1,
    2.445_134_137_142_996,
    3.754_408_661_907_416,
];

/// Quantile function of the standard normal distribution.
///
/// Returns `-inf` for `p <= 0` and `+inf` for `p >= 1`.
pub fn inverse_normal_cdf(p: f64) -> f64 {
    if p <= 0.0 {
        return f64::NEG_INFINITY;
    }
    if p >= 1.0 {
        return f64::INFINITY;
    }

    let x = if p < P_LOW {
        let q = f64::sqrt(-2.0 * f64::ln(p));
        (((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    } else if p <= P_HIGH {
        let q = p - 0.5;
        let r = q * q;
        (((((A[0] * r + A[1]) * r + A[2]) * r + A[3]) * r + A[4]) * r + A[5]) * q
            / (((((B[0] * r + B[1]) * r + B[2]) * r + B[3]) * r + B[4]) * r + 1.0)
    } else {
        let q = f64::sqrt(-2.0 * f64::ln(1.0 - p));
        -(((((C[0] * q + C[1]) * q + C[2]) * q + C[3]) * q + C[4]) * q + C[5])
            / ((((D[0] * q + D[1]) * q + D[2]) * q + D[3]) * q + 1.0)
    };

    // Halley refinement
    let err = 0.5 * libm::erfc(-x / SQRT_2) - p;
    let u = err * f64::sqrt(2.0 * PI) * f64::exp(0.5 * x * x);
    x - u / (1.0 + 0.5 * x * u)
}

/// Quantile of a normal distribution with the given mean and sigma.
pub fn normal_ppf(p: f64, mean: f64, sigma: f64) -> f64 {
    mean + sigma * inverse_normal_cdf(p)
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;

    #[test]
    fn median_is_zero() {
        assert_eq!(inverse_normal_cdf(0.5), 0.0);
    }

    #[test]
    fn known_quantiles() {
        assert_relative_eq!(
            inverse_normal_cdf(0.975),
            1.959_963_984_540_054,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            inverse_normal_cdf(0.841_344_746_068_543),
            1.0,
            max_relative = 1e-12
        );
        assert_relative_eq!(
            inverse_normal_cdf(1e-10),
            -6.361_340_902_404_056,
            max_relative = 1e-9
        );
    }

    #[test]
    fn symmetric_tails() {
        for &p in &[1e-8, 1e-4, 0.01, 0.1, 0.3] {
            assert_relative_eq!(
                inverse_normal_cdf(p),
                -inverse_normal_cdf(1.0 - p),
                max_relative = 1e-9
            );
        }
    }

    #[test]
    fn round_trip_through_erfc() {
        for &x in &[-5.0, -1.5, -0.1, 0.0, 0.7, 2.3, 4.8] {
            let p = 0.5 * libm::erfc(-x / SQRT_2);
            assert_relative_eq!(inverse_normal_cdf(p), x, epsilon = 1e-12, max_relative = 1e-9);
        }
    }

    #[test]
    fn saturates_outside_unit_interval() {
        assert_eq!(inverse_normal_cdf(0.0), f64::NEG_INFINITY);
        assert_eq!(inverse_normal_cdf(1.0), f64::INFINITY);
    }

    #[test]
    fn scaled_quantile() {
        assert_relative_eq!(normal_ppf(0.5, 1200.0, 100.0), 1200.0, epsilon = 1e-9);
        assert_relative_eq!(
            normal_ppf(0.841_344_746_068_543, 10.0, 2.0),
            12.0,
            max_relative = 1e-10
        );
    }
}
