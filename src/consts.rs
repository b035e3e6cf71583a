//! Physical constants (SI) and the few unit conversions the fit needs.

/// Speed of light (m s-1)
pub const SPEED_OF_LIGHT: f64 = 2.997_924_58e8;

/// Planck constant (J s)
pub const PLANCK_CONSTANT: f64 = 6.626_070_15e-34;

/// Boltzmann constant (J K-1)
pub const BOLTZMANN_CONSTANT: f64 = 1.380_649e-23;

/// Gravitational constant (m3 kg-1 s-2)
pub const GRAVITATIONAL_CONSTANT: f64 = 6.674_30e-11;

/// Jupiter radius (m)
pub const R_JUPITER: f64 = 7.1492e7;

/// Jupiter mass (kg)
pub const M_JUPITER: f64 = 1.898_13e27;

/// Parsec (m)
pub const PARSEC: f64 = 3.085_677_581_47e16;

/// Mass (Mjup) from the surface gravity (log10 of g in cgs units) and
/// the radius (Rjup).
pub fn logg_to_mass(logg: f64, radius: f64) -> f64 {
    // 1 cm s-2 = 1e-2 m s-2
    let gravity = 1e-2 * 10f64.powf(logg);
    let radius_m = radius * R_JUPITER;
    gravity * radius_m * radius_m / GRAVITATIONAL_CONSTANT / M_JUPITER
}

/// Dilution factor (radius / distance)^2 from the radius (Rjup) and
/// the parallax (mas).
pub fn radius_distance_scale(radius: f64, parallax: f64) -> f64 {
    let distance = 1e3 / parallax * PARSEC;
    let radius_m = radius * R_JUPITER;
    (radius_m / distance).powi(2)
}
