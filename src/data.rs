//! Observed datasets and the object-data collaborator interface.

use ndarray::{Array1, Array2};

/// Filter transmission profile.
///
/// Names follow the `Telescope/Instrument.Band` convention; everything
/// before the dot identifies the instrument, which groups filters for
/// instrument-wide error inflation.
#[derive(Clone, Debug)]
pub struct Filter {
    name: String,
    wavel: Array1<f64>,
    transmission: Array1<f64>,
}

impl Filter {
    pub fn new(name: impl Into<String>, wavel: Array1<f64>, transmission: Array1<f64>) -> Self {
        assert_eq!(
            wavel.len(),
            transmission.len(),
            "filter profile arrays must have equal length"
        );
        Self {
            name: name.into(),
            wavel,
            transmission,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Instrument part of the filter name (up to the dot).
    pub fn instrument(&self) -> &str {
        self.name.split('.').next().unwrap_or(&self.name)
    }

    /// Wavelength coverage of the profile (um).
    pub fn range(&self) -> (f64, f64) {
        (self.wavel[0], self.wavel[self.wavel.len() - 1])
    }

    /// Transmission-weighted mean wavelength (um).
    pub fn mean_wavelength(&self) -> f64 {
        let mut num = 0.0;
        let mut den = 0.0;
        for i in 1..self.wavel.len() {
            let dw = self.wavel[i] - self.wavel[i - 1];
            let t = 0.5 * (self.transmission[i] + self.transmission[i - 1]);
            let w = 0.5 * (self.wavel[i] + self.wavel[i - 1]);
            num += t * w * dw;
            den += t * dw;
        }
        num / den
    }

    /// Full width at half maximum of the transmission curve (um).
    pub fn fwhm(&self) -> f64 {
        let half = 0.5
            * self
                .transmission
                .iter()
                .fold(f64::NEG_INFINITY, |a, &b| a.max(b));
        let above: Vec<usize> = (0..self.transmission.len())
            .filter(|&i| self.transmission[i] >= half)
            .collect();
        match (above.first(), above.last()) {
            (Some(&lo), Some(&hi)) if hi > lo => self.wavel[hi] - self.wavel[lo],
            _ => self.range().1 - self.range().0,
        }
    }

    /// Band-integrated flux of a model spectrum through this filter.
    ///
    /// The transmission is interpolated onto the model wavelengths and the
    /// flux is integrated with the trapezoidal rule.
    pub fn synthetic_flux(&self, wavel: &Array1<f64>, flux: &Array1<f64>) -> f64 {
        let (w_min, w_max) = self.range();
        let mut num = 0.0;
        let mut den = 0.0;
        for i in 1..wavel.len() {
            let (w0, w1) = (wavel[i - 1], wavel[i]);
            if w1 < w_min || w0 > w_max {
                continue;
            }
            let t0 = self.transmission_at(w0);
            let t1 = self.transmission_at(w1);
            let dw = w1 - w0;
            num += 0.5 * (t0 * flux[i - 1] + t1 * flux[i]) * dw;
            den += 0.5 * (t0 + t1) * dw;
        }
        num / den
    }

    fn transmission_at(&self, w: f64) -> f64 {
        let n = self.wavel.len();
        if w <= self.wavel[0] || w >= self.wavel[n - 1] {
            return 0.0;
        }
        let idx = match self
            .wavel
            .as_slice()
            .expect("filter wavelengths are contiguous")
            .partition_point(|&x| x < w)
        {
            0 => 1,
            i => i,
        };
        let (w0, w1) = (self.wavel[idx - 1], self.wavel[idx]);
        let frac = (w - w0) / (w1 - w0);
        self.transmission[idx - 1] * (1.0 - frac) + self.transmission[idx] * frac
    }
}

/// A single photometric measurement through a filter.
#[derive(Clone, Debug)]
pub struct PhotometricPoint {
    pub filter: Filter,
    /// Flux (W m-2 um-1)
    pub flux: f64,
    /// Flux uncertainty (W m-2 um-1)
    pub sigma: f64,
}

/// An observed spectrum, optionally with a covariance matrix.
#[derive(Clone, Debug)]
pub struct SpectrumRecord {
    pub name: String,
    /// Wavelengths (um), ascending
    pub wavel: Array1<f64>,
    /// Fluxes (W m-2 um-1)
    pub flux: Array1<f64>,
    /// Flux uncertainties (W m-2 um-1)
    pub sigma: Array1<f64>,
    /// Full covariance matrix, if measured
    pub covariance: Option<Array2<f64>>,
    /// Pre-computed inverse of the covariance matrix
    pub inv_covariance: Option<Array2<f64>>,
    /// Nominal spectral resolution lambda / d_lambda
    pub resolution: f64,
}

impl SpectrumRecord {
    pub fn new(
        name: impl Into<String>,
        wavel: Array1<f64>,
        flux: Array1<f64>,
        sigma: Array1<f64>,
        resolution: f64,
    ) -> Self {
        let n = wavel.len();
        assert!(
            flux.len() == n && sigma.len() == n,
            "spectrum arrays must have equal length"
        );
        Self {
            name: name.into(),
            wavel,
            flux,
            sigma,
            covariance: None,
            inv_covariance: None,
            resolution,
        }
    }

    /// Attach a covariance matrix and its inverse.
    pub fn with_covariance(mut self, covariance: Array2<f64>, inverse: Array2<f64>) -> Self {
        assert_eq!(covariance.nrows(), self.wavel.len());
        assert_eq!(inverse.nrows(), self.wavel.len());
        self.covariance = Some(covariance);
        self.inv_covariance = Some(inverse);
        self
    }

    pub fn len(&self) -> usize {
        self.wavel.len()
    }

    pub fn is_empty(&self) -> bool {
        self.wavel.is_empty()
    }
}

/// Read-only access to the observed data of one object.
///
/// Loaded once at setup; the likelihood never touches the collaborator
/// afterwards.
pub trait ObjectData {
    fn name(&self) -> &str;

    fn photometry(&self) -> &[PhotometricPoint];

    fn spectra(&self) -> &[SpectrumRecord];

    /// Catalogued parallax and its uncertainty (mas).
    fn parallax(&self) -> (f64, f64);
}

/// In-memory [`ObjectData`] implementation.
#[derive(Clone, Debug, Default)]
pub struct MemoryObject {
    pub name: String,
    pub photometry: Vec<PhotometricPoint>,
    pub spectra: Vec<SpectrumRecord>,
    pub parallax: (f64, f64),
}

impl ObjectData for MemoryObject {
    fn name(&self) -> &str {
        &self.name
    }

    fn photometry(&self) -> &[PhotometricPoint] {
        &self.photometry
    }

    fn spectra(&self) -> &[SpectrumRecord] {
        &self.spectra
    }

    fn parallax(&self) -> (f64, f64) {
        self.parallax
    }
}
