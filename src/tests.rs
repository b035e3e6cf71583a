use ndarray::{Array, Array1, Array2};
use rand::prelude::*;
use rand_distr::Normal;

use crate::config::{BoundSpec, FitConfig};
use crate::data::{Filter, MemoryObject, PhotometricPoint, SpectrumRecord};
use crate::error::SamplerError;
use crate::fit::{FitInputs, FitModel};
use crate::grid::ArrayModelGrid;
use crate::sampler::{Coordinator, MemorySink, NestedSampler, SamplerRun, SamplingProblem};

/// 5x3 lattice in (teff, logg); flux grows linearly with teff so the
/// interpolation stays exact.
fn toy_grid() -> ArrayModelGrid {
    let teff = vec![1000.0, 1500.0, 2000.0, 2500.0, 3000.0];
    let logg = vec![3.0, 4.5, 6.0];
    let wavel = Array1::linspace(1.0, 2.0, 40);
    let flux = Array::from_shape_fn((5, 3, 40), |(i, _, _)| 1.0e-15 * teff[i] / 1000.0).into_dyn();
    ArrayModelGrid::new(
        "toy-grid",
        vec![("teff".into(), teff), ("logg".into(), logg)],
        wavel,
        flux,
    )
    .unwrap()
}

fn tophat_filter(name: &str) -> Filter {
    let wavel = Array1::linspace(1.0, 2.0, 40);
    let mut transmission = Array1::ones(40);
    transmission[0] = 0.0;
    transmission[39] = 0.0;
    Filter::new(name, wavel, transmission)
}

fn toy_object() -> MemoryObject {
    let mut rng = StdRng::seed_from_u64(5);
    let noise = Normal::new(0.0, 1.0e-37).unwrap();
    let wavel = Array1::linspace(1.1, 1.9, 25);
    let flux = wavel.mapv(|_| 7.5e-36 + noise.sample(&mut rng));
    let sigma = Array1::from_elem(25, 1.0e-36);
    MemoryObject {
        name: "toy object".into(),
        photometry: vec![PhotometricPoint {
            filter: tophat_filter("TEST/Inst.J"),
            flux: 7.5e-36,
            sigma: 8.0e-37,
        }],
        spectra: vec![SpectrumRecord::new("SPEC", wavel, flux, sigma, 200.0)],
        parallax: (25.0, 0.5),
    }
}

fn toy_config() -> FitConfig {
    FitConfig::new("toy-grid")
        .with_bound("teff", BoundSpec::Range(2000.0, 2500.0))
        .with_bound("logg", BoundSpec::Range(3.5, 5.5))
}

/// Minimal engine: random prior draws, no evidence refinement.
struct ToySampler {
    n: usize,
}

impl NestedSampler for ToySampler {
    fn name(&self) -> &str {
        "toy-nested"
    }

    fn run(&self, problem: &SamplingProblem<'_>) -> Result<SamplerRun, SamplerError> {
        let mut rng = StdRng::seed_from_u64(42);
        let ndim = problem.ndim();
        let mut samples = Array2::zeros((self.n, ndim));
        let mut ln_prob = Array1::zeros(self.n);
        for i in 0..self.n {
            let cube: Vec<f64> = (0..ndim).map(|_| rng.random()).collect();
            let physical = problem.prior_transform(&cube);
            ln_prob[i] = problem.ln_like(&physical);
            for (j, &value) in physical.iter().enumerate() {
                samples[[i, j]] = value;
            }
        }
        Ok(SamplerRun {
            samples,
            ln_prob,
            ln_z: -10.0,
            ln_z_error: 0.1,
        })
    }
}

#[test]
fn single_component_scenario() {
    let object = toy_object();
    let grid = toy_grid();
    let fit = FitModel::new(toy_config(), FitInputs::new(&object, Some(&grid))).unwrap();

    assert_eq!(fit.names(), ["teff", "logg", "radius", "parallax"]);
    let midpoint = fit.prior_transform().transform(&vec![0.5; fit.n_dim()]);
    assert_eq!(midpoint[0], 2250.0);
    assert_eq!(midpoint[1], 4.5);
    let ln_like = fit.ln_like(&midpoint);
    assert!(ln_like.is_finite(), "ln_like = {ln_like}");
}

#[test]
fn planck_two_component_scenario() {
    let mut object = toy_object();
    object.spectra.clear();
    let config = FitConfig::new("planck")
        .with_bound(
            "teff",
            BoundSpec::Components(vec![(1000.0, 1400.0), (1200.0, 1600.0)]),
        )
        .with_bound(
            "radius",
            BoundSpec::Components(vec![(0.8, 1.5), (1.2, 2.0)]),
        );
    let fit = FitModel::new(config, FitInputs::new(&object, None)).unwrap();

    assert_eq!(
        fit.names(),
        ["teff_0", "radius_0", "teff_1", "radius_1", "parallax"]
    );
    // secondary hotter than the primary
    assert_eq!(
        fit.ln_like(&[1100.0, 1.0, 1300.0, 1.5, 25.0]),
        f64::NEG_INFINITY
    );
    // inner radius larger than the outer
    assert_eq!(
        fit.ln_like(&[1400.0, 1.4, 1200.0, 1.3, 25.0]),
        f64::NEG_INFINITY
    );
    assert!(fit.ln_like(&[1400.0, 1.0, 1200.0, 1.5, 25.0]).is_finite());
}

#[test]
fn fixed_parameter_is_appended_to_the_posterior() {
    let object = toy_object();
    let grid = toy_grid();
    let config = toy_config().with_bound("logg", BoundSpec::Range(4.5, 4.5));
    let fit = FitModel::new(config, FitInputs::new(&object, Some(&grid))).unwrap();

    assert_eq!(fit.names(), ["teff", "radius", "parallax"]);

    let mut sink = MemorySink::default();
    let record = fit
        .run_sampler(&ToySampler { n: 16 }, "toy", Coordinator::Leader, &mut sink)
        .unwrap();
    assert_eq!(record.names.last().map(String::as_str), Some("logg"));
    let logg_column = record.samples.column(record.names.len() - 1);
    assert!(logg_column.iter().all(|&v| v == 4.5));
    assert_eq!(sink.records.len(), 1);
}

#[test]
fn worker_role_does_not_store() {
    let object = toy_object();
    let grid = toy_grid();
    let fit = FitModel::new(toy_config(), FitInputs::new(&object, Some(&grid))).unwrap();
    let mut sink = MemorySink::default();
    fit.run_sampler(&ToySampler { n: 4 }, "toy", Coordinator::Worker, &mut sink)
        .unwrap();
    assert!(sink.records.is_empty());
}

#[test]
fn posterior_round_trips_through_the_sink() {
    let object = toy_object();
    let grid = toy_grid();
    let mut config = toy_config();
    config.calibration.insert(
        "SPEC".into(),
        crate::config::CalibrationBounds {
            scaling: Some((0.8, 1.2)),
            error: None,
        },
    );
    let fit = FitModel::new(config, FitInputs::new(&object, Some(&grid))).unwrap();
    assert!(fit.names().iter().any(|n| n == "scaling_SPEC"));

    let mut sink = MemorySink::default();
    let record = fit
        .run_sampler(&ToySampler { n: 8 }, "toy", Coordinator::Leader, &mut sink)
        .unwrap();
    assert_eq!(record.spec_labels, ["scaling_SPEC"]);

    let text = serde_json::to_string(&record).unwrap();
    let back: crate::sampler::PosteriorRecord = serde_json::from_str(&text).unwrap();
    assert_eq!(record, back);
    assert_eq!(record.samples, back.samples);
    assert_eq!(record.ln_prob, back.ln_prob);
}

#[test]
fn maximum_likelihood_sample_is_extracted() {
    let object = toy_object();
    let grid = toy_grid();
    let fit = FitModel::new(toy_config(), FitInputs::new(&object, Some(&grid))).unwrap();
    let mut sink = MemorySink::default();
    let record = fit
        .run_sampler(&ToySampler { n: 32 }, "toy", Coordinator::Leader, &mut sink)
        .unwrap();
    let best_ln = record
        .ln_prob
        .iter()
        .fold(f64::NEG_INFINITY, |a, &b| a.max(b));
    let best_row = record.ln_prob.iter().position(|&lp| lp == best_ln).unwrap();
    assert_eq!(record.best, record.samples.row(best_row).to_vec());
}
