/// Fatal configuration error, surfaced before any sampling starts.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no photometric or spectroscopic data has been selected")]
    NoDataSelected,

    #[error("the '{model}' model requires bounds for '{parameter}'")]
    MissingBound { model: String, parameter: String },

    #[error("invalid bound for '{parameter}': lower {lo} exceeds upper {hi}")]
    InvalidBound { parameter: String, lo: f64, hi: f64 },

    #[error("parameter '{0}' has neither a bound nor a normal prior")]
    MissingPrior(String),

    #[error("'flux_scaling' and 'log_flux_scaling' are mutually exclusive")]
    ConflictingScaling,

    #[error("only one extinction model can be active, found '{0}' and '{1}'")]
    ConflictingExtinction(&'static str, &'static str),

    #[error("'{first}' has {n_first} components but '{second}' has {n_second}")]
    ComponentCountMismatch {
        first: String,
        second: String,
        n_first: usize,
        n_second: usize,
    },

    #[error("cannot resolve '{0}' to a known {1}")]
    UnknownName(String, &'static str),

    #[error("the '{0}' model requires a model grid")]
    MissingGrid(String),

    #[error("the '{0}' extinction model requires a grain cross-section table")]
    MissingCrossSections(&'static str),

    #[error("the covariance matrix of '{0}' is not positive definite")]
    SingularCovariance(String),

    #[error("grid interpolation setup failed: {0}")]
    Grid(#[from] GridError),
}

/// Recoverable per-call failure of a grid interpolation. The likelihood
/// maps it to -inf instead of propagating.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum GridError {
    #[error("parameter '{name}' = {value} is outside the interpolated range [{lo}, {hi}]")]
    OutOfBounds {
        name: String,
        value: f64,
        lo: f64,
        hi: f64,
    },

    #[error("grid axis '{0}' has no points in the requested range")]
    EmptyAxis(String),

    #[error("expected {expected} grid parameters, got {actual}")]
    WrongParameterCount { expected: usize, actual: usize },

    #[error("grid flux array has shape {actual:?}, expected {expected:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        actual: Vec<usize>,
    },
}

/// Error crossing the nested-sampling engine or sample-sink boundary.
#[derive(Debug, thiserror::Error)]
pub enum SamplerError {
    #[error("sampling engine failed: {0}")]
    Engine(String),

    #[error("sample sink failed: {0}")]
    Sink(String),
}
