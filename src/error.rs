use ndarray::Array1;
use thiserror::Error;

/// Error types for the relaxopt-rs library.
#[derive(Error, Debug)]
pub enum RelaxError {
    /// A parameter lies outside the closed-form validity domain of a model.
    #[error("Domain error in model '{model}': {parameter} = {value} ({reason})")]
    DomainError {
        model: String,
        parameter: String,
        value: f64,
        reason: String,
    },

    /// The local minimiser did not satisfy its tolerances.
    #[error(
        "Convergence failure after {iterations} iterations ({func_evals} function, {grad_evals} gradient evaluations, chi2 = {chi2:.6e}): {reason}"
    )]
    ConvergenceFailure {
        /// The best (scaled) parameter vector found so far.
        params: Array1<f64>,
        chi2: f64,
        iterations: usize,
        func_evals: usize,
        grad_evals: usize,
        reason: String,
    },

    /// A (near-)singular matrix was encountered.
    #[error("Singular system: {0}")]
    SingularSystem(String),

    /// Fewer observations than free parameters.
    #[error("Insufficient data for {context}: {available} observations for {required} parameters")]
    InsufficientData {
        required: usize,
        available: usize,
        context: String,
    },

    /// Error indicating a mismatch in matrix or vector dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// The model key is not in the catalogue.
    #[error("Unknown model: '{0}'")]
    UnknownModel(String),

    /// Error for invalid parameter values or names.
    #[error("Invalid parameter: {0}")]
    InvalidParameter(String),

    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Data pipe '{0}' does not exist")]
    PipeNotFound(String),

    #[error("Data pipe '{0}' already exists")]
    PipeExists(String),

    /// The exhaustive grid is too large to enumerate.
    #[error("Grid of {total} points exceeds the limit of {limit} points")]
    GridTooLarge { total: u128, limit: u128 },

    /// The batch was aborted through its cancellation token.
    #[error("Operation cancelled")]
    Cancelled,

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl RelaxError {
    /// Shorthand for building a [`RelaxError::DomainError`].
    pub fn domain(model: &str, parameter: &str, value: f64, reason: &str) -> Self {
        RelaxError::DomainError {
            model: model.to_string(),
            parameter: parameter.to_string(),
            value,
            reason: reason.to_string(),
        }
    }

    /// Returns true for errors that reflect a failed optimisation rather than bad input.
    pub fn is_optimisation_failure(&self) -> bool {
        matches!(
            self,
            RelaxError::ConvergenceFailure { .. } | RelaxError::SingularSystem(_)
        )
    }
}

/// Result type alias for relaxopt-rs operations.
pub type Result<T> = std::result::Result<T, RelaxError>;
