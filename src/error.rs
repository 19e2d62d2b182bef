use thiserror::Error;

use crate::xafs::feffit::FitResult;

/// Error types for the feffit-rs library.
#[derive(Error, Debug)]
pub enum FeffitError {
    /// Window name that does not map to a known window shape.
    #[error("Invalid window kind: '{0}'")]
    InvalidWindowKind(String),

    /// Path whose effective length is too short to be a physical scattering path.
    #[error("Degenerate path '{label}': reff = {reff} is below the minimum of 0.05")]
    DegeneratePath { label: String, reff: f64 },

    /// Feff path file that does not follow the expected layout.
    #[error("Malformed path file at line {line}: {reason}")]
    MalformedPathFile { line: usize, reason: String },

    /// Constraint expressions that reference each other in a loop.
    #[error("Circular expression: {0}")]
    CircularExpression(String),

    /// Expression that refers to a name that is neither a parameter nor a path binding.
    #[error("Unresolved parameter '{name}' in expression for '{owner}'")]
    UnresolvedParameter { name: String, owner: String },

    /// The minimizer stopped without converging. The partial result is attached.
    #[error("Fit did not converge: {message}")]
    FitDidNotConverge {
        message: String,
        partial: Box<FitResult>,
    },

    /// Expression text that could not be parsed or evaluated.
    #[error("Invalid expression: {0}")]
    InvalidExpression(String),

    /// Error indicating a mismatch in array or matrix dimensions.
    #[error("Dimension mismatch: {0}")]
    DimensionMismatch(String),

    /// Error indicating a singular matrix was encountered.
    #[error("Singular matrix encountered")]
    SingularMatrix,

    /// Error for parameter-related problems.
    #[error("Parameter error: {0}")]
    ParameterError(String),

    /// Non-finite or otherwise unusable intermediate value.
    #[error("Computation error: {0}")]
    InvalidComputation(String),

    /// Invalid input data.
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    /// Parameter not found.
    #[error("Parameter not found: {0}")]
    ParameterNotFound(String),

    /// I/O error wrapper.
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    JsonError(#[from] serde_json::Error),
}

impl From<crate::parameters::parameter::ParameterError> for FeffitError {
    fn from(err: crate::parameters::parameter::ParameterError) -> Self {
        FeffitError::ParameterError(format!("{}", err))
    }
}

impl From<crate::parameters::expression::ExpressionError> for FeffitError {
    fn from(err: crate::parameters::expression::ExpressionError) -> Self {
        FeffitError::InvalidExpression(format!("{}", err))
    }
}

/// Result type alias for feffit-rs operations.
pub type Result<T> = std::result::Result<T, FeffitError>;
