//! Error types for the estimation engine

use thiserror::Error;

/// Failures surfaced by run setup, a single estimator tick, or post-run scoring.
///
/// Insufficient buffered data is *not* an error: a tick that cannot run yet
/// returns `Ok(None)`.
#[derive(Error, Debug)]
pub enum EstimationError {
    /// Unknown or unselected estimator/model, or configuration values that do
    /// not fit the selected models. Raised at setup, never at tick time.
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Singular innovation covariance or a singular measurement Jacobian.
    #[error("Numerical instability: {0}")]
    NumericalInstability(String),

    /// A computation was asked to run on inputs that violate its contract.
    #[error("Precondition violated: {0}")]
    Precondition(String),

    /// A sample was appended to a buffer out of timestamp order.
    #[error("Out-of-order sample: received t={received} after t={previous}")]
    OutOfOrder { previous: f64, received: f64 },

    /// The online consumer thread could not be joined.
    #[error("Scheduler error: {0}")]
    Scheduler(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(String),
}

impl From<serde_json::Error> for EstimationError {
    fn from(e: serde_json::Error) -> Self {
        EstimationError::Parse(e.to_string())
    }
}

impl From<serde_yaml::Error> for EstimationError {
    fn from(e: serde_yaml::Error) -> Self {
        EstimationError::Parse(e.to_string())
    }
}

impl From<toml::de::Error> for EstimationError {
    fn from(e: toml::de::Error) -> Self {
        EstimationError::Parse(e.to_string())
    }
}

impl From<toml::ser::Error> for EstimationError {
    fn from(e: toml::ser::Error) -> Self {
        EstimationError::Parse(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EstimationError>;
