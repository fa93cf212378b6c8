//! Error types for the tsforge core engine.

use thiserror::Error;

/// Result type for tsforge core operations.
pub type Result<T> = std::result::Result<T, TsError>;

/// Error types for tsforge core operations.
#[derive(Error, Debug, PartialEq)]
pub enum TsError {
    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Numerical failure: {0}")]
    NumericalFailure(String),

    #[error("Invalid model: {0}")]
    InvalidModel(String),

    #[error("Insufficient data: need at least {needed} observations, got {got}")]
    InsufficientData { needed: usize, got: usize },

    #[error("Data quality error: {0}")]
    DataQuality(String),

    #[error("Invalid parameter '{param}' = '{value}': {reason}")]
    InvalidParameter {
        param: String,
        value: String,
        reason: String,
    },

    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    InternalError(String),
}

impl TsError {
    /// Convert to an error code for FFI.
    pub fn to_code(&self) -> i32 {
        match self {
            TsError::InvalidInput(_) => 2,
            TsError::NumericalFailure(_) => 3,
            TsError::InvalidModel(_) => 5,
            TsError::InsufficientData { .. } => 6,
            TsError::DataQuality(_) => 7,
            TsError::InvalidParameter { .. } => 8,
            TsError::Cancelled => 9,
            TsError::InternalError(_) => 0,
        }
    }

    /// True for errors that abort the whole operation rather than being
    /// attached to a single group's output row.
    pub fn is_fatal(&self) -> bool {
        matches!(self, TsError::Cancelled | TsError::InternalError(_))
    }
}
