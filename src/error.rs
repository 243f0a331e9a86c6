//! Error types.
//!
//! - `EngineError` is returned by every library operation (loading, detection,
//!   forecasting, exports and the external collaborators).
//! - `AppError` is the binary-facing error: a message plus a process exit code.
//!
//! Exit codes:
//! - 2: configuration, schema or I/O problems
//! - 3: not enough data (empty selection, too few points)
//! - 4: model fit, delivery or publishing failures

use std::path::Path;

use thiserror::Error;

/// Result alias for library operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors raised by the engine and its collaborators.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum EngineError {
    /// A required column is absent from the input table.
    #[error("missing required column: `{column}`")]
    Schema { column: String },

    /// Zero rows left after filtering by product and/or date range.
    #[error("no data: {0}")]
    EmptyInput(String),

    /// Fewer points than an operation requires.
    #[error("insufficient data: need at least {needed} points, got {got}")]
    InsufficientData { needed: usize, got: usize },

    /// Rejected configuration value or combination.
    #[error("invalid configuration: {0}")]
    InvalidConfig(String),

    /// File system failure.
    #[error("I/O error on '{path}': {message}")]
    Io { path: String, message: String },

    /// Malformed delimited/JSON content.
    #[error("format error: {0}")]
    Format(String),

    /// The forecast model could not be estimated.
    #[error("model fit failed: {0}")]
    Fit(String),

    /// Chat webhook delivery failed.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// Version-control publishing failed.
    #[error("publish failed: {0}")]
    Publish(String),
}

impl EngineError {
    pub fn io(path: &Path, err: impl std::fmt::Display) -> Self {
        EngineError::Io {
            path: path.display().to_string(),
            message: err.to_string(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        match self {
            EngineError::Schema { .. }
            | EngineError::InvalidConfig(_)
            | EngineError::Io { .. }
            | EngineError::Format(_) => 2,
            EngineError::EmptyInput(_) | EngineError::InsufficientData { .. } => 3,
            EngineError::Fit(_) | EngineError::Delivery(_) | EngineError::Publish(_) => 4,
        }
    }
}

#[derive(Clone)]
pub struct AppError {
    exit_code: u8,
    message: String,
}

impl AppError {
    pub fn new(exit_code: u8, message: impl Into<String>) -> Self {
        Self {
            exit_code,
            message: message.into(),
        }
    }

    pub fn exit_code(&self) -> u8 {
        self.exit_code
    }
}

impl From<EngineError> for AppError {
    fn from(err: EngineError) -> Self {
        AppError::new(err.exit_code(), err.to_string())
    }
}

impl std::fmt::Display for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::fmt::Debug for AppError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AppError")
            .field("exit_code", &self.exit_code)
            .field("message", &self.message)
            .finish()
    }
}

impl std::error::Error for AppError {}
