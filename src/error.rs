//! Error types for nestflux

use thiserror::Error;

/// Errors that can occur during computation
#[derive(Debug, Error)]
pub enum ComputeError {
    #[error("Missing required columns: {}", missing.join(", "))]
    Schema { missing: Vec<String> },

    #[error("Failed to parse input: {0}")]
    ParseError(String),

    #[error("Invalid JSON: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Unknown metric column: {0}")]
    UnknownMetric(String),

    #[error("Internal invariant violated: {0}")]
    InvariantViolation(String),
}

impl ComputeError {
    /// Build a schema error from the list of absent columns
    pub fn missing_columns<I, S>(columns: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        ComputeError::Schema {
            missing: columns.into_iter().map(Into::into).collect(),
        }
    }
}
