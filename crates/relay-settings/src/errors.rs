//! Settings error types.

use thiserror::Error;

/// Why the relay settings could not be loaded or accepted.
#[derive(Debug, Error)]
pub enum SettingsError {
    /// The settings file exists but could not be read.
    #[error("cannot read relay settings file: {0}")]
    Io(#[from] std::io::Error),
    /// The settings file is not valid JSON or does not fit the settings shape.
    #[error("relay settings file is not valid JSON: {0}")]
    Json(#[from] serde_json::Error),
    /// A value the relay cannot run with: an empty server key, a zero
    /// request timeout, a heartbeat timeout shorter than its interval.
    #[error("invalid settings value: {0}")]
    InvalidValue(String),
}

/// Result type for settings operations.
pub type Result<T> = std::result::Result<T, SettingsError>;
