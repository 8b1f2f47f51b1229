//! Error types for testgrid

use std::path::PathBuf;
use thiserror::Error;

/// Result type alias using the testgrid common Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors raised while resolving configuration, loading fixtures or
/// interpreting shared types
#[derive(Error, Debug)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("Configuration file not found: {}", path.display())]
    ConfigNotFound { path: PathBuf },

    #[error("Configuration file {} could not be read: {reason}", path.display())]
    ConfigUnreadable { path: PathBuf, reason: String },

    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    #[error("Invalid value '{value}' for '{key}': expected {expected}")]
    InvalidValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    #[error("Unsupported context kind: {0}")]
    UnsupportedKind(String),

    #[error("Fixture '{name}' not found in {}", path.display())]
    FixtureNotFound { name: String, path: PathBuf },
}

impl Error {
    /// True for errors that make the whole run meaningless and must abort at
    /// process start.
    pub fn is_fatal_config(&self) -> bool {
        matches!(
            self,
            Error::ConfigNotFound { .. }
                | Error::ConfigUnreadable { .. }
                | Error::InvalidConfig(_)
                | Error::InvalidValue { .. }
        )
    }
}
