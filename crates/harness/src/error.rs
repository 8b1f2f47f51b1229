//! Error types for the harness

use std::time::Duration;
use testgrid_common::ContextKind;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum HarnessError {
    #[error("Invalid grid endpoint '{url}': {reason}")]
    InvalidEndpoint { url: String, reason: String },

    #[error("Unsupported context kind: {0}")]
    UnsupportedKind(String),

    #[error("Provisioning {kind} failed: {reason}")]
    Provisioning { kind: ContextKind, reason: String },

    #[error("Provisioning {kind} timed out after {timeout:?}")]
    ProvisionTimeout { kind: ContextKind, timeout: Duration },

    #[error("Driver failed to start: {0}")]
    DriverStartup(String),

    #[error("Driver health check failed after {0} attempts")]
    DriverHealthCheck(usize),

    #[error("WebDriver error: {0}")]
    WebDriver(String),

    #[error("Session {0} is closed")]
    SessionClosed(String),

    #[error("Artifact capture failed: {0}")]
    ArtifactCapture(String),

    #[error("Terminal outcome already recorded for invocation {0}")]
    DuplicateTerminal(String),

    #[error("Report sink error: {0}")]
    Sink(String),

    #[error("Configuration error: {0}")]
    Config(#[from] testgrid_common::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Screenshot decode error: {0}")]
    Decode(#[from] base64::DecodeError),
}

impl HarnessError {
    /// Errors raised while constructing an execution context. These are fatal
    /// to the test invocation and are never retried.
    pub fn is_provisioning(&self) -> bool {
        matches!(
            self,
            HarnessError::InvalidEndpoint { .. }
                | HarnessError::UnsupportedKind(_)
                | HarnessError::Provisioning { .. }
                | HarnessError::ProvisionTimeout { .. }
                | HarnessError::DriverStartup(_)
                | HarnessError::DriverHealthCheck(_)
        )
    }

    /// Wrap any other error raised while constructing a `kind` context
    pub fn into_provisioning(self, kind: ContextKind) -> Self {
        if self.is_provisioning() {
            return self;
        }
        HarnessError::Provisioning {
            kind,
            reason: self.to_string(),
        }
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;
