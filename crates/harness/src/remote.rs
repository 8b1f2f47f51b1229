//! Remote grid dispatch

use reqwest::Url;
use std::fmt;

use crate::error::{HarnessError, HarnessResult};

/// A validated remote grid endpoint
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GridEndpoint {
    url: Url,
}

impl GridEndpoint {
    /// Parse a grid URL. Only absolute `http`/`https` URLs with a host are
    /// accepted.
    pub fn parse(raw: &str) -> HarnessResult<Self> {
        let invalid = |reason: String| HarnessError::InvalidEndpoint {
            url: raw.to_string(),
            reason,
        };

        let url = Url::parse(raw.trim()).map_err(|e| invalid(e.to_string()))?;

        match url.scheme() {
            "http" | "https" => {}
            other => return Err(invalid(format!("unsupported scheme '{}'", other))),
        }

        if url.host_str().map_or(true, str::is_empty) {
            return Err(invalid("missing host".to_string()));
        }

        Ok(Self { url })
    }

    pub fn as_str(&self) -> &str {
        self.url.as_str()
    }

    pub fn host(&self) -> &str {
        self.url.host_str().unwrap_or_default()
    }
}

impl fmt::Display for GridEndpoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.url.as_str())
    }
}
