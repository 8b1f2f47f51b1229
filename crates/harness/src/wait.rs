//! Bounded waits
//!
//! Waiting for a condition never raises on expiry; the caller gets
//! [`WaitOutcome::NotFound`] and decides whether that is a failure.

use std::time::{Duration, Instant};
use testgrid_common::config::DEFAULT_EXPLICIT_WAIT_SECS;
use testgrid_common::EnvironmentConfig;
use tracing::debug;

use crate::error::HarnessResult;

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(250);

/// Timeout for non-fatal presence checks
pub const QUICK_TIMEOUT: Duration = Duration::from_secs(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitConfig {
    pub timeout: Duration,
    pub poll_interval: Duration,
}

impl WaitConfig {
    pub fn new(timeout: Duration, poll_interval: Duration) -> Self {
        Self {
            timeout,
            poll_interval,
        }
    }

    pub fn with_timeout(timeout: Duration) -> Self {
        Self::new(timeout, DEFAULT_POLL_INTERVAL)
    }

    /// Short wait used for "is it there?" checks
    pub fn quick() -> Self {
        Self::with_timeout(QUICK_TIMEOUT)
    }

    /// Wait bounded by the configured explicit wait
    pub fn explicit(config: &EnvironmentConfig) -> Self {
        Self::with_timeout(config.explicit_wait())
    }
}

impl Default for WaitConfig {
    fn default() -> Self {
        Self::with_timeout(Duration::from_secs(DEFAULT_EXPLICIT_WAIT_SECS))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    Found,
    NotFound,
}

impl WaitOutcome {
    pub fn is_found(&self) -> bool {
        matches!(self, WaitOutcome::Found)
    }
}

/// Poll `condition` until it holds or the timeout expires. The condition is
/// always evaluated at least once.
pub fn wait_until<F>(mut condition: F, config: WaitConfig, description: &str) -> WaitOutcome
where
    F: FnMut() -> bool,
{
    let start = Instant::now();

    loop {
        if condition() {
            return WaitOutcome::Found;
        }

        if start.elapsed() >= config.timeout {
            debug!("Gave up waiting for {} after {:?}", description, config.timeout);
            return WaitOutcome::NotFound;
        }

        std::thread::sleep(config.poll_interval);
    }
}

/// Like [`wait_until`], but condition errors count as "not yet"
pub fn wait_until_ok<F>(mut condition: F, config: WaitConfig, description: &str) -> WaitOutcome
where
    F: FnMut() -> HarnessResult<bool>,
{
    wait_until(
        || match condition() {
            Ok(found) => found,
            Err(e) => {
                debug!("Waiting for {}: {}", description, e);
                false
            }
        },
        config,
        description,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::HarnessError;

    fn fast(timeout_ms: u64) -> WaitConfig {
        WaitConfig::new(Duration::from_millis(timeout_ms), Duration::from_millis(5))
    }

    #[test]
    fn wait_until_succeeds_immediately() {
        assert_eq!(wait_until(|| true, fast(50), "always"), WaitOutcome::Found);
    }

    #[test]
    fn wait_until_succeeds_after_polls() {
        let mut calls = 0;
        let outcome = wait_until(
            || {
                calls += 1;
                calls >= 3
            },
            fast(1_000),
            "third poll",
        );
        assert!(outcome.is_found());
        assert_eq!(calls, 3);
    }

    #[test]
    fn wait_until_expires_without_error() {
        let start = Instant::now();
        assert_eq!(wait_until(|| false, fast(40), "never"), WaitOutcome::NotFound);
        assert!(start.elapsed() >= Duration::from_millis(40));
    }

    #[test]
    fn wait_until_ok_treats_errors_as_not_yet() {
        let mut calls = 0;
        let outcome = wait_until_ok(
            || {
                calls += 1;
                if calls < 3 {
                    Err(HarnessError::WebDriver("stale element reference".into()))
                } else {
                    Ok(true)
                }
            },
            fast(1_000),
            "element",
        );
        assert!(outcome.is_found());
    }

    #[test]
    fn explicit_uses_configured_wait() {
        let config = EnvironmentConfig {
            explicit_wait_secs: 7,
            ..EnvironmentConfig::default()
        };
        assert_eq!(WaitConfig::explicit(&config).timeout, Duration::from_secs(7));
        assert_eq!(WaitConfig::quick().timeout, QUICK_TIMEOUT);
    }
}
