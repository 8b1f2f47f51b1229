//! Retry coordinator
//!
//! Each test invocation owns a fresh [`RetryState`]; nothing is shared
//! between invocations, so parallel workers cannot disturb each other's
//! counters.

use testgrid_common::{FailureKind, TestOutcome};
use tracing::{info, warn};

/// Additional attempts allowed after the first one
pub const MAX_RETRIES: u32 = 2;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryPhase {
    Initial,
    Retrying,
    TerminalPass,
    TerminalFail,
    TerminalSkip,
}

impl RetryPhase {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RetryPhase::TerminalPass | RetryPhase::TerminalFail | RetryPhase::TerminalSkip
        )
    }
}

/// Per-invocation retry bookkeeping
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryState {
    attempts: u32,
    max_retries: u32,
    phase: RetryPhase,
}

impl RetryState {
    pub fn new() -> Self {
        Self::with_max_retries(MAX_RETRIES)
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        Self {
            attempts: 0,
            max_retries,
            phase: RetryPhase::Initial,
        }
    }

    /// Attempts made so far
    pub fn attempts(&self) -> u32 {
        self.attempts
    }

    pub fn retries(&self) -> u32 {
        self.attempts.saturating_sub(1)
    }

    pub fn max_retries(&self) -> u32 {
        self.max_retries
    }

    pub fn phase(&self) -> RetryPhase {
        self.phase
    }

    /// Record one finished attempt and advance the state machine. Returns
    /// whether another attempt follows.
    pub fn record(&mut self, outcome: &TestOutcome) -> bool {
        self.attempts += 1;
        let retry = should_retry(outcome, self);
        self.phase = match outcome {
            _ if retry => RetryPhase::Retrying,
            TestOutcome::Pass => RetryPhase::TerminalPass,
            TestOutcome::Skip { .. } => RetryPhase::TerminalSkip,
            TestOutcome::Fail { .. } => RetryPhase::TerminalFail,
        };
        retry
    }
}

impl Default for RetryState {
    fn default() -> Self {
        Self::new()
    }
}

/// Whether an attempt that produced `outcome` should be followed by another.
/// `state.attempts()` must already count that attempt.
pub fn should_retry(outcome: &TestOutcome, state: &RetryState) -> bool {
    match outcome {
        TestOutcome::Fail {
            kind: FailureKind::Flaky,
            ..
        } => state.attempts <= state.max_retries,
        TestOutcome::Fail {
            kind: FailureKind::Provisioning,
            ..
        } => false,
        TestOutcome::Pass | TestOutcome::Skip { .. } => false,
    }
}

/// Drives the attempt loop for one invocation
#[derive(Debug, Clone, Copy)]
pub struct RetryCoordinator {
    max_retries: u32,
}

impl RetryCoordinator {
    pub fn new() -> Self {
        Self {
            max_retries: MAX_RETRIES,
        }
    }

    pub fn with_max_retries(max_retries: u32) -> Self {
        Self { max_retries }
    }

    /// Run `attempt` until it produces a terminal outcome. `attempt` receives
    /// the 1-based attempt number; `between` runs before every retry to tear
    /// down state left by the failed attempt.
    pub fn run<A, B>(&self, name: &str, mut attempt: A, mut between: B) -> (TestOutcome, RetryState)
    where
        A: FnMut(u32) -> TestOutcome,
        B: FnMut(&TestOutcome),
    {
        let mut state = RetryState::with_max_retries(self.max_retries);

        loop {
            let outcome = attempt(state.attempts() + 1);
            if !state.record(&outcome) {
                return (outcome, state);
            }

            warn!(
                "Attempt {} of {} failed: {}",
                state.attempts(),
                name,
                outcome.reason().unwrap_or("unknown failure")
            );
            between(&outcome);
            info!("Retrying test: {} for the {} time", name, state.attempts());
        }
    }
}

impl Default for RetryCoordinator {
    fn default() -> Self {
        Self::new()
    }
}
