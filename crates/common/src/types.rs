//! Core types for testgrid

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::Error;

/// Kind of execution context a test runs against
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContextKind {
    Chrome,
    Firefox,
    Edge,
    Safari,
    /// API-only tests; never provisioned
    Api,
}

impl ContextKind {
    pub const BROWSERS: [ContextKind; 4] = [
        ContextKind::Chrome,
        ContextKind::Firefox,
        ContextKind::Edge,
        ContextKind::Safari,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ContextKind::Chrome => "chrome",
            ContextKind::Firefox => "firefox",
            ContextKind::Edge => "edge",
            ContextKind::Safari => "safari",
            ContextKind::Api => "api",
        }
    }

    pub fn is_browser(&self) -> bool {
        !matches!(self, ContextKind::Api)
    }
}

impl Default for ContextKind {
    fn default() -> Self {
        Self::Chrome
    }
}

impl std::fmt::Display for ContextKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ContextKind {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "chrome" => Ok(ContextKind::Chrome),
            "firefox" => Ok(ContextKind::Firefox),
            "edge" => Ok(ContextKind::Edge),
            "safari" => Ok(ContextKind::Safari),
            "api" => Ok(ContextKind::Api),
            other => Err(Error::UnsupportedKind(other.to_string())),
        }
    }
}

/// Identity of a worker thread executing tests
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct WorkerId(pub usize);

impl std::fmt::Display for WorkerId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "worker-{}", self.0)
    }
}

/// Identity of one test invocation. Retries of the invocation share it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct InvocationId(String);

impl InvocationId {
    pub fn new() -> Self {
        Self(Uuid::new_v4().to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Default for InvocationId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for InvocationId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

/// Class of a failure, which decides retry eligibility
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// Assertion or execution failure in the test body; retryable
    Flaky,
    /// The execution context could not be provisioned; never retried
    Provisioning,
}

/// Outcome of a test attempt
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum TestOutcome {
    Pass,
    Fail {
        reason: String,
        #[serde(default)]
        cause: Option<String>,
        kind: FailureKind,
    },
    Skip {
        reason: String,
    },
}

impl TestOutcome {
    pub fn flaky(reason: impl Into<String>, cause: Option<String>) -> Self {
        TestOutcome::Fail {
            reason: reason.into(),
            cause,
            kind: FailureKind::Flaky,
        }
    }

    pub fn provisioning(reason: impl Into<String>) -> Self {
        TestOutcome::Fail {
            reason: reason.into(),
            cause: None,
            kind: FailureKind::Provisioning,
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        TestOutcome::Skip {
            reason: reason.into(),
        }
    }

    pub fn is_pass(&self) -> bool {
        matches!(self, TestOutcome::Pass)
    }

    pub fn is_fail(&self) -> bool {
        matches!(self, TestOutcome::Fail { .. })
    }

    pub fn is_skip(&self) -> bool {
        matches!(self, TestOutcome::Skip { .. })
    }

    pub fn status(&self) -> OutcomeStatus {
        match self {
            TestOutcome::Pass => OutcomeStatus::Pass,
            TestOutcome::Fail { .. } => OutcomeStatus::Fail,
            TestOutcome::Skip { .. } => OutcomeStatus::Skip,
        }
    }

    /// Failure or skip reason, if any
    pub fn reason(&self) -> Option<&str> {
        match self {
            TestOutcome::Pass => None,
            TestOutcome::Fail { reason, .. } | TestOutcome::Skip { reason } => Some(reason),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutcomeStatus {
    Pass,
    Fail,
    Skip,
}

impl std::fmt::Display for OutcomeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            OutcomeStatus::Pass => write!(f, "PASS"),
            OutcomeStatus::Fail => write!(f, "FAIL"),
            OutcomeStatus::Skip => write!(f, "SKIP"),
        }
    }
}

/// Diagnostic snapshot captured when a test fails
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ArtifactCapture {
    pub test_name: String,
    pub captured_at: DateTime<Utc>,
    pub path: PathBuf,
    pub size_bytes: u64,
    /// Hex SHA-256 of the snapshot bytes
    pub sha256: String,
}

/// One event recorded against a report entry, in order of occurrence
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ReportEvent {
    Info {
        at: DateTime<Utc>,
        message: String,
    },
    Attachment {
        at: DateTime<Utc>,
        artifact: ArtifactCapture,
    },
}

/// Report record for one test invocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReportEntry {
    pub invocation: InvocationId,
    pub name: String,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub categories: Vec<String>,
    #[serde(default)]
    pub worker: Option<WorkerId>,
    pub started_at: DateTime<Utc>,
    #[serde(default)]
    pub finished_at: Option<DateTime<Utc>>,
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub events: Vec<ReportEvent>,
    /// Set exactly once, when the entry is sealed
    #[serde(default)]
    pub outcome: Option<TestOutcome>,
}

impl ReportEntry {
    pub fn new(invocation: InvocationId, name: impl Into<String>) -> Self {
        Self {
            invocation,
            name: name.into(),
            description: String::new(),
            categories: Vec::new(),
            worker: None,
            started_at: Utc::now(),
            finished_at: None,
            attempts: 0,
            events: Vec::new(),
            outcome: None,
        }
    }

    pub fn is_sealed(&self) -> bool {
        self.outcome.is_some()
    }

    pub fn attachments(&self) -> impl Iterator<Item = &ArtifactCapture> {
        self.events.iter().filter_map(|e| match e {
            ReportEvent::Attachment { artifact, .. } => Some(artifact),
            ReportEvent::Info { .. } => None,
        })
    }

    pub fn duration_ms(&self) -> Option<i64> {
        self.finished_at
            .map(|end| (end - self.started_at).num_milliseconds())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test_case("chrome", ContextKind::Chrome)]
    #[test_case("FIREFOX", ContextKind::Firefox)]
    #[test_case(" Edge ", ContextKind::Edge)]
    #[test_case("safari", ContextKind::Safari)]
    #[test_case("api", ContextKind::Api)]
    fn test_parse_kind(raw: &str, expected: ContextKind) {
        assert_eq!(raw.parse::<ContextKind>().unwrap(), expected);
    }

    #[test]
    fn test_unknown_kind_is_rejected() {
        let err = "unknown-browser".parse::<ContextKind>().unwrap_err();
        assert!(matches!(err, Error::UnsupportedKind(k) if k == "unknown-browser"));
    }

    #[test]
    fn test_outcome_serializes_with_status_tag() {
        let outcome = TestOutcome::flaky("element missing", Some("timeout".into()));
        let json = serde_json::to_value(&outcome).unwrap();
        assert_eq!(json["status"], "fail");
        assert_eq!(json["kind"], "flaky");

        let back: TestOutcome = serde_json::from_value(json).unwrap();
        assert_eq!(back, outcome);
    }

    #[test]
    fn test_entry_attachments_filter_events() {
        let mut entry = ReportEntry::new(InvocationId::new(), "login");
        entry.events.push(ReportEvent::Info {
            at: Utc::now(),
            message: "started".into(),
        });
        entry.events.push(ReportEvent::Attachment {
            at: Utc::now(),
            artifact: ArtifactCapture {
                test_name: "login".into(),
                captured_at: Utc::now(),
                path: PathBuf::from("shots/login_1.png"),
                size_bytes: 4,
                sha256: "00".into(),
            },
        });

        assert_eq!(entry.attachments().count(), 1);
        assert!(!entry.is_sealed());
    }
}
