//! Result reporter
//!
//! Each worker builds its own [`OpenEntry`] while the test runs. Sealing the
//! entry consumes it, so a terminal outcome can only be recorded once per
//! entry; duplicate invocation ids within a suite are rejected as well.
//! Sealed entries wait in a pending queue until a checkpoint flushes them to
//! the sink, and the sink is only ever touched under its mutex.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs::{self, File, OpenOptions};
use std::io::{BufRead, BufReader, Write};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use testgrid_common::{
    ArtifactCapture, InvocationId, OutcomeStatus, ReportEntry, ReportEvent, TestOutcome, WorkerId,
};
use tracing::{debug, error, info, warn};

use crate::error::{HarnessError, HarnessResult};

pub const REPORT_FILE: &str = "report.jsonl";
pub const SUMMARY_FILE: &str = "summary.json";

/// Points at which pending entries are persisted
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Checkpoint {
    Test,
    Class,
    Suite,
}

impl std::fmt::Display for Checkpoint {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Checkpoint::Test => write!(f, "test"),
            Checkpoint::Class => write!(f, "class"),
            Checkpoint::Suite => write!(f, "suite"),
        }
    }
}

/// Persistent destination for sealed report entries
pub trait ReportSink: Send {
    /// Persist a batch of sealed entries, in order
    fn append(&mut self, entries: &[ReportEntry]) -> HarnessResult<()>;

    /// Where the report can be found, if it lives somewhere addressable
    fn location(&self) -> Option<PathBuf>;
}

/// Totals written alongside the JSON Lines report
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ReportSummary {
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub updated_at: Option<DateTime<Utc>>,
}

impl ReportSummary {
    fn count(&mut self, entry: &ReportEntry) {
        self.total += 1;
        match entry.outcome.as_ref().map(TestOutcome::status) {
            Some(OutcomeStatus::Pass) => self.passed += 1,
            Some(OutcomeStatus::Fail) => self.failed += 1,
            Some(OutcomeStatus::Skip) => self.skipped += 1,
            None => {}
        }
    }

    pub fn from_entries<'a>(entries: impl IntoIterator<Item = &'a ReportEntry>) -> Self {
        let mut summary = Self::default();
        for entry in entries {
            summary.count(entry);
        }
        summary
    }
}

/// Appends one JSON line per entry to `report.jsonl` and keeps
/// `summary.json` up to date
#[derive(Debug)]
pub struct JsonFileSink {
    report_path: PathBuf,
    summary_path: PathBuf,
    summary: ReportSummary,
}

impl JsonFileSink {
    /// Start a fresh report in `dir`, creating it if needed
    pub fn create(dir: impl AsRef<Path>) -> HarnessResult<Self> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;

        let report_path = dir.join(REPORT_FILE);
        File::create(&report_path)?;

        let sink = Self {
            report_path,
            summary_path: dir.join(SUMMARY_FILE),
            summary: ReportSummary::default(),
        };
        sink.write_summary()?;
        info!("Report will be written to {}", sink.report_path.display());
        Ok(sink)
    }

    fn write_summary(&self) -> HarnessResult<()> {
        let json = serde_json::to_string_pretty(&self.summary)?;
        fs::write(&self.summary_path, json)?;
        Ok(())
    }
}

impl ReportSink for JsonFileSink {
    fn append(&mut self, entries: &[ReportEntry]) -> HarnessResult<()> {
        let mut buf = Vec::new();
        for entry in entries {
            serde_json::to_writer(&mut buf, entry)?;
            buf.push(b'\n');
        }

        let mut file = OpenOptions::new().append(true).open(&self.report_path)?;
        let committed = file.metadata()?.len();
        if let Err(e) = file.write_all(&buf).and_then(|_| file.flush()) {
            // Drop a partial batch so a retried flush starts clean
            if let Err(truncate) = file.set_len(committed) {
                error!(
                    "Could not roll back {} to {} bytes: {}",
                    self.report_path.display(),
                    committed,
                    truncate
                );
            }
            return Err(e.into());
        }

        // The report lines are the commit point; the summary is derived
        for entry in entries {
            self.summary.count(entry);
        }
        self.summary.updated_at = Some(Utc::now());
        if let Err(e) = self.write_summary() {
            warn!("Could not update {}: {}", self.summary_path.display(), e);
        }
        Ok(())
    }

    fn location(&self) -> Option<PathBuf> {
        Some(self.report_path.clone())
    }
}

/// Keeps flushed entries in memory; the handle stays readable after the
/// sink is handed to a reporter
#[derive(Debug, Clone, Default)]
pub struct MemorySink {
    entries: Arc<Mutex<Vec<ReportEntry>>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn entries(&self) -> Vec<ReportEntry> {
        self.entries.lock().clone()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl ReportSink for MemorySink {
    fn append(&mut self, entries: &[ReportEntry]) -> HarnessResult<()> {
        self.entries.lock().extend_from_slice(entries);
        Ok(())
    }

    fn location(&self) -> Option<PathBuf> {
        None
    }
}

/// A report entry still being built by the test's worker
#[derive(Debug)]
pub struct OpenEntry {
    entry: ReportEntry,
}

impl OpenEntry {
    pub fn invocation(&self) -> &InvocationId {
        &self.entry.invocation
    }

    pub fn name(&self) -> &str {
        &self.entry.name
    }

    pub fn with_categories(mut self, categories: impl IntoIterator<Item = String>) -> Self {
        self.entry.categories.extend(categories);
        self
    }

    pub fn with_worker(mut self, worker: WorkerId) -> Self {
        self.entry.worker = Some(worker);
        self
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.entry.events.push(ReportEvent::Info {
            at: Utc::now(),
            message: message.into(),
        });
    }

    pub fn attach(&mut self, artifact: ArtifactCapture) {
        self.entry.events.push(ReportEvent::Attachment {
            at: Utc::now(),
            artifact,
        });
    }

    pub fn events(&self) -> &[ReportEvent] {
        &self.entry.events
    }
}

/// Fans report entries in from all workers and flushes them to one sink
pub struct Reporter {
    sink: Mutex<Box<dyn ReportSink>>,
    pending: Mutex<Vec<ReportEntry>>,
    /// Ids sealed since the last suite checkpoint
    sealed: Mutex<HashSet<InvocationId>>,
    flushed: AtomicUsize,
}

impl Reporter {
    pub fn new(sink: Box<dyn ReportSink>) -> Self {
        Self {
            sink: Mutex::new(sink),
            pending: Mutex::new(Vec::new()),
            sealed: Mutex::new(HashSet::new()),
            flushed: AtomicUsize::new(0),
        }
    }

    /// Reporter writing JSON Lines under `dir`
    pub fn json(dir: impl AsRef<Path>) -> HarnessResult<Self> {
        Ok(Self::new(Box::new(JsonFileSink::create(dir)?)))
    }

    /// Open the entry for a test invocation
    pub fn on_start(&self, invocation: InvocationId, name: &str, description: &str) -> OpenEntry {
        let mut entry = ReportEntry::new(invocation, name);
        entry.description = description.to_string();
        debug!("Report entry opened for {} ({})", name, entry.invocation);
        OpenEntry { entry }
    }

    pub fn on_attachment(&self, entry: &mut OpenEntry, artifact: ArtifactCapture) {
        info!(
            "Attached {} to report entry {}",
            artifact.path.display(),
            entry.name()
        );
        entry.attach(artifact);
    }

    /// Seal the entry with its terminal outcome and queue it for the next
    /// flush
    pub fn on_terminal(
        &self,
        entry: OpenEntry,
        outcome: TestOutcome,
        attempts: u32,
    ) -> HarnessResult<()> {
        let OpenEntry { mut entry } = entry;

        if !self.sealed.lock().insert(entry.invocation.clone()) {
            error!(
                "Terminal outcome for {} ({}) was already recorded",
                entry.name, entry.invocation
            );
            return Err(HarnessError::DuplicateTerminal(entry.invocation.to_string()));
        }

        match &outcome {
            TestOutcome::Pass => info!("Test passed: {}", entry.name),
            TestOutcome::Fail { reason, .. } => {
                error!("Test failed: {} - {}", entry.name, reason);
                for artifact in entry.attachments() {
                    error!("Failure snapshot: {}", artifact.path.display());
                }
            }
            TestOutcome::Skip { reason } => warn!("Test skipped: {} - {}", entry.name, reason),
        }

        entry.attempts = attempts;
        entry.finished_at = Some(Utc::now());
        entry.outcome = Some(outcome);
        self.pending.lock().push(entry);
        Ok(())
    }

    /// Persist every pending entry. Entries already flushed are never
    /// written again; on sink failure the batch stays pending. The suite
    /// checkpoint returns the report location.
    pub fn flush(&self, checkpoint: Checkpoint) -> HarnessResult<Option<PathBuf>> {
        let mut sink = self.sink.lock();
        let batch = std::mem::take(&mut *self.pending.lock());

        if !batch.is_empty() {
            if let Err(e) = sink.append(&batch) {
                warn!("Flush at {} checkpoint failed: {}", checkpoint, e);
                let mut pending = self.pending.lock();
                let newer = std::mem::replace(&mut *pending, batch);
                pending.extend(newer);
                return Err(e);
            }
            self.flushed.fetch_add(batch.len(), Ordering::SeqCst);
            debug!("Flushed {} entries at {} checkpoint", batch.len(), checkpoint);
        }

        if checkpoint != Checkpoint::Suite {
            return Ok(None);
        }

        // Every sealed id is persisted now; a new suite starts a fresh set
        self.sealed.lock().clear();

        let location = sink.location();
        if let Some(path) = &location {
            info!("Test report generated at: {}", path.display());
        }
        Ok(location)
    }

    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    pub fn flushed_count(&self) -> usize {
        self.flushed.load(Ordering::SeqCst)
    }
}

impl std::fmt::Debug for Reporter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Reporter")
            .field("pending", &self.pending_count())
            .field("flushed", &self.flushed_count())
            .finish()
    }
}

/// Load a JSON Lines report. Accepts either the report file or the
/// directory holding it.
pub fn read_report(path: impl AsRef<Path>) -> HarnessResult<Vec<ReportEntry>> {
    let path = path.as_ref();
    let path = if path.is_dir() {
        path.join(REPORT_FILE)
    } else {
        path.to_path_buf()
    };

    let reader = BufReader::new(File::open(&path)?);
    let mut entries = Vec::new();
    for line in reader.lines() {
        let line = line?;
        if line.trim().is_empty() {
            continue;
        }
        entries.push(serde_json::from_str(&line)?);
    }
    Ok(entries)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    struct FailingSink {
        failures_left: usize,
        inner: MemorySink,
    }

    impl ReportSink for FailingSink {
        fn append(&mut self, entries: &[ReportEntry]) -> HarnessResult<()> {
            if self.failures_left > 0 {
                self.failures_left -= 1;
                return Err(HarnessError::Sink("disk full".into()));
            }
            self.inner.append(entries)
        }

        fn location(&self) -> Option<PathBuf> {
            None
        }
    }

    fn artifact(name: &str) -> ArtifactCapture {
        ArtifactCapture {
            test_name: name.to_string(),
            captured_at: Utc::now(),
            path: PathBuf::from(format!("shots/{}_1.png", name)),
            size_bytes: 8,
            sha256: "00".repeat(32),
        }
    }

    #[test]
    fn test_flush_is_idempotent() {
        let sink = MemorySink::new();
        let reporter = Reporter::new(Box::new(sink.clone()));

        let entry = reporter.on_start(InvocationId::new(), "login", "valid login");
        reporter.on_terminal(entry, TestOutcome::Pass, 1).unwrap();

        reporter.flush(Checkpoint::Test).unwrap();
        reporter.flush(Checkpoint::Test).unwrap();
        reporter.flush(Checkpoint::Class).unwrap();
        reporter.flush(Checkpoint::Suite).unwrap();

        assert_eq!(sink.len(), 1);
        assert_eq!(reporter.flushed_count(), 1);
        assert_eq!(reporter.pending_count(), 0);
    }

    #[test]
    fn test_duplicate_terminal_rejected() {
        let reporter = Reporter::new(Box::new(MemorySink::new()));
        let invocation = InvocationId::new();

        let first = reporter.on_start(invocation.clone(), "checkout", "");
        reporter.on_terminal(first, TestOutcome::Pass, 1).unwrap();

        let second = reporter.on_start(invocation, "checkout", "");
        let err = reporter
            .on_terminal(second, TestOutcome::flaky("late", None), 1)
            .unwrap_err();
        assert!(matches!(err, HarnessError::DuplicateTerminal(_)));
        assert_eq!(reporter.pending_count(), 1);
    }

    #[test]
    fn test_attachment_present_when_sealed() {
        let sink = MemorySink::new();
        let reporter = Reporter::new(Box::new(sink.clone()));

        let mut entry = reporter.on_start(InvocationId::new(), "search", "");
        entry.info("searching");
        reporter.on_attachment(&mut entry, artifact("search"));
        reporter
            .on_terminal(entry, TestOutcome::flaky("no results", None), 3)
            .unwrap();
        reporter.flush(Checkpoint::Test).unwrap();

        let stored = sink.entries();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].is_sealed());
        assert_eq!(stored[0].attempts, 3);
        assert_eq!(stored[0].attachments().count(), 1);
        assert_eq!(stored[0].events.len(), 2);
    }

    #[test]
    fn test_failed_flush_keeps_entries_pending() {
        let inner = MemorySink::new();
        let reporter = Reporter::new(Box::new(FailingSink {
            failures_left: 1,
            inner: inner.clone(),
        }));

        let entry = reporter.on_start(InvocationId::new(), "a", "");
        reporter.on_terminal(entry, TestOutcome::Pass, 1).unwrap();

        assert!(reporter.flush(Checkpoint::Test).is_err());
        assert_eq!(reporter.pending_count(), 1);

        let entry = reporter.on_start(InvocationId::new(), "b", "");
        reporter.on_terminal(entry, TestOutcome::Pass, 1).unwrap();
        reporter.flush(Checkpoint::Class).unwrap();

        let names: Vec<_> = inner.entries().into_iter().map(|e| e.name).collect();
        assert_eq!(names, vec!["a", "b"]);
    }

    #[test]
    fn test_json_sink_roundtrip() {
        let dir = TempDir::new().unwrap();
        let reporter = Reporter::json(dir.path()).unwrap();

        let entry = reporter.on_start(InvocationId::new(), "ok", "");
        reporter.on_terminal(entry, TestOutcome::Pass, 1).unwrap();
        let entry = reporter.on_start(InvocationId::new(), "skipped", "");
        reporter
            .on_terminal(entry, TestOutcome::skip("no browser"), 1)
            .unwrap();

        let location = reporter.flush(Checkpoint::Suite).unwrap().unwrap();
        assert_eq!(location, dir.path().join(REPORT_FILE));

        let entries = read_report(dir.path()).unwrap();
        assert_eq!(entries.len(), 2);
        assert!(entries.iter().all(ReportEntry::is_sealed));

        let summary: ReportSummary =
            serde_json::from_str(&fs::read_to_string(dir.path().join(SUMMARY_FILE)).unwrap())
                .unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 1);
        assert_eq!(summary.skipped, 1);
    }

    #[test]
    fn test_summary_failure_does_not_duplicate_entries() {
        let dir = TempDir::new().unwrap();
        let reporter = Reporter::json(dir.path()).unwrap();

        // A directory in place of the summary file makes the summary write fail
        let summary_path = dir.path().join(SUMMARY_FILE);
        fs::remove_file(&summary_path).unwrap();
        fs::create_dir(&summary_path).unwrap();

        let entry = reporter.on_start(InvocationId::new(), "once", "");
        reporter.on_terminal(entry, TestOutcome::Pass, 1).unwrap();
        reporter.flush(Checkpoint::Test).unwrap();
        assert_eq!(reporter.pending_count(), 0);

        fs::remove_dir(&summary_path).unwrap();
        let entry = reporter.on_start(InvocationId::new(), "twice", "");
        reporter.on_terminal(entry, TestOutcome::Pass, 1).unwrap();
        reporter.flush(Checkpoint::Suite).unwrap();

        let names: Vec<_> = read_report(dir.path())
            .unwrap()
            .into_iter()
            .map(|e| e.name)
            .collect();
        assert_eq!(names, vec!["once", "twice"]);

        let summary: ReportSummary =
            serde_json::from_str(&fs::read_to_string(&summary_path).unwrap()).unwrap();
        assert_eq!(summary.total, 2);
        assert_eq!(summary.passed, 2);
    }

    #[test]
    fn test_suite_checkpoint_clears_sealed_ids() {
        let reporter = Reporter::new(Box::new(MemorySink::new()));

        for name in ["a", "b", "c"] {
            let entry = reporter.on_start(InvocationId::new(), name, "");
            reporter.on_terminal(entry, TestOutcome::Pass, 1).unwrap();
        }
        reporter.flush(Checkpoint::Class).unwrap();
        assert_eq!(reporter.sealed.lock().len(), 3);

        reporter.flush(Checkpoint::Suite).unwrap();
        assert!(reporter.sealed.lock().is_empty());
        assert_eq!(reporter.flushed_count(), 3);
    }

    #[test]
    fn test_non_suite_checkpoint_has_no_location() {
        let dir = TempDir::new().unwrap();
        let reporter = Reporter::json(dir.path()).unwrap();
        assert!(reporter.flush(Checkpoint::Test).unwrap().is_none());
        assert!(reporter.flush(Checkpoint::Suite).unwrap().is_some());
    }
}
