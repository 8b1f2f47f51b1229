//! Parallel test runner
//!
//! Classes run in order. Within a class, cases are pulled from a shared
//! queue by `parallel.threads` scoped workers, each owning at most one
//! execution context at a time. One invocation goes through:
//!
//! ```text
//! on_start -> [provision -> navigate -> body] x retries -> capture on FAIL
//!          -> dispose -> on_terminal -> flush(Test)
//! ```

use crossbeam::channel;
use serde::{Deserialize, Serialize};
use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;
use testgrid_common::{EnvironmentConfig, InvocationId, OutcomeStatus, TestOutcome, WorkerId};
use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::artifact::ArtifactCollector;
use crate::error::{HarnessError, HarnessResult};
use crate::pool::ExecutionContextPool;
use crate::registry::{FactoryRegistry, Launcher, WebDriverLauncher};
use crate::reporter::{Checkpoint, Reporter};
use crate::retry::RetryCoordinator;
use crate::session::{Session, SharedContext};
use crate::wait::{wait_until_ok, WaitConfig, WaitOutcome};

/// How a test body ends when it does not pass
#[derive(Debug, Clone, PartialEq, Error)]
pub enum TestError {
    #[error("{message}")]
    Failed {
        message: String,
        cause: Option<String>,
    },
    #[error("skipped: {0}")]
    Skipped(String),
}

impl TestError {
    pub fn fail(message: impl Into<String>) -> Self {
        TestError::Failed {
            message: message.into(),
            cause: None,
        }
    }

    pub fn skip(reason: impl Into<String>) -> Self {
        TestError::Skipped(reason.into())
    }

    pub fn with_cause(self, cause: impl Into<String>) -> Self {
        match self {
            TestError::Failed { message, .. } => TestError::Failed {
                message,
                cause: Some(cause.into()),
            },
            skipped => skipped,
        }
    }

    /// `Err(fail(message))` unless `condition` holds
    pub fn ensure(condition: bool, message: impl Into<String>) -> Result<(), TestError> {
        if condition {
            Ok(())
        } else {
            Err(TestError::fail(message))
        }
    }
}

impl From<HarnessError> for TestError {
    fn from(e: HarnessError) -> Self {
        TestError::fail(e.to_string())
    }
}

impl From<testgrid_common::Error> for TestError {
    fn from(e: testgrid_common::Error) -> Self {
        TestError::fail(e.to_string())
    }
}

pub type TestBody = Arc<dyn Fn(&mut TestContext<'_>) -> Result<(), TestError> + Send + Sync>;

/// One test method
#[derive(Clone)]
pub struct TestCase {
    pub name: String,
    pub description: String,
    pub categories: Vec<String>,
    /// Browser for this case only; the configured browser otherwise
    pub browser: Option<String>,
    body: TestBody,
}

impl TestCase {
    pub fn new<F>(name: impl Into<String>, body: F) -> Self
    where
        F: Fn(&mut TestContext<'_>) -> Result<(), TestError> + Send + Sync + 'static,
    {
        Self {
            name: name.into(),
            description: String::new(),
            categories: Vec::new(),
            browser: None,
            body: Arc::new(body),
        }
    }

    pub fn description(mut self, description: impl Into<String>) -> Self {
        self.description = description.into();
        self
    }

    pub fn category(mut self, category: impl Into<String>) -> Self {
        self.categories.push(category.into());
        self
    }

    pub fn browser(mut self, browser: impl Into<String>) -> Self {
        self.browser = Some(browser.into());
        self
    }
}

impl std::fmt::Debug for TestCase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TestCase")
            .field("name", &self.name)
            .field("categories", &self.categories)
            .field("browser", &self.browser)
            .finish()
    }
}

#[derive(Debug, Clone)]
pub struct TestClass {
    pub name: String,
    pub cases: Vec<TestCase>,
}

impl TestClass {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            cases: Vec::new(),
        }
    }

    pub fn case(mut self, case: TestCase) -> Self {
        self.cases.push(case);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Suite {
    pub name: String,
    pub classes: Vec<TestClass>,
}

impl Suite {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            classes: Vec::new(),
        }
    }

    pub fn class(mut self, class: TestClass) -> Self {
        self.classes.push(class);
        self
    }

    pub fn len(&self) -> usize {
        self.classes.iter().map(|c| c.cases.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// What a test body sees during one attempt
pub struct TestContext<'a> {
    worker: WorkerId,
    attempt: u32,
    config: &'a EnvironmentConfig,
    context: Option<SharedContext>,
    events: Vec<String>,
}

impl<'a> TestContext<'a> {
    pub fn worker(&self) -> WorkerId {
        self.worker
    }

    /// 1-based attempt number
    pub fn attempt(&self) -> u32 {
        self.attempt
    }

    pub fn config(&self) -> &'a EnvironmentConfig {
        self.config
    }

    /// Whether a browser context backs this test
    pub fn has_ui(&self) -> bool {
        self.context.is_some()
    }

    /// Record an info event on the report entry. Only the terminal attempt's
    /// events are kept.
    pub fn info(&mut self, message: impl Into<String>) {
        let message = message.into();
        info!("{}", message);
        self.events.push(message);
    }

    /// Run `f` against the live session
    pub fn with_session<R, F>(&self, f: F) -> Result<R, TestError>
    where
        F: FnOnce(&mut dyn Session) -> HarnessResult<R>,
    {
        Ok(self.try_session(f)?)
    }

    fn try_session<R, F>(&self, f: F) -> HarnessResult<R>
    where
        F: FnOnce(&mut dyn Session) -> HarnessResult<R>,
    {
        let context = self.context.as_ref().ok_or_else(|| {
            HarnessError::SessionClosed("no UI context for this test".to_string())
        })?;
        let mut ctx = context.lock();
        f(ctx.session_mut())
    }

    pub fn navigate(&self, url: &str) -> Result<(), TestError> {
        self.with_session(|session| session.navigate(url))
    }

    /// Wait up to the explicit wait for an element to be displayed
    pub fn wait_for_visible(&self, css: &str) -> WaitOutcome {
        self.wait_visible(css, WaitConfig::explicit(self.config))
    }

    /// Short, non-fatal presence check
    pub fn is_visible_quick(&self, css: &str) -> bool {
        self.wait_visible(css, WaitConfig::quick()).is_found()
    }

    fn wait_visible(&self, css: &str, wait: WaitConfig) -> WaitOutcome {
        if !self.has_ui() {
            return WaitOutcome::NotFound;
        }
        wait_until_ok(
            || self.try_session(|session| session.is_displayed(css)),
            wait,
            css,
        )
    }
}

/// Result of one test invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TestResult {
    pub name: String,
    pub class: String,
    pub invocation: InvocationId,
    pub worker: WorkerId,
    pub outcome: TestOutcome,
    pub attempts: u32,
    pub duration_ms: u64,
    pub artifact: Option<PathBuf>,
}

impl TestResult {
    pub fn status(&self) -> OutcomeStatus {
        self.outcome.status()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuiteResult {
    pub name: String,
    pub total: usize,
    pub passed: usize,
    pub failed: usize,
    pub skipped: usize,
    pub duration_ms: u64,
    pub results: Vec<TestResult>,
    /// Report location surfaced by the final flush
    pub report: Option<PathBuf>,
}

impl SuiteResult {
    fn new(name: &str, results: Vec<TestResult>, duration_ms: u64, report: Option<PathBuf>) -> Self {
        let count = |status: OutcomeStatus| results.iter().filter(|r| r.status() == status).count();
        Self {
            name: name.to_string(),
            total: results.len(),
            passed: count(OutcomeStatus::Pass),
            failed: count(OutcomeStatus::Fail),
            skipped: count(OutcomeStatus::Skip),
            duration_ms,
            results,
            report,
        }
    }

    pub fn success(&self) -> bool {
        self.failed == 0
    }

    pub fn result(&self, name: &str) -> Option<&TestResult> {
        self.results.iter().find(|r| r.name == name)
    }
}

/// Runs suites against a context pool and reports every invocation once
pub struct TestRunner {
    pool: ExecutionContextPool,
    reporter: Reporter,
    artifacts: ArtifactCollector,
    retry: RetryCoordinator,
    threads: usize,
}

impl TestRunner {
    pub fn new(pool: ExecutionContextPool, reporter: Reporter) -> Self {
        let config = pool.registry().config();
        let artifacts = ArtifactCollector::new(&config.screenshot_dir);
        let threads = config.threads.max(1);
        Self {
            pool,
            reporter,
            artifacts,
            retry: RetryCoordinator::new(),
            threads,
        }
    }

    /// Runner provisioning real browsers and writing JSON reports, all
    /// driven by `config`
    pub fn from_config(config: Arc<EnvironmentConfig>) -> HarnessResult<Self> {
        let launcher: Arc<dyn Launcher> = Arc::new(WebDriverLauncher::new(config.driver_dir.clone()));
        Self::with_launcher(config, launcher)
    }

    pub fn with_launcher(
        config: Arc<EnvironmentConfig>,
        launcher: Arc<dyn Launcher>,
    ) -> HarnessResult<Self> {
        let reporter = Reporter::json(&config.report_dir)?;
        let registry = FactoryRegistry::new(config, launcher);
        Ok(Self::new(ExecutionContextPool::new(Arc::new(registry)), reporter))
    }

    pub fn with_retry(mut self, retry: RetryCoordinator) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_artifacts(mut self, artifacts: ArtifactCollector) -> Self {
        self.artifacts = artifacts;
        self
    }

    pub fn pool(&self) -> &ExecutionContextPool {
        &self.pool
    }

    pub fn reporter(&self) -> &Reporter {
        &self.reporter
    }

    fn config(&self) -> &EnvironmentConfig {
        self.pool.registry().config()
    }

    pub fn run_suite(&self, suite: &Suite) -> HarnessResult<SuiteResult> {
        let start = Instant::now();
        info!("Running suite {} ({} test(s))", suite.name, suite.len());

        let mut results = Vec::with_capacity(suite.len());
        for class in &suite.classes {
            results.extend(self.run_class(class));
            if let Err(e) = self.reporter.flush(Checkpoint::Class) {
                error!("Report flush after class {} failed: {}", class.name, e);
            }
        }

        let released = self.pool.dispose_all();
        if released > 0 {
            debug!("Released {} leftover context(s)", released);
        }

        let report = self.reporter.flush(Checkpoint::Suite)?;
        let result = SuiteResult::new(
            &suite.name,
            results,
            start.elapsed().as_millis() as u64,
            report,
        );

        info!(
            "Test Results: {} passed, {} failed, {} skipped ({} ms)",
            result.passed, result.failed, result.skipped, result.duration_ms
        );
        Ok(result)
    }

    /// Run one class across the worker threads. Results keep declaration
    /// order.
    pub fn run_class(&self, class: &TestClass) -> Vec<TestResult> {
        if class.cases.is_empty() {
            return Vec::new();
        }

        let workers = self.threads.min(class.cases.len());
        debug!("Running class {} on {} worker(s)", class.name, workers);

        let (job_tx, job_rx) = channel::unbounded::<(usize, &TestCase)>();
        let (result_tx, result_rx) = channel::unbounded::<(usize, TestResult)>();
        for job in class.cases.iter().enumerate() {
            // Receiver is alive until the scope below ends
            let _ = job_tx.send(job);
        }
        drop(job_tx);

        std::thread::scope(|scope| {
            for index in 0..workers {
                let jobs = job_rx.clone();
                let results = result_tx.clone();
                let worker = WorkerId(index);
                scope.spawn(move || {
                    for (position, case) in jobs.iter() {
                        let result = self.run_case(worker, &class.name, case);
                        if results.send((position, result)).is_err() {
                            break;
                        }
                    }
                });
            }
        });
        drop(result_tx);

        let mut results: Vec<(usize, TestResult)> = result_rx.iter().collect();
        results.sort_by_key(|(position, _)| *position);
        results.into_iter().map(|(_, result)| result).collect()
    }

    /// Run one invocation to its terminal outcome and report it
    pub fn run_case(&self, worker: WorkerId, class: &str, case: &TestCase) -> TestResult {
        let start = Instant::now();
        info!("========== Starting test: {} ==========", case.name);

        let invocation = InvocationId::new();
        let mut entry = self
            .reporter
            .on_start(invocation.clone(), &case.name, &case.description)
            .with_categories(case.categories.iter().cloned())
            .with_worker(worker);

        // Disposes the worker's context on every exit path
        let lease = self.pool.lease(worker);

        let mut terminal_events = Vec::new();
        let (outcome, state) = self.retry.run(
            &case.name,
            |attempt| {
                let (outcome, events) = self.attempt(worker, case, attempt);
                terminal_events = events;
                outcome
            },
            |_| {
                self.pool.dispose(lease.worker());
            },
        );

        for event in terminal_events {
            entry.info(event);
        }

        let mut artifact = None;
        if outcome.is_fail() {
            let context = self.pool.current(worker);
            if let Some(capture) = self.artifacts.capture(context.as_ref(), &case.name) {
                artifact = Some(capture.path.clone());
                self.reporter.on_attachment(&mut entry, capture);
            }
        }

        drop(lease);

        if let TestOutcome::Fail { reason, .. } = &outcome {
            match &artifact {
                Some(path) => error!(
                    "{} failed: {} (screenshot: {})",
                    case.name,
                    reason,
                    path.display()
                ),
                None => error!("{} failed: {}", case.name, reason),
            }
        }

        if let Err(e) = self.reporter.on_terminal(entry, outcome.clone(), state.attempts()) {
            error!("Could not record outcome of {}: {}", case.name, e);
        }
        if let Err(e) = self.reporter.flush(Checkpoint::Test) {
            warn!("Report flush after {} failed: {}", case.name, e);
        }

        info!(
            "========== Finished test: {} [{}] ==========",
            case.name,
            outcome.status()
        );

        TestResult {
            name: case.name.clone(),
            class: class.to_string(),
            invocation,
            worker,
            outcome,
            attempts: state.attempts(),
            duration_ms: start.elapsed().as_millis() as u64,
            artifact,
        }
    }

    /// One attempt: provision, navigate, run the body. Returns the outcome
    /// and the info events the body recorded.
    fn attempt(&self, worker: WorkerId, case: &TestCase, attempt: u32) -> (TestOutcome, Vec<String>) {
        debug!("{} attempt {} on {}", case.name, attempt, worker);

        let provisioned = match &case.browser {
            Some(browser) => self.pool.get_or_create_kind(worker, browser),
            None => self.pool.get_or_create(worker),
        };
        let context = match provisioned {
            Ok(context) => context,
            Err(e) if e.is_provisioning() => {
                error!("Provisioning for {} failed: {}", case.name, e);
                return (TestOutcome::provisioning(e.to_string()), Vec::new());
            }
            Err(e) => {
                error!("Context lookup for {} failed: {}", case.name, e);
                return (
                    TestOutcome::flaky("Execution context unavailable", Some(e.to_string())),
                    Vec::new(),
                );
            }
        };

        if let (Some(context), Some(url)) = (&context, &self.config().application_url) {
            if let Err(e) = context.lock().session_mut().navigate(url) {
                return (
                    TestOutcome::flaky(format!("Failed to open {}", url), Some(e.to_string())),
                    Vec::new(),
                );
            }
        }

        let mut test_context = TestContext {
            worker,
            attempt,
            config: self.config(),
            context,
            events: Vec::new(),
        };

        let result = panic::catch_unwind(AssertUnwindSafe(|| (case.body)(&mut test_context)));
        let outcome = match result {
            Ok(Ok(())) => TestOutcome::Pass,
            Ok(Err(TestError::Failed { message, cause })) => TestOutcome::flaky(message, cause),
            Ok(Err(TestError::Skipped(reason))) => TestOutcome::skip(reason),
            Err(payload) => TestOutcome::flaky(panic_message(payload.as_ref()), None),
        };

        (outcome, test_context.events)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "test panicked".to_string()
    }
}
