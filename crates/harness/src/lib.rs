//! testgrid Harness
//!
//! Execution context lifecycle and retry/reporting orchestration:
//! - Provisions browser sessions locally (spawned drivers) or on a remote grid
//! - Keeps at most one live context per worker thread
//! - Retries flaky failures a bounded number of times
//! - Reports exactly one terminal outcome per test, with a screenshot on failure
//!
//! # Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                       TestRunner                            │
//! │    ├── run_suite(Suite) -> SuiteResult                      │
//! │    ├── run_class(TestClass)  (scoped worker threads)        │
//! │    └── run_case(worker, TestCase) -> TestResult             │
//! ├─────────────────────────────────────────────────────────────┤
//! │  RetryCoordinator        fresh RetryState per invocation    │
//! ├─────────────────────────────────────────────────────────────┤
//! │  ExecutionContextPool    WorkerId -> ExecutionContext       │
//! │    └── FactoryRegistry   ContextKind -> BrowserStrategy     │
//! │          ├── launch_local()   DriverProcess + WebDriver     │
//! │          └── connect_remote() GridEndpoint + WebDriver      │
//! ├─────────────────────────────────────────────────────────────┤
//! │  Reporter                OpenEntry -> pending -> ReportSink │
//! │    └── ArtifactCollector screenshot on FAIL                 │
//! └─────────────────────────────────────────────────────────────┘
//! ```

pub mod artifact;
pub mod driver;
pub mod error;
pub mod pool;
pub mod registry;
pub mod remote;
pub mod reporter;
pub mod retry;
pub mod runner;
pub mod session;
pub mod wait;
pub mod webdriver;

#[cfg(test)]
mod testing;

pub use artifact::ArtifactCollector;
pub use error::{HarnessError, HarnessResult};
pub use pool::{ContextLease, ExecutionContextPool};
pub use registry::{BrowserStrategy, FactoryRegistry, Launcher, ProvisioningRequest, WebDriverLauncher};
pub use remote::GridEndpoint;
pub use reporter::{read_report, Checkpoint, JsonFileSink, MemorySink, ReportSink, Reporter};
pub use retry::{should_retry, RetryCoordinator, RetryPhase, RetryState, MAX_RETRIES};
pub use runner::{Suite, SuiteResult, TestCase, TestClass, TestContext, TestError, TestResult, TestRunner};
pub use session::{ExecutionContext, Session, SharedContext};
pub use wait::{wait_until, wait_until_ok, WaitConfig, WaitOutcome};
