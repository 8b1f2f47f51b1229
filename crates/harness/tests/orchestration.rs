//! End-to-end orchestration tests
//!
//! Drive whole suites through the runner with stub sessions and check the
//! reported outcomes.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use tempfile::TempDir;
use testgrid_common::{ContextKind, EnvironmentConfig, FailureKind, InvocationId, TestOutcome};
use testgrid_harness::{
    read_report, Checkpoint, FactoryRegistry, HarnessError, MemorySink, Reporter, Session, Suite,
    TestCase, TestClass, TestError, TestRunner,
};

use common::{config_in, runner, StubLauncher};

#[test]
fn unknown_browser_falls_back_to_chrome() {
    let dir = TempDir::new().unwrap();
    let config = EnvironmentConfig {
        browser: "unknown-browser".to_string(),
        headless: false,
        ..config_in(&dir)
    };
    let launcher = StubLauncher::new();
    let registry = FactoryRegistry::new(Arc::new(config), launcher.clone());

    let session = registry.provision("unknown-browser").unwrap();
    assert_eq!(session.kind(), ContextKind::Chrome);
    assert!(session.is_alive());
}

#[test]
fn fail_fail_pass_reports_one_pass() {
    let dir = TempDir::new().unwrap();
    let (runner, sink) = runner(config_in(&dir), StubLauncher::new());

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let suite = Suite::new("retry").class(TestClass::new("Flaky").case(TestCase::new(
        "eventuallyPasses",
        move |ctx| {
            counter.fetch_add(1, Ordering::SeqCst);
            TestError::ensure(ctx.attempt() == 3, "not yet")
        },
    )));

    let result = runner.run_suite(&suite).unwrap();

    assert_eq!(calls.load(Ordering::SeqCst), 3);
    assert_eq!(result.passed, 1);
    assert_eq!(result.failed, 0);

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].outcome, Some(TestOutcome::Pass));
    assert_eq!(entries[0].attempts, 3);
}

#[test]
fn malformed_grid_url_fails_once_without_retry() {
    let dir = TempDir::new().unwrap();
    let config = EnvironmentConfig {
        remote_execution: true,
        grid_url: "not a url".to_string(),
        ..config_in(&dir)
    };
    let launcher = StubLauncher::new();
    let (runner, sink) = runner(config, launcher.clone());

    let calls = Arc::new(AtomicU32::new(0));
    let counter = Arc::clone(&calls);
    let suite = Suite::new("grid").class(TestClass::new("Remote").case(TestCase::new(
        "needsGrid",
        move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
            Ok(())
        },
    )));

    let result = runner.run_suite(&suite).unwrap();
    let test = result.result("needsGrid").unwrap();

    assert_eq!(test.attempts, 1);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(launcher.counters.created(), 0);
    match &test.outcome {
        TestOutcome::Fail { reason, kind, .. } => {
            assert_eq!(*kind, FailureKind::Provisioning);
            assert!(reason.contains("Invalid grid endpoint"));
        }
        other => panic!("expected provisioning failure, got {:?}", other),
    }
    assert_eq!(sink.len(), 1);
}

#[test]
fn flush_is_idempotent_across_checkpoints() {
    let dir = TempDir::new().unwrap();
    let reporter = Reporter::json(dir.path()).unwrap();

    let entry = reporter.on_start(InvocationId::new(), "once", "");
    reporter.on_terminal(entry, TestOutcome::Pass, 1).unwrap();

    for _ in 0..3 {
        reporter.flush(Checkpoint::Test).unwrap();
    }
    reporter.flush(Checkpoint::Class).unwrap();
    let location = reporter.flush(Checkpoint::Suite).unwrap().unwrap();

    assert_eq!(read_report(&location).unwrap().len(), 1);
}

#[test]
fn capture_failure_does_not_mask_failure() {
    let dir = TempDir::new().unwrap();
    let (runner, sink) = runner(config_in(&dir), StubLauncher::new());

    let case = TestCase::new("tearsDownEarly", |ctx| {
        // Kill the session so the screenshot cannot be taken
        ctx.with_session(|session| session.quit())?;
        Err(TestError::fail("element not found"))
    });
    let suite = Suite::new("capture").class(TestClass::new("Capture").case(case));

    let result = runner.run_suite(&suite).unwrap();
    let test = result.result("tearsDownEarly").unwrap();

    assert_eq!(test.outcome.reason(), Some("element not found"));
    assert!(test.artifact.is_none());

    let entries = sink.entries();
    assert_eq!(entries.len(), 1);
    assert!(entries[0].outcome.as_ref().unwrap().is_fail());
    assert_eq!(entries[0].attachments().count(), 0);
}

#[test]
fn failure_with_live_context_is_reported_with_screenshot() {
    let dir = TempDir::new().unwrap();
    let (runner, sink) = runner(config_in(&dir), StubLauncher::new());

    let suite = Suite::new("screens").class(
        TestClass::new("Login").case(
            TestCase::new("invalidLoginTest", |_| Err(TestError::fail("error banner missing")))
                .category("regression"),
        ),
    );

    runner.run_suite(&suite).unwrap();

    let entries = sink.entries();
    let artifact = entries[0].attachments().next().unwrap();
    let file_name = artifact.path.file_name().unwrap().to_string_lossy().to_string();
    assert!(file_name.starts_with("invalidLoginTest_"));
    assert!(artifact.path.exists());
    assert_eq!(entries[0].categories, vec!["regression".to_string()]);
}

#[test]
fn suite_with_json_report_surfaces_location() {
    let dir = TempDir::new().unwrap();
    let config = Arc::new(EnvironmentConfig {
        threads: 3,
        ..config_in(&dir)
    });
    let runner = TestRunner::with_launcher(Arc::clone(&config), StubLauncher::new()).unwrap();

    let mut class = TestClass::new("Many");
    for i in 0..6 {
        class = class.case(TestCase::new(format!("t{}", i), move |_| {
            if i % 3 == 0 {
                Err(TestError::skip("not applicable"))
            } else {
                Ok(())
            }
        }));
    }
    let suite = Suite::new("json").class(class).class(TestClass::new("Empty"));

    let result = runner.run_suite(&suite).unwrap();

    assert_eq!(result.total, 6);
    assert_eq!(result.skipped, 2);
    assert_eq!(result.passed, 4);
    let report = result.report.unwrap();
    assert!(report.starts_with(&config.report_dir));
    assert_eq!(read_report(&report).unwrap().len(), 6);
}

#[test]
fn duplicate_terminal_is_rejected() {
    let reporter = Reporter::new(Box::new(MemorySink::new()));
    let id = InvocationId::new();

    let entry = reporter.on_start(id.clone(), "t", "");
    reporter.on_terminal(entry, TestOutcome::Pass, 1).unwrap();
    let again = reporter.on_start(id, "t", "");

    assert!(matches!(
        reporter.on_terminal(again, TestOutcome::Pass, 1),
        Err(HarnessError::DuplicateTerminal(_))
    ));
}
