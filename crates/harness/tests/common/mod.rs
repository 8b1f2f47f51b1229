//! Shared stubs for harness integration tests

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tempfile::TempDir;
use testgrid_common::{ContextKind, EnvironmentConfig};
use testgrid_harness::{
    BrowserStrategy, ExecutionContextPool, FactoryRegistry, GridEndpoint, HarnessError,
    HarnessResult, Launcher, MemorySink, ProvisioningRequest, Reporter, Session, TestRunner,
};

/// Counts sessions so tests can assert nothing leaks
#[derive(Default)]
pub struct Counters {
    pub created: AtomicUsize,
    pub live: AtomicUsize,
    pub max_live: AtomicUsize,
    pub remote: AtomicUsize,
}

impl Counters {
    pub fn live(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }
}

pub struct StubSession {
    kind: ContextKind,
    id: String,
    alive: bool,
    counters: Arc<Counters>,
}

impl Session for StubSession {
    fn kind(&self) -> ContextKind {
        self.kind
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn navigate(&mut self, _url: &str) -> HarnessResult<()> {
        Ok(())
    }

    fn is_displayed(&mut self, _css: &str) -> HarnessResult<bool> {
        Ok(true)
    }

    fn screenshot(&mut self) -> HarnessResult<Vec<u8>> {
        if !self.alive {
            return Err(HarnessError::SessionClosed(self.id.clone()));
        }
        Ok(vec![0x89, b'P', b'N', b'G'])
    }

    fn quit(&mut self) -> HarnessResult<()> {
        if self.alive {
            self.alive = false;
            self.counters.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct StubLauncher {
    pub counters: Arc<Counters>,
    pub delay: Duration,
}

impl StubLauncher {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            counters: Arc::new(Counters::default()),
            delay: Duration::ZERO,
        })
    }

    fn session(&self, strategy: &BrowserStrategy) -> HarnessResult<Box<dyn Session>> {
        if !self.delay.is_zero() {
            std::thread::sleep(self.delay);
        }
        let n = self.counters.created.fetch_add(1, Ordering::SeqCst);
        let live = self.counters.live.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.max_live.fetch_max(live, Ordering::SeqCst);
        Ok(Box::new(StubSession {
            kind: strategy.kind(),
            id: format!("stub-{}", n),
            alive: true,
            counters: Arc::clone(&self.counters),
        }))
    }
}

impl Launcher for StubLauncher {
    fn launch_local(
        &self,
        strategy: &BrowserStrategy,
        _request: &ProvisioningRequest,
    ) -> HarnessResult<Box<dyn Session>> {
        self.session(strategy)
    }

    fn connect_remote(
        &self,
        _endpoint: &GridEndpoint,
        strategy: &BrowserStrategy,
        _request: &ProvisioningRequest,
    ) -> HarnessResult<Box<dyn Session>> {
        self.counters.remote.fetch_add(1, Ordering::SeqCst);
        self.session(strategy)
    }
}

pub fn config_in(dir: &TempDir) -> EnvironmentConfig {
    EnvironmentConfig {
        screenshot_dir: dir.path().join("screenshots"),
        report_dir: dir.path().join("reports"),
        ..EnvironmentConfig::default()
    }
}

pub fn pool(config: EnvironmentConfig, launcher: Arc<StubLauncher>) -> ExecutionContextPool {
    let registry = FactoryRegistry::new(Arc::new(config), launcher);
    ExecutionContextPool::new(Arc::new(registry))
}

pub fn runner(config: EnvironmentConfig, launcher: Arc<StubLauncher>) -> (TestRunner, MemorySink) {
    let sink = MemorySink::new();
    let runner = TestRunner::new(pool(config, launcher), Reporter::new(Box::new(sink.clone())));
    (runner, sink)
}
