//! In-process fakes for unit tests

use parking_lot::Mutex;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use testgrid_common::ContextKind;

use crate::error::{HarnessError, HarnessResult};
use crate::registry::{BrowserStrategy, Launcher, ProvisioningRequest};
use crate::remote::GridEndpoint;
use crate::session::Session;

/// PNG signature, enough for a screenshot stand-in
pub const FAKE_PNG: &[u8] = &[0x89, b'P', b'N', b'G', 0x0d, 0x0a, 0x1a, 0x0a];

#[derive(Debug, Clone, Copy)]
pub enum LaunchBehavior {
    Succeed,
    Fail,
    /// The driver answers but refuses the session
    Reject,
    Delay(Duration),
}

pub struct FakeSession {
    kind: ContextKind,
    id: String,
    alive: bool,
    live: Arc<AtomicUsize>,
    pub screenshot_fails: bool,
    /// Selectors reported as displayed
    pub visible: Vec<String>,
    navigations: Arc<Mutex<Vec<String>>>,
}

impl FakeSession {
    pub fn new(kind: ContextKind) -> Self {
        Self {
            kind,
            id: "fake-session".to_string(),
            alive: true,
            live: Arc::new(AtomicUsize::new(1)),
            screenshot_fails: false,
            visible: Vec::new(),
            navigations: Arc::new(Mutex::new(Vec::new())),
        }
    }
}

impl Session for FakeSession {
    fn kind(&self) -> ContextKind {
        self.kind
    }

    fn id(&self) -> &str {
        &self.id
    }

    fn is_alive(&self) -> bool {
        self.alive
    }

    fn navigate(&mut self, url: &str) -> HarnessResult<()> {
        if !self.alive {
            return Err(HarnessError::SessionClosed(self.id.clone()));
        }
        self.navigations.lock().push(url.to_string());
        Ok(())
    }

    fn is_displayed(&mut self, css: &str) -> HarnessResult<bool> {
        if !self.alive {
            return Err(HarnessError::SessionClosed(self.id.clone()));
        }
        Ok(self.visible.iter().any(|v| v == css))
    }

    fn screenshot(&mut self) -> HarnessResult<Vec<u8>> {
        if !self.alive {
            return Err(HarnessError::SessionClosed(self.id.clone()));
        }
        if self.screenshot_fails {
            return Err(HarnessError::WebDriver("screenshot unavailable".into()));
        }
        Ok(FAKE_PNG.to_vec())
    }

    fn quit(&mut self) -> HarnessResult<()> {
        if self.alive {
            self.alive = false;
            self.live.fetch_sub(1, Ordering::SeqCst);
        }
        Ok(())
    }
}

pub struct FakeLauncher {
    behavior: LaunchBehavior,
    local: AtomicUsize,
    remote: AtomicUsize,
    created: AtomicUsize,
    live: Arc<AtomicUsize>,
    visible: Vec<String>,
    navigations: Arc<Mutex<Vec<String>>>,
}

impl FakeLauncher {
    pub fn new() -> Arc<Self> {
        Self::with_behavior(LaunchBehavior::Succeed)
    }

    pub fn with_behavior(behavior: LaunchBehavior) -> Arc<Self> {
        Self::build(behavior, Vec::new())
    }

    /// Sessions from this launcher report `selectors` as displayed
    pub fn with_visible(selectors: &[&str]) -> Arc<Self> {
        Self::build(
            LaunchBehavior::Succeed,
            selectors.iter().map(|s| s.to_string()).collect(),
        )
    }

    fn build(behavior: LaunchBehavior, visible: Vec<String>) -> Arc<Self> {
        Arc::new(Self {
            behavior,
            local: AtomicUsize::new(0),
            remote: AtomicUsize::new(0),
            created: AtomicUsize::new(0),
            live: Arc::new(AtomicUsize::new(0)),
            visible,
            navigations: Arc::new(Mutex::new(Vec::new())),
        })
    }

    /// Every URL opened by any session of this launcher, in order
    pub fn navigations(&self) -> Vec<String> {
        self.navigations.lock().clone()
    }

    pub fn local_launches(&self) -> usize {
        self.local.load(Ordering::SeqCst)
    }

    pub fn remote_launches(&self) -> usize {
        self.remote.load(Ordering::SeqCst)
    }

    pub fn created(&self) -> usize {
        self.created.load(Ordering::SeqCst)
    }

    pub fn live_sessions(&self) -> usize {
        self.live.load(Ordering::SeqCst)
    }

    fn launch(&self, strategy: &BrowserStrategy) -> HarnessResult<Box<dyn Session>> {
        match self.behavior {
            LaunchBehavior::Fail => {
                return Err(HarnessError::DriverStartup("fake driver refused to start".into()))
            }
            LaunchBehavior::Reject => {
                return Err(HarnessError::WebDriver("session not created".into()))
            }
            LaunchBehavior::Delay(delay) => std::thread::sleep(delay),
            LaunchBehavior::Succeed => {}
        }
        let n = self.created.fetch_add(1, Ordering::SeqCst);
        self.live.fetch_add(1, Ordering::SeqCst);
        Ok(Box::new(FakeSession {
            kind: strategy.kind(),
            id: format!("fake-{}", n),
            alive: true,
            live: Arc::clone(&self.live),
            screenshot_fails: false,
            visible: self.visible.clone(),
            navigations: Arc::clone(&self.navigations),
        }))
    }
}

impl Launcher for FakeLauncher {
    fn launch_local(
        &self,
        strategy: &BrowserStrategy,
        _request: &ProvisioningRequest,
    ) -> HarnessResult<Box<dyn Session>> {
        self.local.fetch_add(1, Ordering::SeqCst);
        self.launch(strategy)
    }

    fn connect_remote(
        &self,
        _endpoint: &GridEndpoint,
        strategy: &BrowserStrategy,
        _request: &ProvisioningRequest,
    ) -> HarnessResult<Box<dyn Session>> {
        self.remote.fetch_add(1, Ordering::SeqCst);
        self.launch(strategy)
    }
}
