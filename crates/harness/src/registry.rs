//! Context factory registry
//!
//! Maps a context kind to the strategy that provisions it. Unknown browser
//! names degrade to the registry's default kind with a warning. Every
//! provisioning call is bounded by the configured timeout and either goes
//! to a locally spawned driver or to a remote grid, decided once per call.

use crossbeam::channel;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use testgrid_common::{ContextKind, EnvironmentConfig};
use tracing::{debug, info, warn};

use crate::driver::{driver_binary, DriverProcess};
use crate::error::{HarnessError, HarnessResult};
use crate::remote::GridEndpoint;
use crate::session::Session;
use crate::webdriver::{WebDriverClient, WebDriverSession};

/// Browser window dimensions applied in headless mode
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowSize {
    pub width: u32,
    pub height: u32,
}

impl Default for WindowSize {
    fn default() -> Self {
        Self {
            width: 1920,
            height: 1080,
        }
    }
}

/// Everything needed to provision one context. Built from the resolved
/// configuration and consumed by a single provisioning call.
#[derive(Debug, Clone, PartialEq)]
pub struct ProvisioningRequest {
    pub kind: ContextKind,
    pub headless: bool,
    /// Budget for the whole provisioning call
    pub timeout: Duration,
    /// Raw grid URL when remote execution is enabled
    pub remote_endpoint: Option<String>,
    pub implicit_wait: Duration,
    pub page_load_timeout: Duration,
}

impl ProvisioningRequest {
    pub fn from_config(config: &EnvironmentConfig, kind: ContextKind) -> Self {
        Self {
            kind,
            headless: config.headless,
            timeout: config.provision_timeout(),
            remote_endpoint: config
                .remote_execution
                .then(|| config.grid_url.clone()),
            implicit_wait: config.implicit_wait(),
            page_load_timeout: config.page_load_timeout(),
        }
    }
}

/// Kind-specific provisioning options
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BrowserStrategy {
    Chrome { window: WindowSize },
    Firefox { window: WindowSize },
    Edge { window: WindowSize },
    Safari,
}

impl BrowserStrategy {
    pub fn for_kind(kind: ContextKind) -> Option<Self> {
        let window = WindowSize::default();
        match kind {
            ContextKind::Chrome => Some(BrowserStrategy::Chrome { window }),
            ContextKind::Firefox => Some(BrowserStrategy::Firefox { window }),
            ContextKind::Edge => Some(BrowserStrategy::Edge { window }),
            ContextKind::Safari => Some(BrowserStrategy::Safari),
            ContextKind::Api => None,
        }
    }

    pub fn kind(&self) -> ContextKind {
        match self {
            BrowserStrategy::Chrome { .. } => ContextKind::Chrome,
            BrowserStrategy::Firefox { .. } => ContextKind::Firefox,
            BrowserStrategy::Edge { .. } => ContextKind::Edge,
            BrowserStrategy::Safari => ContextKind::Safari,
        }
    }

    /// Name of the local driver executable
    pub fn driver_binary(&self) -> &'static str {
        match self {
            BrowserStrategy::Chrome { .. } => "chromedriver",
            BrowserStrategy::Firefox { .. } => "geckodriver",
            BrowserStrategy::Edge { .. } => "msedgedriver",
            BrowserStrategy::Safari => "safaridriver",
        }
    }

    /// W3C `alwaysMatch` capabilities for a new session
    pub fn capabilities(&self, headless: bool) -> Value {
        match self {
            BrowserStrategy::Chrome { window } => {
                let mut args = Vec::new();
                if headless {
                    args.extend(chromium_headless_args(window));
                }
                args.push("--start-maximized".to_string());
                args.push("--disable-notifications".to_string());
                always_match(json!({
                    "browserName": "chrome",
                    "acceptInsecureCerts": true,
                    "goog:chromeOptions": { "args": args },
                }))
            }
            BrowserStrategy::Edge { window } => {
                let args = if headless {
                    chromium_headless_args(window)
                } else {
                    Vec::new()
                };
                always_match(json!({
                    "browserName": "MicrosoftEdge",
                    "acceptInsecureCerts": true,
                    "ms:edgeOptions": { "args": args },
                }))
            }
            BrowserStrategy::Firefox { window } => {
                let args = if headless {
                    vec![
                        "--headless".to_string(),
                        format!("--width={}", window.width),
                        format!("--height={}", window.height),
                    ]
                } else {
                    Vec::new()
                };
                always_match(json!({
                    "browserName": "firefox",
                    "acceptInsecureCerts": true,
                    "moz:firefoxOptions": { "args": args },
                }))
            }
            BrowserStrategy::Safari => always_match(json!({ "browserName": "safari" })),
        }
    }
}

fn chromium_headless_args(window: &WindowSize) -> Vec<String> {
    vec![
        "--headless".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        format!("--window-size={},{}", window.width, window.height),
    ]
}

fn always_match(capabilities: Value) -> Value {
    json!({ "alwaysMatch": capabilities })
}

/// Capability to turn a strategy into a live session
pub trait Launcher: Send + Sync {
    /// Start a session backed by a local driver process
    fn launch_local(
        &self,
        strategy: &BrowserStrategy,
        request: &ProvisioningRequest,
    ) -> HarnessResult<Box<dyn Session>>;

    /// Start a session on a remote grid
    fn connect_remote(
        &self,
        endpoint: &GridEndpoint,
        strategy: &BrowserStrategy,
        request: &ProvisioningRequest,
    ) -> HarnessResult<Box<dyn Session>>;
}

/// Launcher speaking W3C WebDriver to local drivers and remote grids
#[derive(Debug, Clone, Default)]
pub struct WebDriverLauncher {
    driver_dir: Option<PathBuf>,
}

impl WebDriverLauncher {
    pub fn new(driver_dir: Option<PathBuf>) -> Self {
        Self { driver_dir }
    }

    fn http_timeout(request: &ProvisioningRequest) -> Duration {
        request.timeout.max(request.page_load_timeout) + Duration::from_secs(5)
    }

    fn finish(
        client: WebDriverClient,
        strategy: &BrowserStrategy,
        request: &ProvisioningRequest,
        driver: Option<DriverProcess>,
    ) -> HarnessResult<Box<dyn Session>> {
        let capabilities = strategy.capabilities(request.headless);
        let mut session = WebDriverSession::open(client, strategy.kind(), &capabilities, driver)?;

        if let Err(e) = session.set_timeouts(request.implicit_wait, request.page_load_timeout) {
            // Release the half-configured session (and its driver) before failing
            if let Err(quit_err) = session.quit() {
                debug!("Quit after failed setup also failed: {}", quit_err);
            }
            return Err(HarnessError::Provisioning {
                kind: strategy.kind(),
                reason: e.to_string(),
            });
        }

        Ok(Box::new(session))
    }
}

impl Launcher for WebDriverLauncher {
    fn launch_local(
        &self,
        strategy: &BrowserStrategy,
        request: &ProvisioningRequest,
    ) -> HarnessResult<Box<dyn Session>> {
        let binary = driver_binary(self.driver_dir.as_deref(), strategy.driver_binary());
        let driver = DriverProcess::spawn(&binary, request.timeout)?;
        let client = WebDriverClient::new(driver.base_url(), Self::http_timeout(request))?;
        Self::finish(client, strategy, request, Some(driver))
    }

    fn connect_remote(
        &self,
        endpoint: &GridEndpoint,
        strategy: &BrowserStrategy,
        request: &ProvisioningRequest,
    ) -> HarnessResult<Box<dyn Session>> {
        info!("Connecting to Selenium Grid at: {}", endpoint);
        let client = WebDriverClient::new(endpoint.as_str(), Self::http_timeout(request))?;
        Self::finish(client, strategy, request, None)
    }
}

/// Read-only table of provisioning strategies, shared by all workers
pub struct FactoryRegistry {
    config: Arc<EnvironmentConfig>,
    launcher: Arc<dyn Launcher>,
    strategies: HashMap<ContextKind, BrowserStrategy>,
    default_kind: ContextKind,
}

impl FactoryRegistry {
    /// Registry with every supported browser and `chrome` as the default
    pub fn new(config: Arc<EnvironmentConfig>, launcher: Arc<dyn Launcher>) -> Self {
        let mut registry = Self::empty(config, launcher, ContextKind::Chrome);
        for kind in ContextKind::BROWSERS {
            if let Some(strategy) = BrowserStrategy::for_kind(kind) {
                registry.register(strategy);
            }
        }
        registry
    }

    /// Registry with no strategies registered yet
    pub fn empty(
        config: Arc<EnvironmentConfig>,
        launcher: Arc<dyn Launcher>,
        default_kind: ContextKind,
    ) -> Self {
        Self {
            config,
            launcher,
            strategies: HashMap::new(),
            default_kind,
        }
    }

    pub fn register(&mut self, strategy: BrowserStrategy) -> &mut Self {
        debug!("Registering strategy for {}", strategy.kind());
        self.strategies.insert(strategy.kind(), strategy);
        self
    }

    pub fn config(&self) -> &Arc<EnvironmentConfig> {
        &self.config
    }

    pub fn default_kind(&self) -> ContextKind {
        self.default_kind
    }

    pub fn is_registered(&self, kind: ContextKind) -> bool {
        self.strategies.contains_key(&kind)
    }

    /// Registered kinds in a stable order
    pub fn kinds(&self) -> Vec<ContextKind> {
        let mut kinds: Vec<_> = self.strategies.keys().copied().collect();
        kinds.sort_by_key(|k| k.as_str());
        kinds
    }

    /// Map a browser name to a registered kind, falling back to the default
    pub fn resolve_kind(&self, name: &str) -> HarnessResult<ContextKind> {
        match name.parse::<ContextKind>() {
            Ok(ContextKind::Api) => {
                return Err(HarnessError::UnsupportedKind(ContextKind::Api.to_string()))
            }
            Ok(kind) if self.is_registered(kind) => return Ok(kind),
            _ => {}
        }

        if self.is_registered(self.default_kind) {
            warn!(
                "Unsupported browser: {}. Defaulting to {}.",
                name, self.default_kind
            );
            Ok(self.default_kind)
        } else {
            Err(HarnessError::UnsupportedKind(name.to_string()))
        }
    }

    /// Provision a context of the named kind using the shared configuration
    pub fn provision(&self, kind_name: &str) -> HarnessResult<Box<dyn Session>> {
        let kind = self.resolve_kind(kind_name)?;
        self.provision_request(ProvisioningRequest::from_config(&self.config, kind))
    }

    /// Provision a context for an explicit request, bounded by its timeout
    pub fn provision_request(&self, request: ProvisioningRequest) -> HarnessResult<Box<dyn Session>> {
        let strategy = self
            .strategies
            .get(&request.kind)
            .cloned()
            .ok_or_else(|| HarnessError::UnsupportedKind(request.kind.to_string()))?;

        // Local or remote is decided here, once
        let endpoint = request
            .remote_endpoint
            .as_deref()
            .map(GridEndpoint::parse)
            .transpose()?;

        let kind = request.kind;
        let timeout = request.timeout;
        info!(
            "Provisioning {} ({}, headless={})",
            kind,
            endpoint.as_ref().map_or("local", |_| "remote"),
            request.headless
        );

        // Rendezvous channel: once the receiver is gone a late session comes
        // back to the provisioning thread, which releases it.
        let (tx, rx) = channel::bounded::<HarnessResult<Box<dyn Session>>>(0);
        let launcher = Arc::clone(&self.launcher);

        std::thread::Builder::new()
            .name(format!("provision-{}", kind))
            .spawn(move || {
                let result = match &endpoint {
                    Some(endpoint) => launcher.connect_remote(endpoint, &strategy, &request),
                    None => launcher.launch_local(&strategy, &request),
                };
                if let Err(channel::SendError(late)) = tx.send(result) {
                    if let Ok(mut session) = late {
                        warn!(
                            "Releasing {} session {} that completed after the provisioning timeout",
                            kind,
                            session.id()
                        );
                        if let Err(e) = session.quit() {
                            warn!("Failed to release late session: {}", e);
                        }
                    }
                }
            })
            .map_err(|e| HarnessError::from(e).into_provisioning(kind))?;

        match rx.recv_timeout(timeout) {
            Ok(result) => result.map_err(|e| e.into_provisioning(kind)),
            Err(channel::RecvTimeoutError::Timeout) => {
                warn!("Provisioning {} timed out after {:?}", kind, timeout);
                Err(HarnessError::ProvisionTimeout { kind, timeout })
            }
            Err(channel::RecvTimeoutError::Disconnected) => Err(HarnessError::Provisioning {
                kind,
                reason: "provisioning thread exited without a result".to_string(),
            }),
        }
    }
}

impl std::fmt::Debug for FactoryRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactoryRegistry")
            .field("kinds", &self.kinds())
            .field("default_kind", &self.default_kind)
            .finish()
    }
}
