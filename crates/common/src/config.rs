//! Layered environment configuration
//!
//! Values are resolved once at startup from, highest precedence first:
//!
//! 1. process overrides (`-D key=value`)
//! 2. OS environment variables (only `SELENIUM_REMOTE` / `SELENIUM_GRID_URL`)
//! 3. the environment overlay file (`{env}.toml` next to the base file)
//! 4. the base configuration file
//! 5. built-in defaults
//!
//! The file is TOML; nested tables are flattened into dotted keys so
//! `[remote] execution = true` and `"remote.execution" = true` both resolve
//! the `remote.execution` key.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::error::{Error, Result};

/// Recognized configuration keys
pub mod keys {
    pub const BROWSER: &str = "browser";
    pub const HEADLESS: &str = "headless";
    pub const REMOTE_EXECUTION: &str = "remote.execution";
    pub const GRID_URL: &str = "grid.url";
    pub const IMPLICIT_WAIT: &str = "implicit.wait";
    pub const EXPLICIT_WAIT: &str = "explicit.wait";
    pub const PAGE_LOAD_TIMEOUT: &str = "page.load.timeout";
    pub const PROVISION_TIMEOUT: &str = "provision.timeout";
    pub const SCREENSHOT_PATH: &str = "screenshot.path";
    pub const REPORT_PATH: &str = "report.path";
    pub const APPLICATION_URL: &str = "url";
    pub const SKIP_BROWSER: &str = "skipBrowser";
    pub const PARALLEL_THREADS: &str = "parallel.threads";
    pub const DRIVER_DIR: &str = "driver.dir";
    pub const ENV: &str = "env";
    pub const API_BASE_URL: &str = "api.baseUrl";
    pub const API_TIMEOUT: &str = "api.timeout";
    pub const API_AUTH_TOKEN: &str = "api.authToken";
    pub const API_CUSTOM_HEADERS: &str = "api.customHeaders";
    pub const API_ENDPOINT_PREFIX: &str = "api.endpoint.";
}

pub const ENV_SELENIUM_REMOTE: &str = "SELENIUM_REMOTE";
pub const ENV_SELENIUM_GRID_URL: &str = "SELENIUM_GRID_URL";

pub const DEFAULT_CONFIG_FILE: &str = "testgrid.toml";
pub const DEFAULT_ENVIRONMENT: &str = "qa";
pub const DEFAULT_BROWSER: &str = "chrome";
pub const DEFAULT_GRID_URL: &str = "http://localhost:4444/wd/hub";
pub const DEFAULT_API_BASE_URL: &str = "https://jsonplaceholder.typicode.com";
pub const DEFAULT_API_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_IMPLICIT_WAIT_SECS: u64 = 10;
pub const DEFAULT_EXPLICIT_WAIT_SECS: u64 = 20;
pub const DEFAULT_PAGE_LOAD_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_PROVISION_TIMEOUT_SECS: u64 = 60;
pub const DEFAULT_SCREENSHOT_DIR: &str = "test-output/screenshots";
pub const DEFAULT_REPORT_DIR: &str = "test-output/reports";

/// Layer a resolved value came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Source {
    Override,
    Environment,
    Overlay,
    File,
}

/// Environment variable that may override a config key
fn env_var_for(key: &str) -> Option<&'static str> {
    match key {
        keys::REMOTE_EXECUTION => Some(ENV_SELENIUM_REMOTE),
        keys::GRID_URL => Some(ENV_SELENIUM_GRID_URL),
        _ => None,
    }
}

/// Java-style boolean: only a case-insensitive `true` is true
pub fn parse_bool(value: &str) -> bool {
    value.trim().eq_ignore_ascii_case("true")
}

/// Parse `;`-separated `key:value` header pairs. Pairs that do not split into
/// exactly two parts are ignored.
pub fn parse_custom_headers(raw: &str) -> Vec<(String, String)> {
    raw.split(';')
        .filter_map(|pair| {
            let parts: Vec<&str> = pair.split(':').collect();
            match parts.as_slice() {
                [key, value] if !key.trim().is_empty() => {
                    Some((key.trim().to_string(), value.trim().to_string()))
                }
                _ => None,
            }
        })
        .collect()
}

/// Unresolved configuration inputs
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    file: PathBuf,
    overrides: BTreeMap<String, String>,
    environment: BTreeMap<String, String>,
}

impl ConfigSources {
    /// Sources with only the given file; no overrides, no environment
    pub fn new(file: impl Into<PathBuf>) -> Self {
        Self {
            file: file.into(),
            ..Default::default()
        }
    }

    /// Sources with a snapshot of the recognized process environment variables
    pub fn from_process(file: impl Into<PathBuf>) -> Self {
        let mut sources = Self::new(file);
        for var in [ENV_SELENIUM_REMOTE, ENV_SELENIUM_GRID_URL] {
            if let Ok(value) = std::env::var(var) {
                sources.environment.insert(var.to_string(), value);
            }
        }
        sources
    }

    pub fn with_override(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.overrides.insert(key.into(), value.into());
        self
    }

    pub fn with_env(mut self, var: impl Into<String>, value: impl Into<String>) -> Self {
        self.environment.insert(var.into(), value.into());
        self
    }

    pub fn file(&self) -> &Path {
        &self.file
    }

    /// Resolve every layer into an immutable configuration.
    ///
    /// A missing or unreadable base file is fatal.
    pub fn resolve(self) -> Result<EnvironmentConfig> {
        let file = load_flat(&self.file)?;
        info!("Configuration loaded from {}", self.file.display());

        let environment = self
            .overrides
            .get(keys::ENV)
            .or_else(|| file.get(keys::ENV))
            .map(|v| v.trim().to_string())
            .filter(|v| !v.is_empty())
            .unwrap_or_else(|| {
                debug!("Environment not specified, using default: {}", DEFAULT_ENVIRONMENT);
                DEFAULT_ENVIRONMENT.to_string()
            });

        let overlay_path = overlay_path(&self.file, &environment);
        let overlay = if overlay_path != self.file && overlay_path.exists() {
            info!("Loading {} overlay from {}", environment, overlay_path.display());
            load_flat(&overlay_path)?
        } else {
            debug!("No overlay for environment '{}'", environment);
            BTreeMap::new()
        };

        let layers = Layers {
            overrides: self.overrides,
            environment: self.environment,
            overlay,
            file,
        };

        EnvironmentConfig::from_layers(&layers, environment, self.file)
    }
}

fn overlay_path(file: &Path, environment: &str) -> PathBuf {
    file.parent()
        .unwrap_or_else(|| Path::new("."))
        .join(format!("{environment}.toml"))
}

/// Read a TOML file into a flat dotted-key map
fn load_flat(path: &Path) -> Result<BTreeMap<String, String>> {
    let content = std::fs::read_to_string(path).map_err(|e| match e.kind() {
        std::io::ErrorKind::NotFound => Error::ConfigNotFound {
            path: path.to_path_buf(),
        },
        _ => Error::ConfigUnreadable {
            path: path.to_path_buf(),
            reason: e.to_string(),
        },
    })?;

    let table: toml::Table = toml::from_str(&content)
        .map_err(|e| Error::InvalidConfig(format!("{}: {}", path.display(), e)))?;

    let mut flat = BTreeMap::new();
    flatten("", &table, &mut flat);
    Ok(flat)
}

fn flatten(prefix: &str, table: &toml::Table, out: &mut BTreeMap<String, String>) {
    for (key, value) in table {
        let full = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match value {
            toml::Value::Table(nested) => flatten(&full, nested, out),
            toml::Value::String(s) => {
                out.insert(full, s.clone());
            }
            other => {
                out.insert(full, other.to_string());
            }
        }
    }
}

struct Layers {
    overrides: BTreeMap<String, String>,
    environment: BTreeMap<String, String>,
    overlay: BTreeMap<String, String>,
    file: BTreeMap<String, String>,
}

impl Layers {
    fn lookup(&self, key: &str) -> Option<(&str, Source)> {
        if let Some(value) = self.overrides.get(key) {
            return Some((value.as_str(), Source::Override));
        }
        if let Some(var) = env_var_for(key) {
            if let Some(value) = self.environment.get(var).filter(|v| !v.is_empty()) {
                return Some((value.as_str(), Source::Environment));
            }
        }
        if let Some(value) = self.overlay.get(key) {
            return Some((value.as_str(), Source::Overlay));
        }
        self.file.get(key).map(|v| (v.as_str(), Source::File))
    }

    /// Non-empty string value
    fn string(&self, key: &str) -> Option<String> {
        self.lookup(key)
            .map(|(v, _)| v.trim())
            .filter(|v| !v.is_empty())
            .map(str::to_string)
    }

    fn boolean(&self, key: &str) -> bool {
        match self.lookup(key) {
            Some((value, source)) => {
                debug!("{} = {} (from {:?})", key, value, source);
                parse_bool(value)
            }
            None => false,
        }
    }

    fn seconds(&self, key: &str, default: u64) -> Result<u64> {
        match self.string(key) {
            Some(value) => value.parse::<u64>().map_err(|_| Error::InvalidValue {
                key: key.to_string(),
                value,
                expected: "a whole number of seconds",
            }),
            None => Ok(default),
        }
    }

    /// Merged view of every layer, highest precedence winning
    fn merged(&self) -> BTreeMap<String, String> {
        let mut merged = self.file.clone();
        merged.extend(self.overlay.clone());
        for key in [keys::REMOTE_EXECUTION, keys::GRID_URL] {
            if let Some((value, Source::Environment)) = self.lookup(key) {
                merged.insert(key.to_string(), value.to_string());
            }
        }
        merged.extend(self.overrides.clone());
        merged
    }
}

/// API client settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ApiSettings {
    pub base_url: String,
    pub timeout_secs: u64,
    pub auth_token: Option<String>,
    pub headers: BTreeMap<String, String>,
}

impl ApiSettings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    fn default_headers() -> BTreeMap<String, String> {
        BTreeMap::from([
            ("Accept".to_string(), "application/json".to_string()),
            ("Content-Type".to_string(), "application/json".to_string()),
        ])
    }

    fn from_layers(layers: &Layers) -> Self {
        let base_url = layers.string(keys::API_BASE_URL).unwrap_or_else(|| {
            warn!("API base URL not found in configuration. Using default.");
            DEFAULT_API_BASE_URL.to_string()
        });

        let timeout_secs = match layers.string(keys::API_TIMEOUT) {
            None => DEFAULT_API_TIMEOUT_SECS,
            Some(raw) => raw.parse().unwrap_or_else(|_| {
                warn!("Invalid API timeout '{}' in configuration. Using default.", raw);
                DEFAULT_API_TIMEOUT_SECS
            }),
        };

        let mut headers = Self::default_headers();
        if let Some(raw) = layers.string(keys::API_CUSTOM_HEADERS) {
            headers.extend(parse_custom_headers(&raw));
        }

        Self {
            base_url,
            timeout_secs,
            auth_token: layers.string(keys::API_AUTH_TOKEN),
            headers,
        }
    }
}

impl Default for ApiSettings {
    fn default() -> Self {
        Self {
            base_url: DEFAULT_API_BASE_URL.to_string(),
            timeout_secs: DEFAULT_API_TIMEOUT_SECS,
            auth_token: None,
            headers: Self::default_headers(),
        }
    }
}

/// Resolved, read-only configuration shared by every component
#[derive(Debug, Clone, Serialize)]
pub struct EnvironmentConfig {
    pub environment: String,
    /// Requested context kind as written; the registry resolves it
    pub browser: String,
    pub headless: bool,
    pub remote_execution: bool,
    pub grid_url: String,
    pub implicit_wait_secs: u64,
    pub explicit_wait_secs: u64,
    pub page_load_timeout_secs: u64,
    pub provision_timeout_secs: u64,
    pub screenshot_dir: PathBuf,
    pub report_dir: PathBuf,
    pub application_url: Option<String>,
    /// API-only runs: never provision a browser
    pub skip_provisioning: bool,
    pub threads: usize,
    pub driver_dir: Option<PathBuf>,
    pub api: ApiSettings,
    pub source_file: PathBuf,
    #[serde(skip)]
    pub properties: BTreeMap<String, String>,
}

impl EnvironmentConfig {
    fn from_layers(layers: &Layers, environment: String, source_file: PathBuf) -> Result<Self> {
        let threads = match layers.string(keys::PARALLEL_THREADS) {
            None => 1,
            Some(raw) => match raw.parse::<usize>() {
                Ok(0) => {
                    warn!("parallel.threads must be at least 1, using 1");
                    1
                }
                Ok(n) => n,
                Err(_) => {
                    return Err(Error::InvalidValue {
                        key: keys::PARALLEL_THREADS.to_string(),
                        value: raw,
                        expected: "a positive thread count",
                    })
                }
            },
        };

        let config = Self {
            environment,
            browser: layers
                .string(keys::BROWSER)
                .unwrap_or_else(|| DEFAULT_BROWSER.to_string()),
            headless: layers.boolean(keys::HEADLESS),
            remote_execution: layers.boolean(keys::REMOTE_EXECUTION),
            grid_url: layers
                .string(keys::GRID_URL)
                .unwrap_or_else(|| DEFAULT_GRID_URL.to_string()),
            implicit_wait_secs: layers.seconds(keys::IMPLICIT_WAIT, DEFAULT_IMPLICIT_WAIT_SECS)?,
            explicit_wait_secs: layers.seconds(keys::EXPLICIT_WAIT, DEFAULT_EXPLICIT_WAIT_SECS)?,
            page_load_timeout_secs: layers
                .seconds(keys::PAGE_LOAD_TIMEOUT, DEFAULT_PAGE_LOAD_TIMEOUT_SECS)?,
            provision_timeout_secs: layers
                .seconds(keys::PROVISION_TIMEOUT, DEFAULT_PROVISION_TIMEOUT_SECS)?,
            screenshot_dir: layers
                .string(keys::SCREENSHOT_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_SCREENSHOT_DIR)),
            report_dir: layers
                .string(keys::REPORT_PATH)
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from(DEFAULT_REPORT_DIR)),
            application_url: layers.string(keys::APPLICATION_URL),
            skip_provisioning: layers.boolean(keys::SKIP_BROWSER),
            threads,
            driver_dir: layers.string(keys::DRIVER_DIR).map(PathBuf::from),
            api: ApiSettings::from_layers(layers),
            source_file,
            properties: layers.merged(),
        };

        info!(
            "Framework configuration initialized: env={} browser={} headless={} remote={}",
            config.environment, config.browser, config.headless, config.remote_execution
        );
        Ok(config)
    }

    pub fn implicit_wait(&self) -> Duration {
        Duration::from_secs(self.implicit_wait_secs)
    }

    pub fn explicit_wait(&self) -> Duration {
        Duration::from_secs(self.explicit_wait_secs)
    }

    pub fn page_load_timeout(&self) -> Duration {
        Duration::from_secs(self.page_load_timeout_secs)
    }

    pub fn provision_timeout(&self) -> Duration {
        Duration::from_secs(self.provision_timeout_secs)
    }

    /// Raw merged property lookup
    pub fn property(&self, key: &str) -> Option<&str> {
        self.properties.get(key).map(String::as_str)
    }

    /// `api.endpoint.{name}` lookup
    pub fn endpoint(&self, name: &str) -> Option<&str> {
        let key = format!("{}{}", keys::API_ENDPOINT_PREFIX, name);
        let endpoint = self.property(&key).filter(|v| !v.trim().is_empty());
        if endpoint.is_none() {
            warn!("Endpoint {} not found in configuration", name);
        }
        endpoint
    }
}

impl Default for EnvironmentConfig {
    fn default() -> Self {
        Self {
            environment: DEFAULT_ENVIRONMENT.to_string(),
            browser: DEFAULT_BROWSER.to_string(),
            headless: false,
            remote_execution: false,
            grid_url: DEFAULT_GRID_URL.to_string(),
            implicit_wait_secs: DEFAULT_IMPLICIT_WAIT_SECS,
            explicit_wait_secs: DEFAULT_EXPLICIT_WAIT_SECS,
            page_load_timeout_secs: DEFAULT_PAGE_LOAD_TIMEOUT_SECS,
            provision_timeout_secs: DEFAULT_PROVISION_TIMEOUT_SECS,
            screenshot_dir: PathBuf::from(DEFAULT_SCREENSHOT_DIR),
            report_dir: PathBuf::from(DEFAULT_REPORT_DIR),
            application_url: None,
            skip_provisioning: false,
            threads: 1,
            driver_dir: None,
            api: ApiSettings::default(),
            source_file: PathBuf::from(DEFAULT_CONFIG_FILE),
            properties: BTreeMap::new(),
        }
    }
}
