//! Minimal W3C WebDriver client over blocking HTTP
//!
//! Covers what the harness needs from a session: creation, timeouts,
//! navigation, element presence, screenshots and deletion. The same client
//! talks to a locally spawned driver and to a remote grid.

use base64::Engine;
use reqwest::blocking::{Client, RequestBuilder};
use serde_json::{json, Value};
use std::time::Duration;
use testgrid_common::ContextKind;
use tracing::{debug, info, warn};

use crate::driver::DriverProcess;
use crate::error::{HarnessError, HarnessResult};
use crate::session::Session;

/// W3C web element identifier key
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";

/// Error payload returned by a WebDriver endpoint
#[derive(Debug, Clone)]
struct WireError {
    status: u16,
    error: String,
    message: String,
}

impl From<WireError> for HarnessError {
    fn from(e: WireError) -> Self {
        HarnessError::WebDriver(format!("{} ({}): {}", e.error, e.status, e.message))
    }
}

/// HTTP client bound to one WebDriver endpoint
#[derive(Debug, Clone)]
pub struct WebDriverClient {
    http: Client,
    base_url: String,
}

impl WebDriverClient {
    pub fn new(base_url: &str, request_timeout: Duration) -> HarnessResult<Self> {
        let http = Client::builder().timeout(request_timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    /// Whether the endpoint reports itself ready for new sessions
    pub fn is_ready(&self) -> HarnessResult<bool> {
        let body = self.send(self.http.get(self.url("status")))??;
        Ok(body
            .get("value")
            .and_then(|v| v.get("ready"))
            .and_then(Value::as_bool)
            .unwrap_or(true))
    }

    /// Create a session, returning its id
    pub fn new_session(&self, capabilities: &Value) -> HarnessResult<String> {
        let request = self
            .http
            .post(self.url("session"))
            .json(&json!({ "capabilities": capabilities }));
        let body = self.send(request)??;

        // W3C nests the id under `value`; legacy grids put it at the top level
        body.get("value")
            .and_then(|v| v.get("sessionId"))
            .or_else(|| body.get("sessionId"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| HarnessError::WebDriver("new session response has no sessionId".into()))
    }

    /// Send a request. Transport failures are the outer error; WebDriver
    /// protocol errors are the inner one so callers can match on them.
    fn send(&self, request: RequestBuilder) -> HarnessResult<Result<Value, WireError>> {
        let response = request.send()?;
        let status = response.status();
        let body: Value = response.json().unwrap_or(Value::Null);

        if status.is_success() {
            return Ok(Ok(body));
        }

        let value = body.get("value").cloned().unwrap_or(Value::Null);
        Ok(Err(WireError {
            status: status.as_u16(),
            error: value
                .get("error")
                .and_then(Value::as_str)
                .unwrap_or("unknown error")
                .to_string(),
            message: value
                .get("message")
                .and_then(Value::as_str)
                .unwrap_or_default()
                .to_string(),
        }))
    }
}

/// A live WebDriver session, optionally owning the local driver process
/// that serves it
pub struct WebDriverSession {
    client: WebDriverClient,
    id: String,
    kind: ContextKind,
    alive: bool,
    driver: Option<DriverProcess>,
}

impl WebDriverSession {
    /// Create a session on the client's endpoint. If creation fails the
    /// driver process is stopped before the error is returned.
    pub fn open(
        client: WebDriverClient,
        kind: ContextKind,
        capabilities: &Value,
        driver: Option<DriverProcess>,
    ) -> HarnessResult<Self> {
        match client.new_session(capabilities) {
            Ok(id) => {
                info!("WebDriver session {} created for {} at {}", id, kind, client.base_url());
                Ok(Self {
                    client,
                    id,
                    kind,
                    alive: true,
                    driver,
                })
            }
            Err(e) => {
                if let Some(mut driver) = driver {
                    driver.stop();
                }
                Err(HarnessError::Provisioning {
                    kind,
                    reason: e.to_string(),
                })
            }
        }
    }

    /// Apply implicit-wait and page-load timeouts
    pub fn set_timeouts(&mut self, implicit: Duration, page_load: Duration) -> HarnessResult<()> {
        self.ensure_alive()?;
        let request = self
            .client
            .http
            .post(self.path("timeouts"))
            .json(&json!({
                "implicit": implicit.as_millis() as u64,
                "pageLoad": page_load.as_millis() as u64,
            }));
        self.client.send(request)??;
        info!(
            "Configured timeouts - Implicit Wait: {}s, Page Load: {}s",
            implicit.as_secs(),
            page_load.as_secs()
        );
        Ok(())
    }

    fn path(&self, suffix: &str) -> String {
        self.client.url(&format!("session/{}/{}", self.id, suffix))
    }

    fn ensure_alive(&self) -> HarnessResult<()> {
        if self.alive {
            Ok(())
        } else {
            Err(HarnessError::SessionClosed(self.id.clone()))
        }
    }
}

impl Session for WebDriverSession {
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
        self.ensure_alive()?;
        let request = self.client.http.post(self.path("url")).json(&json!({ "url": url }));
        self.client.send(request)??;
        info!("Navigated to: {}", url);
        Ok(())
    }

    fn is_displayed(&mut self, css: &str) -> HarnessResult<bool> {
        self.ensure_alive()?;
        let request = self
            .client
            .http
            .post(self.path("element"))
            .json(&json!({ "using": "css selector", "value": css }));

        let element = match self.client.send(request)? {
            Ok(body) => body,
            Err(e) if e.error == "no such element" => return Ok(false),
            Err(e) => return Err(e.into()),
        };

        let Some(element_id) = element
            .get("value")
            .and_then(|v| v.get(ELEMENT_KEY))
            .and_then(Value::as_str)
        else {
            return Ok(false);
        };

        let displayed = self
            .client
            .send(self.client.http.get(self.path(&format!("element/{element_id}/displayed"))))?;
        match displayed {
            Ok(body) => Ok(body.get("value").and_then(Value::as_bool).unwrap_or(false)),
            Err(e) if e.error == "stale element reference" => Ok(false),
            Err(e) => Err(e.into()),
        }
    }

    fn screenshot(&mut self) -> HarnessResult<Vec<u8>> {
        self.ensure_alive()?;
        let body = self.client.send(self.client.http.get(self.path("screenshot")))??;
        let encoded = body
            .get("value")
            .and_then(Value::as_str)
            .ok_or_else(|| HarnessError::WebDriver("screenshot response has no data".into()))?;
        Ok(base64::engine::general_purpose::STANDARD.decode(encoded)?)
    }

    fn quit(&mut self) -> HarnessResult<()> {
        if !self.alive {
            return Ok(());
        }
        self.alive = false;
        info!("Quitting WebDriver session {}", self.id);

        let url = self.client.url(&format!("session/{}", self.id));
        let result = match self.client.send(self.client.http.delete(url)) {
            Ok(Ok(_)) => Ok(()),
            Ok(Err(e)) => Err(HarnessError::from(e)),
            Err(e) => Err(e),
        };

        if let Some(mut driver) = self.driver.take() {
            driver.stop();
        }

        if let Err(e) = &result {
            debug!("Session {} delete failed: {}", self.id, e);
        }
        result
    }
}

impl Drop for WebDriverSession {
    fn drop(&mut self) {
        if self.alive {
            if let Err(e) = self.quit() {
                warn!("Failed to quit session {} on drop: {}", self.id, e);
            }
        }
    }
}
