//! Local driver processes - spawning and health checking browser drivers

use std::path::{Path, PathBuf};
use std::process::{Child, Command, Stdio};
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

use crate::error::{HarnessError, HarnessResult};
use crate::webdriver::WebDriverClient;

/// Handle to a running driver process (chromedriver, geckodriver, ...)
pub struct DriverProcess {
    child: Option<Child>,
    base_url: String,
    port: u16,
}

impl DriverProcess {
    /// Spawn the driver binary and wait until it accepts sessions
    pub fn spawn(binary: &Path, startup_timeout: Duration) -> HarnessResult<Self> {
        let port = find_free_port()?;
        let base_url = format!("http://127.0.0.1:{}", port);

        info!("Spawning {} on port {}", binary.display(), port);

        let child = Command::new(binary)
            .arg(format!("--port={}", port))
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| {
                HarnessError::DriverStartup(format!("failed to spawn {}: {}", binary.display(), e))
            })?;

        let mut handle = DriverProcess {
            child: Some(child),
            base_url,
            port,
        };

        // Dropping the handle on error stops the process
        handle.wait_for_ready(startup_timeout)?;

        info!("Driver is ready at {}", handle.base_url);
        Ok(handle)
    }

    /// Poll `/status` until the driver reports ready
    fn wait_for_ready(&mut self, timeout: Duration) -> HarnessResult<()> {
        let client = WebDriverClient::new(&self.base_url, Duration::from_secs(2))?;
        let start = Instant::now();
        let mut attempts = 0;

        while start.elapsed() < timeout {
            attempts += 1;

            if let Some(child) = self.child.as_mut() {
                if let Ok(Some(status)) = child.try_wait() {
                    return Err(HarnessError::DriverStartup(format!(
                        "driver exited during startup with {}",
                        status
                    )));
                }
            }

            match client.is_ready() {
                Ok(true) => return Ok(()),
                Ok(false) => debug!("Driver at {} not ready yet", self.base_url),
                Err(e) => {
                    if attempts == 1 {
                        info!("Waiting for driver to start...");
                    }
                    debug!("Driver status check: {}", e);
                }
            }

            std::thread::sleep(Duration::from_millis(100));
        }

        Err(HarnessError::DriverHealthCheck(attempts))
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Stop the driver. Safe to call more than once.
    pub fn stop(&mut self) {
        let Some(mut child) = self.child.take() else {
            return;
        };
        info!("Stopping driver (pid: {})", child.id());

        // Try graceful shutdown first
        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            let pid = Pid::from_raw(child.id() as i32);
            if kill(pid, Signal::SIGTERM).is_ok() {
                let deadline = Instant::now() + Duration::from_millis(500);
                while Instant::now() < deadline {
                    if let Ok(Some(_)) = child.try_wait() {
                        return;
                    }
                    std::thread::sleep(Duration::from_millis(25));
                }
            }
        }

        // Force kill if still running
        if let Err(e) = child.kill() {
            debug!("Kill of driver pid {} failed: {}", child.id(), e);
        }
        if let Err(e) = child.wait() {
            warn!("Failed to reap driver pid {}: {}", child.id(), e);
        }
    }
}

impl Drop for DriverProcess {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Resolve a driver binary, preferring the configured driver directory
pub fn driver_binary(driver_dir: Option<&Path>, name: &str) -> PathBuf {
    match driver_dir {
        Some(dir) => dir.join(name),
        None => PathBuf::from(name),
    }
}

/// Find a free port to use
fn find_free_port() -> HarnessResult<u16> {
    use std::net::TcpListener;

    let listener = TcpListener::bind("127.0.0.1:0")?;
    Ok(listener.local_addr()?.port())
}
