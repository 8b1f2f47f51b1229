//! Provisioning smoke check
//!
//! Provisions a single context for worker 0 the same way a test run would,
//! optionally captures a screenshot, and disposes it again.

use anyhow::{Context, Result};
use clap::Args;
use serde::Serialize;
use std::sync::Arc;
use testgrid_common::{EnvironmentConfig, WorkerId};
use testgrid_harness::{ArtifactCollector, ExecutionContextPool, FactoryRegistry, WebDriverLauncher};
use tracing::{debug, info};

use crate::output::{print_list, print_success, print_warning, OutputFormat, TableDisplay};

#[derive(Args)]
pub struct ProvisionArgs {
    /// Browser to provision (defaults to the configured one)
    #[arg(long)]
    pub browser: Option<String>,

    /// Capture a screenshot into the configured screenshot directory
    #[arg(long)]
    pub screenshot: bool,
}

#[derive(Debug, Serialize)]
pub struct ProvisionDisplay {
    pub worker: String,
    pub kind: String,
    pub session: String,
    pub mode: String,
    pub screenshot: Option<String>,
}

impl TableDisplay for ProvisionDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Worker", "Kind", "Session", "Mode", "Screenshot"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.worker.clone(),
            self.kind.clone(),
            self.session.clone(),
            self.mode.clone(),
            self.screenshot.clone().unwrap_or_else(|| "-".to_string()),
        ]
    }
}

pub fn execute(args: &ProvisionArgs, config: Arc<EnvironmentConfig>, format: OutputFormat) -> Result<()> {
    let browser = args.browser.clone().unwrap_or_else(|| config.browser.clone());
    let mode = if config.remote_execution { "remote" } else { "local" };

    let launcher = Arc::new(WebDriverLauncher::new(config.driver_dir.clone()));
    let registry = Arc::new(FactoryRegistry::new(Arc::clone(&config), launcher));
    let pool = ExecutionContextPool::new(registry);

    let worker = WorkerId(0);
    info!("Provisioning {} context ({}) for {}", browser, mode, worker);
    let context = pool
        .get_or_create_kind(worker, &browser)
        .with_context(|| format!("failed to provision '{}' context", browser))?;

    let Some(context) = context else {
        print_warning("skipBrowser is set, no context was provisioned");
        return Ok(());
    };

    let screenshot = if args.screenshot {
        let collector = ArtifactCollector::new(config.screenshot_dir.clone());
        collector
            .capture(Some(&context), "provision")
            .map(|capture| capture.path.display().to_string())
    } else {
        None
    };

    let row = {
        let ctx = context.lock();
        ProvisionDisplay {
            worker: worker.to_string(),
            kind: ctx.kind().to_string(),
            session: ctx.session_id().to_string(),
            mode: mode.to_string(),
            screenshot,
        }
    };
    drop(context);

    let disposed = pool.dispose(worker);
    debug!("Context for {} disposed: {}", worker, disposed);
    print_list(&[row], format);
    if format != OutputFormat::Json {
        print_success("Context provisioned and disposed");
    }

    Ok(())
}
