//! Report Commands

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::path::PathBuf;
use testgrid_common::{EnvironmentConfig, ReportEntry};
use testgrid_harness::read_report;
use testgrid_harness::reporter::ReportSummary;
use tracing::debug;

use crate::output::{print_list, print_message, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ReportCommands {
    /// Show the entries of a JSON report
    Show {
        /// Report directory or report file (defaults to report.path)
        #[arg(long)]
        dir: Option<PathBuf>,

        /// Only show failed tests
        #[arg(long)]
        failed: bool,
    },
}

/// Whether the command can only run with a resolved configuration
pub fn needs_config(cmd: &ReportCommands) -> bool {
    match cmd {
        ReportCommands::Show { dir, .. } => dir.is_none(),
    }
}

#[derive(Debug, Serialize)]
pub struct EntryDisplay {
    pub name: String,
    pub status: String,
    pub attempts: u32,
    pub duration_ms: Option<i64>,
    pub attachment: Option<String>,
    pub reason: Option<String>,
}

impl From<&ReportEntry> for EntryDisplay {
    fn from(entry: &ReportEntry) -> Self {
        Self {
            name: entry.name.clone(),
            status: entry
                .outcome
                .as_ref()
                .map(|o| o.status().to_string())
                .unwrap_or_else(|| "OPEN".to_string()),
            attempts: entry.attempts,
            duration_ms: entry.duration_ms(),
            attachment: entry
                .attachments()
                .next()
                .map(|a| a.path.display().to_string()),
            reason: entry
                .outcome
                .as_ref()
                .and_then(|o| o.reason())
                .map(str::to_string),
        }
    }
}

impl TableDisplay for EntryDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Test", "Status", "Attempts", "Duration", "Screenshot", "Reason"]
    }

    fn row(&self) -> Vec<String> {
        vec![
            self.name.clone(),
            self.status.clone(),
            self.attempts.to_string(),
            self.duration_ms
                .map(|ms| format!("{}ms", ms))
                .unwrap_or_else(|| "-".to_string()),
            self.attachment.clone().unwrap_or_else(|| "-".to_string()),
            self.reason.clone().unwrap_or_default(),
        ]
    }
}

fn summary_line(summary: &ReportSummary) -> String {
    format!(
        "{} tests: {} passed, {} failed, {} skipped",
        summary.total, summary.passed, summary.failed, summary.skipped
    )
}

pub fn execute(cmd: &ReportCommands, config: Option<&EnvironmentConfig>, format: OutputFormat) -> Result<()> {
    match cmd {
        ReportCommands::Show { dir, failed } => {
            let path = match (dir, config) {
                (Some(dir), _) => dir.clone(),
                (None, Some(config)) => config.report_dir.clone(),
                (None, None) => anyhow::bail!("no report location: pass --dir or a configuration"),
            };

            debug!("Reading report from {}", path.display());
            let entries = read_report(&path)
                .with_context(|| format!("failed to read report from {}", path.display()))?;
            let summary = ReportSummary::from_entries(&entries);

            let rows: Vec<EntryDisplay> = entries
                .iter()
                .filter(|e| !*failed || e.outcome.as_ref().is_some_and(|o| o.is_fail()))
                .map(EntryDisplay::from)
                .collect();

            print_list(&rows, format);
            print_message(&summary_line(&summary), format);
        }
    }

    Ok(())
}
