//! testgrid CLI - Main Entry Point
//!
//! Inspects resolved configuration, smoke-tests context provisioning and
//! reads back test reports and fixtures.

use anyhow::Context;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use testgrid_common::config::DEFAULT_CONFIG_FILE;
use testgrid_common::{ConfigSources, EnvironmentConfig};

use testgrid_cli::commands::{config, fixture, provision, report};
use testgrid_cli::output::{self, OutputFormat};

/// testgrid CLI - parallel browser/API test harness
#[derive(Parser)]
#[command(name = "testgrid")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Configuration file
    #[arg(long, default_value = DEFAULT_CONFIG_FILE, global = true)]
    config: PathBuf,

    /// Override a configuration key (highest precedence)
    #[arg(short = 'D', value_name = "KEY=VALUE", value_parser = parse_override, global = true)]
    define: Vec<(String, String)>,

    /// Output format
    #[arg(long, default_value = "table", global = true)]
    format: OutputFormat,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Inspect resolved configuration
    #[command(subcommand)]
    Config(config::ConfigCommands),

    /// Provision one execution context as a smoke check
    Provision(provision::ProvisionArgs),

    /// Inspect test reports
    #[command(subcommand)]
    Report(report::ReportCommands),

    /// Look up test-data fixtures
    #[command(subcommand)]
    Fixture(fixture::FixtureCommands),

    /// Show version information
    Version,
}

fn parse_override(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.trim().is_empty() => {
            Ok((key.trim().to_string(), value.to_string()))
        }
        _ => Err(format!("expected KEY=VALUE, got '{}'", raw)),
    }
}

fn resolve_config(cli: &Cli) -> anyhow::Result<Arc<EnvironmentConfig>> {
    let sources = cli
        .define
        .iter()
        .fold(ConfigSources::from_process(&cli.config), |sources, (key, value)| {
            sources.with_override(key, value)
        });
    let config = sources
        .resolve()
        .with_context(|| format!("failed to resolve configuration from {}", cli.config.display()))?;
    Ok(Arc::new(config))
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(log_level)),
        )
        .with_target(false)
        .init();

    let result = match &cli.command {
        Commands::Config(cmd) => {
            resolve_config(&cli).and_then(|config| config::execute(cmd, &config, cli.format))
        }
        Commands::Provision(args) => {
            resolve_config(&cli).and_then(|config| provision::execute(args, config, cli.format))
        }
        // Report inspection works without a config file when --dir is given
        Commands::Report(cmd) => match resolve_config(&cli) {
            Ok(config) => report::execute(cmd, Some(&*config), cli.format),
            Err(e) if report::needs_config(cmd) => Err(e),
            Err(_) => report::execute(cmd, None, cli.format),
        },
        Commands::Fixture(cmd) => fixture::execute(cmd, cli.format),
        Commands::Version => {
            println!("testgrid CLI v{}", testgrid_common::VERSION);
            println!("Parallel browser/API test harness");
            Ok(())
        }
    };

    if let Err(e) = result {
        output::print_error(&format!("{:#}", e));
        std::process::exit(1);
    }
    Ok(())
}
