//! Configuration Commands

use anyhow::Result;
use clap::Subcommand;
use serde::Serialize;
use testgrid_common::EnvironmentConfig;

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Show the resolved configuration
    Show {
        /// Also list every raw property from the merged layers
        #[arg(long)]
        all: bool,
    },
}

#[derive(Debug, Serialize)]
pub struct SettingDisplay {
    pub key: String,
    pub value: String,
}

impl SettingDisplay {
    fn new(key: &str, value: impl ToString) -> Self {
        Self {
            key: key.to_string(),
            value: value.to_string(),
        }
    }
}

impl TableDisplay for SettingDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Setting", "Value"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.key.clone(), self.value.clone()]
    }
}

/// Resolved settings in display order. The auth token is masked.
pub fn settings(config: &EnvironmentConfig) -> Vec<SettingDisplay> {
    let optional = |value: Option<String>| value.unwrap_or_else(|| "-".to_string());

    let mut rows = vec![
        SettingDisplay::new("source", config.source_file.display()),
        SettingDisplay::new("env", &config.environment),
        SettingDisplay::new("browser", &config.browser),
        SettingDisplay::new("headless", config.headless),
        SettingDisplay::new("remote.execution", config.remote_execution),
        SettingDisplay::new("grid.url", &config.grid_url),
        SettingDisplay::new("implicit.wait", format!("{}s", config.implicit_wait_secs)),
        SettingDisplay::new("explicit.wait", format!("{}s", config.explicit_wait_secs)),
        SettingDisplay::new("page.load.timeout", format!("{}s", config.page_load_timeout_secs)),
        SettingDisplay::new("provision.timeout", format!("{}s", config.provision_timeout_secs)),
        SettingDisplay::new("screenshot.path", config.screenshot_dir.display()),
        SettingDisplay::new("report.path", config.report_dir.display()),
        SettingDisplay::new("url", optional(config.application_url.clone())),
        SettingDisplay::new("skipBrowser", config.skip_provisioning),
        SettingDisplay::new("parallel.threads", config.threads),
        SettingDisplay::new(
            "driver.dir",
            optional(config.driver_dir.as_ref().map(|d| d.display().to_string())),
        ),
        SettingDisplay::new("api.baseUrl", &config.api.base_url),
        SettingDisplay::new("api.timeout", format!("{}s", config.api.timeout_secs)),
        SettingDisplay::new(
            "api.authToken",
            if config.api.auth_token.is_some() { "****" } else { "-" },
        ),
    ];

    for (name, value) in &config.api.headers {
        rows.push(SettingDisplay::new(&format!("api.header.{}", name), value));
    }
    rows
}

pub fn execute(cmd: &ConfigCommands, config: &EnvironmentConfig, format: OutputFormat) -> Result<()> {
    match cmd {
        ConfigCommands::Show { all } => {
            let mut rows = settings(config);
            if *all {
                rows.extend(
                    config
                        .properties
                        .iter()
                        .map(|(key, value)| SettingDisplay::new(&format!("raw:{}", key), value)),
                );
            }
            print_list(&rows, format);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use test_case::test_case;

    #[test]
    fn test_settings_mask_token() {
        let mut config = EnvironmentConfig::default();
        config.api.auth_token = Some("secret-token".to_string());

        let rows = settings(&config);
        let token = rows.iter().find(|r| r.key == "api.authToken").unwrap();
        assert_eq!(token.value, "****");
        assert!(rows.iter().all(|r| !r.value.contains("secret-token")));
    }

    #[test_case("browser", "chrome")]
    #[test_case("grid.url", "http://localhost:4444/wd/hub")]
    #[test_case("explicit.wait", "20s")]
    #[test_case("parallel.threads", "1")]
    #[test_case("url", "-")]
    #[test_case("api.header.Accept", "application/json")]
    fn test_settings_show_defaults(key: &str, expected: &str) {
        let rows = settings(&EnvironmentConfig::default());
        let row = rows.iter().find(|r| r.key == key).unwrap();
        assert_eq!(row.value, expected);
    }
}
