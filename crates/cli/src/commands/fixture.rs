//! Fixture Commands

use anyhow::{Context, Result};
use clap::Subcommand;
use serde::Serialize;
use std::path::{Path, PathBuf};
use testgrid_common::FixtureStore;

use crate::output::{print_list, OutputFormat, TableDisplay};

#[derive(Subcommand)]
pub enum FixtureCommands {
    /// List the test cases in a fixture file
    List {
        /// JSON fixture file
        file: PathBuf,
    },

    /// Show the fields of one test case
    Show {
        /// JSON fixture file
        file: PathBuf,

        /// Test case name
        name: String,
    },
}

#[derive(Debug, Serialize)]
pub struct FieldDisplay {
    pub field: String,
    pub value: String,
}

impl TableDisplay for FieldDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Field", "Value"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.field.clone(), self.value.clone()]
    }
}

#[derive(Debug, Serialize)]
pub struct CaseDisplay {
    pub name: String,
    pub fields: usize,
}

impl TableDisplay for CaseDisplay {
    fn headers() -> Vec<&'static str> {
        vec!["Test Case", "Fields"]
    }

    fn row(&self) -> Vec<String> {
        vec![self.name.clone(), self.fields.to_string()]
    }
}

fn load(file: &Path) -> Result<FixtureStore> {
    FixtureStore::load(file).with_context(|| format!("failed to load fixtures from {}", file.display()))
}

pub fn execute(cmd: &FixtureCommands, format: OutputFormat) -> Result<()> {
    match cmd {
        FixtureCommands::List { file } => {
            let store = load(file)?;
            let rows: Vec<CaseDisplay> = store
                .names()
                .map(|name| CaseDisplay {
                    name: name.to_string(),
                    fields: store.get(name).map(|f| f.len()).unwrap_or_default(),
                })
                .collect();
            print_list(&rows, format);
        }
        FixtureCommands::Show { file, name } => {
            let store = load(file)?;
            let rows: Vec<FieldDisplay> = store
                .get(name)?
                .iter()
                .map(|(field, value)| FieldDisplay {
                    field: field.clone(),
                    value: value.clone(),
                })
                .collect();
            print_list(&rows, format);
        }
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn fixture_file(dir: &TempDir) -> PathBuf {
        let path = dir.path().join("login.json");
        std::fs::write(
            &path,
            r#"{"validLoginTest": {"username": "standard_user", "retries": 2}}"#,
        )
        .unwrap();
        path
    }

    #[test]
    fn test_show_known_case() {
        let dir = TempDir::new().unwrap();
        let cmd = FixtureCommands::Show {
            file: fixture_file(&dir),
            name: "validLoginTest".to_string(),
        };
        execute(&cmd, OutputFormat::Json).unwrap();
    }

    #[test]
    fn test_show_unknown_case_fails() {
        let dir = TempDir::new().unwrap();
        let cmd = FixtureCommands::Show {
            file: fixture_file(&dir),
            name: "missing".to_string(),
        };
        let err = execute(&cmd, OutputFormat::Plain).unwrap_err();
        assert!(format!("{:#}", err).contains("missing"));
    }

    #[test]
    fn test_list_missing_file_fails() {
        let dir = TempDir::new().unwrap();
        let cmd = FixtureCommands::List {
            file: dir.path().join("absent.json"),
        };
        assert!(execute(&cmd, OutputFormat::Table).is_err());
    }
}
