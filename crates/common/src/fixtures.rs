//! Keyed JSON test-data fixtures
//!
//! A fixture file is a JSON object whose top-level keys name test cases
//! (`validLoginTest`, `invalidLoginTest`, ...). Each value is an object of
//! fields, exposed as text.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{error, info};

use crate::error::{Error, Result};

pub type FixtureFields = BTreeMap<String, String>;

#[derive(Debug, Clone)]
pub struct FixtureStore {
    path: PathBuf,
    records: BTreeMap<String, FixtureFields>,
}

impl FixtureStore {
    /// Load all fixtures from a JSON file
    pub fn load(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        info!("Reading JSON data from file: {}", path.display());

        let content = std::fs::read_to_string(path)?;
        Self::from_json(path, &content)
    }

    fn from_json(path: &Path, content: &str) -> Result<Self> {
        let root: serde_json::Value = serde_json::from_str(content)?;
        let mut records = BTreeMap::new();

        if let serde_json::Value::Object(cases) = root {
            for (name, value) in cases {
                if let serde_json::Value::Object(fields) = value {
                    let fields = fields
                        .into_iter()
                        .map(|(k, v)| (k, as_text(&v)))
                        .collect();
                    records.insert(name, fields);
                }
            }
        }

        Ok(Self {
            path: path.to_path_buf(),
            records,
        })
    }

    /// Fields for the named test case
    pub fn get(&self, name: &str) -> Result<&FixtureFields> {
        self.records.get(name).ok_or_else(|| {
            error!("Test case data not found in JSON file: {}", name);
            Error::FixtureNotFound {
                name: name.to_string(),
                path: self.path.clone(),
            }
        })
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.records.keys().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

fn as_text(value: &serde_json::Value) -> String {
    match value {
        serde_json::Value::String(s) => s.clone(),
        serde_json::Value::Null => String::new(),
        other => other.to_string(),
    }
}
