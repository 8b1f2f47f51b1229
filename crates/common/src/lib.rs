//! testgrid Common Library
//!
//! Shared configuration, data model and fixtures for the testgrid harness.

pub mod config;
pub mod error;
pub mod fixtures;
pub mod types;

// Re-export commonly used types
pub use config::{ApiSettings, ConfigSources, EnvironmentConfig};
pub use error::{Error, Result};
pub use fixtures::{FixtureFields, FixtureStore};
pub use types::*;

/// testgrid version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
