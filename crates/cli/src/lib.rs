//! testgrid CLI
//!
//! Command implementations and output formatting for the `testgrid` binary.

pub mod commands;
pub mod output;
