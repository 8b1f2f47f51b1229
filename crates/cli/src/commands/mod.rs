//! CLI Commands

pub mod config;
pub mod fixture;
pub mod provision;
pub mod report;
