//! CLI command implementations

pub mod backup;
pub mod config;
pub mod log;
pub mod prune;
pub mod repair;
pub mod snapshots;
pub mod status;
