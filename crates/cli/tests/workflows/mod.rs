//! Workflow integration tests
//!
//! Each module drives complete cycles through the orchestrator or the
//! binary and checks the resulting destination state.

pub mod backup_cycle;
pub mod cli_config;
pub mod prune_retention;
pub mod repair;
pub mod snapshots;
