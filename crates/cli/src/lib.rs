//! Homevault CLI library
//!
//! The `hv` binary is a thin clap front end over these modules; the
//! orchestrator is exposed so integration tests can drive whole cycles
//! with injected clocks, transfers and snapshot backends.

pub mod cmd;
pub mod locks;
pub mod logging;
pub mod orchestrator;
pub mod prompt;
pub mod util;

pub use orchestrator::{BackupOutcome, Orchestrator, PruneOptions, PruneOutcome, RemoteOutcome};
pub use prompt::{Confirm, FixedAnswer, Mode};
