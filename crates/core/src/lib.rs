//! Homevault core primitives
//!
//! This crate provides:
//! - System configuration (TOML, explicit values, no globals)
//! - The shared error taxonomy
//! - Injectable clock and process-id sources
//! - Exclusion set resolution
//! - BLAKE3 content hashing
//! - Subprocess execution with timeouts
//! - Notification sinks and filesystem helpers

pub mod clock;
pub mod config;
pub mod destination;
pub mod error;
pub mod exclude;
pub mod exec;
pub mod fsutil;
pub mod hash;
pub mod notify;

// Re-export main types for convenience
pub use clock::{Clock, CurrentProcess, FixedPid, ManualClock, ProcessId, SystemClock};
pub use config::{SystemConfig, TransferEngine, MAX_RETENTION_DAYS};
pub use destination::{Destination, RemoteTarget};
pub use error::{IoResultExt, Result, VaultError};
pub use exclude::{ExclusionMatcher, ExclusionSet};
pub use notify::{DesktopNotifier, LogNotifier, Notifier, NullNotifier, Urgency};
