//! Versioned backup store
//!
//! This crate provides:
//! - `BackupVersion` manifests and timestamp version ids
//! - The atomic `current` pointer
//! - `VersionStore`: version creation with link-against deduplication
//! - `RetentionSweeper`: age-based pruning of versions and snapshots
//! - `RepairEngine`: checksum-forced reconciliation

pub mod pointer;
pub mod repair;
pub mod retention;
pub mod store;
pub mod version;

pub use pointer::CurrentPointer;
pub use repair::{RepairEngine, RepairReport};
pub use retention::{PruneFailure, PruneReport, RetentionPolicy, RetentionSweeper};
pub use store::{PointerRepair, StoreStatus, VersionStore, META_DIR};
pub use version::{BackupVersion, VersionId, VersionStatus};
