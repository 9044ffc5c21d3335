//! Filesystem snapshots for Homevault
//!
//! - `SnapshotBackend`: the copy-on-write engine seam
//! - `ZfsBackend`: production backend over the `zfs` command
//! - `MemoryBackend`: deterministic in-process backend
//! - `SnapshotManager`: mount checks, collision-proof naming, replication

pub mod backend;
pub mod manager;
pub mod memory;
pub mod zfs;

pub use backend::{MountState, ReplicaTarget, SnapshotBackend, SnapshotInfo};
pub use manager::{SnapshotManager, MAX_NAME_ATTEMPTS};
pub use memory::{MemoryBackend, SentSnapshot};
pub use zfs::ZfsBackend;
