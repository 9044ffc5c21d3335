//! Snapshot Manager: mount verification, collision-proof naming, replication

use crate::backend::{MountState, ReplicaTarget, SnapshotBackend, SnapshotInfo};
use chrono::{DateTime, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use vault_core::{Clock, ProcessId, Result, VaultError};

/// Candidates tried before giving up with `NameExhausted`
pub const MAX_NAME_ATTEMPTS: u32 = 5;

const DEFAULT_RETRY_DELAY: Duration = Duration::from_millis(150);

pub struct SnapshotManager {
    backend: Arc<dyn SnapshotBackend>,
    clock: Arc<dyn Clock>,
    pid: Arc<dyn ProcessId>,
    prefix: String,
    retry_delay: Duration,
}

impl SnapshotManager {
    pub fn new(
        backend: Arc<dyn SnapshotBackend>,
        clock: Arc<dyn Clock>,
        pid: Arc<dyn ProcessId>,
        prefix: impl Into<String>,
    ) -> Self {
        Self {
            backend,
            clock,
            pid,
            prefix: prefix.into(),
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    pub fn backend(&self) -> &Arc<dyn SnapshotBackend> {
        &self.backend
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    /// Make sure the dataset is mounted, trying exactly one mount
    pub fn ensure_mounted(&self, dataset: &str) -> Result<MountState> {
        let mount_failed = |reason: String| VaultError::MountFailed {
            dataset: dataset.to_string(),
            reason,
        };

        let state = self.backend.query_mount_state(dataset)?;
        if state.mounted {
            return Ok(state);
        }

        warn!(dataset, "Dataset not mounted, attempting mount");
        self.backend.mount(dataset).map_err(|e| mount_failed(e.to_string()))?;

        let state = self.backend.query_mount_state(dataset)?;
        if !state.mounted {
            return Err(mount_failed("still unmounted after mount".to_string()));
        }
        info!(dataset, mountpoint = ?state.mountpoint, "Dataset mounted");
        Ok(state)
    }

    /// Create a uniquely named snapshot and return its name
    ///
    /// The first candidate uses second precision; each retry waits
    /// `retry_delay` and regenerates the timestamp at millisecond precision.
    pub fn create_snapshot(&self, dataset: &str) -> Result<String> {
        let pid = self.pid.pid();

        for attempt in 0..MAX_NAME_ATTEMPTS {
            if attempt > 0 {
                self.clock.sleep(self.retry_delay);
            }
            let candidate = self.candidate_name(self.clock.now(), pid, attempt > 0);

            let taken: HashSet<String> = self
                .backend
                .list_snapshots(dataset)?
                .into_iter()
                .map(|s| s.name)
                .collect();
            if taken.contains(&candidate) {
                debug!(dataset, candidate = %candidate, attempt, "Snapshot name collision");
                continue;
            }

            match self.backend.create_snapshot(dataset, &candidate) {
                Ok(()) => {
                    info!(dataset, name = %candidate, "Snapshot created");
                    return Ok(candidate);
                }
                // Lost a race between listing and creating
                Err(VaultError::SnapshotExists { .. }) => {
                    debug!(dataset, candidate = %candidate, attempt, "Snapshot appeared concurrently");
                }
                Err(e) => return Err(e),
            }
        }

        Err(VaultError::NameExhausted {
            dataset: dataset.to_string(),
            attempts: MAX_NAME_ATTEMPTS,
        })
    }

    /// Mount check followed by snapshot creation
    pub fn take_snapshot(&self, dataset: &str) -> Result<String> {
        self.ensure_mounted(dataset)?;
        self.create_snapshot(dataset)
    }

    /// Snapshots carrying this manager's prefix, oldest first
    pub fn list_managed(&self, dataset: &str) -> Result<Vec<SnapshotInfo>> {
        let marker = format!("{}-", self.prefix);
        Ok(self
            .backend
            .list_snapshots(dataset)?
            .into_iter()
            .filter(|s| s.name.starts_with(&marker))
            .collect())
    }

    /// Send `name` to the replica, incremental from the previous managed snapshot
    pub fn replicate(&self, dataset: &str, name: &str, target: &ReplicaTarget) -> Result<()> {
        let managed = self.list_managed(dataset)?;
        let idx = managed
            .iter()
            .position(|s| s.name == name)
            .ok_or_else(|| VaultError::CommandFailed {
                program: self.backend.name().to_string(),
                code: None,
                stderr: format!("snapshot {}@{} not found", dataset, name),
            })?;
        let base = idx.checked_sub(1).map(|i| &managed[i]);
        self.backend.send_snapshot(&managed[idx], base, target)
    }

    fn candidate_name(&self, at: DateTime<Utc>, pid: u32, sub_second: bool) -> String {
        let stamp = if sub_second {
            at.format("%Y-%m-%d_%H-%M-%S%.3f")
        } else {
            at.format("%Y-%m-%d_%H-%M-%S")
        };
        format!("{}-{}-{}", self.prefix, stamp, pid)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::MemoryBackend;
    use chrono::TimeZone;
    use vault_core::{FixedPid, ManualClock};

    const DS: &str = "tank/home";

    fn start() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).unwrap()
    }

    fn setup(clock: Arc<ManualClock>) -> (Arc<MemoryBackend>, SnapshotManager) {
        let backend = Arc::new(MemoryBackend::new(clock.clone()));
        let manager = SnapshotManager::new(backend.clone(), clock, Arc::new(FixedPid(4242)), "homevault")
            .with_retry_delay(Duration::from_millis(100));
        (backend, manager)
    }

    #[test]
    fn test_first_name_uses_second_precision() {
        let (_, manager) = setup(Arc::new(ManualClock::new(start())));
        let name = manager.create_snapshot(DS).unwrap();
        assert_eq!(name, "homevault-2026-03-01_02-00-00-4242");
    }

    #[test]
    fn test_same_second_requests_get_distinct_names() {
        let clock = Arc::new(ManualClock::new(start()));
        let (backend, manager) = setup(clock);

        let first = manager.create_snapshot(DS).unwrap();
        let second = manager.create_snapshot(DS).unwrap();

        assert_ne!(first, second);
        assert_eq!(second, "homevault-2026-03-01_02-00-00.100-4242");
        assert_eq!(backend.names(DS).len(), 2);
    }

    #[test]
    fn test_four_collisions_still_succeed() {
        let clock = Arc::new(ManualClock::new(start()));
        let (backend, manager) = setup(clock);
        for taken in [
            "homevault-2026-03-01_02-00-00-4242",
            "homevault-2026-03-01_02-00-00.100-4242",
            "homevault-2026-03-01_02-00-00.200-4242",
            "homevault-2026-03-01_02-00-00.300-4242",
        ] {
            backend.insert(DS, taken, start(), 0);
        }

        let name = manager.create_snapshot(DS).unwrap();
        assert_eq!(name, "homevault-2026-03-01_02-00-00.400-4242");
    }

    #[test]
    fn test_five_collisions_exhaust() {
        // Frozen: every retry regenerates the same sub-second name
        let clock = Arc::new(ManualClock::frozen(start()));
        let (backend, manager) = setup(clock);
        backend.insert(DS, "homevault-2026-03-01_02-00-00-4242", start(), 0);
        backend.insert(DS, "homevault-2026-03-01_02-00-00.000-4242", start(), 0);

        match manager.create_snapshot(DS) {
            Err(VaultError::NameExhausted { attempts, .. }) => assert_eq!(attempts, MAX_NAME_ATTEMPTS),
            other => panic!("expected NameExhausted, got {:?}", other),
        }
        assert_eq!(backend.create_calls(), 0);
        assert_eq!(backend.names(DS).len(), 2);
    }

    #[test]
    fn test_ensure_mounted_mounts_once() {
        let (backend, manager) = setup(Arc::new(ManualClock::new(start())));
        backend.set_mounted(DS, false);

        let state = manager.ensure_mounted(DS).unwrap();
        assert!(state.mounted);
    }

    #[test]
    fn test_mount_failure_blocks_snapshot() {
        let (backend, manager) = setup(Arc::new(ManualClock::new(start())));
        backend.set_mounted(DS, false);
        backend.fail_mount(true);

        let result = manager.take_snapshot(DS);
        assert!(matches!(result, Err(VaultError::MountFailed { .. })));
        assert!(backend.names(DS).is_empty());
    }

    #[test]
    fn test_replicate_is_incremental_from_previous_managed() {
        let clock = Arc::new(ManualClock::new(start()));
        let (backend, manager) = setup(clock.clone());
        backend.insert(DS, "manual-before", start() - chrono::Duration::hours(2), 0);

        let first = manager.create_snapshot(DS).unwrap();
        let target: ReplicaTarget = "bk@nas:tank/replica".parse().unwrap();
        manager.replicate(DS, &first, &target).unwrap();

        clock.advance(chrono::Duration::days(1));
        let second = manager.create_snapshot(DS).unwrap();
        manager.replicate(DS, &second, &target).unwrap();

        let sent = backend.sent();
        assert_eq!(sent.len(), 2);
        assert_eq!(sent[0].base, None);
        assert_eq!(sent[1].base, Some(format!("{}@{}", DS, first)));
        assert_eq!(sent[1].target, "bk@nas:tank/replica");
    }
}
