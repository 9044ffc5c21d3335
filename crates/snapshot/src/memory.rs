//! In-process snapshot backend
//!
//! Keeps snapshots in memory and stamps them with the injected clock, so
//! naming collisions and mount failures can be staged deterministically.

use crate::backend::{MountState, ReplicaTarget, SnapshotBackend, SnapshotInfo};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use vault_core::{Clock, Result, VaultError};

/// A replication recorded by [`MemoryBackend`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SentSnapshot {
    pub snapshot: String,
    pub base: Option<String>,
    pub target: String,
}

#[derive(Default)]
struct State {
    snapshots: Vec<SnapshotInfo>,
    unmounted: HashSet<String>,
    mount_fails: bool,
    send_fails: bool,
    destroy_fails: HashSet<String>,
    sent: Vec<SentSnapshot>,
    create_calls: usize,
}

pub struct MemoryBackend {
    clock: Arc<dyn Clock>,
    state: Mutex<State>,
}

impl MemoryBackend {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            clock,
            state: Mutex::new(State::default()),
        }
    }

    /// Seed an existing snapshot
    pub fn insert(&self, dataset: &str, name: &str, created: DateTime<Utc>, used_bytes: u64) {
        let mut state = self.state.lock();
        state.snapshots.push(SnapshotInfo {
            dataset: dataset.to_string(),
            name: name.to_string(),
            created,
            used_bytes,
        });
        state.snapshots.sort_by_key(|s| s.created);
    }

    pub fn set_mounted(&self, dataset: &str, mounted: bool) {
        let mut state = self.state.lock();
        if mounted {
            state.unmounted.remove(dataset);
        } else {
            state.unmounted.insert(dataset.to_string());
        }
    }

    /// Make every `mount` call fail
    pub fn fail_mount(&self, fail: bool) {
        self.state.lock().mount_fails = fail;
    }

    pub fn fail_send(&self, fail: bool) {
        self.state.lock().send_fails = fail;
    }

    /// Make destroying this snapshot name fail
    pub fn fail_destroy(&self, name: &str) {
        self.state.lock().destroy_fails.insert(name.to_string());
    }

    pub fn names(&self, dataset: &str) -> Vec<String> {
        self.state
            .lock()
            .snapshots
            .iter()
            .filter(|s| s.dataset == dataset)
            .map(|s| s.name.clone())
            .collect()
    }

    pub fn sent(&self) -> Vec<SentSnapshot> {
        self.state.lock().sent.clone()
    }

    pub fn create_calls(&self) -> usize {
        self.state.lock().create_calls
    }
}

impl SnapshotBackend for MemoryBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn create_snapshot(&self, dataset: &str, name: &str) -> Result<()> {
        let created = self.clock.now();
        let mut state = self.state.lock();
        state.create_calls += 1;
        if state.snapshots.iter().any(|s| s.dataset == dataset && s.name == name) {
            return Err(VaultError::SnapshotExists {
                dataset: dataset.to_string(),
                name: name.to_string(),
            });
        }
        state.snapshots.push(SnapshotInfo {
            dataset: dataset.to_string(),
            name: name.to_string(),
            created,
            used_bytes: 0,
        });
        state.snapshots.sort_by_key(|s| s.created);
        Ok(())
    }

    fn list_snapshots(&self, dataset: &str) -> Result<Vec<SnapshotInfo>> {
        Ok(self
            .state
            .lock()
            .snapshots
            .iter()
            .filter(|s| s.dataset == dataset)
            .cloned()
            .collect())
    }

    fn destroy_snapshot(&self, dataset: &str, name: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.destroy_fails.contains(name) {
            return Err(VaultError::CommandFailed {
                program: "destroy".to_string(),
                code: Some(1),
                stderr: format!("snapshot {}@{} is busy", dataset, name),
            });
        }
        let before = state.snapshots.len();
        state.snapshots.retain(|s| !(s.dataset == dataset && s.name == name));
        if state.snapshots.len() == before {
            return Err(VaultError::CommandFailed {
                program: "destroy".to_string(),
                code: Some(1),
                stderr: format!("could not find snapshot {}@{}", dataset, name),
            });
        }
        Ok(())
    }

    fn send_snapshot(&self, snapshot: &SnapshotInfo, base: Option<&SnapshotInfo>, target: &ReplicaTarget) -> Result<()> {
        let mut state = self.state.lock();
        if state.send_fails {
            return Err(VaultError::RemoteUnreachable {
                host: target.host.clone(),
                reason: "simulated send failure".to_string(),
            });
        }
        state.sent.push(SentSnapshot {
            snapshot: snapshot.full_name(),
            base: base.map(SnapshotInfo::full_name),
            target: target.to_string(),
        });
        Ok(())
    }

    fn query_mount_state(&self, dataset: &str) -> Result<MountState> {
        let mounted = !self.state.lock().unmounted.contains(dataset);
        Ok(MountState {
            mounted,
            mountpoint: mounted.then(|| format!("/{}", dataset).into()),
        })
    }

    fn mount(&self, dataset: &str) -> Result<()> {
        let mut state = self.state.lock();
        if state.mount_fails {
            return Err(VaultError::CommandFailed {
                program: "mount".to_string(),
                code: Some(1),
                stderr: format!("cannot mount '{}': pool is suspended", dataset),
            });
        }
        state.unmounted.remove(dataset);
        Ok(())
    }
}
