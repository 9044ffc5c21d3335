//! Snapshot Backend abstraction

use chrono::{DateTime, Utc};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use vault_core::{Result, VaultError};

/// One backend snapshot
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SnapshotInfo {
    pub dataset: String,
    pub name: String,
    /// Recorded by the backend, not the requester
    pub created: DateTime<Utc>,
    /// Space held exclusively by this snapshot
    pub used_bytes: u64,
}

impl SnapshotInfo {
    /// `dataset@name`
    pub fn full_name(&self) -> String {
        format!("{}@{}", self.dataset, self.name)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct MountState {
    pub mounted: bool,
    pub mountpoint: Option<PathBuf>,
}

/// Where replicated snapshots are received: `[user@]host:pool/dataset`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ReplicaTarget {
    pub user: Option<String>,
    pub host: String,
    pub dataset: String,
}

impl ReplicaTarget {
    pub fn login(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }
}

impl FromStr for ReplicaTarget {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        let invalid = || VaultError::Config(format!("replication target '{}' is not [user@]host:dataset", s));

        let (login, dataset) = s.split_once(':').ok_or_else(invalid)?;
        let (user, host) = match login.split_once('@') {
            Some((user, host)) => (Some(user.to_string()), host),
            None => (None, login),
        };
        if host.is_empty() || dataset.is_empty() || user.as_deref() == Some("") {
            return Err(invalid());
        }
        Ok(Self {
            user,
            host: host.to_string(),
            dataset: dataset.to_string(),
        })
    }
}

impl fmt::Display for ReplicaTarget {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.login(), self.dataset)
    }
}

/// Copy-on-write snapshot engine
///
/// `create_snapshot` must fail with [`VaultError::SnapshotExists`] when the
/// name is taken, so callers can treat it as a naming collision.
pub trait SnapshotBackend: Send + Sync {
    fn name(&self) -> &'static str;

    fn create_snapshot(&self, dataset: &str, name: &str) -> Result<()>;

    /// Snapshots of exactly this dataset, oldest first
    fn list_snapshots(&self, dataset: &str) -> Result<Vec<SnapshotInfo>>;

    fn destroy_snapshot(&self, dataset: &str, name: &str) -> Result<()>;

    /// Stream `snapshot` to `target`, incrementally from `base` when given
    fn send_snapshot(&self, snapshot: &SnapshotInfo, base: Option<&SnapshotInfo>, target: &ReplicaTarget) -> Result<()>;

    fn query_mount_state(&self, dataset: &str) -> Result<MountState>;

    fn mount(&self, dataset: &str) -> Result<()>;
}
