//! Backup version data structures

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;
use vault_core::{Result, VaultError};

/// strftime layout of version identifiers (UTC)
pub const VERSION_ID_FORMAT: &str = "%Y-%m-%d_%H-%M-%S";

/// Version identifier: creation time at second granularity
///
/// The zero-padded layout makes lexical and chronological order agree.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionId(String);

impl VersionId {
    pub fn from_time(at: DateTime<Utc>) -> Self {
        Self(at.format(VERSION_ID_FORMAT).to_string())
    }

    pub fn parse(s: &str) -> Result<Self> {
        NaiveDateTime::parse_from_str(s, VERSION_ID_FORMAT)
            .map_err(|_| VaultError::InvalidVersion(s.to_string()))?;
        Ok(Self(s.to_string()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Creation time encoded in the identifier
    pub fn timestamp(&self) -> DateTime<Utc> {
        NaiveDateTime::parse_from_str(&self.0, VERSION_ID_FORMAT)
            .map(|naive| naive.and_utc())
            .unwrap_or_default()
    }
}

impl fmt::Display for VersionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for VersionId {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionId {
    type Error = VaultError;

    fn try_from(s: String) -> Result<Self> {
        Self::parse(&s)
    }
}

impl From<VersionId> for String {
    fn from(id: VersionId) -> Self {
        id.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum VersionStatus {
    /// Transfer in progress (or interrupted before it could be recorded)
    Pending,
    Complete,
    /// Kept on disk for inspection, never deleted automatically
    Failed,
}

impl fmt::Display for VersionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            VersionStatus::Pending => "pending",
            VersionStatus::Complete => "complete",
            VersionStatus::Failed => "failed",
        };
        f.write_str(s)
    }
}

/// One point-in-time copy of the source tree
///
/// Persisted as `<root>/.homevault/versions/<id>.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupVersion {
    pub id: VersionId,
    /// Materialised tree; derived from the store root, not persisted
    #[serde(skip)]
    pub path: PathBuf,
    /// Version linked against for deduplication
    #[serde(default)]
    pub parent_id: Option<VersionId>,
    pub status: VersionStatus,
    pub created: DateTime<Utc>,
    #[serde(default)]
    pub finished: Option<DateTime<Utc>>,
    /// Advisory, computed after completion
    #[serde(default)]
    pub size_bytes: u64,
    #[serde(default)]
    pub file_count: u64,
    /// Transfer engine exit indicator for failed versions
    #[serde(default)]
    pub exit_code: Option<i32>,
    #[serde(default)]
    pub bytes_transferred: u64,
    #[serde(default)]
    pub engine: String,
}

impl BackupVersion {
    pub fn pending(id: VersionId, path: PathBuf, parent_id: Option<VersionId>, engine: &str) -> Self {
        let created = id.timestamp();
        Self {
            id,
            path,
            parent_id,
            status: VersionStatus::Pending,
            created,
            finished: None,
            size_bytes: 0,
            file_count: 0,
            exit_code: None,
            bytes_transferred: 0,
            engine: engine.to_string(),
        }
    }

    pub fn is_complete(&self) -> bool {
        self.status == VersionStatus::Complete
    }
}
