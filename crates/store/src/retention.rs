//! Retention policies and pruning

use crate::store::{plan_pointer, PointerRepair, VersionStore};
use crate::version::BackupVersion;
use chrono::{DateTime, Utc};
use snapshot::SnapshotManager;
use std::collections::{HashMap, HashSet};
use std::os::unix::fs::MetadataExt;
use std::sync::Arc;
use tracing::{debug, info, warn};
use vault_core::{Clock, Result};
use walkdir::WalkDir;

/// Age-based retention
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetentionPolicy {
    /// Maximum age in days; 0 disables pruning
    pub days: u32,
}

impl RetentionPolicy {
    pub fn days(days: u32) -> Self {
        Self { days }
    }

    pub fn is_enabled(&self) -> bool {
        self.days > 0
    }

    /// Items created strictly before this instant are eligible
    ///
    /// A limit reaching past the earliest representable date expires nothing.
    pub fn cutoff(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        if !self.is_enabled() {
            return None;
        }
        now.checked_sub_signed(chrono::Duration::days(i64::from(self.days)))
    }

    pub fn is_expired(&self, created: DateTime<Utc>, now: DateTime<Utc>) -> bool {
        self.cutoff(now).is_some_and(|cutoff| created < cutoff)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PruneFailure {
    pub item: String,
    pub reason: String,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneReport {
    pub dry_run: bool,
    pub deleted_count: usize,
    pub bytes_freed: u64,
    /// Names of deleted (or, in a dry run, deletable) items
    pub deleted: Vec<String>,
    pub failures: Vec<PruneFailure>,
    /// Pointer outcome; versions only
    pub pointer: Option<PointerRepair>,
}

/// Deletes versions and snapshots past their retention age
///
/// Individual deletion failures are collected into the report and never
/// stop the sweep.
pub struct RetentionSweeper {
    clock: Arc<dyn Clock>,
}

impl RetentionSweeper {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self { clock }
    }

    /// Prune complete versions older than the policy allows
    ///
    /// Pending and failed versions are never selected. When the version
    /// `current` names is doomed, the pointer moves to the newest survivor
    /// (or is cleared) before anything is deleted, and is checked again
    /// afterwards.
    pub fn prune_versions(&self, store: &VersionStore, policy: RetentionPolicy, dry_run: bool) -> Result<PruneReport> {
        let now = self.clock.now();
        let versions = store.list()?;
        let (doomed, survivors): (Vec<BackupVersion>, Vec<BackupVersion>) = versions
            .into_iter()
            .partition(|v| v.is_complete() && policy.is_expired(v.created, now));

        let mut report = PruneReport {
            dry_run,
            ..Default::default()
        };
        let pointer_plan = plan_pointer(store.pointer().target()?, &survivors);

        if doomed.is_empty() {
            debug!(days = policy.days, "No versions past retention");
            report.pointer = Some(if dry_run {
                pointer_plan
            } else {
                store.repair_pointer()?
            });
            return Ok(report);
        }

        let usage = InodeUsage::scan(&doomed);

        if dry_run {
            report.deleted_count = doomed.len();
            report.bytes_freed = usage.freed(&(0..doomed.len()).collect());
            report.deleted = doomed.iter().map(|v| v.id.to_string()).collect();
            report.pointer = Some(pointer_plan);
            return Ok(report);
        }

        store.apply_pointer(&pointer_plan)?;

        let mut removed = HashSet::new();
        for (idx, version) in doomed.iter().enumerate() {
            match store.remove_version(version) {
                Ok(()) => {
                    removed.insert(idx);
                    report.deleted.push(version.id.to_string());
                    info!(version = %version.id, "Pruned version");
                }
                Err(e) => {
                    warn!(version = %version.id, error = %e, "Failed to prune version");
                    report.failures.push(PruneFailure {
                        item: version.id.to_string(),
                        reason: e.to_string(),
                    });
                }
            }
        }
        report.deleted_count = removed.len();
        report.bytes_freed = usage.freed(&removed);

        let after = store.repair_pointer()?;
        report.pointer = Some(if after.changed() { after } else { pointer_plan });
        Ok(report)
    }

    /// Prune this manager's snapshots of `dataset` older than the policy allows
    pub fn prune_snapshots(
        &self,
        manager: &SnapshotManager,
        dataset: &str,
        policy: RetentionPolicy,
        dry_run: bool,
    ) -> Result<PruneReport> {
        let now = self.clock.now();
        let mut report = PruneReport {
            dry_run,
            ..Default::default()
        };

        for snap in manager.list_managed(dataset)? {
            if !policy.is_expired(snap.created, now) {
                continue;
            }
            if !dry_run {
                if let Err(e) = manager.backend().destroy_snapshot(dataset, &snap.name) {
                    warn!(snapshot = %snap.full_name(), error = %e, "Failed to destroy snapshot");
                    report.failures.push(PruneFailure {
                        item: snap.full_name(),
                        reason: e.to_string(),
                    });
                    continue;
                }
                info!(snapshot = %snap.full_name(), "Destroyed snapshot");
            }
            report.deleted_count += 1;
            report.bytes_freed += snap.used_bytes;
            report.deleted.push(snap.full_name());
        }
        Ok(report)
    }
}

#[derive(Debug)]
struct InodeUse {
    size: u64,
    nlink: u64,
    seen: u64,
    versions: HashSet<usize>,
}

/// Regular-file inodes referenced by a set of versions
///
/// An inode is reclaimed only when every one of its links lives inside
/// versions that were actually deleted.
#[derive(Debug, Default)]
struct InodeUsage {
    inodes: HashMap<(u64, u64), InodeUse>,
}

impl InodeUsage {
    fn scan(versions: &[BackupVersion]) -> Self {
        let mut usage = Self::default();
        for (idx, version) in versions.iter().enumerate() {
            for entry in WalkDir::new(&version.path).follow_links(false).into_iter().flatten() {
                if !entry.file_type().is_file() {
                    continue;
                }
                let Ok(meta) = entry.metadata() else { continue };
                let slot = usage.inodes.entry((meta.dev(), meta.ino())).or_insert_with(|| InodeUse {
                    size: meta.len(),
                    nlink: meta.nlink(),
                    seen: 0,
                    versions: HashSet::new(),
                });
                slot.seen += 1;
                slot.versions.insert(idx);
            }
        }
        usage
    }

    fn freed(&self, deleted: &HashSet<usize>) -> u64 {
        self.inodes
            .values()
            .filter(|u| u.seen == u.nlink && u.versions.is_subset(deleted))
            .map(|u| u.size)
            .sum()
    }
}
