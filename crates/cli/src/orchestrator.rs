//! Top-level cycles: backup, repair, prune, status
//!
//! Backup order: guard checks, exclusion resolution, version creation,
//! snapshot (+ optional replication), remote mirror, retention. Guard and
//! snapshot failures end the cycle before retention gets to delete
//! anything. Remote-side failures are reported but never undo the local
//! version.

use crate::locks::RunLock;
use crate::prompt::{Confirm, Mode, StdinConfirm};
use anyhow::{Context, Result};
use guard::{Guard, GuardConfig};
use snapshot::{ReplicaTarget, SnapshotBackend, SnapshotInfo, SnapshotManager, ZfsBackend};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use store::{
    BackupVersion, PruneReport, RepairEngine, RepairReport, RetentionPolicy, RetentionSweeper, StoreStatus,
    VersionStore,
};
use tracing::{info, warn};
use transfer::{LocalTransfer, RsyncTransfer, TransferReport, TransferRequest, TransferService};
use vault_core::fsutil::format_size;
use vault_core::{
    Clock, CurrentProcess, Destination, DesktopNotifier, ExclusionSet, LogNotifier, Notifier, NullNotifier,
    ProcessId, SystemClock, SystemConfig, TransferEngine, Urgency, VaultError,
};
use walkdir::WalkDir;

/// Result of mirroring to the remote "current" copy
#[derive(Debug, Clone)]
pub struct RemoteOutcome {
    pub target: String,
    pub report: Option<TransferReport>,
    pub error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct BackupOutcome {
    pub version: BackupVersion,
    pub snapshot: Option<String>,
    pub replication_error: Option<String>,
    pub remote: Option<RemoteOutcome>,
    pub pruned: PruneOutcome,
}

impl BackupOutcome {
    pub fn summary(&self) -> String {
        let mut summary = format!(
            "Version {}: {} files, {}",
            self.version.id,
            self.version.file_count,
            format_size(self.version.size_bytes)
        );
        if let Some(name) = &self.snapshot {
            summary.push_str(&format!("; snapshot {}", name));
        }
        if let Some(remote) = &self.remote {
            if remote.error.is_some() {
                summary.push_str("; remote mirror failed");
            }
        }
        summary
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct PruneOptions {
    pub dry_run: bool,
    /// Override `retention.days`
    pub days: Option<u32>,
    /// Override `retention.snapshot_days`
    pub snapshot_days: Option<u32>,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PruneOutcome {
    pub versions: PruneReport,
    /// `None` when no snapshot dataset is configured
    pub snapshots: Option<PruneReport>,
}

pub struct Orchestrator {
    config: SystemConfig,
    config_path: PathBuf,
    clock: Arc<dyn Clock>,
    pid: Arc<dyn ProcessId>,
    transfer: Arc<dyn TransferService>,
    remote_transfer: Arc<dyn TransferService>,
    snapshot_backend: Option<Arc<dyn SnapshotBackend>>,
    snapshot_retry_delay: Option<Duration>,
    notifier: Arc<dyn Notifier>,
    confirm: Arc<dyn Confirm>,
    guard: Guard,
}

impl Orchestrator {
    /// Wire production components from configuration
    pub fn new(config: SystemConfig, config_path: impl Into<PathBuf>) -> Self {
        let io_timeout = Duration::from_secs(config.backup.io_timeout_secs);
        let transfer: Arc<dyn TransferService> = match config.backup.engine {
            TransferEngine::Rsync => Arc::new(RsyncTransfer::new(io_timeout)),
            TransferEngine::Native => Arc::new(LocalTransfer::new()),
        };
        let snapshot_backend: Option<Arc<dyn SnapshotBackend>> = config.zfs.dataset.as_ref().map(|_| {
            Arc::new(
                ZfsBackend::new(config.zfs.sudo, Duration::from_secs(config.zfs.command_timeout_secs))
                    .with_send_timeout(Duration::from_secs(config.zfs.replication_timeout_secs)),
            ) as Arc<dyn SnapshotBackend>
        });
        let notifier: Arc<dyn Notifier> = match (config.notifications.enabled, config.notifications.desktop) {
            (true, true) => Arc::new(DesktopNotifier::new()),
            (true, false) => Arc::new(LogNotifier),
            (false, _) => Arc::new(NullNotifier),
        };
        let guard = Guard::new(GuardConfig {
            min_free_percent: config.backup.min_free_percent,
            probe_timeout: Duration::from_secs(config.remote.connect_timeout_secs + 5),
            remount: true,
        });

        Self {
            config,
            config_path: config_path.into(),
            clock: Arc::new(SystemClock),
            pid: Arc::new(CurrentProcess),
            transfer,
            remote_transfer: Arc::new(RsyncTransfer::new(io_timeout)),
            snapshot_backend,
            snapshot_retry_delay: None,
            notifier,
            confirm: Arc::new(StdinConfirm),
            guard,
        }
    }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn with_pid(mut self, pid: Arc<dyn ProcessId>) -> Self {
        self.pid = pid;
        self
    }

    pub fn with_transfer(mut self, transfer: Arc<dyn TransferService>) -> Self {
        self.transfer = transfer;
        self
    }

    pub fn with_remote_transfer(mut self, transfer: Arc<dyn TransferService>) -> Self {
        self.remote_transfer = transfer;
        self
    }

    pub fn with_snapshot_backend(mut self, backend: Option<Arc<dyn SnapshotBackend>>) -> Self {
        self.snapshot_backend = backend;
        self
    }

    pub fn with_snapshot_retry_delay(mut self, delay: Duration) -> Self {
        self.snapshot_retry_delay = Some(delay);
        self
    }

    pub fn with_notifier(mut self, notifier: Arc<dyn Notifier>) -> Self {
        self.notifier = notifier;
        self
    }

    pub fn with_confirm(mut self, confirm: Arc<dyn Confirm>) -> Self {
        self.confirm = confirm;
        self
    }

    pub fn with_guard(mut self, config: GuardConfig) -> Self {
        self.guard = Guard::new(config);
        self
    }

    pub fn config(&self) -> &SystemConfig {
        &self.config
    }

    pub fn now(&self) -> chrono::DateTime<chrono::Utc> {
        self.clock.now()
    }

    fn destination(&self) -> &Path {
        &self.config.backup.destination
    }

    pub fn store(&self) -> VersionStore {
        VersionStore::new(self.destination(), self.transfer.clone(), self.clock.clone())
            .with_checksum(self.config.backup.checksum)
            .with_bandwidth_limit(self.config.backup.bandwidth_limit_kbs)
    }

    pub fn exclusions(&self) -> ExclusionSet {
        ExclusionSet::resolve(
            &self.config.source,
            &self.config.self_paths(&self.config_path),
            &self.config.backup.exclude,
        )
    }

    fn snapshot_manager(&self) -> Option<(SnapshotManager, String)> {
        let dataset = self.config.zfs.dataset.clone()?;
        let backend = self.snapshot_backend.clone()?;
        let mut manager = SnapshotManager::new(backend, self.clock.clone(), self.pid.clone(), &self.config.zfs.snapshot_prefix);
        if let Some(delay) = self.snapshot_retry_delay {
            manager = manager.with_retry_delay(delay);
        }
        Some((manager, dataset))
    }

    /// Run one full backup cycle and notify the outcome
    pub fn run_backup(&self, mode: Mode) -> Result<BackupOutcome> {
        let result = self.backup_cycle(mode);
        match &result {
            Ok(outcome) => self.notifier.notify("Backup complete", &outcome.summary(), Urgency::Low),
            Err(e) => self.notifier.notify("Backup failed", &format!("{:#}", e), Urgency::Critical),
        }
        result
    }

    fn backup_cycle(&self, mode: Mode) -> Result<BackupOutcome> {
        let source = &self.config.source;
        anyhow::ensure!(source.is_dir(), "Source {} is not a directory", source.display());

        let dest = Destination::Local(self.destination().to_path_buf());
        self.guard.ensure_writable(&dest).context("Destination is not usable")?;

        let store = self.store();
        let _lock = RunLock::acquire(&store.meta_dir(), "backup")?;
        for id in store.recover_interrupted()? {
            warn!(version = %id, "Marked interrupted version as failed");
        }

        let exclusions = self.exclusions();
        let base = store.latest_complete()?;
        let required = match base {
            Some(_) => 0,
            None => estimate_source_size(source, &exclusions)?,
        };
        self.check_capacity(&dest, required, mode)?;

        let version = store
            .create_version(source, &exclusions, base.as_ref())
            .context("Backup transfer failed")?;

        let (snapshot, replication_error) = self.snapshot_phase(&version)?;
        let remote = self.remote_phase(&exclusions, mode);
        let pruned = self
            .prune_with(&store, self.version_policy(None), self.snapshot_policy(None), false)
            .context("Retention sweep failed")?;

        Ok(BackupOutcome {
            version,
            snapshot,
            replication_error,
            remote,
            pruned,
        })
    }

    /// Snapshot the backing dataset; replication failures are only reported
    fn snapshot_phase(&self, version: &BackupVersion) -> Result<(Option<String>, Option<String>)> {
        let Some((manager, dataset)) = self.snapshot_manager() else {
            return Ok((None, None));
        };

        let name = manager
            .take_snapshot(&dataset)
            .with_context(|| format!("Version {} is complete, but no snapshot was taken", version.id))?;

        let Some(replica) = &self.config.zfs.replicate_to else {
            return Ok((Some(name), None));
        };
        let replicated = replica
            .parse::<ReplicaTarget>()
            .and_then(|target| manager.replicate(&dataset, &name, &target));
        let replication_error = match replicated {
            Ok(()) => None,
            Err(e) => {
                warn!(snapshot = %name, error = %e, "Snapshot replication failed");
                self.notifier
                    .notify("Snapshot replication failed", &e.to_string(), Urgency::Critical);
                Some(e.to_string())
            }
        };
        Ok((Some(name), replication_error))
    }

    fn remote_phase(&self, exclusions: &ExclusionSet, mode: Mode) -> Option<RemoteOutcome> {
        let target = Destination::Remote(self.config.remote_target()?);
        match self.mirror_remote(&target, exclusions, mode) {
            Ok(report) => {
                info!(target = %target, bytes = report.bytes_transferred, "Remote mirror updated");
                Some(RemoteOutcome {
                    target: target.to_string(),
                    report: Some(report),
                    error: None,
                })
            }
            Err(e) => {
                warn!(target = %target, error = %format!("{:#}", e), "Remote mirror failed");
                self.notifier
                    .notify("Remote backup failed", &format!("{:#}", e), Urgency::Critical);
                Some(RemoteOutcome {
                    target: target.to_string(),
                    report: None,
                    error: Some(format!("{:#}", e)),
                })
            }
        }
    }

    fn mirror_remote(&self, target: &Destination, exclusions: &ExclusionSet, mode: Mode) -> Result<TransferReport> {
        self.guard.ensure_writable(target)?;
        self.check_capacity(target, 0, mode)?;

        let request = TransferRequest::new(&self.config.source, target.clone(), exclusions.clone())
            .checksum(self.config.backup.checksum)
            .bandwidth_limit(self.config.backup.bandwidth_limit_kbs);
        let report = self.remote_transfer.transfer(&request)?;
        if !report.succeeded() {
            return Err(VaultError::TransferFailed {
                destination: target.to_string(),
                exit_code: Some(report.exit_code),
                detail: report.summary(),
            }
            .into());
        }
        Ok(report)
    }

    /// Capacity check with the one-time attended override for `LowSpace`
    fn check_capacity(&self, destination: &Destination, required: u64, mode: Mode) -> Result<()> {
        match self.guard.ensure_capacity(destination, required) {
            Ok(_) => Ok(()),
            Err(e) if e.is_overridable() && mode == Mode::Attended => {
                if self.confirm.confirm(&format!("{}. Continue anyway?", e)) {
                    warn!(destination = %destination, "Continuing despite low space (operator override)");
                    Ok(())
                } else {
                    Err(e.into())
                }
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Checksum reconciliation against the remote copy, or the local
    /// current version when no remote is configured
    pub fn run_repair(&self, mode: Mode) -> Result<RepairReport> {
        let result = self.repair_cycle(mode);
        match &result {
            Ok(report) if report.healthy => {
                self.notifier
                    .notify("Repair complete", "No corruption found", Urgency::Low)
            }
            Ok(report) => self.notifier.notify(
                "Repair complete",
                &format!(
                    "Corruption repaired: {} rewritten in {}",
                    format_size(report.bytes_reconciled),
                    report.target
                ),
                Urgency::Critical,
            ),
            Err(e) => self.notifier.notify("Repair failed", &format!("{:#}", e), Urgency::Critical),
        }
        result
    }

    fn repair_cycle(&self, mode: Mode) -> Result<RepairReport> {
        let source = &self.config.source;
        anyhow::ensure!(source.is_dir(), "Source {} is not a directory", source.display());

        let local = Destination::Local(self.destination().to_path_buf());
        self.guard.ensure_writable(&local).context("Destination is not usable")?;
        let store = self.store();
        let _lock = RunLock::acquire(&store.meta_dir(), "repair")?;

        let engine = RepairEngine::new(self.remote_transfer.clone())
            .with_bandwidth_limit(self.config.backup.bandwidth_limit_kbs);
        let report = match self.config.remote_target() {
            Some(remote) => {
                let target = Destination::Remote(remote);
                self.guard.ensure_writable(&target)?;
                self.check_capacity(&target, 0, mode)?;
                engine.repair(source, &target, &self.exclusions())?
            }
            // A past version is verified, never brought up to date
            None => {
                let current = store
                    .current()?
                    .context("No complete version to repair yet")?;
                engine.verify_version(source, &current.path)?
            }
        };
        Ok(report)
    }

    /// Retention sweep; a dry run takes no lock and touches nothing
    pub fn run_prune(&self, options: PruneOptions) -> Result<PruneOutcome> {
        let store = self.store();
        let versions = self.version_policy(options.days);
        let snapshots = self.snapshot_policy(options.snapshot_days);

        if options.dry_run {
            return self.prune_with(&store, versions, snapshots, true);
        }

        let dest = Destination::Local(self.destination().to_path_buf());
        self.guard.ensure_writable(&dest).context("Destination is not usable")?;
        let _lock = RunLock::acquire(&store.meta_dir(), "prune")?;
        self.prune_with(&store, versions, snapshots, false)
    }

    fn version_policy(&self, days: Option<u32>) -> RetentionPolicy {
        RetentionPolicy::days(days.unwrap_or(self.config.retention.days))
    }

    fn snapshot_policy(&self, days: Option<u32>) -> RetentionPolicy {
        RetentionPolicy::days(days.unwrap_or(self.config.retention.snapshot_days))
    }

    fn prune_with(
        &self,
        store: &VersionStore,
        versions: RetentionPolicy,
        snapshots: RetentionPolicy,
        dry_run: bool,
    ) -> Result<PruneOutcome> {
        let sweeper = RetentionSweeper::new(self.clock.clone());
        let version_report = sweeper.prune_versions(store, versions, dry_run)?;
        let snapshot_report = match self.snapshot_manager() {
            Some((manager, dataset)) => Some(sweeper.prune_snapshots(&manager, &dataset, snapshots, dry_run)?),
            None => None,
        };
        Ok(PruneOutcome {
            versions: version_report,
            snapshots: snapshot_report,
        })
    }

    pub fn status(&self) -> Result<StoreStatus> {
        Ok(self.store().status()?)
    }

    /// All versions, oldest first
    pub fn versions(&self) -> Result<Vec<BackupVersion>> {
        Ok(self.store().list()?)
    }

    /// Snapshots of the configured dataset; `None` when none is configured
    pub fn snapshots(&self) -> Result<Option<Vec<SnapshotInfo>>> {
        match self.snapshot_manager() {
            Some((manager, dataset)) => Ok(Some(manager.backend().list_snapshots(&dataset)?)),
            None => Ok(None),
        }
    }
}

/// Apparent size of the non-excluded source tree
///
/// Unreadable entries are skipped; the figure only sizes the first backup.
pub fn estimate_source_size(source: &Path, exclusions: &ExclusionSet) -> Result<u64> {
    let matcher = exclusions.matcher(source)?;
    let total = WalkDir::new(source)
        .follow_links(false)
        .into_iter()
        .filter_entry(|entry| match entry.path().strip_prefix(source) {
            Ok(rel) if !rel.as_os_str().is_empty() => !matcher.is_excluded(rel, entry.file_type().is_dir()),
            _ => true,
        })
        .flatten()
        .filter(|entry| entry.file_type().is_file())
        .filter_map(|entry| entry.metadata().ok())
        .map(|meta| meta.len())
        .sum();
    Ok(total)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_estimate_skips_excluded() -> Result<()> {
        let dir = TempDir::new()?;
        fs::create_dir_all(dir.path().join(".cache"))?;
        fs::write(dir.path().join(".cache/blob"), vec![0u8; 10_000])?;
        fs::write(dir.path().join("keep.txt"), b"12345")?;
        fs::write(dir.path().join("scratch.tmp"), b"zzz")?;

        let set = ExclusionSet::resolve(dir.path(), &[], &[".cache/".into(), "*.tmp".into()]);
        assert_eq!(estimate_source_size(dir.path(), &set)?, 5);
        Ok(())
    }

    #[test]
    fn test_summary_mentions_snapshot_and_remote_failure() {
        let id = store::VersionId::parse("2026-03-01_02-00-00").unwrap();
        let mut version = BackupVersion::pending(id, PathBuf::from("/b/x"), None, "native");
        version.file_count = 3;
        version.size_bytes = 2048;
        let outcome = BackupOutcome {
            version,
            snapshot: Some("homevault-2026-03-01_02-00-00-1".into()),
            replication_error: None,
            remote: Some(RemoteOutcome {
                target: "nas:/srv".into(),
                report: None,
                error: Some("unreachable".into()),
            }),
            pruned: PruneOutcome::default(),
        };

        let summary = outcome.summary();
        assert!(summary.contains("3 files, 2.00 KB"));
        assert!(summary.contains("snapshot homevault-"));
        assert!(summary.contains("remote mirror failed"));
    }
}
