//! Version Store: creates, indexes and removes local backup versions
//!
//! Layout under the destination root:
//!
//! ```text
//! <root>/2026-03-01_02-00-00/        version trees
//! <root>/current -> 2026-03-01_...   CurrentPointer
//! <root>/.homevault/versions/*.json  manifests
//! <root>/.homevault/run.lock         held by the CLI
//! ```

use crate::pointer::CurrentPointer;
use crate::version::{BackupVersion, VersionId, VersionStatus};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};
use transfer::{TransferRequest, TransferService};
use vault_core::fsutil::{atomic_write, tree_stats};
use vault_core::{Clock, Destination, ExclusionSet, IoResultExt, Result, VaultError};
use walkdir::WalkDir;

/// Hidden metadata directory inside the destination root
pub const META_DIR: &str = ".homevault";

/// Same-second id collisions are retried this many times in total
pub const MAX_ID_ATTEMPTS: u32 = 3;

/// Outcome of a pointer consistency check
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PointerRepair {
    /// Already resolved to an existing complete version
    Intact(VersionId),
    Repointed { from: Option<VersionId>, to: VersionId },
    Cleared { from: Option<VersionId> },
    /// No pointer and nothing to point at
    Absent,
}

impl PointerRepair {
    pub fn changed(&self) -> bool {
        matches!(self, PointerRepair::Repointed { .. } | PointerRepair::Cleared { .. })
    }

    /// Where the pointer ends up
    pub fn resolved(&self) -> Option<&VersionId> {
        match self {
            PointerRepair::Intact(id) | PointerRepair::Repointed { to: id, .. } => Some(id),
            PointerRepair::Cleared { .. } | PointerRepair::Absent => None,
        }
    }
}

/// Aggregate view used by `hv status`
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StoreStatus {
    pub current: Option<BackupVersion>,
    pub complete: usize,
    pub failed: usize,
    pub pending: usize,
    /// Sum of advisory apparent sizes of complete versions
    pub total_bytes: u64,
    pub oldest: Option<VersionId>,
    pub newest: Option<VersionId>,
}

pub struct VersionStore {
    root: PathBuf,
    pointer: CurrentPointer,
    transfer: Arc<dyn TransferService>,
    clock: Arc<dyn Clock>,
    checksum: bool,
    bandwidth_limit_kbs: u32,
}

impl VersionStore {
    pub fn new(root: impl AsRef<Path>, transfer: Arc<dyn TransferService>, clock: Arc<dyn Clock>) -> Self {
        let root = root.as_ref().to_path_buf();
        Self {
            pointer: CurrentPointer::new(&root),
            root,
            transfer,
            clock,
            checksum: false,
            bandwidth_limit_kbs: 0,
        }
    }

    /// Compare content instead of size+mtime when linking
    pub fn with_checksum(mut self, enabled: bool) -> Self {
        self.checksum = enabled;
        self
    }

    pub fn with_bandwidth_limit(mut self, kbs: u32) -> Self {
        self.bandwidth_limit_kbs = kbs;
        self
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn pointer(&self) -> &CurrentPointer {
        &self.pointer
    }

    pub fn meta_dir(&self) -> PathBuf {
        self.root.join(META_DIR)
    }

    fn manifest_dir(&self) -> PathBuf {
        self.meta_dir().join("versions")
    }

    fn manifest_path(&self, id: &VersionId) -> PathBuf {
        self.manifest_dir().join(format!("{}.json", id))
    }

    pub fn version_path(&self, id: &VersionId) -> PathBuf {
        self.root.join(id.as_str())
    }

    /// Create a new version, linking unchanged files against `link_against`
    ///
    /// The version is written `pending`, becomes `complete` only after the
    /// transfer succeeds, and only then is the pointer moved. A failed
    /// transfer leaves a `failed` version and the pointer untouched.
    pub fn create_version(
        &self,
        source: &Path,
        exclusions: &ExclusionSet,
        link_against: Option<&BackupVersion>,
    ) -> Result<BackupVersion> {
        fs::create_dir_all(self.manifest_dir()).at(self.manifest_dir())?;

        let id = self.allocate_id()?;
        let path = self.version_path(&id);
        let parent = link_against.filter(|v| v.is_complete());
        let mut version = BackupVersion::pending(id, path.clone(), parent.map(|v| v.id.clone()), self.transfer.name());
        self.write_manifest(&version)?;

        info!(
            version = %version.id,
            parent = parent.map(|v| v.id.as_str()).unwrap_or("-"),
            engine = self.transfer.name(),
            "Creating version"
        );

        let request = TransferRequest::new(source, Destination::Local(path.clone()), exclusions.clone())
            .link_against(parent.map(|v| v.path.clone()))
            .checksum(self.checksum)
            .bandwidth_limit(self.bandwidth_limit_kbs);

        let report = match self.transfer.transfer(&request) {
            Ok(report) => report,
            Err(e) => {
                self.finish_failed(&mut version, None)?;
                return Err(VaultError::TransferFailed {
                    destination: path.display().to_string(),
                    exit_code: None,
                    detail: e.to_string(),
                });
            }
        };

        version.bytes_transferred = report.bytes_transferred;
        if !report.succeeded() {
            self.finish_failed(&mut version, Some(report.exit_code))?;
            return Err(VaultError::TransferFailed {
                destination: path.display().to_string(),
                exit_code: Some(report.exit_code),
                detail: report.summary(),
            });
        }

        match tree_stats(&path) {
            Ok(stats) => {
                version.size_bytes = stats.bytes;
                version.file_count = stats.files;
            }
            Err(e) => warn!(version = %version.id, error = %e, "Could not size version"),
        }
        version.exit_code = Some(report.exit_code);
        version.status = VersionStatus::Complete;
        version.finished = Some(self.clock.now());
        self.write_manifest(&version)?;
        self.pointer.set(&version.id)?;

        info!(
            version = %version.id,
            files = version.file_count,
            bytes = version.size_bytes,
            transferred = report.bytes_transferred,
            linked = report.files_linked,
            "Version complete"
        );
        Ok(version)
    }

    /// Exclusive `create_dir` on a timestamp id, waiting out same-second clashes
    fn allocate_id(&self) -> Result<VersionId> {
        for attempt in 1..=MAX_ID_ATTEMPTS {
            let id = VersionId::from_time(self.clock.now());
            let path = self.version_path(&id);
            match fs::create_dir(&path) {
                Ok(()) => return Ok(id),
                Err(e) if e.kind() == ErrorKind::AlreadyExists && attempt < MAX_ID_ATTEMPTS => {
                    debug!(id = %id, attempt, "Version id taken, waiting for the next second");
                    self.clock.sleep(Duration::from_secs(1));
                }
                Err(e) => return Err(VaultError::io_at(&path, e)),
            }
        }
        // Loop always returns on its last attempt
        Err(VaultError::InvalidVersion("no free version id".to_string()))
    }

    fn finish_failed(&self, version: &mut BackupVersion, exit_code: Option<i32>) -> Result<()> {
        version.status = VersionStatus::Failed;
        version.exit_code = exit_code;
        version.finished = Some(self.clock.now());
        warn!(version = %version.id, exit_code = ?exit_code, "Version failed, kept for inspection");
        self.write_manifest(version)
    }

    fn write_manifest(&self, version: &BackupVersion) -> Result<()> {
        let json = serde_json::to_vec_pretty(version)?;
        atomic_write(&self.manifest_path(&version.id), &json)
    }

    fn read_manifest(&self, id: &VersionId) -> Result<Option<BackupVersion>> {
        let path = self.manifest_path(id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(VaultError::io_at(&path, e)),
        };
        let mut version: BackupVersion = serde_json::from_slice(&data)?;
        version.path = self.version_path(id);
        Ok(Some(version))
    }

    /// All versions on disk, oldest first
    ///
    /// A version directory without a manifest was interrupted before it
    /// could be recorded and is reported as failed.
    pub fn list(&self) -> Result<Vec<BackupVersion>> {
        let mut versions = BTreeMap::new();
        let entries = match fs::read_dir(&self.root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(VaultError::io_at(&self.root, e)),
        };

        for entry in entries {
            let entry = entry.at(&self.root)?;
            if !entry.file_type().at(entry.path())?.is_dir() {
                continue;
            }
            let Ok(id) = VersionId::parse(&entry.file_name().to_string_lossy()) else {
                continue;
            };
            let version = match self.read_manifest(&id) {
                Ok(Some(v)) => v,
                Ok(None) => {
                    let mut v = BackupVersion::pending(id.clone(), entry.path(), None, "unknown");
                    v.status = VersionStatus::Failed;
                    v
                }
                Err(e) => {
                    warn!(version = %id, error = %e, "Unreadable manifest, treating version as failed");
                    let mut v = BackupVersion::pending(id.clone(), entry.path(), None, "unknown");
                    v.status = VersionStatus::Failed;
                    v
                }
            };
            versions.insert(id, version);
        }
        Ok(versions.into_values().collect())
    }

    pub fn get(&self, id: &VersionId) -> Result<Option<BackupVersion>> {
        Ok(self.list()?.into_iter().find(|v| &v.id == id))
    }

    pub fn latest_complete(&self) -> Result<Option<BackupVersion>> {
        Ok(self.list()?.into_iter().rev().find(BackupVersion::is_complete))
    }

    /// The version the pointer resolves to
    pub fn current(&self) -> Result<Option<BackupVersion>> {
        match self.pointer.resolve()? {
            Some(id) => self.get(&id),
            None => Ok(None),
        }
    }

    pub fn status(&self) -> Result<StoreStatus> {
        let versions = self.list()?;
        let mut status = StoreStatus {
            current: self.current()?,
            ..Default::default()
        };
        for v in &versions {
            match v.status {
                VersionStatus::Complete => {
                    status.complete += 1;
                    status.total_bytes += v.size_bytes;
                }
                VersionStatus::Failed => status.failed += 1,
                VersionStatus::Pending => status.pending += 1,
            }
        }
        let complete = versions.iter().filter(|v| v.is_complete());
        status.oldest = complete.clone().next().map(|v| v.id.clone());
        status.newest = complete.last().map(|v| v.id.clone());
        Ok(status)
    }

    /// Mark versions left `pending` by a crashed run as failed
    ///
    /// Only safe while the caller holds the run lock.
    pub fn recover_interrupted(&self) -> Result<Vec<VersionId>> {
        let mut recovered = Vec::new();
        for mut version in self.list()? {
            if version.status == VersionStatus::Pending {
                self.finish_failed(&mut version, None)?;
                recovered.push(version.id);
            }
        }
        Ok(recovered)
    }

    /// Delete a version tree and its manifest
    pub fn remove_version(&self, version: &BackupVersion) -> Result<()> {
        let path = self.version_path(&version.id);
        remove_tree(&path)?;
        match fs::remove_file(self.manifest_path(&version.id)) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(VaultError::io_at(self.manifest_path(&version.id), e)),
        }
        debug!(version = %version.id, "Version removed");
        Ok(())
    }

    /// Make the pointer resolve to a complete version, or clear it
    pub fn repair_pointer(&self) -> Result<PointerRepair> {
        let versions = self.list()?;
        let target = self.pointer.target()?;
        let plan = plan_pointer(target, &versions);
        self.apply_pointer(&plan)?;
        Ok(plan)
    }

    pub(crate) fn apply_pointer(&self, plan: &PointerRepair) -> Result<()> {
        match plan {
            PointerRepair::Repointed { from, to } => {
                warn!(from = ?from.as_ref().map(VersionId::as_str), to = %to, "Repointing current");
                self.pointer.set(to)
            }
            PointerRepair::Cleared { from } => {
                warn!(from = ?from.as_ref().map(VersionId::as_str), "Clearing current, no complete versions remain");
                self.pointer.clear()
            }
            PointerRepair::Intact(_) | PointerRepair::Absent => Ok(()),
        }
    }
}

/// Decide what the pointer should be given the surviving versions
pub(crate) fn plan_pointer(target: Option<VersionId>, survivors: &[BackupVersion]) -> PointerRepair {
    if let Some(id) = &target {
        if survivors.iter().any(|v| &v.id == id && v.is_complete()) {
            return PointerRepair::Intact(id.clone());
        }
    }
    let newest = survivors.iter().rev().find(|v| v.is_complete()).map(|v| v.id.clone());
    match (target, newest) {
        (from, Some(to)) => PointerRepair::Repointed { from, to },
        (Some(from), None) => PointerRepair::Cleared { from: Some(from) },
        (None, None) => PointerRepair::Absent,
    }
}

/// `remove_dir_all` that first restores owner write access on directories
///
/// Preserved permissions can leave read-only directories inside a version.
fn remove_tree(path: &Path) -> Result<()> {
    match fs::remove_dir_all(path) {
        Ok(()) => return Ok(()),
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(()),
        Err(e) if e.kind() != ErrorKind::PermissionDenied => return Err(VaultError::io_at(path, e)),
        Err(_) => {}
    }

    for entry in WalkDir::new(path).follow_links(false).into_iter().flatten() {
        if entry.file_type().is_dir() {
            if let Ok(meta) = entry.metadata() {
                let mut perms = meta.permissions();
                perms.set_mode(perms.mode() | 0o700);
                let _ = fs::set_permissions(entry.path(), perms);
            }
        }
    }
    fs::remove_dir_all(path).at(path)
}
