//! Native mirror engine for local destinations

use crate::{TransferReport, TransferRequest, TransferService, EXIT_PARTIAL};
use filetime::FileTime;
use std::collections::HashSet;
use std::fs::{self, Metadata, Permissions};
use std::os::unix::fs::{symlink, PermissionsExt};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use vault_core::exclude::ExclusionMatcher;
use vault_core::fsutil::temp_sibling;
use vault_core::hash::same_content;
use vault_core::{IoResultExt, Result, VaultError};
use walkdir::WalkDir;

/// Mirrors a local tree into a local destination
///
/// Every changed file is written to a temporary sibling and renamed into
/// place. The rename also detaches the path from any hard link it shared,
/// so older versions linked to the same inode are never modified.
#[derive(Debug, Default, Clone, Copy)]
pub struct LocalTransfer;

impl LocalTransfer {
    pub fn new() -> Self {
        Self
    }
}

impl TransferService for LocalTransfer {
    fn name(&self) -> &'static str {
        "native"
    }

    fn transfer(&self, request: &TransferRequest) -> Result<TransferReport> {
        let dest = request
            .destination
            .as_local()
            .ok_or_else(|| VaultError::UnsupportedDestination(request.destination.to_string()))?;

        if !request.source.is_dir() {
            return Err(VaultError::io_at(
                &request.source,
                std::io::Error::new(std::io::ErrorKind::NotFound, "source is not a directory"),
            ));
        }
        if request.bandwidth_limit_kbs > 0 {
            debug!(limit = request.bandwidth_limit_kbs, "Native engine ignores bandwidth limits");
        }

        fs::create_dir_all(dest).at(dest)?;
        let matcher = request.exclusions.matcher(&request.source)?;

        let mut run = MirrorRun {
            request,
            dest,
            report: TransferReport::default(),
            kept: HashSet::new(),
            dirs: Vec::new(),
        };
        run.copy_tree(&matcher);
        run.delete_extraneous();
        run.apply_dir_metadata();

        let mut report = run.report;
        if !report.errors.is_empty() {
            report.exit_code = EXIT_PARTIAL;
        }
        debug!(
            transferred = report.files_transferred,
            linked = report.files_linked,
            deleted = report.files_deleted,
            bytes = report.bytes_transferred,
            "Native transfer finished"
        );
        Ok(report)
    }
}

struct MirrorRun<'a> {
    request: &'a TransferRequest,
    dest: &'a Path,
    report: TransferReport,
    /// Relative paths present (and not excluded) in the source
    kept: HashSet<PathBuf>,
    /// Directory metadata applied once their contents are written
    dirs: Vec<(PathBuf, Permissions, FileTime)>,
}

impl MirrorRun<'_> {
    fn copy_tree(&mut self, matcher: &ExclusionMatcher) {
        let source = self.request.source.clone();
        let walker = WalkDir::new(&source)
            .follow_links(false)
            .into_iter()
            .filter_entry(|entry| match entry.path().strip_prefix(&source) {
                Ok(rel) => !matcher.is_excluded(rel, entry.file_type().is_dir()),
                Err(_) => true,
            });

        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.fail(format!("walk: {}", e));
                    continue;
                }
            };
            let rel = match entry.path().strip_prefix(&source) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel.to_path_buf(),
                _ => continue,
            };
            self.kept.insert(rel.clone());

            let meta = match entry.metadata() {
                Ok(meta) => meta,
                Err(e) => {
                    self.fail(format!("{}: {}", rel.display(), e));
                    continue;
                }
            };
            let file_type = entry.file_type();
            let result = if file_type.is_dir() {
                self.sync_dir(&rel, &meta)
            } else if file_type.is_symlink() {
                self.sync_symlink(entry.path(), &rel)
            } else if file_type.is_file() {
                self.sync_file(entry.path(), &rel, &meta)
            } else {
                // Sockets, fifos and devices are not backed up
                Ok(())
            };
            if let Err(e) = result {
                self.fail(format!("{}: {}", rel.display(), e));
            }
        }
    }

    fn sync_dir(&mut self, rel: &Path, meta: &Metadata) -> Result<()> {
        let target = self.dest.join(rel);
        if let Ok(existing) = fs::symlink_metadata(&target) {
            if !existing.is_dir() {
                fs::remove_file(&target).at(&target)?;
            }
        }
        fs::create_dir_all(&target).at(&target)?;
        self.dirs.push((
            target,
            meta.permissions(),
            FileTime::from_last_modification_time(meta),
        ));
        Ok(())
    }

    fn sync_symlink(&mut self, src: &Path, rel: &Path) -> Result<()> {
        let target = self.dest.join(rel);
        let link_target = fs::read_link(src).at(src)?;

        if let Ok(existing) = fs::symlink_metadata(&target) {
            if existing.file_type().is_symlink() {
                if fs::read_link(&target).ok().as_deref() == Some(link_target.as_path()) {
                    return Ok(());
                }
                fs::remove_file(&target).at(&target)?;
            } else if existing.is_dir() {
                fs::remove_dir_all(&target).at(&target)?;
            } else {
                fs::remove_file(&target).at(&target)?;
            }
        }
        symlink(&link_target, &target).at(&target)?;
        self.report.files_transferred += 1;
        Ok(())
    }

    fn sync_file(&mut self, src: &Path, rel: &Path, meta: &Metadata) -> Result<()> {
        let target = self.dest.join(rel);

        if let Ok(existing) = fs::symlink_metadata(&target) {
            if existing.is_file() && self.unchanged(src, meta, &target, &existing)? {
                return Ok(());
            }
            if existing.is_dir() {
                fs::remove_dir_all(&target).at(&target)?;
            }
        }

        if let Some(base) = &self.request.link_against {
            let candidate = base.join(rel);
            if let Ok(base_meta) = fs::symlink_metadata(&candidate) {
                if base_meta.is_file() && self.unchanged(src, meta, &candidate, &base_meta)? {
                    let tmp = temp_sibling(&target);
                    let _ = fs::remove_file(&tmp);
                    fs::hard_link(&candidate, &tmp).at(&tmp)?;
                    fs::rename(&tmp, &target).at(&target)?;
                    self.report.files_linked += 1;
                    return Ok(());
                }
            }
        }

        let tmp = temp_sibling(&target);
        let copied = fs::copy(src, &tmp).at(src);
        let copied = match copied {
            Ok(n) => n,
            Err(e) => {
                let _ = fs::remove_file(&tmp);
                return Err(e);
            }
        };
        filetime::set_file_mtime(&tmp, FileTime::from_last_modification_time(meta)).at(&tmp)?;
        fs::rename(&tmp, &target).at(&target)?;

        self.report.bytes_transferred += copied;
        self.report.files_transferred += 1;
        Ok(())
    }

    /// Quick check (size, mode, mtime) or full content comparison
    fn unchanged(&self, src: &Path, src_meta: &Metadata, other: &Path, other_meta: &Metadata) -> Result<bool> {
        if src_meta.len() != other_meta.len() {
            return Ok(false);
        }
        if src_meta.permissions().mode() != other_meta.permissions().mode() {
            return Ok(false);
        }
        if self.request.checksum {
            return same_content(src, other);
        }
        Ok(FileTime::from_last_modification_time(src_meta)
            == FileTime::from_last_modification_time(other_meta))
    }

    /// Remove destination entries that are gone from, or excluded in, the source
    fn delete_extraneous(&mut self) {
        let dest = self.dest.to_path_buf();
        let mut doomed = Vec::new();
        for entry in WalkDir::new(&dest).follow_links(false).contents_first(true) {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    self.fail(format!("walk destination: {}", e));
                    continue;
                }
            };
            let rel = match entry.path().strip_prefix(&dest) {
                Ok(rel) if !rel.as_os_str().is_empty() => rel,
                _ => continue,
            };
            if !self.kept.contains(rel) {
                doomed.push((entry.path().to_path_buf(), entry.file_type().is_dir()));
            }
        }

        for (path, is_dir) in doomed {
            let removed = if is_dir {
                fs::remove_dir_all(&path)
            } else {
                fs::remove_file(&path)
            };
            match removed {
                Ok(()) => {
                    if !is_dir {
                        self.report.files_deleted += 1;
                    }
                }
                // Already removed along with its parent
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => self.fail(format!("delete {}: {}", path.display(), e)),
            }
        }
    }

    fn apply_dir_metadata(&mut self) {
        let dirs = std::mem::take(&mut self.dirs);
        for (path, perms, mtime) in dirs.into_iter().rev() {
            if let Err(e) = fs::set_permissions(&path, perms) {
                self.fail(format!("chmod {}: {}", path.display(), e));
            }
            if let Err(e) = filetime::set_file_mtime(&path, mtime) {
                self.fail(format!("utime {}: {}", path.display(), e));
            }
        }
    }

    fn fail(&mut self, message: String) {
        warn!("{}", message);
        self.report.errors.push(message);
    }
}
