//! Repair Engine: checksum-forced reconciliation against a mirror
//!
//! A remote mirror is reconciled with a full checksum transfer. A local
//! version is a point in time, so it is only verified: files the source
//! still holds unchanged (same size and mtime) are compared by content and
//! rewritten in place when they differ. Nothing is added or deleted.

use filetime::FileTime;
use std::fs::{self, OpenOptions};
use std::io;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};
use transfer::{TransferRequest, TransferService};
use vault_core::hash::same_content;
use vault_core::{Destination, ExclusionSet, IoResultExt, Result, VaultError};
use walkdir::WalkDir;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepairReport {
    pub target: String,
    /// Bytes rewritten because their content diverged
    pub bytes_reconciled: u64,
    pub files_reconciled: u64,
    /// No divergent content was found
    pub healthy: bool,
}

pub struct RepairEngine {
    transfer: Arc<dyn TransferService>,
    bandwidth_limit_kbs: u32,
}

impl RepairEngine {
    pub fn new(transfer: Arc<dyn TransferService>) -> Self {
        Self {
            transfer,
            bandwidth_limit_kbs: 0,
        }
    }

    pub fn with_bandwidth_limit(mut self, kbs: u32) -> Self {
        self.bandwidth_limit_kbs = kbs;
        self
    }

    /// Compare every file by content and rewrite the ones that differ
    pub fn repair(&self, source: &Path, target: &Destination, exclusions: &ExclusionSet) -> Result<RepairReport> {
        info!(target = %target, engine = self.transfer.name(), "Starting checksum repair pass");

        let request = TransferRequest::new(source, target.clone(), exclusions.clone())
            .checksum(true)
            .bandwidth_limit(self.bandwidth_limit_kbs);
        let report = self.transfer.transfer(&request).map_err(|e| VaultError::TransferFailed {
            destination: target.to_string(),
            exit_code: None,
            detail: e.to_string(),
        })?;

        if !report.succeeded() {
            return Err(VaultError::TransferFailed {
                destination: target.to_string(),
                exit_code: Some(report.exit_code),
                detail: report.summary(),
            });
        }

        let repair = RepairReport {
            target: target.to_string(),
            bytes_reconciled: report.bytes_transferred,
            files_reconciled: report.files_transferred,
            healthy: report.bytes_transferred == 0,
        };
        if repair.healthy {
            info!(target = %target, "No corruption found");
        } else {
            warn!(
                target = %target,
                bytes = repair.bytes_reconciled,
                files = repair.files_reconciled,
                "Divergent content rewritten"
            );
        }
        Ok(repair)
    }

    /// Verify a local version against the files in `source` it still matches
    ///
    /// Rewrites go through the existing inode, so every version hard-linked
    /// to a damaged file is healed together.
    pub fn verify_version(&self, source: &Path, version: &Path) -> Result<RepairReport> {
        info!(version = %version.display(), "Starting checksum verification");
        if !source.is_dir() {
            return Err(VaultError::TransferFailed {
                destination: version.display().to_string(),
                exit_code: None,
                detail: format!("source {} is not a directory", source.display()),
            });
        }

        let mut bytes = 0u64;
        let mut files = 0u64;
        let mut skipped = 0u64;
        for entry in WalkDir::new(version).follow_links(false) {
            let entry = entry.map_err(|e| VaultError::io_at(version, io::Error::from(e)))?;
            if !entry.file_type().is_file() {
                continue;
            }
            let Ok(relative) = entry.path().strip_prefix(version) else {
                continue;
            };
            let original = source.join(relative);
            let backed_up = entry.metadata().map_err(|e| VaultError::io_at(entry.path(), io::Error::from(e)))?;
            let Ok(live) = fs::symlink_metadata(&original) else {
                skipped += 1;
                continue;
            };
            let unchanged = live.is_file()
                && live.len() == backed_up.len()
                && FileTime::from_last_modification_time(&live) == FileTime::from_last_modification_time(&backed_up);
            if !unchanged {
                skipped += 1;
                continue;
            }
            if same_content(&original, entry.path())? {
                continue;
            }

            warn!(file = %relative.display(), "Content differs from an unchanged source file, rewriting");
            rewrite_in_place(&original, entry.path())?;
            bytes += live.len();
            files += 1;
        }
        debug!(skipped, "Files changed in the source since the version were left alone");

        let repair = RepairReport {
            target: version.display().to_string(),
            bytes_reconciled: bytes,
            files_reconciled: files,
            healthy: bytes == 0 && files == 0,
        };
        if repair.healthy {
            info!(version = %version.display(), "No corruption found");
        } else {
            warn!(version = %version.display(), bytes, files, "Divergent content rewritten");
        }
        Ok(repair)
    }
}

fn rewrite_in_place(source: &Path, target: &Path) -> Result<()> {
    let mtime = FileTime::from_last_modification_time(&fs::metadata(target).at(target)?);
    {
        let mut reader = fs::File::open(source).at(source)?;
        let mut writer = OpenOptions::new().write(true).truncate(true).open(target).at(target)?;
        io::copy(&mut reader, &mut writer).at(target)?;
        writer.sync_all().at(target)?;
    }
    filetime::set_file_mtime(target, mtime).at(target)?;
    Ok(())
}
