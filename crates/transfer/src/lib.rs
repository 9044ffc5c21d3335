//! Transfer Service: mirrors a source tree into a destination
//!
//! Two engines implement [`TransferService`]:
//! - [`RsyncTransfer`] drives the `rsync` binary (local and SSH targets)
//! - [`LocalTransfer`] is a native engine for local destinations
//!
//! Both honour the same contract: mirror semantics (files absent from the
//! source are deleted), delete-excluded semantics, hard-link reuse of
//! unchanged files from a link-against tree, and optional checksum mode.

pub mod local;
pub mod rsync;

pub use local::LocalTransfer;
pub use rsync::RsyncTransfer;

use std::path::{Path, PathBuf};
use vault_core::{Destination, ExclusionSet, Result};

/// rsync: "Partial transfer due to vanished source files"
pub const EXIT_VANISHED: i32 = 24;
/// rsync: "Partial transfer due to error"
pub const EXIT_PARTIAL: i32 = 23;

/// One mirror operation
#[derive(Debug, Clone)]
pub struct TransferRequest {
    pub source: PathBuf,
    pub destination: Destination,
    pub exclusions: ExclusionSet,
    /// Prior tree whose unchanged files are hard-linked instead of copied
    pub link_against: Option<PathBuf>,
    /// Compare content instead of size+mtime
    pub checksum: bool,
    /// 0 = unlimited
    pub bandwidth_limit_kbs: u32,
}

impl TransferRequest {
    pub fn new(source: impl AsRef<Path>, destination: Destination, exclusions: ExclusionSet) -> Self {
        Self {
            source: source.as_ref().to_path_buf(),
            destination,
            exclusions,
            link_against: None,
            checksum: false,
            bandwidth_limit_kbs: 0,
        }
    }

    pub fn link_against(mut self, base: Option<PathBuf>) -> Self {
        self.link_against = base;
        self
    }

    pub fn checksum(mut self, enabled: bool) -> Self {
        self.checksum = enabled;
        self
    }

    pub fn bandwidth_limit(mut self, kbs: u32) -> Self {
        self.bandwidth_limit_kbs = kbs;
        self
    }
}

/// Exit status and byte counters of a finished transfer
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TransferReport {
    /// rsync-compatible exit code
    pub exit_code: i32,
    /// Bytes of file content written to the destination
    pub bytes_transferred: u64,
    pub files_transferred: u64,
    /// Files materialised as hard links into the link-against tree
    pub files_linked: u64,
    pub files_deleted: u64,
    /// Per-file failures (native engine) or trailing stderr (rsync)
    pub errors: Vec<String>,
}

impl TransferReport {
    /// Vanished source files are normal on a live home directory
    pub fn succeeded(&self) -> bool {
        self.exit_code == 0 || self.exit_code == EXIT_VANISHED
    }

    pub fn summary(&self) -> String {
        if self.errors.is_empty() {
            format!("exit code {}", self.exit_code)
        } else {
            format!(
                "exit code {}; {} error(s), first: {}",
                self.exit_code,
                self.errors.len(),
                self.errors[0]
            )
        }
    }
}

/// Mirrors `source` into `destination`
///
/// `Err` is reserved for failures to run the transfer at all; a transfer
/// that ran and failed returns a report whose `succeeded()` is false.
pub trait TransferService: Send + Sync {
    fn name(&self) -> &'static str;

    fn transfer(&self, request: &TransferRequest) -> Result<TransferReport>;
}
