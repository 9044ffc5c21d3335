//! rsync-backed Transfer Service

use crate::{TransferReport, TransferRequest, TransferService};
use std::ffi::OsString;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};
use vault_core::{exec, Destination, Result};

/// Drives `rsync -aHAX` with link-dest reuse
#[derive(Debug, Clone)]
pub struct RsyncTransfer {
    program: PathBuf,
    io_timeout: Duration,
}

impl RsyncTransfer {
    pub fn new(io_timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("rsync"),
            io_timeout,
        }
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    /// Full argument list for a request
    ///
    /// Flags overview:
    /// - -aHAX: archive + preserve hard links, ACLs, xattrs
    /// - --delete/--delete-excluded: mirror the source, drop excluded files
    /// - --link-dest: hard-link files unchanged since the previous version
    /// - --checksum: compare content instead of size+mtime
    /// - --timeout: abort when no data moves for this long
    pub fn build_args(&self, request: &TransferRequest, filter_file: &Path) -> Vec<OsString> {
        let mut args: Vec<OsString> = vec![
            "-aHAX".into(),
            "--numeric-ids".into(),
            "--delete".into(),
            "--delete-excluded".into(),
            "--stats".into(),
            format!("--timeout={}", self.io_timeout.as_secs().max(1)).into(),
        ];

        let mut filter = OsString::from("--exclude-from=");
        filter.push(filter_file.as_os_str());
        args.push(filter);

        if request.checksum {
            args.push("--checksum".into());
        }
        if request.bandwidth_limit_kbs > 0 {
            args.push(format!("--bwlimit={}", request.bandwidth_limit_kbs).into());
        }
        if let Some(base) = &request.link_against {
            let mut link = OsString::from("--link-dest=");
            link.push(base.as_os_str());
            args.push(link);
        }

        let mut source = request.source.as_os_str().to_os_string();
        source.push("/");

        match &request.destination {
            Destination::Local(path) => {
                args.push(source);
                let mut dest = path.as_os_str().to_os_string();
                dest.push("/");
                args.push(dest);
            }
            Destination::Remote(remote) => {
                args.push("-e".into());
                args.push(remote.ssh_transport().into());
                args.push(source);
                args.push(remote.rsync_spec().into());
            }
        }
        args
    }
}

impl TransferService for RsyncTransfer {
    fn name(&self) -> &'static str {
        "rsync"
    }

    fn transfer(&self, request: &TransferRequest) -> Result<TransferReport> {
        let mut filter = tempfile::Builder::new()
            .prefix("homevault-excludes-")
            .tempfile()?;
        request.exclusions.write_rsync_filter(&mut filter)?;
        filter.flush()?;

        let args = self.build_args(request, filter.path());
        info!(destination = %request.destination, checksum = request.checksum, "Starting rsync");

        let mut cmd = Command::new(&self.program);
        cmd.args(&args);
        let output = exec::run(&mut cmd, None)?;
        let code = output.code.unwrap_or(-1);

        let mut report = parse_stats(&output.stdout);
        report.exit_code = code;
        if !report.succeeded() {
            report.errors = output
                .stderr
                .lines()
                .rev()
                .take(5)
                .map(str::to_string)
                .collect::<Vec<_>>()
                .into_iter()
                .rev()
                .collect();
        }
        debug!(code, bytes = report.bytes_transferred, "rsync finished");
        Ok(report)
    }
}

/// Extract counters from `rsync --stats` output
pub fn parse_stats(stdout: &str) -> TransferReport {
    let files_transferred = stat(stdout, "Number of regular files transferred")
        .or_else(|| stat(stdout, "Number of files transferred"))
        .unwrap_or(0);

    TransferReport {
        exit_code: 0,
        bytes_transferred: stat(stdout, "Total transferred file size").unwrap_or(0),
        files_transferred,
        files_linked: 0,
        files_deleted: stat(stdout, "Number of deleted files").unwrap_or(0),
        errors: Vec::new(),
    }
}

fn stat(stdout: &str, label: &str) -> Option<u64> {
    stdout
        .lines()
        .map(str::trim)
        .find(|line| line.starts_with(label))
        .and_then(|line| line.split_once(':'))
        .and_then(|(_, rest)| rest.split_whitespace().next())
        .and_then(|value| value.replace(',', "").parse().ok())
}
