//! Connectivity & Capacity Guard
//!
//! Runs before any mutating operation:
//! - `ensure_writable`: directory creation plus a zero-byte probe file. A
//!   failing local destination on a mount point gets exactly one
//!   `remount,rw` attempt and one re-probe.
//! - `ensure_capacity`: required-bytes shortfalls are always fatal; a
//!   used-percent above `100 - min_free_percent` yields `LowSpace`, which
//!   only an attended caller may override.
//!
//! Every remote probe is an SSH command bounded by `probe_timeout`.

pub mod space;

pub use space::{evaluate_capacity, SpaceReport};

use std::fs::{self, OpenOptions};
use std::os::unix::fs::MetadataExt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info, warn};
use vault_core::{exec, Destination, RemoteTarget, Result, VaultError};

/// ssh reserves exit status 255 for its own (connection) errors
const SSH_CONNECTION_FAILURE: i32 = 255;

#[derive(Debug, Clone)]
pub struct GuardConfig {
    pub min_free_percent: u8,
    /// Upper bound for every external probe command
    pub probe_timeout: Duration,
    /// Allow the one-shot `mount -o remount,rw` self-heal
    pub remount: bool,
}

impl Default for GuardConfig {
    fn default() -> Self {
        Self {
            min_free_percent: 10,
            probe_timeout: Duration::from_secs(15),
            remount: true,
        }
    }
}

pub struct Guard {
    config: GuardConfig,
}

impl Guard {
    pub fn new(config: GuardConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &GuardConfig {
        &self.config
    }

    /// Verify the destination accepts writes
    pub fn ensure_writable(&self, destination: &Destination) -> Result<()> {
        match destination {
            Destination::Local(path) => self.ensure_local_writable(path),
            Destination::Remote(remote) => self.ensure_remote_writable(remote),
        }
    }

    /// Verify free space; see [`evaluate_capacity`] for the rules
    pub fn ensure_capacity(&self, destination: &Destination, required_bytes: u64) -> Result<SpaceReport> {
        let report = match destination {
            Destination::Local(path) => space::local_space(path)?,
            Destination::Remote(remote) => self.remote_space(remote)?,
        };
        debug!(
            destination = %destination,
            available = report.available_bytes,
            used_percent = report.used_percent,
            "Capacity probe"
        );
        evaluate_capacity(&destination.to_string(), report, self.config.min_free_percent, required_bytes)
    }

    /// Cheap reachability check for a remote host
    pub fn ensure_reachable(&self, remote: &RemoteTarget) -> Result<()> {
        let mut cmd = remote.ssh_command("true");
        self.run_remote(remote, &mut cmd).map(|_| ())
    }

    fn ensure_local_writable(&self, path: &Path) -> Result<()> {
        let first = match probe_local(path) {
            Ok(()) => return Ok(()),
            Err(reason) => reason,
        };

        let mount_point = match mount_point_of(path) {
            Some(mp) if self.config.remount => mp,
            _ => {
                return Err(VaultError::NotWritable {
                    path: path.display().to_string(),
                    reason: first,
                })
            }
        };

        warn!(
            destination = %path.display(),
            mount_point = %mount_point.display(),
            reason = %first,
            "Destination not writable, attempting remount read-write"
        );
        let mut cmd = Command::new("mount");
        cmd.arg("-o").arg("remount,rw").arg(&mount_point);
        if let Err(e) = exec::run(&mut cmd, Some(self.config.probe_timeout)).and_then(|o| o.check()) {
            return Err(VaultError::NotWritable {
                path: path.display().to_string(),
                reason: format!("{}; remount of {} failed: {}", first, mount_point.display(), e),
            });
        }

        probe_local(path).map_err(|second| VaultError::NotWritable {
            path: path.display().to_string(),
            reason: format!("{}; still failing after remount: {}", first, second),
        })?;
        info!(mount_point = %mount_point.display(), "Remount restored write access");
        Ok(())
    }

    fn ensure_remote_writable(&self, remote: &RemoteTarget) -> Result<()> {
        let dir = remote.quoted_path();
        let probe = vault_core::exec::shell_quote(&format!(
            "{}/.hv-write-probe-{}",
            remote.path.display(),
            std::process::id()
        ));
        let script = format!("mkdir -p {dir} && : > {probe} && rm -f {probe}");
        let mut cmd = remote.ssh_command(&script);
        let output = self.run_remote(remote, &mut cmd)?;
        if output.success() {
            Ok(())
        } else {
            Err(VaultError::NotWritable {
                path: format!("{}:{}", remote.login(), remote.path.display()),
                reason: output.stderr.trim().to_string(),
            })
        }
    }

    fn remote_space(&self, remote: &RemoteTarget) -> Result<SpaceReport> {
        let mut cmd = remote.ssh_command(&format!("df -Pk {}", remote.quoted_path()));
        let output = self.run_remote(remote, &mut cmd)?.check()?;
        space::parse_df(&output.stdout).ok_or_else(|| VaultError::CommandFailed {
            program: "df".to_string(),
            code: output.code,
            stderr: format!("unparseable df output: {}", output.stdout.trim()),
        })
    }

    /// Run an ssh command, mapping connection failures and timeouts
    fn run_remote(&self, remote: &RemoteTarget, cmd: &mut Command) -> Result<exec::CommandOutput> {
        match exec::run(cmd, Some(self.config.probe_timeout)) {
            Ok(output) if output.code == Some(SSH_CONNECTION_FAILURE) => Err(VaultError::RemoteUnreachable {
                host: remote.host.clone(),
                reason: output.stderr.trim().to_string(),
            }),
            Ok(output) => Ok(output),
            Err(VaultError::CommandTimeout { after, .. }) => Err(VaultError::RemoteUnreachable {
                host: remote.host.clone(),
                reason: format!("no answer within {:?}", after),
            }),
            Err(e) => Err(e),
        }
    }
}

/// Create the directory and a zero-byte probe file, always removing the probe
fn probe_local(path: &Path) -> std::result::Result<(), String> {
    fs::create_dir_all(path).map_err(|e| format!("cannot create directory: {}", e))?;

    let probe = path.join(format!(".hv-write-probe-{}", std::process::id()));
    let created = OpenOptions::new()
        .write(true)
        .create(true)
        .truncate(true)
        .open(&probe)
        .and_then(|f| f.sync_all());
    let removed = fs::remove_file(&probe);

    created.map_err(|e| format!("cannot write probe file: {}", e))?;
    removed.map_err(|e| format!("cannot remove probe file: {}", e))
}

/// Root of the filesystem containing `path`, unless that is `/`
///
/// Walks up from the nearest existing ancestor until the device changes.
pub fn mount_point_of(path: &Path) -> Option<PathBuf> {
    let mut current = path
        .ancestors()
        .find(|p| p.exists())?
        .canonicalize()
        .ok()?;
    let dev = fs::metadata(&current).ok()?.dev();

    while let Some(parent) = current.parent() {
        match fs::metadata(parent) {
            Ok(meta) if meta.dev() == dev => current = parent.to_path_buf(),
            _ => break,
        }
    }

    if current == Path::new("/") {
        None
    } else {
        Some(current)
    }
}
