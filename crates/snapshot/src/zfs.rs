//! ZFS snapshot backend driven through the `zfs` command

use crate::backend::{MountState, ReplicaTarget, SnapshotBackend, SnapshotInfo};
use chrono::{DateTime, Utc};
use std::path::PathBuf;
use std::process::Command;
use std::time::Duration;
use tracing::{debug, info};
use vault_core::{exec, Result, VaultError};

#[derive(Debug, Clone)]
pub struct ZfsBackend {
    program: PathBuf,
    /// Prefix every call with `sudo -n`
    sudo: bool,
    timeout: Duration,
    /// Bound on a whole replication run; `None` relies on ssh keepalives alone
    send_timeout: Option<Duration>,
}

impl ZfsBackend {
    pub fn new(sudo: bool, timeout: Duration) -> Self {
        Self {
            program: PathBuf::from("zfs"),
            sudo,
            timeout,
            send_timeout: None,
        }
    }

    pub fn with_send_timeout(mut self, timeout: Duration) -> Self {
        self.send_timeout = Some(timeout);
        self
    }

    pub fn with_program(mut self, program: impl Into<PathBuf>) -> Self {
        self.program = program.into();
        self
    }

    fn command(&self) -> Command {
        if self.sudo {
            // -n: fail instead of prompting for a password
            let mut cmd = Command::new("sudo");
            cmd.arg("-n").arg(&self.program);
            cmd
        } else {
            Command::new(&self.program)
        }
    }

    fn zfs(&self, args: &[&str]) -> Result<exec::CommandOutput> {
        let mut cmd = self.command();
        cmd.args(args);
        exec::run(&mut cmd, Some(self.timeout))
    }
}

/// `ssh … zfs receive` on the replica host
///
/// Keepalives drop a stalled peer after about a minute of silence.
fn receive_command(target: &ReplicaTarget) -> Command {
    let mut receive = Command::new("ssh");
    for option in [
        "BatchMode=yes",
        "ConnectTimeout=10",
        "ServerAliveInterval=15",
        "ServerAliveCountMax=4",
    ] {
        receive.arg("-o").arg(option);
    }
    receive
        .arg(target.login())
        .arg(format!("zfs receive -F {}", exec::shell_quote(&target.dataset)));
    receive
}

impl SnapshotBackend for ZfsBackend {
    fn name(&self) -> &'static str {
        "zfs"
    }

    fn create_snapshot(&self, dataset: &str, name: &str) -> Result<()> {
        let full = format!("{}@{}", dataset, name);
        let output = self.zfs(&["snapshot", &full])?;
        if output.success() {
            return Ok(());
        }
        if output.stderr.contains("dataset already exists") {
            return Err(VaultError::SnapshotExists {
                dataset: dataset.to_string(),
                name: name.to_string(),
            });
        }
        output.check().map(|_| ())
    }

    fn list_snapshots(&self, dataset: &str) -> Result<Vec<SnapshotInfo>> {
        let output = self
            .zfs(&[
                "list", "-H", "-p", "-t", "snapshot", "-o", "name,creation,used", "-s", "creation", "-d", "1", dataset,
            ])?
            .check()?;
        Ok(parse_snapshot_list(&output.stdout))
    }

    fn destroy_snapshot(&self, dataset: &str, name: &str) -> Result<()> {
        let full = format!("{}@{}", dataset, name);
        self.zfs(&["destroy", &full])?.check()?;
        Ok(())
    }

    fn send_snapshot(&self, snapshot: &SnapshotInfo, base: Option<&SnapshotInfo>, target: &ReplicaTarget) -> Result<()> {
        let mut send = self.command();
        send.arg("send");
        if let Some(base) = base {
            send.arg("-i").arg(base.full_name());
        }
        send.arg(snapshot.full_name());

        let mut receive = receive_command(target);

        info!(
            snapshot = %snapshot.full_name(),
            base = base.map(|b| b.name.as_str()).unwrap_or("-"),
            target = %target,
            "Replicating snapshot"
        );

        let output = exec::run_pipeline(&mut send, &mut receive, self.send_timeout)?;
        if !output.producer.success() {
            return Err(VaultError::CommandFailed {
                program: "zfs send".to_string(),
                code: output.producer.code,
                stderr: output.producer.stderr.trim().to_string(),
            });
        }
        if !output.consumer.success() {
            return Err(VaultError::CommandFailed {
                program: "zfs receive".to_string(),
                code: output.consumer.code,
                stderr: output.consumer.stderr.trim().to_string(),
            });
        }
        debug!(snapshot = %snapshot.full_name(), "Replication finished");
        Ok(())
    }

    fn query_mount_state(&self, dataset: &str) -> Result<MountState> {
        let output = self
            .zfs(&["get", "-H", "-p", "-o", "value", "mounted,mountpoint", dataset])?
            .check()?;
        parse_mount_state(&output.stdout).ok_or_else(|| VaultError::CommandFailed {
            program: "zfs get".to_string(),
            code: output.code,
            stderr: format!("unexpected output: {}", output.stdout.trim()),
        })
    }

    fn mount(&self, dataset: &str) -> Result<()> {
        self.zfs(&["mount", dataset])?.check()?;
        Ok(())
    }
}

/// Parse `zfs list -H -p -o name,creation,used` lines
pub fn parse_snapshot_list(stdout: &str) -> Vec<SnapshotInfo> {
    stdout
        .lines()
        .filter_map(|line| {
            let mut fields = line.split('\t');
            let full = fields.next()?;
            let creation: i64 = fields.next()?.trim().parse().ok()?;
            let used: u64 = fields.next()?.trim().parse().unwrap_or(0);
            let (dataset, name) = full.split_once('@')?;
            Some(SnapshotInfo {
                dataset: dataset.to_string(),
                name: name.to_string(),
                created: DateTime::<Utc>::from_timestamp(creation, 0)?,
                used_bytes: used,
            })
        })
        .collect()
}

/// Parse `zfs get -H -o value mounted,mountpoint`
fn parse_mount_state(stdout: &str) -> Option<MountState> {
    let mut lines = stdout.lines().map(str::trim);
    let mounted = lines.next()?;
    let mountpoint = lines.next()?;
    Some(MountState {
        mounted: mounted == "yes",
        mountpoint: match mountpoint {
            "-" | "none" | "legacy" => None,
            path => Some(PathBuf::from(path)),
        },
    })
}
