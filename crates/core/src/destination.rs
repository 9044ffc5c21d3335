//! Backup destinations: local paths and SSH-reachable remote paths

use crate::exec::shell_quote;
use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

/// An SSH-reachable directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    pub host: String,
    pub user: Option<String>,
    pub port: u16,
    pub path: PathBuf,
    pub connect_timeout: Duration,
}

impl RemoteTarget {
    /// `user@host` or `host`
    pub fn login(&self) -> String {
        match &self.user {
            Some(user) => format!("{}@{}", user, self.host),
            None => self.host.clone(),
        }
    }

    /// rsync-style `user@host:/path/`
    pub fn rsync_spec(&self) -> String {
        format!("{}:{}/", self.login(), self.path.display())
    }

    /// The `-e` transport string handed to rsync
    pub fn ssh_transport(&self) -> String {
        format!(
            "ssh -p {} -o ConnectTimeout={} -o BatchMode=yes",
            self.port,
            self.connect_timeout.as_secs().max(1)
        )
    }

    /// An `ssh` invocation running `script` on the remote host
    ///
    /// BatchMode forbids password prompts so unattended runs fail instead of
    /// blocking.
    pub fn ssh_command(&self, script: &str) -> Command {
        let mut cmd = Command::new("ssh");
        cmd.arg("-p")
            .arg(self.port.to_string())
            .arg("-o")
            .arg(format!("ConnectTimeout={}", self.connect_timeout.as_secs().max(1)))
            .arg("-o")
            .arg("BatchMode=yes")
            .arg(self.login())
            .arg(script);
        cmd
    }

    pub fn quoted_path(&self) -> String {
        shell_quote(&self.path.to_string_lossy())
    }
}

/// Where a transfer or probe is aimed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Destination {
    Local(PathBuf),
    Remote(RemoteTarget),
}

impl Destination {
    pub fn local(path: impl AsRef<Path>) -> Self {
        Destination::Local(path.as_ref().to_path_buf())
    }

    pub fn as_local(&self) -> Option<&Path> {
        match self {
            Destination::Local(p) => Some(p),
            Destination::Remote(_) => None,
        }
    }

    pub fn path(&self) -> &Path {
        match self {
            Destination::Local(p) => p,
            Destination::Remote(r) => &r.path,
        }
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Destination::Local(p) => write!(f, "{}", p.display()),
            Destination::Remote(r) => write!(f, "{}:{}", r.login(), r.path.display()),
        }
    }
}
