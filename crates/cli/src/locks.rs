//! Run lock: one mutating hv invocation per destination
//!
//! `<destination>/.homevault/run.lock` is held with an exclusive `flock`
//! for the whole cycle. The kernel drops the lock when the holder exits, so
//! a file left behind by a crashed run never blocks the next one.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{File, OpenOptions};
use std::io::{Read, Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};

pub const LOCK_FILE: &str = "run.lock";

/// Held for the duration of a backup, repair or prune cycle
pub struct RunLock {
    path: PathBuf,
    file: File,
}

/// Lock file content
#[derive(Debug, Serialize, Deserialize)]
struct LockContent {
    pid: u32,
    command: String,
    started_at: DateTime<Utc>,
}

impl RunLock {
    /// Acquire the lock inside `meta_dir`
    ///
    /// Fails immediately when another live process holds it.
    pub fn acquire(meta_dir: &Path, command: &str) -> Result<Self> {
        std::fs::create_dir_all(meta_dir)
            .with_context(|| format!("Failed to create {}", meta_dir.display()))?;
        let path = meta_dir.join(LOCK_FILE);

        let mut file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .read(true)
            .write(true)
            .open(&path)
            .with_context(|| format!("Failed to open lock file {}", path.display()))?;

        if !try_flock_exclusive(&file)? {
            let holder = read_lock_content(&mut file)
                .map(|c| format!("pid {} ({}, started {})", c.pid, c.command, c.started_at.format("%Y-%m-%d %H:%M:%S")))
                .unwrap_or_else(|_| "an unknown process".to_string());
            anyhow::bail!("Another hv run holds {}: {}", path.display(), holder);
        }

        // We own the flock; leftover content belongs to a dead run
        if let Ok(previous) = read_lock_content(&mut file) {
            if previous.pid != std::process::id() && !is_process_alive(previous.pid) {
                tracing::warn!(
                    pid = previous.pid,
                    command = %previous.command,
                    "Recovered stale run lock"
                );
            }
        }

        write_lock_content(&mut file, command)?;
        Ok(Self { path, file })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for RunLock {
    fn drop(&mut self) {
        // The flock goes away with the descriptor. The file stays so that
        // waiters never end up locking different inodes.
        let _ = self.file.set_len(0);
    }
}

/// Try to acquire exclusive file lock (non-blocking)
fn try_flock_exclusive(file: &File) -> Result<bool> {
    use nix::fcntl::{flock, FlockArg};
    use std::os::unix::io::AsRawFd;

    match flock(file.as_raw_fd(), FlockArg::LockExclusiveNonblock) {
        Ok(()) => Ok(true),
        Err(nix::errno::Errno::EWOULDBLOCK) => Ok(false),
        Err(e) => Err(e).context("flock failed"),
    }
}

fn write_lock_content(file: &mut File, command: &str) -> Result<()> {
    let content = LockContent {
        pid: std::process::id(),
        command: command.to_string(),
        started_at: Utc::now(),
    };
    let serialized = serde_json::to_string(&content).context("Failed to serialize lock content")?;

    file.set_len(0)?;
    file.seek(SeekFrom::Start(0))?;
    file.write_all(serialized.as_bytes())?;
    file.sync_all()?;
    Ok(())
}

fn read_lock_content(file: &mut File) -> Result<LockContent> {
    file.seek(SeekFrom::Start(0))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)?;
    serde_json::from_str(&contents).context("Failed to deserialize lock content")
}

/// Signal 0 probes for existence without delivering anything
fn is_process_alive(pid: u32) -> bool {
    use nix::sys::signal::kill;
    use nix::unistd::Pid;

    let Ok(raw) = i32::try_from(pid) else {
        return false;
    };
    match kill(Pid::from_raw(raw), None) {
        Ok(()) => true,
        Err(nix::errno::Errno::ESRCH) => false,
        // EPERM: exists but belongs to someone else
        Err(_) => true,
    }
}
