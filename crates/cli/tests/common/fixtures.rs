//! Test homes: a source tree, a destination and fully injected components

use anyhow::Result;
use chrono::{TimeZone, Utc};
use cli_lib::{FixedAnswer, Orchestrator};
use guard::GuardConfig;
use parking_lot::Mutex;
use snapshot::MemoryBackend;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store::VersionStore;
use tempfile::TempDir;
use transfer::{LocalTransfer, TransferReport, TransferRequest, TransferService};
use vault_core::{FixedPid, ManualClock, Notifier, SystemConfig, TransferEngine, Urgency};

pub const DATASET: &str = "tank/home";

/// One delivered notification
#[derive(Debug, Clone)]
pub struct Notice {
    pub title: String,
    pub message: String,
    pub urgency: Urgency,
}

#[derive(Default)]
pub struct RecordingNotifier {
    notices: Mutex<Vec<Notice>>,
}

impl RecordingNotifier {
    pub fn notices(&self) -> Vec<Notice> {
        self.notices.lock().clone()
    }

    pub fn last(&self) -> Option<Notice> {
        self.notices.lock().last().cloned()
    }

    pub fn titles(&self) -> Vec<String> {
        self.notices.lock().iter().map(|n| n.title.clone()).collect()
    }
}

impl Notifier for RecordingNotifier {
    fn notify(&self, title: &str, message: &str, urgency: Urgency) {
        self.notices.lock().push(Notice {
            title: title.to_string(),
            message: message.to_string(),
            urgency,
        });
    }
}

/// Native transfer that reports a partial failure on chosen calls
pub struct FlakyTransfer {
    calls: AtomicUsize,
    fail_on: Vec<usize>,
}

impl FlakyTransfer {
    /// `fail_on` holds 1-based call numbers
    pub fn failing_on(fail_on: &[usize]) -> Self {
        Self {
            calls: AtomicUsize::new(0),
            fail_on: fail_on.to_vec(),
        }
    }
}

impl TransferService for FlakyTransfer {
    fn name(&self) -> &'static str {
        "flaky"
    }

    fn transfer(&self, request: &TransferRequest) -> vault_core::Result<TransferReport> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        let mut report = LocalTransfer::new().transfer(request)?;
        if self.fail_on.contains(&call) {
            report.exit_code = 23;
            report.errors.push("simulated partial transfer".into());
        }
        Ok(report)
    }
}

pub struct TestHome {
    _temp: TempDir,
    pub source: PathBuf,
    pub dest: PathBuf,
    pub config_path: PathBuf,
    pub config: SystemConfig,
    pub clock: Arc<ManualClock>,
    pub snapshots: Arc<MemoryBackend>,
    pub notifier: Arc<RecordingNotifier>,
    transfer: Option<Arc<dyn TransferService>>,
}

impl TestHome {
    pub fn new() -> Result<Self> {
        let temp = TempDir::new()?;
        let root = temp.path();
        let source = root.join("home/alice");
        let dest = root.join("backup");

        fs::create_dir_all(source.join("docs"))?;
        fs::create_dir_all(source.join(".cache"))?;
        fs::write(source.join("docs/notes.txt"), b"remember the milk")?;
        fs::write(source.join("docs/report.md"), b"# Q3\nnumbers go up\n")?;
        fs::write(source.join(".cache/blob.bin"), vec![7u8; 4096])?;
        fs::write(source.join(".bashrc"), b"export EDITOR=vi\n")?;

        let mut config = SystemConfig::default();
        config.source = source.clone();
        config.backup.destination = dest.clone();
        config.backup.engine = TransferEngine::Native;
        config.backup.min_free_percent = 0;
        config.backup.exclude = vec![".cache/".into(), "*.tmp".into()];
        config.retention.days = 7;
        config.retention.snapshot_days = 7;
        config.zfs.dataset = Some(DATASET.into());
        config.notifications.enabled = false;
        config.logging.directory = Some(root.join("state/logs"));

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 3, 1, 2, 0, 0).single().expect("valid start time"),
        ));
        let snapshots = Arc::new(MemoryBackend::new(clock.clone()));

        Ok(Self {
            source,
            dest,
            config_path: root.join("etc/homevault/config.toml"),
            config,
            clock,
            snapshots,
            notifier: Arc::new(RecordingNotifier::default()),
            transfer: None,
            _temp: temp,
        })
    }

    pub fn root(&self) -> &Path {
        self._temp.path()
    }

    pub fn with_transfer(mut self, transfer: Arc<dyn TransferService>) -> Self {
        self.transfer = Some(transfer);
        self
    }

    /// Orchestrator over the injected clock, snapshots and notifier
    pub fn orchestrator(&self) -> Orchestrator {
        let orchestrator = Orchestrator::new(self.config.clone(), &self.config_path)
            .with_clock(self.clock.clone())
            .with_pid(Arc::new(FixedPid(4242)))
            .with_snapshot_backend(Some(self.snapshots.clone()))
            .with_snapshot_retry_delay(Duration::from_millis(100))
            .with_notifier(self.notifier.clone())
            .with_confirm(Arc::new(FixedAnswer(false)))
            .with_guard(GuardConfig {
                min_free_percent: 0,
                probe_timeout: Duration::from_secs(5),
                remount: false,
            });
        match &self.transfer {
            Some(transfer) => orchestrator.with_transfer(transfer.clone()),
            None => orchestrator,
        }
    }

    /// Read-only view of the destination
    pub fn store(&self) -> VersionStore {
        VersionStore::new(&self.dest, Arc::new(LocalTransfer::new()), self.clock.clone())
    }

    pub fn write(&self, rel: &str, content: &[u8]) -> Result<()> {
        let path = self.source.join(rel);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn advance_days(&self, days: i64) {
        self.clock.advance(chrono::Duration::days(days));
    }

    /// Write the config to disk for binary-level tests
    pub fn save_config(&self) -> Result<()> {
        self.config.save_to(&self.config_path)?;
        Ok(())
    }
}
