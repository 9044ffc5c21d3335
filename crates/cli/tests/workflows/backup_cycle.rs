//! Backup cycles: versions, the current pointer and guard behavior

use crate::common::{FlakyTransfer, TestHome, DATASET};
use anyhow::Result;
use cli_lib::{Confirm, FixedAnswer, Mode};
use guard::GuardConfig;
use std::fs;
use std::os::unix::fs::MetadataExt;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use store::VersionStatus;
use vault_core::{Urgency, VaultError};

fn vault_error(err: &anyhow::Error) -> Option<&VaultError> {
    err.downcast_ref::<VaultError>()
}

#[test]
fn test_cycles_produce_versions_and_move_pointer() -> Result<()> {
    let home = TestHome::new()?;
    let orchestrator = home.orchestrator();

    let mut ids = Vec::new();
    for day in 0..3 {
        home.write("docs/daily.txt", format!("entry {day}").as_bytes())?;
        let outcome = orchestrator.run_backup(Mode::Unattended)?;
        ids.push(outcome.version.id.clone());
        home.clock.advance(chrono::Duration::hours(1));
    }

    let store = home.store();
    let versions = store.list()?;
    assert_eq!(versions.len(), 3);
    assert!(versions.iter().all(|v| v.status == VersionStatus::Complete));

    let current = store.current()?.expect("pointer set");
    assert_eq!(current.id, ids[2]);
    assert_eq!(
        fs::canonicalize(home.dest.join("current"))?,
        fs::canonicalize(&current.path)?
    );
    assert_eq!(fs::read_to_string(current.path.join("docs/daily.txt"))?, "entry 2");
    Ok(())
}

#[test]
fn test_unchanged_files_share_storage() -> Result<()> {
    let home = TestHome::new()?;
    let orchestrator = home.orchestrator();

    let first = orchestrator.run_backup(Mode::Unattended)?.version;
    home.clock.advance(chrono::Duration::hours(1));
    home.write("docs/report.md", b"# Q3\nnumbers went sideways\n")?;
    let second = orchestrator.run_backup(Mode::Unattended)?.version;

    assert_eq!(second.parent_id.as_ref(), Some(&first.id));
    let ino = |v: &store::BackupVersion, rel: &str| fs::metadata(v.path.join(rel)).map(|m| m.ino());
    assert_eq!(ino(&first, "docs/notes.txt")?, ino(&second, "docs/notes.txt")?);
    assert_ne!(ino(&first, "docs/report.md")?, ino(&second, "docs/report.md")?);
    Ok(())
}

#[test]
fn test_exclusions_are_honored() -> Result<()> {
    let home = TestHome::new()?;
    home.write("scratch.tmp", b"throwaway")?;

    let version = home.orchestrator().run_backup(Mode::Unattended)?.version;

    assert!(version.path.join(".bashrc").exists());
    assert!(!version.path.join(".cache/blob.bin").exists());
    assert!(!version.path.join("scratch.tmp").exists());
    Ok(())
}

#[test]
fn test_failed_cycle_keeps_previous_pointer() -> Result<()> {
    let home = TestHome::new()?.with_transfer(Arc::new(FlakyTransfer::failing_on(&[2])));
    let orchestrator = home.orchestrator();

    let first = orchestrator.run_backup(Mode::Unattended)?.version;
    home.clock.advance(chrono::Duration::hours(1));

    let err = orchestrator.run_backup(Mode::Unattended).unwrap_err();
    assert!(matches!(
        vault_error(&err),
        Some(VaultError::TransferFailed { exit_code: Some(23), .. })
    ));

    let store = home.store();
    assert_eq!(store.current()?.map(|v| v.id), Some(first.id.clone()));
    let versions = store.list()?;
    assert_eq!(versions.len(), 2);
    assert_eq!(versions[1].status, VersionStatus::Failed);
    assert!(versions[1].path.exists(), "failed version kept for inspection");

    // Failed cycles never reach the snapshot phase
    assert_eq!(home.snapshots.names(DATASET).len(), 1);

    let notice = home.notifier.last().expect("failure notified");
    assert_eq!(notice.title, "Backup failed");
    assert_eq!(notice.urgency, Urgency::Critical);

    home.clock.advance(chrono::Duration::hours(1));
    let third = orchestrator.run_backup(Mode::Unattended)?.version;
    assert_eq!(third.parent_id, Some(first.id), "links against last complete version");
    assert_eq!(store.current()?.map(|v| v.id), Some(third.id));
    Ok(())
}

#[test]
fn test_success_is_notified() -> Result<()> {
    let home = TestHome::new()?;
    let outcome = home.orchestrator().run_backup(Mode::Unattended)?;

    let notice = home.notifier.last().expect("success notified");
    assert_eq!(notice.title, "Backup complete");
    assert!(notice.message.contains(outcome.version.id.as_str()));
    Ok(())
}

#[test]
fn test_missing_source_fails_before_touching_destination() -> Result<()> {
    let mut home = TestHome::new()?;
    home.config.source = home.root().join("nowhere");

    assert!(home.orchestrator().run_backup(Mode::Unattended).is_err());
    assert!(!home.dest.exists());
    Ok(())
}

#[test]
fn test_unwritable_destination_aborts() -> Result<()> {
    let mut home = TestHome::new()?;
    let blocker = home.root().join("blocker");
    fs::write(&blocker, b"not a directory")?;
    home.config.backup.destination = blocker.join("backup");

    let err = home.orchestrator().run_backup(Mode::Unattended).unwrap_err();
    assert!(matches!(vault_error(&err), Some(VaultError::NotWritable { .. })));
    Ok(())
}

struct CountingConfirm {
    answer: bool,
    asked: AtomicUsize,
}

impl Confirm for CountingConfirm {
    fn confirm(&self, _question: &str) -> bool {
        self.asked.fetch_add(1, Ordering::SeqCst);
        self.answer
    }
}

fn always_low_space() -> GuardConfig {
    GuardConfig {
        min_free_percent: 100,
        probe_timeout: Duration::from_secs(5),
        remount: false,
    }
}

#[test]
fn test_low_space_unattended_aborts_without_asking() -> Result<()> {
    let home = TestHome::new()?;
    let confirm = Arc::new(CountingConfirm {
        answer: true,
        asked: AtomicUsize::new(0),
    });
    let orchestrator = home
        .orchestrator()
        .with_guard(always_low_space())
        .with_confirm(confirm.clone());

    let err = orchestrator.run_backup(Mode::Unattended).unwrap_err();
    assert!(matches!(vault_error(&err), Some(VaultError::LowSpace { .. })));
    assert_eq!(confirm.asked.load(Ordering::SeqCst), 0);
    assert!(home.store().list()?.is_empty());
    Ok(())
}

#[test]
fn test_low_space_attended_override() -> Result<()> {
    let home = TestHome::new()?;

    let declined = home
        .orchestrator()
        .with_guard(always_low_space())
        .with_confirm(Arc::new(FixedAnswer(false)));
    assert!(declined.run_backup(Mode::Attended).is_err());

    let confirm = Arc::new(CountingConfirm {
        answer: true,
        asked: AtomicUsize::new(0),
    });
    let accepted = home
        .orchestrator()
        .with_guard(always_low_space())
        .with_confirm(confirm.clone());
    let outcome = accepted.run_backup(Mode::Attended)?;

    assert!(outcome.version.is_complete());
    assert_eq!(confirm.asked.load(Ordering::SeqCst), 1);
    Ok(())
}

#[test]
fn test_insufficient_space_is_never_overridable() {
    let err = VaultError::InsufficientSpace {
        path: "/backup".into(),
        required: 10,
        available: 1,
    };
    assert!(!err.is_overridable());
}
