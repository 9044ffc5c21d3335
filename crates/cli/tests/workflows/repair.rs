//! Checksum repair against the local current version

use crate::common::TestHome;
use anyhow::Result;
use cli_lib::Mode;
use filetime::FileTime;
use std::fs;
use vault_core::Urgency;

#[test]
fn test_clean_backup_is_healthy() -> Result<()> {
    let home = TestHome::new()?;
    let orchestrator = home.orchestrator();
    let version = orchestrator.run_backup(Mode::Unattended)?.version;

    let report = orchestrator.run_repair(Mode::Unattended)?;

    assert!(report.healthy);
    assert_eq!(report.bytes_reconciled, 0);
    assert!(report.target.contains(version.id.as_str()));
    let notice = home.notifier.last().expect("repair notified");
    assert_eq!(notice.title, "Repair complete");
    assert_eq!(notice.message, "No corruption found");
    Ok(())
}

#[test]
fn test_silent_corruption_is_repaired() -> Result<()> {
    let home = TestHome::new()?;
    let orchestrator = home.orchestrator();
    let version = orchestrator.run_backup(Mode::Unattended)?.version;

    // Same size, same mtime: only a content comparison notices
    let damaged = version.path.join("docs/notes.txt");
    let mtime = FileTime::from_last_modification_time(&fs::metadata(&damaged)?);
    fs::write(&damaged, b"remember the MILK")?;
    filetime::set_file_mtime(&damaged, mtime)?;

    let report = orchestrator.run_repair(Mode::Unattended)?;
    assert!(!report.healthy);
    assert!(report.bytes_reconciled > 0);
    assert_eq!(fs::read_to_string(&damaged)?, "remember the milk");

    let notice = home.notifier.last().expect("repair notified");
    assert!(notice.message.starts_with("Corruption repaired"), "{}", notice.message);
    assert_eq!(notice.urgency, Urgency::Critical);

    let again = orchestrator.run_repair(Mode::Unattended)?;
    assert!(again.healthy);
    Ok(())
}

#[test]
fn test_repair_without_versions_fails() -> Result<()> {
    let home = TestHome::new()?;

    let err = home.orchestrator().run_repair(Mode::Unattended).unwrap_err();

    assert!(format!("{:#}", err).contains("No complete version"));
    assert_eq!(home.notifier.titles(), vec!["Repair failed".to_string()]);
    Ok(())
}

#[test]
fn test_repair_does_not_create_versions() -> Result<()> {
    let home = TestHome::new()?;
    let orchestrator = home.orchestrator();
    orchestrator.run_backup(Mode::Unattended)?;
    home.clock.advance(chrono::Duration::hours(1));

    orchestrator.run_repair(Mode::Unattended)?;

    assert_eq!(home.store().list()?.len(), 1);
    Ok(())
}

#[test]
fn test_later_source_edits_leave_version_untouched() -> Result<()> {
    let home = TestHome::new()?;
    let orchestrator = home.orchestrator();
    let version = orchestrator.run_backup(Mode::Unattended)?.version;

    home.write("docs/notes.txt", b"remember the eggs and bread")?;
    home.write("docs/later.txt", b"written after the backup")?;

    let report = orchestrator.run_repair(Mode::Unattended)?;

    assert!(report.healthy);
    assert_eq!(report.bytes_reconciled, 0);
    assert_eq!(fs::read_to_string(version.path.join("docs/notes.txt"))?, "remember the milk");
    assert!(!version.path.join("docs/later.txt").exists());
    let current = home.store().current()?.expect("version still current");
    assert_eq!(current.size_bytes, version.size_bytes);
    assert_eq!(home.notifier.last().map(|n| n.message), Some("No corruption found".to_string()));
    Ok(())
}
