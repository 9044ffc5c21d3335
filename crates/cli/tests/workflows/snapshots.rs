//! Snapshot phase: naming, mount checks and replication

use crate::common::{TestHome, DATASET};
use anyhow::Result;
use cli_lib::Mode;
use store::VersionStatus;
use vault_core::VaultError;

#[test]
fn test_snapshot_follows_each_version() -> Result<()> {
    let home = TestHome::new()?;
    let orchestrator = home.orchestrator();

    let first = orchestrator.run_backup(Mode::Unattended)?;
    assert_eq!(first.snapshot.as_deref(), Some("homevault-2026-03-01_02-00-00-4242"));

    home.clock.advance(chrono::Duration::minutes(5));
    orchestrator.run_backup(Mode::Unattended)?;

    assert_eq!(
        home.snapshots.names(DATASET),
        vec![
            "homevault-2026-03-01_02-00-00-4242".to_string(),
            "homevault-2026-03-01_02-05-00-4242".to_string(),
        ]
    );
    Ok(())
}

#[test]
fn test_unmounted_dataset_is_mounted_first() -> Result<()> {
    let home = TestHome::new()?;
    home.snapshots.set_mounted(DATASET, false);

    let outcome = home.orchestrator().run_backup(Mode::Unattended)?;

    assert!(outcome.snapshot.is_some());
    Ok(())
}

#[test]
fn test_mount_failure_keeps_version_and_skips_retention() -> Result<()> {
    let home = TestHome::new()?;
    let orchestrator = home.orchestrator();
    let old = orchestrator.run_backup(Mode::Unattended)?.version;

    home.advance_days(10);
    home.snapshots.set_mounted(DATASET, false);
    home.snapshots.fail_mount(true);

    let err = orchestrator.run_backup(Mode::Unattended).unwrap_err();
    assert!(matches!(
        err.downcast_ref::<VaultError>(),
        Some(VaultError::MountFailed { .. })
    ));

    let versions = home.store().list()?;
    assert_eq!(versions.len(), 2, "expired version survives: retention never ran");
    assert_eq!(versions[0].id, old.id);
    assert_eq!(versions[1].status, VersionStatus::Complete);
    assert_eq!(home.store().current()?.map(|v| v.id), Some(versions[1].id.clone()));
    assert_eq!(home.snapshots.names(DATASET).len(), 1);
    assert_eq!(home.notifier.last().map(|n| n.title), Some("Backup failed".to_string()));
    Ok(())
}

#[test]
fn test_replication_is_incremental() -> Result<()> {
    let mut home = TestHome::new()?;
    home.config.zfs.replicate_to = Some("backup@nas:tank/replica".into());
    let orchestrator = home.orchestrator();

    let first = orchestrator.run_backup(Mode::Unattended)?;
    home.clock.advance(chrono::Duration::hours(1));
    let second = orchestrator.run_backup(Mode::Unattended)?;
    assert!(first.replication_error.is_none() && second.replication_error.is_none());

    let sent = home.snapshots.sent();
    assert_eq!(sent.len(), 2);
    assert_eq!(sent[0].base, None);
    assert_eq!(sent[1].base, Some(format!("{}@{}", DATASET, first.snapshot.unwrap_or_default())));
    assert_eq!(sent[1].target, "backup@nas:tank/replica");
    Ok(())
}

#[test]
fn test_replication_failure_is_not_fatal() -> Result<()> {
    let mut home = TestHome::new()?;
    home.config.zfs.replicate_to = Some("nas:tank/replica".into());
    home.snapshots.fail_send(true);

    let outcome = home.orchestrator().run_backup(Mode::Unattended)?;

    assert!(outcome.version.is_complete());
    assert!(outcome.snapshot.is_some());
    assert!(outcome.replication_error.is_some());
    let titles = home.notifier.titles();
    assert!(titles.contains(&"Snapshot replication failed".to_string()));
    assert_eq!(titles.last().map(String::as_str), Some("Backup complete"));
    Ok(())
}

#[test]
fn test_no_dataset_means_no_snapshots() -> Result<()> {
    let mut home = TestHome::new()?;
    home.config.zfs.dataset = None;
    let orchestrator = home.orchestrator();

    let outcome = orchestrator.run_backup(Mode::Unattended)?;

    assert!(outcome.snapshot.is_none());
    assert!(outcome.pruned.snapshots.is_none());
    assert!(orchestrator.snapshots()?.is_none());
    assert_eq!(home.snapshots.create_calls(), 0);
    Ok(())
}
