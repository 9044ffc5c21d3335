//! Retention across many cycles, dry runs and pointer healing

use crate::common::{TestHome, DATASET};
use anyhow::Result;
use cli_lib::{Mode, PruneOptions};
use std::fs;
use store::PointerRepair;
use vault_core::Clock;

#[test]
fn test_fourteen_daily_cycles_keep_one_week() -> Result<()> {
    let home = TestHome::new()?;
    let orchestrator = home.orchestrator();

    let mut ids = Vec::new();
    for day in 0..14 {
        home.write("docs/journal.txt", format!("day {day}").as_bytes())?;
        ids.push(orchestrator.run_backup(Mode::Unattended)?.version.id);
        home.advance_days(1);
    }

    // The last cycle ran at day 13; everything before day 6 is gone
    let kept: Vec<_> = home.store().list()?.into_iter().map(|v| v.id).collect();
    assert_eq!(kept, ids[6..].to_vec());
    assert_eq!(home.snapshots.names(DATASET).len(), 8);
    assert_eq!(home.store().current()?.map(|v| v.id), ids.last().cloned());
    Ok(())
}

#[test]
fn test_dry_run_is_repeatable_and_matches_real_run() -> Result<()> {
    let mut home = TestHome::new()?;
    home.config.retention.days = 0;
    home.config.retention.snapshot_days = 0;
    let orchestrator = home.orchestrator();

    for day in 0..10 {
        // Rewritten daily, so each version holds its own copy
        home.write("docs/journal.txt", &vec![b'x'; 1000 + day])?;
        orchestrator.run_backup(Mode::Unattended)?;
        home.advance_days(1);
    }
    assert_eq!(home.store().list()?.len(), 10, "retention disabled");

    let options = PruneOptions {
        dry_run: true,
        days: Some(3),
        snapshot_days: Some(3),
    };
    let first = orchestrator.run_prune(options)?;
    let second = orchestrator.run_prune(options)?;
    assert_eq!(first, second);
    assert!(first.versions.dry_run);
    assert_eq!(home.store().list()?.len(), 10, "dry run deletes nothing");
    assert_eq!(home.snapshots.names(DATASET).len(), 10);

    let real = orchestrator.run_prune(PruneOptions {
        dry_run: false,
        ..options
    })?;
    assert_eq!(real.versions.deleted, first.versions.deleted);
    assert_eq!(real.versions.bytes_freed, first.versions.bytes_freed);
    assert_eq!(real.versions.deleted_count, first.versions.deleted_count);
    assert!(real.versions.bytes_freed > 0);
    assert_eq!(
        real.snapshots.as_ref().map(|s| s.deleted_count),
        first.snapshots.as_ref().map(|s| s.deleted_count)
    );
    assert_eq!(home.store().list()?.len(), 10 - real.versions.deleted_count);
    Ok(())
}

#[test]
fn test_prune_heals_dangling_pointer() -> Result<()> {
    let home = TestHome::new()?;
    let orchestrator = home.orchestrator();

    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(orchestrator.run_backup(Mode::Unattended)?.version.id);
        home.clock.advance(chrono::Duration::hours(1));
    }

    // Lose the newest version behind the pointer's back
    fs::remove_dir_all(home.dest.join(ids[2].as_str()))?;

    let outcome = orchestrator.run_prune(PruneOptions::default())?;
    assert_eq!(outcome.versions.deleted_count, 0);
    assert_eq!(
        outcome.versions.pointer,
        Some(PointerRepair::Repointed {
            from: Some(ids[2].clone()),
            to: ids[1].clone(),
        })
    );
    assert_eq!(home.store().current()?.map(|v| v.id), Some(ids[1].clone()));
    Ok(())
}

#[test]
fn test_dry_run_on_missing_destination_is_empty() -> Result<()> {
    let home = TestHome::new()?;

    let outcome = home.orchestrator().run_prune(PruneOptions {
        dry_run: true,
        ..Default::default()
    })?;

    assert_eq!(outcome.versions.deleted_count, 0);
    assert_eq!(outcome.versions.bytes_freed, 0);
    assert!(!home.dest.exists(), "dry run never creates the destination");
    Ok(())
}

#[test]
fn test_foreign_snapshots_are_never_pruned() -> Result<()> {
    let home = TestHome::new()?;
    let long_ago = home.clock.now() - chrono::Duration::days(30);
    home.snapshots.insert(DATASET, "manual-before-upgrade", long_ago, 1 << 20);
    home.snapshots.insert(DATASET, "homevault-2026-01-30_02-00-00-1", long_ago, 1 << 20);

    let outcome = home.orchestrator().run_prune(PruneOptions::default())?;

    let snapshots = outcome.snapshots.expect("dataset configured");
    assert_eq!(snapshots.deleted, vec![format!("{}@homevault-2026-01-30_02-00-00-1", DATASET)]);
    assert_eq!(snapshots.bytes_freed, 1 << 20);
    assert_eq!(home.snapshots.names(DATASET), vec!["manual-before-upgrade".to_string()]);
    Ok(())
}
