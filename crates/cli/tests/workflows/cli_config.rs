//! End-to-end runs of the `hv` binary

use crate::common::{HvCommand, TestHome};
use anyhow::Result;

#[test]
fn test_config_path_create_then_get_and_set() -> Result<()> {
    let home = TestHome::new()?;
    let config = home.root().join("fresh/config.toml");

    let created = HvCommand::new(&config).args(&["config", "path", "--create"]).assert_success()?;
    assert!(created.contains_stdout("Created config file"));
    assert!(config.exists());

    HvCommand::new(&config)
        .args(&["config", "set", "retention.days", "30"])
        .assert_success()?;
    let got = HvCommand::new(&config)
        .args(&["config", "get", "retention.days"])
        .assert_success()?;
    assert_eq!(got.stdout.trim(), "30");

    // Out of range values never reach disk
    HvCommand::new(&config)
        .args(&["config", "set", "backup.min_free_percent", "150"])
        .assert_failure()?;
    let unchanged = HvCommand::new(&config)
        .args(&["config", "get", "backup.min_free_percent"])
        .assert_success()?;
    assert_eq!(unchanged.stdout.trim(), "10");

    HvCommand::new(&config)
        .args(&["config", "get", "no.such.key"])
        .assert_failure()?;
    Ok(())
}

/// A saved config that runs without zfs, ssh or desktop notifications
fn standalone_home() -> Result<TestHome> {
    let mut home = TestHome::new()?;
    home.config.zfs.dataset = None;
    home.save_config()?;
    Ok(home)
}

#[test]
fn test_status_before_first_backup() -> Result<()> {
    let home = standalone_home()?;

    let status = HvCommand::new(&home.config_path).args(&["status"]).assert_success()?;

    assert!(status.contains_stdout("No backups yet"));
    Ok(())
}

#[test]
fn test_backup_then_log_and_dry_run_prune() -> Result<()> {
    let home = standalone_home()?;

    let backup = HvCommand::new(&home.config_path)
        .args(&["backup", "--unattended"])
        .assert_success()?;
    assert!(backup.contains_stdout("Backup Complete"));
    let ids = backup.version_ids();
    assert!(!ids.is_empty());

    let log = HvCommand::new(&home.config_path).args(&["log"]).assert_success()?;
    assert_eq!(log.version_ids(), vec![ids[0].clone()]);
    assert!(home.dest.join("current").exists());

    let prune = HvCommand::new(&home.config_path)
        .args(&["prune", "--dry-run", "--days", "1"])
        .assert_success()?;
    assert!(prune.contains_stdout("Prune (dry run)"));
    assert!(prune.contains_stdout("Nothing expired"));
    Ok(())
}

#[test]
fn test_broken_config_fails_cleanly() -> Result<()> {
    let home = TestHome::new()?;
    std::fs::create_dir_all(home.config_path.parent().expect("config has a parent"))?;
    std::fs::write(&home.config_path, "backup = \"not a table\"\n")?;

    let result = HvCommand::new(&home.config_path).args(&["status"]).assert_failure()?;

    assert!(result.contains_stderr("Failed to load"));
    Ok(())
}

#[test]
fn test_prune_rejects_out_of_range_days() -> Result<()> {
    let home = standalone_home()?;

    let result = HvCommand::new(&home.config_path)
        .args(&["prune", "--dry-run", "--days", "100000000"])
        .assert_failure()?;
    assert!(result.contains_stderr("must be 0-36500"));

    HvCommand::new(&home.config_path)
        .args(&["prune", "--dry-run", "--snapshot-days", "36500"])
        .assert_success()?;
    Ok(())
}
