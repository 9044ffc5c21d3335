//! Run one backup cycle

use crate::orchestrator::{BackupOutcome, Orchestrator};
use crate::prompt::Mode;
use crate::util::{self, SEPARATOR};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use vault_core::SystemConfig;

pub async fn run(config: SystemConfig, config_path: PathBuf, unattended: bool) -> Result<()> {
    let mode = Mode::detect(unattended);
    let orchestrator = Orchestrator::new(config, config_path);

    // The capacity prompt reads stdin, so no spinner in attended mode
    let spinner = (mode == Mode::Unattended).then(|| util::spinner("Backing up..."));
    let result = tokio::task::spawn_blocking(move || orchestrator.run_backup(mode))
        .await
        .context("Backup task panicked")?;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }

    let outcome = result?;
    print_outcome(&outcome);
    Ok(())
}

fn print_outcome(outcome: &BackupOutcome) {
    let version = &outcome.version;

    println!("{}", "Backup Complete".green().bold());
    println!("{}", SEPARATOR);
    println!();
    println!("Version:       {}", version.id.to_string().yellow());
    println!("Files:         {}", version.file_count);
    println!("Size:          {}", util::format_size(version.size_bytes));
    println!("Transferred:   {}", util::format_size(version.bytes_transferred));
    if let Some(parent) = &version.parent_id {
        println!("Linked to:     {}", parent.to_string().dimmed());
    }

    match &outcome.snapshot {
        Some(name) => println!("Snapshot:      {}", name.cyan()),
        None => println!("Snapshot:      {}", "not configured".dimmed()),
    }
    if let Some(error) = &outcome.replication_error {
        println!("Replication:   {} {}", "failed".red(), error.dimmed());
    }

    if let Some(remote) = &outcome.remote {
        match &remote.error {
            None => println!("Remote:        {} {}", remote.target.cyan(), "✓".green()),
            Some(error) => println!("Remote:        {} {} {}", remote.target.cyan(), "failed".red(), error.dimmed()),
        }
    }

    println!();
    let versions = &outcome.pruned.versions;
    if versions.deleted_count == 0 {
        println!("{}", "Retention: nothing expired".dimmed());
    } else {
        println!(
            "Pruned:        {} versions, {} freed",
            versions.deleted_count.to_string().yellow(),
            util::format_size(versions.bytes_freed).green()
        );
    }
    if let Some(snapshots) = &outcome.pruned.snapshots {
        if snapshots.deleted_count > 0 {
            println!("               {} snapshots", snapshots.deleted_count.to_string().yellow());
        }
    }
    for failure in versions
        .failures
        .iter()
        .chain(outcome.pruned.snapshots.iter().flat_map(|s| s.failures.iter()))
    {
        println!("  {} {}: {}", "✗".red(), failure.item, failure.reason.dimmed());
    }
}
