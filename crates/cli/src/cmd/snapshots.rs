//! List dataset snapshots

use crate::orchestrator::Orchestrator;
use crate::util::{self, SEPARATOR};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use vault_core::SystemConfig;

pub async fn run(config: SystemConfig, config_path: PathBuf) -> Result<()> {
    let orchestrator = Orchestrator::new(config, config_path);
    let prefix = format!("{}-", orchestrator.config().zfs.snapshot_prefix);
    let now = orchestrator.now();

    let listing = tokio::task::spawn_blocking(move || orchestrator.snapshots())
        .await
        .context("Snapshot listing panicked")??;
    let Some(snapshots) = listing else {
        println!("{}", "No dataset configured (set zfs.dataset)".dimmed());
        return Ok(());
    };

    println!("{} ({})", "Snapshots".bold(), snapshots.len());
    println!("{}", SEPARATOR);
    if snapshots.is_empty() {
        println!("{}", "No snapshots yet".dimmed());
    }
    for snapshot in snapshots.iter().rev() {
        let name = if snapshot.name.starts_with(&prefix) {
            snapshot.name.cyan().to_string()
        } else {
            // Not ours: never pruned or replicated
            snapshot.name.dimmed().to_string()
        };
        println!(
            "{}  {:>10}  {}",
            name,
            util::format_size(snapshot.used_bytes),
            util::format_relative_time(snapshot.created, now).dimmed()
        );
    }

    Ok(())
}
