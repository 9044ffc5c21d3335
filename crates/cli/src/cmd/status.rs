//! Show destination and version status

use crate::orchestrator::Orchestrator;
use crate::util::{self, SEPARATOR};
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use vault_core::SystemConfig;

pub async fn run(config: SystemConfig, config_path: PathBuf) -> Result<()> {
    let orchestrator = Orchestrator::new(config, config_path);
    let config = orchestrator.config();
    let status = orchestrator.status()?;
    let now = orchestrator.now();

    println!("{}", "Backup Status".bold());
    println!("{}", SEPARATOR);
    println!();

    println!("Source:        {}", config.source.display().to_string().cyan());
    println!("Destination:   {}", config.backup.destination.display().to_string().cyan());
    println!("Engine:        {}", config.backup.engine);
    match config.remote_target() {
        Some(remote) => println!("Remote:        {}", remote.rsync_spec().cyan()),
        None => println!("Remote:        {}", "disabled".dimmed()),
    }
    match &config.zfs.dataset {
        Some(dataset) => println!("Dataset:       {}", dataset.cyan()),
        None => println!("Dataset:       {}", "none (snapshots disabled)".dimmed()),
    }
    println!();

    println!("Current version:");
    match &status.current {
        Some(version) => {
            let finished = version.finished.unwrap_or(version.created);
            println!("  ID:          {}", version.id.to_string().yellow());
            println!(
                "  Finished:    {} ({})",
                util::format_relative_time(finished, now),
                util::format_absolute_time(finished).dimmed()
            );
            println!("  Files:       {}", version.file_count);
            println!("  Size:        {}", util::format_size(version.size_bytes));
        }
        None => {
            println!("  {}", "No backups yet".dimmed());
            println!("  {}", "Tip: Run 'hv backup'".dimmed());
        }
    }
    println!();

    println!("Versions:");
    println!("  Complete:    {}", status.complete.to_string().green());
    if status.failed > 0 {
        println!("  Failed:      {}", status.failed.to_string().red());
    }
    if status.pending > 0 {
        println!("  Pending:     {}", status.pending.to_string().yellow());
    }
    println!("  Total size:  {}", util::format_size(status.total_bytes));
    if let (Some(oldest), Some(newest)) = (&status.oldest, &status.newest) {
        println!("  Range:       {} .. {}", oldest, newest);
    }
    println!(
        "  Retention:   {}",
        match config.retention.days {
            0 => "keep forever".to_string(),
            days => format!("{} days", days),
        }
    );

    Ok(())
}
