//! Show version history

use crate::orchestrator::Orchestrator;
use crate::util::{self, SEPARATOR};
use anyhow::Result;
use owo_colors::OwoColorize;
use std::path::PathBuf;
use store::VersionStatus;
use vault_core::SystemConfig;

const DEFAULT_LIMIT: usize = 20;

pub async fn run(config: SystemConfig, config_path: PathBuf, limit: Option<usize>) -> Result<()> {
    let orchestrator = Orchestrator::new(config, config_path);
    let versions = orchestrator.versions()?;
    let current = orchestrator.status()?.current.map(|v| v.id);
    let now = orchestrator.now();

    if versions.is_empty() {
        println!("{}", "No backups yet".dimmed());
        return Ok(());
    }

    let limit = limit.unwrap_or(DEFAULT_LIMIT);
    println!("{} ({} of {})", "Version History".bold(), limit.min(versions.len()), versions.len());
    println!("{}", SEPARATOR);

    for version in versions.iter().rev().take(limit) {
        let marker = if current.as_ref() == Some(&version.id) { "*" } else { " " };
        let status = match version.status {
            VersionStatus::Complete => "complete".green().to_string(),
            VersionStatus::Failed => "failed".red().to_string(),
            VersionStatus::Pending => "pending".yellow().to_string(),
        };
        println!(
            "{} {}  {:<8}  {:>10}  {:>8} files  {}",
            marker.cyan(),
            version.id.to_string().yellow(),
            status,
            util::format_size(version.size_bytes),
            version.file_count,
            util::format_relative_time(version.created, now).dimmed()
        );
    }

    Ok(())
}
