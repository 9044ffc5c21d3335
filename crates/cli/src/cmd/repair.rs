//! Checksum repair of the backup copy

use crate::orchestrator::Orchestrator;
use crate::prompt::Mode;
use crate::util::{self, SEPARATOR};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use vault_core::SystemConfig;

pub async fn run(config: SystemConfig, config_path: PathBuf, unattended: bool) -> Result<()> {
    let mode = Mode::detect(unattended);
    let orchestrator = Orchestrator::new(config, config_path);

    let spinner = (mode == Mode::Unattended).then(|| util::spinner("Comparing checksums..."));
    let result = tokio::task::spawn_blocking(move || orchestrator.run_repair(mode))
        .await
        .context("Repair task panicked")?;
    if let Some(pb) = spinner {
        pb.finish_and_clear();
    }
    let report = result?;

    println!("{}", "Repair Complete".green().bold());
    println!("{}", SEPARATOR);
    println!();
    println!("Target:        {}", report.target.cyan());
    if report.healthy {
        println!("Result:        {}", "No corruption found ✓".green());
    } else {
        println!("Result:        {}", "Corruption repaired".yellow());
        println!("Files:         {}", report.files_reconciled.to_string().yellow());
        println!("Rewritten:     {}", util::format_size(report.bytes_reconciled));
    }

    Ok(())
}
