//! Apply retention to versions and snapshots

use crate::orchestrator::{Orchestrator, PruneOptions};
use crate::util::{self, SEPARATOR};
use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::PathBuf;
use store::{PointerRepair, PruneReport, VersionId};
use vault_core::SystemConfig;

pub async fn run(
    config: SystemConfig,
    config_path: PathBuf,
    dry_run: bool,
    days: Option<u32>,
    snapshot_days: Option<u32>,
) -> Result<()> {
    let orchestrator = Orchestrator::new(config, config_path);
    let options = PruneOptions {
        dry_run,
        days,
        snapshot_days,
    };

    let outcome = tokio::task::spawn_blocking(move || orchestrator.run_prune(options))
        .await
        .context("Prune task panicked")??;

    if dry_run {
        println!("{}", "Prune (dry run)".bold());
    } else {
        println!("{}", "Prune Complete".green().bold());
    }
    println!("{}", SEPARATOR);
    println!();

    print_report("Versions", &outcome.versions);
    match &outcome.versions.pointer {
        Some(PointerRepair::Repointed { from, to }) => {
            println!("  current:  {} -> {}", describe(from).dimmed(), to.to_string().cyan())
        }
        Some(PointerRepair::Cleared { from }) => {
            println!("  current:  {} -> {}", describe(from).dimmed(), "(none)".yellow())
        }
        _ => {}
    }

    match &outcome.snapshots {
        Some(report) => {
            println!();
            print_report("Snapshots", report);
        }
        None => println!("\n{}", "Snapshots: no dataset configured".dimmed()),
    }

    Ok(())
}

fn describe(id: &Option<VersionId>) -> String {
    id.as_ref().map(VersionId::to_string).unwrap_or_else(|| "(none)".into())
}

fn print_report(label: &str, report: &PruneReport) {
    let verb = if report.dry_run { "Would delete" } else { "Deleted" };

    println!("{}:", label.bold());
    if report.deleted_count == 0 && report.failures.is_empty() {
        println!("  {}", "Nothing expired".dimmed());
        return;
    }
    println!("  {}:  {}", verb, report.deleted_count.to_string().yellow());
    println!("  Space:     {}", util::format_size(report.bytes_freed).green());
    for name in &report.deleted {
        println!("    {}", name.dimmed());
    }
    for failure in &report.failures {
        println!("  {} {}: {}", "✗".red(), failure.item, failure.reason.dimmed());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe_pointer_ends() {
        let id: VersionId = "2026-03-01_02-00-00".parse().unwrap();
        assert_eq!(describe(&Some(id)), "2026-03-01_02-00-00");
        assert_eq!(describe(&None), "(none)");
    }
}
