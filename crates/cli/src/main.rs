//! Homevault CLI - hv command

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use cli_lib::cmd;
use cli_lib::logging::init_logging;
use std::path::PathBuf;
use vault_core::config::config_file_path;
use vault_core::{SystemConfig, MAX_RETENTION_DAYS};

/// Homevault - versioned home directory backups
#[derive(Parser)]
#[command(name = "hv")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Debug logging (overridden by HV_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: $HOMEVAULT_CONFIG or the user config dir)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create a new version, snapshot it, mirror it and apply retention
    Backup {
        /// Never prompt; low space aborts the run
        #[arg(long)]
        unattended: bool,
    },
    /// Checksum-compare the source against the backup and fix divergence
    Repair {
        /// Never prompt; low space aborts the run
        #[arg(long)]
        unattended: bool,
    },
    /// Delete versions and snapshots past their retention age
    Prune {
        /// Report what would be deleted without deleting
        #[arg(long)]
        dry_run: bool,
        /// Version age limit in days (default: retention.days)
        #[arg(long, value_parser = retention_days)]
        days: Option<u32>,
        /// Snapshot age limit in days (default: retention.snapshot_days)
        #[arg(long, value_parser = retention_days)]
        snapshot_days: Option<u32>,
    },
    /// Show destination and version status
    Status,
    /// Show version history
    Log {
        /// Number of versions to show (default: 20)
        #[arg(long)]
        limit: Option<usize>,
    },
    /// List snapshots of the configured dataset
    Snapshots,
    /// View or edit configuration
    #[command(subcommand)]
    Config(ConfigCommands),
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// List all configuration values
    List,
    /// Print one value
    Get {
        /// Dotted key, e.g. retention.days
        key: String,
    },
    /// Change one value
    Set {
        key: String,
        value: String,
    },
    /// Show the config file path
    Path {
        /// Write a default config file if none exists
        #[arg(long)]
        create: bool,
    },
    /// Show an annotated example configuration
    Example,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match cli.config {
        Some(path) => path,
        None => config_file_path().context("Could not determine config file path")?,
    };

    // Config commands must keep working when the file itself is broken
    if let Commands::Config(config_cmd) = cli.command {
        return match config_cmd {
            ConfigCommands::List => cmd::config::run_list(&config_path).await,
            ConfigCommands::Get { key } => cmd::config::run_get(&config_path, &key).await,
            ConfigCommands::Set { key, value } => cmd::config::run_set(&config_path, &key, &value).await,
            ConfigCommands::Path { create } => cmd::config::run_path(&config_path, create).await,
            ConfigCommands::Example => cmd::config::run_example().await,
        };
    }

    let config = SystemConfig::load_from(&config_path)
        .with_context(|| format!("Failed to load {}", config_path.display()))?;
    let log_dir = config.log_dir();
    let _log_guard = init_logging(cli.verbose, &config.logging.level, Some(&log_dir))?;

    match cli.command {
        Commands::Backup { unattended } => cmd::backup::run(config, config_path, unattended).await,
        Commands::Repair { unattended } => cmd::repair::run(config, config_path, unattended).await,
        Commands::Prune { dry_run, days, snapshot_days } => {
            cmd::prune::run(config, config_path, dry_run, days, snapshot_days).await
        }
        Commands::Status => cmd::status::run(config, config_path).await,
        Commands::Log { limit } => cmd::log::run(config, config_path, limit).await,
        Commands::Snapshots => cmd::snapshots::run(config, config_path).await,
        Commands::Config(_) => Ok(()),
    }
}

/// Retention flags share the config file's bounds
fn retention_days(value: &str) -> std::result::Result<u32, String> {
    let days: u32 = value.parse().map_err(|e| format!("{}", e))?;
    if days > MAX_RETENTION_DAYS {
        return Err(format!("must be 0-{}", MAX_RETENTION_DAYS));
    }
    Ok(days)
}
