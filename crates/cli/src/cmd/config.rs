//! Configuration management command
//!
//! View and edit `config.toml` by dotted key. Every write is validated
//! before it reaches disk.

use anyhow::{Context, Result};
use owo_colors::OwoColorize;
use std::path::{Path, PathBuf};
use vault_core::config::{example_config, init_if_missing};
use vault_core::SystemConfig;

/// Keys accepted by `get` and `set`, in display order
pub const KEYS: &[&str] = &[
    "source",
    "backup.destination",
    "backup.engine",
    "backup.checksum",
    "backup.bandwidth_limit_kbs",
    "backup.min_free_percent",
    "backup.io_timeout_secs",
    "backup.exclude",
    "retention.days",
    "retention.snapshot_days",
    "remote.enabled",
    "remote.host",
    "remote.user",
    "remote.port",
    "remote.path",
    "remote.connect_timeout_secs",
    "zfs.dataset",
    "zfs.snapshot_prefix",
    "zfs.replicate_to",
    "zfs.sudo",
    "zfs.command_timeout_secs",
    "zfs.replication_timeout_secs",
    "notifications.enabled",
    "notifications.desktop",
    "logging.directory",
    "logging.level",
];

/// List all configuration values
pub async fn run_list(path: &Path) -> Result<()> {
    let config = SystemConfig::load_from(path)?;

    println!("{}", "System Configuration".bold());
    let location = if path.exists() {
        path.display().to_string()
    } else {
        format!("{} (not created, showing defaults)", path.display())
    };
    println!("{}: {}", "Location".dimmed(), location.dimmed());

    let mut section = "";
    for &key in KEYS {
        let (head, field) = key.split_once('.').unwrap_or(("", key));
        if head != section {
            section = head;
            println!("\n{}", format!("[{}]", head).yellow());
        }
        let value = get_value(&config, key)?;
        let shown = if value.is_empty() {
            "(unset)".dimmed().to_string()
        } else {
            value
        };
        println!("  {} = {}", field.cyan(), shown);
    }

    println!("\n{}", "Valid Ranges:".bold());
    println!("  backup.engine: rsync | native");
    println!("  backup.min_free_percent: 0-99");
    println!("  retention.days, retention.snapshot_days: 0-36500 (0 = keep forever)");
    println!("  remote.connect_timeout_secs: 1-300");

    Ok(())
}

/// Get a single configuration value
pub async fn run_get(path: &Path, key: &str) -> Result<()> {
    let config = SystemConfig::load_from(path)?;
    println!("{}", get_value(&config, key)?);
    Ok(())
}

/// Set a configuration value
pub async fn run_set(path: &Path, key: &str, value: &str) -> Result<()> {
    let mut config = SystemConfig::load_from(path)?;
    set_value(&mut config, key, value)?;
    config.validate().context("Invalid configuration value")?;
    config.save_to(path)?;

    println!("{} {} = {}", "✓".green(), key.cyan(), value);
    Ok(())
}

/// Show the config file path and optionally create it
pub async fn run_path(path: &Path, create: bool) -> Result<()> {
    if create && init_if_missing(path)? {
        println!("{} Created config file at: {}", "✓".green(), path.display());
    } else if path.exists() {
        println!("{}", path.display());
    } else {
        println!("{}", path.display());
        println!("{}", "File does not exist. Use --create to create it.".yellow());
    }
    Ok(())
}

/// Show example configuration
pub async fn run_example() -> Result<()> {
    println!("{}", example_config());
    Ok(())
}

pub fn get_value(config: &SystemConfig, key: &str) -> Result<String> {
    let value = match key {
        "source" => config.source.display().to_string(),
        "backup.destination" => config.backup.destination.display().to_string(),
        "backup.engine" => config.backup.engine.to_string(),
        "backup.checksum" => config.backup.checksum.to_string(),
        "backup.bandwidth_limit_kbs" => config.backup.bandwidth_limit_kbs.to_string(),
        "backup.min_free_percent" => config.backup.min_free_percent.to_string(),
        "backup.io_timeout_secs" => config.backup.io_timeout_secs.to_string(),
        "backup.exclude" => config.backup.exclude.join(","),
        "retention.days" => config.retention.days.to_string(),
        "retention.snapshot_days" => config.retention.snapshot_days.to_string(),
        "remote.enabled" => config.remote.enabled.to_string(),
        "remote.host" => config.remote.host.clone(),
        "remote.user" => config.remote.user.clone().unwrap_or_default(),
        "remote.port" => config.remote.port.to_string(),
        "remote.path" => config.remote.path.display().to_string(),
        "remote.connect_timeout_secs" => config.remote.connect_timeout_secs.to_string(),
        "zfs.dataset" => config.zfs.dataset.clone().unwrap_or_default(),
        "zfs.snapshot_prefix" => config.zfs.snapshot_prefix.clone(),
        "zfs.replicate_to" => config.zfs.replicate_to.clone().unwrap_or_default(),
        "zfs.sudo" => config.zfs.sudo.to_string(),
        "zfs.command_timeout_secs" => config.zfs.command_timeout_secs.to_string(),
        "zfs.replication_timeout_secs" => config.zfs.replication_timeout_secs.to_string(),
        "notifications.enabled" => config.notifications.enabled.to_string(),
        "notifications.desktop" => config.notifications.desktop.to_string(),
        "logging.directory" => config
            .logging
            .directory
            .as_ref()
            .map(|d| d.display().to_string())
            .unwrap_or_default(),
        "logging.level" => config.logging.level.clone(),
        _ => anyhow::bail!(
            "Unknown config key: {}. Use 'hv config list' to see available keys.",
            key
        ),
    };
    Ok(value)
}

/// Apply `value` to `key`; an empty value clears optional keys
pub fn set_value(config: &mut SystemConfig, key: &str, value: &str) -> Result<()> {
    match key {
        "source" => config.source = PathBuf::from(value),
        "backup.destination" => config.backup.destination = PathBuf::from(value),
        "backup.engine" => config.backup.engine = value.parse()?,
        "backup.checksum" => config.backup.checksum = parse_bool(value)?,
        "backup.bandwidth_limit_kbs" => config.backup.bandwidth_limit_kbs = parse_number(value)?,
        "backup.min_free_percent" => config.backup.min_free_percent = parse_number(value)?,
        "backup.io_timeout_secs" => config.backup.io_timeout_secs = parse_number(value)?,
        "backup.exclude" => {
            config.backup.exclude = value
                .split(',')
                .map(str::trim)
                .filter(|p| !p.is_empty())
                .map(String::from)
                .collect()
        }
        "retention.days" => config.retention.days = parse_number(value)?,
        "retention.snapshot_days" => config.retention.snapshot_days = parse_number(value)?,
        "remote.enabled" => config.remote.enabled = parse_bool(value)?,
        "remote.host" => config.remote.host = value.to_string(),
        "remote.user" => config.remote.user = optional(value),
        "remote.port" => config.remote.port = parse_number(value)?,
        "remote.path" => config.remote.path = PathBuf::from(value),
        "remote.connect_timeout_secs" => config.remote.connect_timeout_secs = parse_number(value)?,
        "zfs.dataset" => config.zfs.dataset = optional(value),
        "zfs.snapshot_prefix" => config.zfs.snapshot_prefix = value.to_string(),
        "zfs.replicate_to" => {
            if !value.is_empty() {
                value
                    .parse::<snapshot::ReplicaTarget>()
                    .context("Invalid value: expected [user@]host:pool/dataset")?;
            }
            config.zfs.replicate_to = optional(value)
        }
        "zfs.sudo" => config.zfs.sudo = parse_bool(value)?,
        "zfs.command_timeout_secs" => config.zfs.command_timeout_secs = parse_number(value)?,
        "zfs.replication_timeout_secs" => config.zfs.replication_timeout_secs = parse_number(value)?,
        "notifications.enabled" => config.notifications.enabled = parse_bool(value)?,
        "notifications.desktop" => config.notifications.desktop = parse_bool(value)?,
        "logging.directory" => config.logging.directory = optional(value).map(PathBuf::from),
        "logging.level" => config.logging.level = value.to_string(),
        _ => anyhow::bail!(
            "Unknown config key: {}. Use 'hv config list' to see available keys.",
            key
        ),
    }
    Ok(())
}

fn parse_bool(value: &str) -> Result<bool> {
    value.parse().context("Invalid value: must be 'true' or 'false'")
}

fn parse_number<T: std::str::FromStr>(value: &str) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    value
        .parse()
        .context("Invalid value: must be a non-negative integer in range")
}

fn optional(value: &str) -> Option<String> {
    (!value.is_empty()).then(|| value.to_string())
}
