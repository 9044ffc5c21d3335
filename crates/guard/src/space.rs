//! Free-space accounting

use nix::sys::statvfs::statvfs;
use std::path::Path;
use vault_core::{Result, VaultError};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct SpaceReport {
    pub total_bytes: u64,
    pub available_bytes: u64,
    /// Same rounding as `df`: used / (used + available), rounded up
    pub used_percent: u8,
}

impl SpaceReport {
    pub fn from_blocks(total: u64, free: u64, available: u64, block_size: u64) -> Self {
        let used = total.saturating_sub(free);
        Self {
            total_bytes: total.saturating_mul(block_size),
            available_bytes: available.saturating_mul(block_size),
            used_percent: used_percent(used, available),
        }
    }
}

fn used_percent(used: u64, available: u64) -> u8 {
    let denominator = used.saturating_add(available);
    if denominator == 0 {
        return 0;
    }
    let pct = (used as u128 * 100).div_ceil(denominator as u128);
    pct.min(100) as u8
}

/// Apply the capacity rules to a probe result
///
/// A shortfall of `required_bytes` is never override-able. Exceeding the
/// `100 - min_free_percent` usage ceiling returns `LowSpace`.
pub fn evaluate_capacity(
    path: &str,
    report: SpaceReport,
    min_free_percent: u8,
    required_bytes: u64,
) -> Result<SpaceReport> {
    if required_bytes > report.available_bytes {
        return Err(VaultError::InsufficientSpace {
            path: path.to_string(),
            required: required_bytes,
            available: report.available_bytes,
        });
    }

    let limit_percent = 100u8.saturating_sub(min_free_percent.min(100));
    if report.used_percent > limit_percent {
        return Err(VaultError::LowSpace {
            path: path.to_string(),
            used_percent: report.used_percent,
            limit_percent,
        });
    }

    Ok(report)
}

/// statvfs the nearest existing ancestor of `path`
pub fn local_space(path: &Path) -> Result<SpaceReport> {
    let probe = path.ancestors().find(|p| p.exists()).unwrap_or(path);
    let stats = statvfs(probe).map_err(|e| VaultError::io_at(probe, e.into()))?;
    let block_size = stats.fragment_size() as u64;
    Ok(SpaceReport::from_blocks(
        stats.blocks() as u64,
        stats.blocks_free() as u64,
        stats.blocks_available() as u64,
        block_size,
    ))
}

/// Parse POSIX `df -Pk` output (1024-byte blocks)
pub fn parse_df(stdout: &str) -> Option<SpaceReport> {
    let line = stdout.lines().skip(1).find(|l| !l.trim().is_empty())?;
    let fields: Vec<&str> = line.split_whitespace().collect();
    // Filesystem names may contain spaces; count from the right
    if fields.len() < 6 {
        return None;
    }
    let n = fields.len();
    let total: u64 = fields[n - 5].parse().ok()?;
    let used: u64 = fields[n - 4].parse().ok()?;
    let available: u64 = fields[n - 3].parse().ok()?;

    Some(SpaceReport {
        total_bytes: total * 1024,
        available_bytes: available * 1024,
        used_percent: used_percent(used, available),
    })
}
