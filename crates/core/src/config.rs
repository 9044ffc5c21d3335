//! System configuration
//!
//! Loaded once by the CLI from `config.toml` and handed to each component
//! as an explicit value. Nothing reads configuration from global state.

use crate::destination::RemoteTarget;
use crate::error::{IoResultExt, Result, VaultError};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Environment variable overriding the config file location
pub const CONFIG_ENV: &str = "HOMEVAULT_CONFIG";

const APP_DIR: &str = "homevault";

/// Which Transfer Service implementation drives version creation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferEngine {
    Rsync,
    Native,
}

impl std::str::FromStr for TransferEngine {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rsync" => Ok(Self::Rsync),
            "native" => Ok(Self::Native),
            other => Err(VaultError::Config(format!(
                "unknown engine '{}': expected 'rsync' or 'native'",
                other
            ))),
        }
    }
}

impl std::fmt::Display for TransferEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Rsync => "rsync",
            Self::Native => "native",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SystemConfig {
    /// Tree being protected (defaults to the home directory)
    #[serde(default = "default_source")]
    pub source: PathBuf,
    #[serde(default)]
    pub backup: BackupConfig,
    #[serde(default)]
    pub retention: RetentionConfig,
    #[serde(default)]
    pub remote: RemoteConfig,
    #[serde(default)]
    pub zfs: ZfsConfig,
    #[serde(default)]
    pub notifications: NotificationConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Local directory holding the version tree
    #[serde(default = "default_destination")]
    pub destination: PathBuf,
    #[serde(default = "default_engine")]
    pub engine: TransferEngine,
    /// Compare content instead of size/mtime when linking
    #[serde(default)]
    pub checksum: bool,
    /// 0 = unlimited
    #[serde(default)]
    pub bandwidth_limit_kbs: u32,
    #[serde(default = "default_min_free_percent")]
    pub min_free_percent: u8,
    /// Transfer I/O timeout
    #[serde(default = "default_io_timeout")]
    pub io_timeout_secs: u64,
    #[serde(default = "default_excludes")]
    pub exclude: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetentionConfig {
    /// Version age limit in days (0 = never prune)
    #[serde(default = "default_retention_days")]
    pub days: u32,
    /// Snapshot age limit in days (0 = never prune)
    #[serde(default = "default_retention_days")]
    pub snapshot_days: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteConfig {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub host: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user: Option<String>,
    #[serde(default = "default_ssh_port")]
    pub port: u16,
    /// Remote directory holding the mirrored "current" copy
    #[serde(default)]
    pub path: PathBuf,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ZfsConfig {
    /// Dataset backing the destination; snapshots disabled when unset
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub dataset: Option<String>,
    #[serde(default = "default_snapshot_prefix")]
    pub snapshot_prefix: String,
    /// `[user@]host:pool/dataset` receiving replicated snapshots
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub replicate_to: Option<String>,
    #[serde(default)]
    pub sudo: bool,
    #[serde(default = "default_zfs_timeout")]
    pub command_timeout_secs: u64,
    /// Upper bound on one `zfs send | ssh zfs receive` run
    #[serde(default = "default_replication_timeout")]
    pub replication_timeout_secs: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationConfig {
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Use notify-send in addition to the log
    #[serde(default = "default_true")]
    pub desktop: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingConfig {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub directory: Option<PathBuf>,
    #[serde(default = "default_log_level")]
    pub level: String,
}

fn default_source() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("/home"))
}

fn default_destination() -> PathBuf {
    PathBuf::from("/mnt/backup/homevault")
}

fn default_engine() -> TransferEngine {
    TransferEngine::Rsync
}

fn default_min_free_percent() -> u8 {
    10
}

fn default_io_timeout() -> u64 {
    600
}

fn default_excludes() -> Vec<String> {
    vec![
        ".cache/".to_string(),
        ".local/share/Trash/".to_string(),
        "*.tmp".to_string(),
        "*.swp".to_string(),
    ]
}

/// Upper bound for `retention.days` and `retention.snapshot_days`
pub const MAX_RETENTION_DAYS: u32 = 36_500;

fn default_retention_days() -> u32 {
    30
}

fn default_ssh_port() -> u16 {
    22
}

fn default_connect_timeout() -> u64 {
    10
}

fn default_snapshot_prefix() -> String {
    "homevault".to_string()
}

fn default_zfs_timeout() -> u64 {
    60
}

fn default_replication_timeout() -> u64 {
    6 * 60 * 60
}

fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for SystemConfig {
    fn default() -> Self {
        Self {
            source: default_source(),
            backup: BackupConfig::default(),
            retention: RetentionConfig::default(),
            remote: RemoteConfig::default(),
            zfs: ZfsConfig::default(),
            notifications: NotificationConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for BackupConfig {
    fn default() -> Self {
        Self {
            destination: default_destination(),
            engine: default_engine(),
            checksum: false,
            bandwidth_limit_kbs: 0,
            min_free_percent: default_min_free_percent(),
            io_timeout_secs: default_io_timeout(),
            exclude: default_excludes(),
        }
    }
}

impl Default for RetentionConfig {
    fn default() -> Self {
        Self {
            days: default_retention_days(),
            snapshot_days: default_retention_days(),
        }
    }
}

impl Default for RemoteConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            host: String::new(),
            user: None,
            port: default_ssh_port(),
            path: PathBuf::new(),
            connect_timeout_secs: default_connect_timeout(),
        }
    }
}

impl Default for ZfsConfig {
    fn default() -> Self {
        Self {
            dataset: None,
            snapshot_prefix: default_snapshot_prefix(),
            replicate_to: None,
            sudo: false,
            command_timeout_secs: default_zfs_timeout(),
            replication_timeout_secs: default_replication_timeout(),
        }
    }
}

impl Default for NotificationConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            desktop: true,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            directory: None,
            level: default_log_level(),
        }
    }
}

impl SystemConfig {
    /// Load from the default location, falling back to defaults
    pub fn load() -> Result<Self> {
        let path = config_file_path()?;
        Self::load_from(&path)
    }

    /// Load from an explicit file, falling back to defaults when absent
    pub fn load_from(path: &Path) -> Result<Self> {
        if !path.exists() {
            debug!(path = %path.display(), "Config file not found, using defaults");
            return Ok(Self::default());
        }
        let text = std::fs::read_to_string(path).at(path)?;
        let config: SystemConfig = toml::from_str(&text)?;
        config.validate()?;
        debug!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Validate then write to `path`, creating parent directories
    pub fn save_to(&self, path: &Path) -> Result<()> {
        self.validate()?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).at(parent)?;
        }
        let text = toml::to_string_pretty(self)?;
        crate::fsutil::atomic_write(path, text.as_bytes())
    }

    /// Check value ranges
    pub fn validate(&self) -> Result<()> {
        if self.backup.min_free_percent > 99 {
            return Err(VaultError::Config(format!(
                "backup.min_free_percent must be 0-99, got {}",
                self.backup.min_free_percent
            )));
        }
        if self.backup.destination.as_os_str().is_empty() {
            return Err(VaultError::Config("backup.destination must be set".into()));
        }
        if self.backup.io_timeout_secs == 0 {
            return Err(VaultError::Config("backup.io_timeout_secs must be positive".into()));
        }
        for (key, days) in [
            ("retention.days", self.retention.days),
            ("retention.snapshot_days", self.retention.snapshot_days),
        ] {
            if days > MAX_RETENTION_DAYS {
                return Err(VaultError::Config(format!(
                    "{} must be 0-{}, got {}",
                    key, MAX_RETENTION_DAYS, days
                )));
            }
        }
        if self.remote.enabled {
            if self.remote.host.trim().is_empty() {
                return Err(VaultError::Config("remote.host must be set when remote is enabled".into()));
            }
            if self.remote.path.as_os_str().is_empty() {
                return Err(VaultError::Config("remote.path must be set when remote is enabled".into()));
            }
            if self.remote.port == 0 {
                return Err(VaultError::Config("remote.port must be non-zero".into()));
            }
        }
        if self.remote.connect_timeout_secs == 0 || self.remote.connect_timeout_secs > 300 {
            return Err(VaultError::Config("remote.connect_timeout_secs must be 1-300".into()));
        }
        let prefix = &self.zfs.snapshot_prefix;
        if prefix.is_empty()
            || !prefix
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.')
        {
            return Err(VaultError::Config(format!(
                "zfs.snapshot_prefix '{}' may only contain letters, digits, '-', '_', '.'",
                prefix
            )));
        }
        if self.zfs.command_timeout_secs == 0 {
            return Err(VaultError::Config("zfs.command_timeout_secs must be positive".into()));
        }
        if self.zfs.replication_timeout_secs == 0 {
            return Err(VaultError::Config("zfs.replication_timeout_secs must be positive".into()));
        }
        Ok(())
    }

    /// Remote target when the remote mirror is enabled
    pub fn remote_target(&self) -> Option<RemoteTarget> {
        if !self.remote.enabled {
            return None;
        }
        Some(RemoteTarget {
            host: self.remote.host.clone(),
            user: self.remote.user.clone(),
            port: self.remote.port,
            path: self.remote.path.clone(),
            connect_timeout: Duration::from_secs(self.remote.connect_timeout_secs),
        })
    }

    pub fn log_dir(&self) -> PathBuf {
        self.logging.directory.clone().unwrap_or_else(default_log_dir)
    }

    /// Homevault's own directories, which are never backed up
    pub fn self_paths(&self, config_file: &Path) -> Vec<PathBuf> {
        let mut paths = Vec::new();
        if let Some(dir) = config_file.parent() {
            paths.push(dir.to_path_buf());
        }
        paths.push(self.log_dir());
        paths.push(self.backup.destination.clone());
        paths
    }
}

/// Path of the config file (`$HOMEVAULT_CONFIG` wins)
pub fn config_file_path() -> Result<PathBuf> {
    if let Some(path) = std::env::var_os(CONFIG_ENV) {
        return Ok(PathBuf::from(path));
    }
    dirs::config_dir()
        .map(|d| d.join(APP_DIR).join("config.toml"))
        .ok_or_else(|| VaultError::Config("could not determine config directory".into()))
}

fn default_log_dir() -> PathBuf {
    dirs::state_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join(".local/state")))
        .unwrap_or_else(|| PathBuf::from("/tmp"))
        .join(APP_DIR)
        .join("logs")
}

/// Write a default config file if none exists yet
pub fn init_if_missing(path: &Path) -> Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    SystemConfig::default().save_to(path)?;
    Ok(true)
}

/// Annotated example configuration
pub fn example_config() -> &'static str {
    r#"# Homevault configuration
source = "/home/alice"

[backup]
destination = "/mnt/backup/homevault"
engine = "rsync"            # or "native"
checksum = false            # compare content instead of size+mtime
bandwidth_limit_kbs = 0     # 0 = unlimited
min_free_percent = 10
io_timeout_secs = 600
exclude = [".cache/", ".local/share/Trash/", "*.tmp", "*.swp"]

[retention]
days = 30                   # 0 disables version pruning
snapshot_days = 30          # 0 disables snapshot pruning

[remote]
enabled = false
host = "nas.local"
user = "backup"
port = 22
path = "/srv/homevault/current"
connect_timeout_secs = 10

[zfs]
dataset = "tank/backup"
snapshot_prefix = "homevault"
# replicate_to = "backup@offsite:pool/homevault"
sudo = false
command_timeout_secs = 60
replication_timeout_secs = 21600

[notifications]
enabled = true
desktop = true

[logging]
level = "info"
"#
}
