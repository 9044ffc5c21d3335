//! Error taxonomy shared by every Homevault component

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Errors raised by the backup engine
#[derive(Error, Debug)]
pub enum VaultError {
    /// Destination cannot be written, even after the remount attempt
    #[error("destination {path} is not writable: {reason}")]
    NotWritable { path: String, reason: String },

    /// Free space is smaller than the bytes the cycle needs
    #[error("insufficient space on {path}: {required} bytes required, {available} available")]
    InsufficientSpace {
        path: String,
        required: u64,
        available: u64,
    },

    /// Used space exceeds the configured threshold (advisory)
    #[error("low space on {path}: {used_percent}% used, limit is {limit_percent}%")]
    LowSpace {
        path: String,
        used_percent: u8,
        limit_percent: u8,
    },

    /// Transfer Service returned a failure status
    #[error("transfer into {destination} failed (exit code {}): {detail}", code_label(.exit_code))]
    TransferFailed {
        destination: String,
        exit_code: Option<i32>,
        detail: String,
    },

    /// Backing dataset could not be mounted
    #[error("dataset {dataset} could not be mounted: {reason}")]
    MountFailed { dataset: String, reason: String },

    /// Every snapshot name candidate collided
    #[error("no free snapshot name for {dataset} after {attempts} attempts")]
    NameExhausted { dataset: String, attempts: u32 },

    /// Remote host did not answer within the probe timeout
    #[error("remote {host} unreachable: {reason}")]
    RemoteUnreachable { host: String, reason: String },

    /// Snapshot backend refused a name that already exists
    #[error("snapshot {dataset}@{name} already exists")]
    SnapshotExists { dataset: String, name: String },

    #[error("`{program}` timed out after {after:?}")]
    CommandTimeout { program: String, after: Duration },

    #[error("`{program}` exited with code {}: {stderr}", code_label(.code))]
    CommandFailed {
        program: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("invalid version identifier '{0}'")]
    InvalidVersion(String),

    #[error("unsupported destination {0}")]
    UnsupportedDestination(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("exclusion pattern error: {0}")]
    Pattern(#[from] ignore::Error),

    #[error("walk error: {0}")]
    Walk(#[from] walkdir::Error),

    #[error("manifest error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("config parse error: {0}")]
    TomlDe(#[from] toml::de::Error),

    #[error("config write error: {0}")]
    TomlSer(#[from] toml::ser::Error),

    #[error("I/O error at {path}: {source}")]
    IoAt {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl VaultError {
    /// Attach a path to an I/O error
    pub fn io_at(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::IoAt {
            path: path.into(),
            source,
        }
    }

    /// Whether the error may be overridden by an attended operator
    pub fn is_overridable(&self) -> bool {
        matches!(self, Self::LowSpace { .. })
    }
}

fn code_label(code: &Option<i32>) -> String {
    match code {
        Some(c) => c.to_string(),
        None => "none".to_string(),
    }
}

/// Result type used throughout the library crates
pub type Result<T> = std::result::Result<T, VaultError>;

/// Extension for tagging `std::io::Result` with the offending path
pub trait IoResultExt<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T>;
}

impl<T> IoResultExt<T> for std::io::Result<T> {
    fn at(self, path: impl Into<PathBuf>) -> Result<T> {
        self.map_err(|e| VaultError::io_at(path, e))
    }
}
