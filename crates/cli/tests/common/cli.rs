//! CLI command execution helpers with automatic timing
//!
//! Wraps the `hv` binary built for this test run. Every invocation gets an
//! explicit `--config` so the developer's own configuration is never read.

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::process::{Command, Stdio};
use std::time::{Duration, Instant};

/// CLI command builder with timing
pub struct HvCommand {
    config_path: PathBuf,
    args: Vec<String>,
    env: HashMap<String, String>,
}

impl HvCommand {
    pub fn new(config_path: impl AsRef<Path>) -> Self {
        Self {
            config_path: config_path.as_ref().to_path_buf(),
            args: Vec::new(),
            env: HashMap::new(),
        }
    }

    pub fn args(&mut self, args: &[&str]) -> &mut Self {
        self.args.extend(args.iter().map(|s| s.to_string()));
        self
    }

    pub fn env(&mut self, key: &str, value: &str) -> &mut Self {
        self.env.insert(key.to_string(), value.to_string());
        self
    }

    /// Execute command and return result with timing
    pub fn execute(&self) -> Result<CommandResult> {
        let start = Instant::now();

        let output = Command::new(env!("CARGO_BIN_EXE_hv"))
            .arg("--config")
            .arg(&self.config_path)
            .args(&self.args)
            .envs(&self.env)
            .stdin(Stdio::null())
            .output()
            .context("Failed to execute hv")?;

        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
            exit_code: output.status.code().unwrap_or(-1),
            duration: start.elapsed(),
        })
    }

    /// Execute and assert success
    pub fn assert_success(&self) -> Result<CommandResult> {
        let result = self.execute()?;
        if !result.success() {
            anyhow::bail!(
                "Command failed (exit code: {}):\nArgs: {:?}\nStdout: {}\nStderr: {}",
                result.exit_code,
                self.args,
                result.stdout,
                result.stderr
            );
        }
        Ok(result)
    }

    /// Execute and expect failure
    pub fn assert_failure(&self) -> Result<CommandResult> {
        let result = self.execute()?;
        if result.success() {
            anyhow::bail!(
                "Command should have failed but succeeded:\nArgs: {:?}\nStdout: {}",
                self.args,
                result.stdout
            );
        }
        Ok(result)
    }
}

/// Command execution result with timing
#[derive(Debug, Clone)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
    pub duration: Duration,
}

impl CommandResult {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }

    pub fn contains_stdout(&self, text: &str) -> bool {
        self.stdout.contains(text)
    }

    pub fn contains_stderr(&self, text: &str) -> bool {
        self.stderr.contains(text)
    }

    /// Version ids (`YYYY-MM-DD_HH-MM-SS`) mentioned in stdout, in order
    pub fn version_ids(&self) -> Vec<String> {
        self.stdout.lines().filter_map(extract_version_id).collect()
    }
}

/// First version id in a line of text
pub fn extract_version_id(line: &str) -> Option<String> {
    const LEN: usize = "2026-01-01_00-00-00".len();
    let bytes = line.as_bytes();
    (0..bytes.len().saturating_sub(LEN - 1)).find_map(|i| {
        let window = &bytes[i..i + LEN];
        let shape_ok = window.iter().enumerate().all(|(j, b)| match j {
            4 | 7 | 13 | 16 => *b == b'-',
            10 => *b == b'_',
            _ => b.is_ascii_digit(),
        });
        shape_ok.then(|| line[i..i + LEN].to_string())
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_version_id() {
        assert_eq!(
            extract_version_id("* 2026-03-01_02-00-00  complete").as_deref(),
            Some("2026-03-01_02-00-00")
        );
        assert_eq!(extract_version_id("no id here"), None);
        assert_eq!(extract_version_id("2026-03-01 02:00:00"), None);
    }
}
