//! Subprocess execution with explicit timeouts
//!
//! Unattended runs must never hang on a dead SSH peer or a stuck mount, so
//! every external command goes through [`run`] with a deadline. On expiry
//! the child is killed and [`VaultError::CommandTimeout`] returned.

use crate::error::{Result, VaultError};
use crossbeam_channel::RecvTimeoutError;
use std::process::{Command, Output, Stdio};
use std::time::Duration;
use tracing::{debug, warn};

/// Captured result of a finished command
#[derive(Debug, Clone)]
pub struct CommandOutput {
    pub program: String,
    pub code: Option<i32>,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }

    /// Convert a non-zero exit into [`VaultError::CommandFailed`]
    pub fn check(self) -> Result<Self> {
        if self.success() {
            Ok(self)
        } else {
            Err(VaultError::CommandFailed {
                program: self.program,
                code: self.code,
                stderr: self.stderr.trim().to_string(),
            })
        }
    }

    fn from_output(program: String, output: Output) -> Self {
        Self {
            program,
            code: output.status.code(),
            stdout: String::from_utf8_lossy(&output.stdout).into_owned(),
            stderr: String::from_utf8_lossy(&output.stderr).into_owned(),
        }
    }
}

/// Run a command to completion, killing it if `timeout` elapses first
///
/// `None` waits indefinitely; long transfers rely on their own I/O timeout.
/// Timed commands run in their own process group, so expiry also takes down
/// helpers they spawned (`sudo`, mount helpers) that would hold the pipes open.
pub fn run(command: &mut Command, timeout: Option<Duration>) -> Result<CommandOutput> {
    let program = command.get_program().to_string_lossy().into_owned();
    debug!(program = %program, args = ?command.get_args().collect::<Vec<_>>(), "Running command");

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        if timeout.is_some() {
            command.process_group(0);
        }
    }

    let child = command
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| VaultError::CommandFailed {
            program: program.clone(),
            code: None,
            stderr: e.to_string(),
        })?;

    let Some(timeout) = timeout else {
        let output = child.wait_with_output()?;
        return Ok(CommandOutput::from_output(program, output));
    };

    let pid = child.id();
    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        let _ = tx.send(child.wait_with_output());
    });

    match rx.recv_timeout(timeout) {
        Ok(output) => Ok(CommandOutput::from_output(program, output?)),
        Err(RecvTimeoutError::Timeout) => {
            warn!(program = %program, ?timeout, "Command timed out, killing");
            kill_group(pid);
            // A survivor outside the group keeps the pipes open; the waiter
            // thread is left to finish on its own
            if rx.recv_timeout(KILL_GRACE).is_err() {
                warn!(program = %program, "Command output still open after kill, detaching");
            }
            Err(VaultError::CommandTimeout {
                program,
                after: timeout,
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(VaultError::CommandFailed {
            program,
            code: None,
            stderr: "waiter thread exited without a status".to_string(),
        }),
    }
}

/// Both ends of a finished two-stage pipeline
#[derive(Debug, Clone)]
pub struct PipelineOutput {
    pub producer: CommandOutput,
    pub consumer: CommandOutput,
}

/// Run `producer | consumer`, killing both if `timeout` elapses first
///
/// The consumer joins the producer's process group so one signal stops the
/// whole pipeline. The producer is always reaped, including when the
/// consumer fails to start.
pub fn run_pipeline(
    producer: &mut Command,
    consumer: &mut Command,
    timeout: Option<Duration>,
) -> Result<PipelineOutput> {
    let producer_name = producer.get_program().to_string_lossy().into_owned();
    let consumer_name = consumer.get_program().to_string_lossy().into_owned();
    debug!(producer = %producer_name, consumer = %consumer_name, "Running pipeline");

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        producer.process_group(0);
    }

    let mut producer_child = producer
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .map_err(|e| VaultError::CommandFailed {
            program: producer_name.clone(),
            code: None,
            stderr: e.to_string(),
        })?;
    let pgid = producer_child.id();

    let abandon = |mut child: std::process::Child, reason: String, program: &str| {
        kill_group(pgid);
        let _ = child.wait();
        VaultError::CommandFailed {
            program: program.to_string(),
            code: None,
            stderr: reason,
        }
    };

    let Some(pipe) = producer_child.stdout.take() else {
        return Err(abandon(producer_child, "stdout was not captured".to_string(), &producer_name));
    };

    #[cfg(unix)]
    {
        use std::os::unix::process::CommandExt;
        consumer.process_group(pgid as i32);
    }

    let consumer_child = match consumer
        .stdin(pipe)
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
    {
        Ok(child) => child,
        Err(e) => return Err(abandon(producer_child, e.to_string(), &consumer_name)),
    };

    let (tx, rx) = crossbeam_channel::bounded(1);
    std::thread::spawn(move || {
        // Drain the producer's stderr concurrently with the consumer
        let producer_waiter = std::thread::spawn(move || producer_child.wait_with_output());
        let consumer_output = consumer_child.wait_with_output();
        let producer_output = producer_waiter.join().unwrap_or_else(|_| {
            Err(std::io::Error::new(std::io::ErrorKind::Other, "producer waiter panicked"))
        });
        let _ = tx.send((producer_output, consumer_output));
    });

    let received = match timeout {
        Some(timeout) => rx.recv_timeout(timeout),
        None => rx.recv().map_err(|_| RecvTimeoutError::Disconnected),
    };

    match received {
        Ok((producer_output, consumer_output)) => Ok(PipelineOutput {
            producer: CommandOutput::from_output(producer_name, producer_output?),
            consumer: CommandOutput::from_output(consumer_name, consumer_output?),
        }),
        Err(RecvTimeoutError::Timeout) => {
            let after = timeout.unwrap_or_default();
            warn!(producer = %producer_name, consumer = %consumer_name, ?after, "Pipeline timed out, killing");
            kill_group(pgid);
            if rx.recv_timeout(KILL_GRACE).is_err() {
                warn!(producer = %producer_name, "Pipeline output still open after kill, detaching");
            }
            Err(VaultError::CommandTimeout {
                program: format!("{} | {}", producer_name, consumer_name),
                after,
            })
        }
        Err(RecvTimeoutError::Disconnected) => Err(VaultError::CommandFailed {
            program: producer_name,
            code: None,
            stderr: "pipeline waiter exited without a status".to_string(),
        }),
    }
}

/// How long to wait for a killed command to be reaped
const KILL_GRACE: Duration = Duration::from_secs(1);

#[cfg(unix)]
fn kill_group(pid: u32) {
    use nix::sys::signal::{kill, killpg, Signal};
    use nix::unistd::Pid;

    let pid = Pid::from_raw(pid as i32);
    if let Err(e) = killpg(pid, Signal::SIGKILL) {
        debug!(%pid, error = %e, "Group kill failed, killing leader only");
        if let Err(e) = kill(pid, Signal::SIGKILL) {
            debug!(%pid, error = %e, "Kill after timeout failed (process likely exited)");
        }
    }
}

#[cfg(not(unix))]
fn kill_group(_pid: u32) {}

/// Quote a string for a POSIX shell (used for remote ssh commands)
pub fn shell_quote(value: &str) -> String {
    if !value.is_empty()
        && value
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || "/._-+=:@,".contains(c))
    {
        return value.to_string();
    }
    format!("'{}'", value.replace('\'', "'\\''"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_successful_command_captures_stdout() -> Result<()> {
        let out = run(Command::new("sh").args(["-c", "echo hello"]), Some(Duration::from_secs(5)))?;
        assert!(out.success());
        assert_eq!(out.stdout.trim(), "hello");
        Ok(())
    }

    #[test]
    fn test_failing_command_checks_to_error() -> Result<()> {
        let out = run(Command::new("sh").args(["-c", "echo nope >&2; exit 3"]), Some(Duration::from_secs(5)))?;
        assert_eq!(out.code, Some(3));
        match out.check() {
            Err(VaultError::CommandFailed { code, stderr, .. }) => {
                assert_eq!(code, Some(3));
                assert_eq!(stderr, "nope");
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
        Ok(())
    }

    #[test]
    fn test_timeout_kills_child() {
        let started = std::time::Instant::now();
        let result = run(Command::new("sleep").arg("10"), Some(Duration::from_millis(200)));
        assert!(matches!(result, Err(VaultError::CommandTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_timeout_kills_spawned_helpers() {
        let started = std::time::Instant::now();
        let result = run(
            Command::new("sh").args(["-c", "sleep 6; echo done"]),
            Some(Duration::from_millis(200)),
        );
        assert!(matches!(result, Err(VaultError::CommandTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    }

    #[test]
    fn test_missing_program_is_reported() {
        let result = run(&mut Command::new("hv-no-such-program"), Some(Duration::from_secs(1)));
        assert!(matches!(result, Err(VaultError::CommandFailed { code: None, .. })));
    }

    #[test]
    fn test_pipeline_feeds_consumer() -> Result<()> {
        let out = run_pipeline(
            Command::new("sh").args(["-c", "printf 'abc'; echo warn >&2"]),
            Command::new("wc").arg("-c"),
            Some(Duration::from_secs(5)),
        )?;
        assert!(out.producer.success() && out.consumer.success());
        assert_eq!(out.consumer.stdout.trim(), "3");
        assert_eq!(out.producer.stderr.trim(), "warn");
        Ok(())
    }

    #[test]
    fn test_pipeline_timeout_kills_both_ends() {
        let started = std::time::Instant::now();
        let result = run_pipeline(
            Command::new("sh").args(["-c", "sleep 6; echo late"]),
            Command::new("sh").args(["-c", "cat; sleep 6"]),
            Some(Duration::from_millis(200)),
        );
        assert!(matches!(result, Err(VaultError::CommandTimeout { .. })));
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    }

    #[test]
    fn test_pipeline_reaps_producer_when_consumer_is_missing() {
        let started = std::time::Instant::now();
        let result = run_pipeline(
            Command::new("sleep").arg("6"),
            &mut Command::new("hv-no-such-program"),
            Some(Duration::from_secs(5)),
        );
        match result {
            Err(VaultError::CommandFailed { program, code: None, .. }) => {
                assert_eq!(program, "hv-no-such-program")
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
        assert!(started.elapsed() < Duration::from_secs(3), "took {:?}", started.elapsed());
    }

    #[test]
    fn test_shell_quote() {
        assert_eq!(shell_quote("/srv/backup"), "/srv/backup");
        assert_eq!(shell_quote("my dir"), "'my dir'");
        assert_eq!(shell_quote("it's"), "'it'\\''s'");
        assert_eq!(shell_quote(""), "''");
    }
}
