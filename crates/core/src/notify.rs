//! Notification sinks (fire-and-forget)

use crate::exec;
use std::process::Command;
use std::time::Duration;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Urgency {
    Low,
    Normal,
    Critical,
}

impl Urgency {
    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Low => "low",
            Urgency::Normal => "normal",
            Urgency::Critical => "critical",
        }
    }
}

/// Receives user-facing outcome messages
///
/// Delivery failures are swallowed by the sink; callers never branch on them.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, message: &str, urgency: Urgency);
}

/// Writes notifications into the log
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, message: &str, urgency: Urgency) {
        match urgency {
            Urgency::Critical => error!(title, "{}", message),
            Urgency::Normal => warn!(title, "{}", message),
            Urgency::Low => info!(title, "{}", message),
        }
    }
}

/// Desktop notifications through `notify-send`, mirrored into the log
#[derive(Debug, Clone)]
pub struct DesktopNotifier {
    timeout: Duration,
}

impl DesktopNotifier {
    pub fn new() -> Self {
        Self {
            timeout: Duration::from_secs(5),
        }
    }
}

impl Default for DesktopNotifier {
    fn default() -> Self {
        Self::new()
    }
}

impl Notifier for DesktopNotifier {
    fn notify(&self, title: &str, message: &str, urgency: Urgency) {
        LogNotifier.notify(title, message, urgency);

        let mut cmd = Command::new("notify-send");
        cmd.args(["-u", urgency.as_str(), "-a", "Homevault", title, message]);
        match exec::run(&mut cmd, Some(self.timeout)).and_then(|out| out.check()) {
            Ok(_) => {}
            Err(e) => warn!(error = %e, "Desktop notification not delivered"),
        }
    }
}

/// Sends nothing
#[derive(Debug, Default, Clone, Copy)]
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn notify(&self, _title: &str, _message: &str, _urgency: Urgency) {}
}
