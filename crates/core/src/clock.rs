//! Injectable time and process-identity sources
//!
//! Components never read the wall clock or the PID directly. Tests swap in
//! [`ManualClock`] and [`FixedPid`] to force collisions deterministically.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use std::time::Duration;

/// Source of wall-clock time plus the ability to wait
pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
    fn sleep(&self, duration: Duration);
}

/// Real system clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    fn sleep(&self, duration: Duration) {
        std::thread::sleep(duration);
    }
}

/// Clock that only moves when told to
///
/// `sleep` advances the clock by the requested duration unless the clock
/// is frozen, in which case time never moves at all.
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
    frozen: bool,
}

impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            frozen: false,
        }
    }

    /// A clock whose `sleep` is a no-op
    pub fn frozen(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
            frozen: true,
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        let mut now = self.now.lock();
        *now += by;
    }

    pub fn set(&self, to: DateTime<Utc>) {
        *self.now.lock() = to;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    fn sleep(&self, duration: Duration) {
        if self.frozen {
            return;
        }
        if let Ok(step) = chrono::Duration::from_std(duration) {
            self.advance(step);
        }
    }
}

/// Source of the disambiguating process identifier
pub trait ProcessId: Send + Sync {
    fn pid(&self) -> u32;
}

/// The running process
#[derive(Debug, Default, Clone, Copy)]
pub struct CurrentProcess;

impl ProcessId for CurrentProcess {
    fn pid(&self) -> u32 {
        std::process::id()
    }
}

/// A constant identifier, for simulating two invocations sharing a PID
#[derive(Debug, Clone, Copy)]
pub struct FixedPid(pub u32);

impl ProcessId for FixedPid {
    fn pid(&self) -> u32 {
        self.0
    }
}
