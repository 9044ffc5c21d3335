//! Attended vs unattended execution

use std::io::{BufRead, IsTerminal, Write};

/// Whether a human can answer prompts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    Attended,
    /// cron and other non-interactive runs: every question answers "no"
    Unattended,
}

impl Mode {
    /// `--unattended`, or stdin not being a terminal, selects unattended
    pub fn detect(unattended_flag: bool) -> Self {
        if unattended_flag || !std::io::stdin().is_terminal() {
            Mode::Unattended
        } else {
            Mode::Attended
        }
    }
}

/// Yes/no questions to the operator
pub trait Confirm: Send + Sync {
    fn confirm(&self, question: &str) -> bool;
}

/// Asks on stderr, reads one line from stdin, defaults to "no"
#[derive(Debug, Default, Clone, Copy)]
pub struct StdinConfirm;

impl Confirm for StdinConfirm {
    fn confirm(&self, question: &str) -> bool {
        let mut stderr = std::io::stderr();
        let _ = write!(stderr, "{} [y/N] ", question);
        let _ = stderr.flush();

        let mut answer = String::new();
        if std::io::stdin().lock().read_line(&mut answer).is_err() {
            return false;
        }
        parse_answer(&answer)
    }
}

/// Fixed answer, for tests and scripted runs
#[derive(Debug, Clone, Copy)]
pub struct FixedAnswer(pub bool);

impl Confirm for FixedAnswer {
    fn confirm(&self, _question: &str) -> bool {
        self.0
    }
}

fn parse_answer(answer: &str) -> bool {
    matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes")
}
