//! Interactive confirmation.

use agentyard_migrate::{CheckReport, Confirm};
use std::io::{self, BufRead, Write};

/// Asks on stderr and reads `y`/`yes` from stdin. Anything else declines.
pub struct TerminalPrompt<R> {
    input: R,
    error: Option<io::Error>,
}

impl TerminalPrompt<io::StdinLock<'static>> {
    pub fn stdin() -> Self {
        Self::new(io::stdin().lock())
    }
}

impl<R: BufRead> TerminalPrompt<R> {
    pub fn new(input: R) -> Self {
        Self { input, error: None }
    }

    /// The I/O error that made the last prompt decline, if any.
    pub fn take_error(&mut self) -> Option<io::Error> {
        self.error.take()
    }

    fn ask(&mut self, plan: &CheckReport) -> io::Result<bool> {
        let mut stderr = io::stderr().lock();
        write!(stderr, "{plan}")?;
        write!(stderr, "Proceed with migration? [y/N] ")?;
        stderr.flush()?;

        let mut answer = String::new();
        self.input.read_line(&mut answer)?;
        Ok(matches!(answer.trim().to_ascii_lowercase().as_str(), "y" | "yes"))
    }
}

impl<R: BufRead> Confirm for TerminalPrompt<R> {
    fn confirm(&mut self, plan: &CheckReport) -> bool {
        match self.ask(plan) {
            Ok(answer) => answer,
            Err(e) => {
                self.error = Some(e);
                false
            }
        }
    }
}
