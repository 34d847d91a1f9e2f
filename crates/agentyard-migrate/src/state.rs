//! Transaction and step state tracking.

use serde::Serialize;
use std::time::Instant;

/// State of one migration's transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TransactionState {
    /// Not started.
    Pending,
    /// Running step checks.
    Checking,
    /// Executing needed steps.
    Executing,
    /// Verifying every step.
    Verifying,
    /// Recorded in the ledger.
    Committed,
    /// Failed and restored to the pre-migration state.
    RolledBack,
    /// Failed and the restore failed too.
    Failed,
}

impl TransactionState {
    /// Whether the transaction has finished.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TransactionState::Committed | TransactionState::RolledBack | TransactionState::Failed
        )
    }
}

impl std::fmt::Display for TransactionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TransactionState::Pending => write!(f, "pending"),
            TransactionState::Checking => write!(f, "checking"),
            TransactionState::Executing => write!(f, "executing"),
            TransactionState::Verifying => write!(f, "verifying"),
            TransactionState::Committed => write!(f, "committed"),
            TransactionState::RolledBack => write!(f, "rolled_back"),
            TransactionState::Failed => write!(f, "failed"),
        }
    }
}

/// Status of a single step within a transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    /// Needed, not yet executed.
    Pending,
    /// Check reported nothing to do.
    Skipped,
    /// Executed successfully.
    Executed,
    /// Executed, then undone.
    RolledBack,
    /// Execute, verify or rollback failed.
    Failed,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StepStatus::Pending => write!(f, "pending"),
            StepStatus::Skipped => write!(f, "skipped"),
            StepStatus::Executed => write!(f, "executed"),
            StepStatus::RolledBack => write!(f, "rolled_back"),
            StepStatus::Failed => write!(f, "failed"),
        }
    }
}

/// Progress of a single step.
#[derive(Debug, Clone, Serialize)]
pub struct StepProgress {
    /// Step id.
    pub step_id: String,
    /// Step description.
    pub description: String,
    /// Current status.
    pub status: StepStatus,
    /// Time spent executing, in milliseconds.
    pub duration_ms: Option<u64>,
    /// Error message if the step failed.
    pub error: Option<String>,
    #[serde(skip)]
    started: Option<Instant>,
}

impl StepProgress {
    /// Create a pending entry.
    pub fn new(step_id: impl Into<String>, description: impl Into<String>) -> Self {
        Self {
            step_id: step_id.into(),
            description: description.into(),
            status: StepStatus::Pending,
            duration_ms: None,
            error: None,
            started: None,
        }
    }

    /// Mark the step as started.
    pub fn start(&mut self) {
        self.started = Some(Instant::now());
    }

    /// Mark the step as executed.
    pub fn complete(&mut self) {
        self.status = StepStatus::Executed;
        self.stop_clock();
    }

    /// Mark the step as skipped.
    pub fn skip(&mut self) {
        self.status = StepStatus::Skipped;
    }

    /// Mark the step as failed.
    pub fn fail(&mut self, error: impl Into<String>) {
        self.status = StepStatus::Failed;
        self.error = Some(error.into());
        self.stop_clock();
    }

    /// Mark the step as rolled back. A failed step keeps its status.
    pub fn roll_back(&mut self) {
        if self.status != StepStatus::Failed {
            self.status = StepStatus::RolledBack;
        }
    }

    fn stop_clock(&mut self) {
        if let Some(started) = self.started.take() {
            self.duration_ms = Some(u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_step_progress_transitions() {
        let mut progress = StepProgress::new("create-dir", "Create a directory");
        assert_eq!(progress.status, StepStatus::Pending);

        progress.start();
        progress.complete();
        assert_eq!(progress.status, StepStatus::Executed);
        assert!(progress.duration_ms.is_some());

        progress.roll_back();
        assert_eq!(progress.status, StepStatus::RolledBack);
    }

    #[test]
    fn test_failed_step_keeps_status_on_rollback() {
        let mut progress = StepProgress::new("write", "Write a file");
        progress.start();
        progress.fail("disk full");
        progress.roll_back();
        assert_eq!(progress.status, StepStatus::Failed);
        assert_eq!(progress.error.as_deref(), Some("disk full"));
    }

    #[test]
    fn test_display() {
        assert_eq!(TransactionState::RolledBack.to_string(), "rolled_back");
        assert_eq!(StepStatus::Skipped.to_string(), "skipped");
        assert!(TransactionState::Committed.is_terminal());
        assert!(!TransactionState::Verifying.is_terminal());
    }
}
