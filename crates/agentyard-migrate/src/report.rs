//! Reports returned by the orchestrator operations.
//!
//! Every report serializes to JSON for tooling and renders as plain text for
//! people.

use crate::ledger::MigrationRecord;
use crate::registry::Migration;
use crate::state::{StepProgress, TransactionState};
use crate::version::Version;
use serde::Serialize;
use std::fmt;

/// One migration in a chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct MigrationSummary {
    /// Migration id.
    pub id: String,
    /// Source pattern.
    pub from_pattern: String,
    /// Target version.
    pub to_version: Version,
    /// Description.
    pub description: String,
    /// Number of steps.
    pub step_count: usize,
}

impl MigrationSummary {
    /// Summarize a migration.
    pub fn of(migration: &Migration) -> Self {
        Self {
            id: migration.id().to_string(),
            from_pattern: migration.from_pattern().to_string(),
            to_version: migration.to_version(),
            description: migration.description().to_string(),
            step_count: migration.steps().len(),
        }
    }
}

impl fmt::Display for MigrationSummary {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({} -> {}): {} [{} steps]",
            self.id, self.from_pattern, self.to_version, self.description, self.step_count
        )
    }
}

/// Result of `check`.
#[derive(Debug, Clone, Serialize)]
pub struct CheckReport {
    /// Version recorded for the workspace.
    pub current_version: Version,
    /// Version after the pending chain.
    pub target_version: Version,
    /// Migrations that would run, in order.
    pub pending: Vec<MigrationSummary>,
}

impl CheckReport {
    /// Whether any migration is pending.
    pub fn needs_migration(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl fmt::Display for CheckReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if !self.needs_migration() {
            return writeln!(f, "Workspace is up to date ({})", self.current_version);
        }
        writeln!(
            f,
            "Migration needed: {} -> {}",
            self.current_version, self.target_version
        )?;
        for summary in &self.pending {
            writeln!(f, "  {summary}")?;
        }
        Ok(())
    }
}

/// Planned status of one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StepPlanStatus {
    /// Would execute.
    Pending,
    /// Nothing to do.
    Skipped,
    /// Check failed.
    Error,
}

impl fmt::Display for StepPlanStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StepPlanStatus::Pending => write!(f, "pending"),
            StepPlanStatus::Skipped => write!(f, "skipped"),
            StepPlanStatus::Error => write!(f, "error"),
        }
    }
}

/// Planned step.
#[derive(Debug, Clone, Serialize)]
pub struct StepPlan {
    /// Step id.
    pub id: String,
    /// Step description.
    pub description: String,
    /// Planned status.
    pub status: StepPlanStatus,
    /// Check error, for [`StepPlanStatus::Error`].
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

/// Planned migration.
#[derive(Debug, Clone, Serialize)]
pub struct MigrationPlan {
    /// Migration id.
    pub migration_id: String,
    /// Description.
    pub description: String,
    /// Source pattern.
    pub from_pattern: String,
    /// Target version.
    pub to_version: Version,
    /// Steps in execution order.
    pub steps: Vec<StepPlan>,
}

impl MigrationPlan {
    /// Steps that would execute.
    pub fn pending_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == StepPlanStatus::Pending)
            .count()
    }

    /// Whether any check failed.
    pub fn has_errors(&self) -> bool {
        self.steps.iter().any(|s| s.status == StepPlanStatus::Error)
    }
}

/// Result of `dry_run`.
#[derive(Debug, Clone, Serialize)]
pub struct DryRunReport {
    /// Version recorded for the workspace.
    pub current_version: Version,
    /// Version after the chain.
    pub target_version: Version,
    /// One plan per migration in the chain.
    pub plans: Vec<MigrationPlan>,
}

impl fmt::Display for DryRunReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.plans.is_empty() {
            return writeln!(f, "Workspace is up to date ({})", self.current_version);
        }
        writeln!(
            f,
            "Dry run: {} -> {} (no changes made)",
            self.current_version, self.target_version
        )?;
        for (idx, plan) in self.plans.iter().enumerate() {
            writeln!(f)?;
            writeln!(
                f,
                "{} ({} -> {}): {}",
                plan.migration_id, plan.from_pattern, plan.to_version, plan.description
            )?;
            if idx > 0 {
                writeln!(f, "  (checked against the current tree; statuses are provisional)")?;
            }
            for step in &plan.steps {
                write!(
                    f,
                    "  [{:<7}] {:<28} {}",
                    step.status.to_string(),
                    step.id,
                    step.description
                )?;
                if let Some(message) = &step.message {
                    write!(f, ": {message}")?;
                }
                writeln!(f)?;
            }
        }
        Ok(())
    }
}

/// Result of one migration's transaction.
#[derive(Debug, Clone, Serialize)]
pub struct TransactionReport {
    /// Migration id.
    pub migration_id: String,
    /// Version before.
    pub from_version: Version,
    /// Version after.
    pub to_version: Version,
    /// Final state.
    pub state: TransactionState,
    /// Per-step progress.
    pub steps: Vec<StepProgress>,
    /// Total time in milliseconds.
    pub duration_ms: u64,
}

impl TransactionReport {
    /// Number of steps that executed.
    pub fn executed_count(&self) -> usize {
        self.steps
            .iter()
            .filter(|s| s.status == crate::state::StepStatus::Executed)
            .count()
    }
}

/// How `execute` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecuteOutcome {
    /// Nothing to do.
    UpToDate,
    /// The chain committed.
    Migrated,
    /// The caller declined; nothing was touched.
    Declined,
}

/// Result of `execute`.
#[derive(Debug, Clone, Serialize)]
pub struct ExecuteReport {
    /// Version before the run.
    pub from_version: Version,
    /// Version after the run.
    pub to_version: Version,
    /// Backup taken ahead of the chain.
    pub backup_id: Option<String>,
    /// One report per committed migration.
    pub transactions: Vec<TransactionReport>,
    /// How the run ended.
    pub outcome: ExecuteOutcome,
}

impl fmt::Display for ExecuteReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.outcome {
            ExecuteOutcome::UpToDate => {
                return writeln!(f, "Workspace is up to date ({})", self.from_version)
            }
            ExecuteOutcome::Declined => return writeln!(f, "Migration cancelled; nothing changed"),
            ExecuteOutcome::Migrated => {}
        }
        for tx in &self.transactions {
            writeln!(
                f,
                "{}: {} ({} of {} steps executed, {} ms)",
                tx.migration_id,
                tx.state,
                tx.executed_count(),
                tx.steps.len(),
                tx.duration_ms
            )?;
        }
        writeln!(f, "Workspace migrated: {} -> {}", self.from_version, self.to_version)?;
        if let Some(backup_id) = &self.backup_id {
            writeln!(f, "Backup: {backup_id}")?;
        }
        Ok(())
    }
}

/// Result of `rollback`.
#[derive(Debug, Clone, Serialize)]
pub struct RollbackReport {
    /// Restored backup.
    pub backup_id: String,
    /// Files restored.
    pub files_restored: usize,
    /// Workspace version after the restore.
    pub version: Version,
}

impl fmt::Display for RollbackReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(
            f,
            "Restored backup {} ({} files); workspace version is {}",
            self.backup_id, self.files_restored, self.version
        )
    }
}

/// Result of `status`.
#[derive(Debug, Clone, Serialize)]
pub struct StatusReport {
    /// Version recorded for the workspace.
    pub current_version: Version,
    /// Latest registered version.
    pub latest_version: Option<Version>,
    /// Most recent ledger record.
    pub last_record: Option<MigrationRecord>,
    /// Pending migration ids.
    pub pending: Vec<String>,
    /// Why no chain could be resolved.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub chain_error: Option<String>,
    /// Number of backups on disk.
    pub backup_count: usize,
    /// Most recent backup id.
    pub latest_backup: Option<String>,
    /// Registry manifest drift.
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub manifest_drift: Vec<String>,
}

impl StatusReport {
    /// Whether migrations are pending.
    pub fn needs_migration(&self) -> bool {
        !self.pending.is_empty()
    }
}

impl fmt::Display for StatusReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Workspace version: {}", self.current_version)?;
        if let Some(latest) = &self.latest_version {
            writeln!(f, "Latest version:    {latest}")?;
        }
        match &self.last_record {
            Some(record) => writeln!(
                f,
                "Last migration:    {} ({}, {})",
                record.migration_id,
                record.outcome,
                record.applied_at.format("%Y-%m-%d %H:%M:%S UTC")
            )?,
            None => writeln!(f, "Last migration:    none")?,
        }
        if let Some(error) = &self.chain_error {
            writeln!(f, "Pending:           unknown ({error})")?;
        } else if self.pending.is_empty() {
            writeln!(f, "Pending:           none")?;
        } else {
            writeln!(f, "Pending:           {}", self.pending.join(", "))?;
        }
        write!(f, "Backups:           {}", self.backup_count)?;
        if let Some(latest) = &self.latest_backup {
            write!(f, " (latest {latest})")?;
        }
        writeln!(f)?;
        for drift in &self.manifest_drift {
            writeln!(f, "Warning: {drift}")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_check_report_display() {
        let report = CheckReport {
            current_version: Version::new(0, 1, 3),
            target_version: Version::new(0, 2, 0),
            pending: vec![MigrationSummary {
                id: "v0_1_to_v0_2".to_string(),
                from_pattern: "0.1.x".to_string(),
                to_version: Version::new(0, 2, 0),
                description: "Move config".to_string(),
                step_count: 8,
            }],
        };
        let text = report.to_string();
        assert!(text.contains("0.1.3 -> 0.2.0"));
        assert!(text.contains("v0_1_to_v0_2 (0.1.x -> 0.2.0): Move config [8 steps]"));

        let json = serde_json::to_value(&report).unwrap();
        assert_eq!(json["current_version"], "0.1.3");
        assert_eq!(json["pending"][0]["step_count"], 8);
    }

    #[test]
    fn test_dry_run_display_marks_statuses() {
        let report = DryRunReport {
            current_version: Version::new(0, 1, 0),
            target_version: Version::new(0, 2, 0),
            plans: vec![MigrationPlan {
                migration_id: "a".to_string(),
                description: "first".to_string(),
                from_pattern: "0.1.x".to_string(),
                to_version: Version::new(0, 2, 0),
                steps: vec![
                    StepPlan {
                        id: "mkdir".to_string(),
                        description: "make dir".to_string(),
                        status: StepPlanStatus::Pending,
                        message: None,
                    },
                    StepPlan {
                        id: "write".to_string(),
                        description: "write file".to_string(),
                        status: StepPlanStatus::Error,
                        message: Some("permission denied".to_string()),
                    },
                ],
            }],
        };
        let text = report.to_string();
        assert!(text.contains("[pending] mkdir"));
        assert!(text.contains("[error  ] write"));
        assert!(text.contains("permission denied"));
        assert_eq!(report.plans[0].pending_count(), 1);
        assert!(report.plans[0].has_errors());
    }
}
