//! Transaction runner: applies one migration with automatic recovery.
//!
//! ```text
//! Pending -> Checking -> Executing -> Verifying -> Committed
//!                |            |            |
//!                |            +------------+--> rollback executed steps
//!                |                              (reverse order, best effort)
//!                |                              then restore the backup
//!                |                              and record it in the ledger
//!                |                                ok   -> RolledBack
//!                |                                fail -> Failed
//!                +--> check error: abort, nothing mutated
//! ```
//!
//! The backup restore is authoritative. Step rollbacks run first so steps can
//! release what they hold, but the workspace is considered recovered only once
//! the restore succeeds.

use crate::backup::{Backup, BackupManager};
use crate::context::MigrationContext;
use crate::error::{MigrationError, RollbackError, RollbackErrors};
use crate::ledger::{Ledger, MigrationRecord, RecordOutcome};
use crate::registry::Migration;
use crate::report::{MigrationPlan, StepPlan, StepPlanStatus, TransactionReport};
use crate::state::{StepProgress, TransactionState};
use crate::version::Version;
use std::time::Instant;

/// Runs migrations against a workspace, one transaction at a time.
#[derive(Debug, Clone, Copy)]
pub struct TransactionRunner<'a> {
    backups: &'a BackupManager,
    ledger: &'a Ledger,
}

struct Transaction<'m> {
    migration: &'m Migration,
    from_version: Version,
    state: TransactionState,
    progress: Vec<StepProgress>,
    executed: Vec<usize>,
    started: Instant,
}

impl<'m> Transaction<'m> {
    fn new(migration: &'m Migration, from_version: Version) -> Self {
        Self {
            migration,
            from_version,
            state: TransactionState::Pending,
            progress: migration
                .steps()
                .iter()
                .map(|step| StepProgress::new(step.id(), step.description()))
                .collect(),
            executed: Vec::new(),
            started: Instant::now(),
        }
    }

    fn transition(&mut self, state: TransactionState) {
        tracing::debug!(
            migration = %self.migration.id(),
            from = %self.state,
            to = %state,
            "Transaction state change"
        );
        self.state = state;
    }

    fn into_report(self) -> TransactionReport {
        TransactionReport {
            migration_id: self.migration.id().to_string(),
            from_version: self.from_version,
            to_version: self.migration.to_version(),
            state: self.state,
            steps: self.progress,
            duration_ms: u64::try_from(self.started.elapsed().as_millis()).unwrap_or(u64::MAX),
        }
    }
}

impl<'a> TransactionRunner<'a> {
    /// Create a runner restoring from `backups` and committing to `ledger`.
    pub fn new(backups: &'a BackupManager, ledger: &'a Ledger) -> Self {
        Self { backups, ledger }
    }

    /// Check every step without mutating anything.
    pub fn plan(&self, migration: &Migration, ctx: &mut MigrationContext) -> MigrationPlan {
        ctx.set_migration(migration.id());
        let steps = migration
            .steps()
            .iter()
            .map(|step| {
                let (status, message) = match step.check(ctx) {
                    Ok(true) => (StepPlanStatus::Pending, None),
                    Ok(false) => (StepPlanStatus::Skipped, None),
                    Err(e) => (StepPlanStatus::Error, Some(e.to_string())),
                };
                StepPlan {
                    id: step.id().to_string(),
                    description: step.description().to_string(),
                    status,
                    message,
                }
            })
            .collect();

        MigrationPlan {
            migration_id: migration.id().to_string(),
            description: migration.description().to_string(),
            from_pattern: migration.from_pattern().to_string(),
            to_version: migration.to_version(),
            steps,
        }
    }

    /// Apply `migration` to a workspace at `from_version`.
    ///
    /// On an execute, verify or commit failure the executed steps are rolled
    /// back and `backup` is restored before the error is returned.
    pub fn run(
        &self,
        migration: &Migration,
        from_version: Version,
        ctx: &mut MigrationContext,
        backup: &Backup,
    ) -> Result<TransactionReport, MigrationError> {
        ctx.set_migration(migration.id());
        let mut tx = Transaction::new(migration, from_version);
        tracing::info!(
            migration = %migration.id(),
            from = %from_version,
            to = %migration.to_version(),
            steps = migration.steps().len(),
            "Starting migration"
        );

        tx.transition(TransactionState::Checking);
        let mut needed = Vec::new();
        for (idx, step) in migration.steps().iter().enumerate() {
            match step.check(ctx) {
                Ok(true) => needed.push(idx),
                Ok(false) => {
                    tracing::debug!(migration = %migration.id(), step = %step.id(), "Step already satisfied");
                    tx.progress[idx].skip();
                }
                Err(source) => {
                    tx.transition(TransactionState::Failed);
                    return Err(MigrationError::StepCheck {
                        migration_id: migration.id().to_string(),
                        step_id: step.id().to_string(),
                        source,
                    });
                }
            }
        }

        if needed.is_empty() {
            tracing::info!(migration = %migration.id(), "All steps already satisfied");
            self.commit(&mut tx, ctx, backup, RecordOutcome::AlreadySatisfied)?;
            return Ok(tx.into_report());
        }

        tx.transition(TransactionState::Executing);
        for idx in needed {
            let step = &migration.steps()[idx];
            ctx.log(format!("executing {}: {}", step.id(), step.description()));
            tx.progress[idx].start();
            match step.execute(ctx) {
                Ok(()) => {
                    tx.progress[idx].complete();
                    tx.executed.push(idx);
                }
                Err(source) => {
                    tx.progress[idx].fail(source.to_string());
                    tracing::error!(migration = %migration.id(), step = %step.id(), error = %source, "Step failed");
                    let step_id = step.id().to_string();
                    return Err(self.abort(&mut tx, ctx, backup, |rollback_errors| {
                        MigrationError::StepExecute {
                            migration_id: migration.id().to_string(),
                            step_id,
                            source,
                            rollback_errors,
                        }
                    }));
                }
            }
        }

        tx.transition(TransactionState::Verifying);
        for (idx, step) in migration.steps().iter().enumerate() {
            if let Err(source) = step.verify(ctx) {
                tx.progress[idx].fail(source.to_string());
                tracing::error!(migration = %migration.id(), step = %step.id(), error = %source, "Verification failed");
                let step_id = step.id().to_string();
                return Err(self.abort(&mut tx, ctx, backup, |rollback_errors| {
                    MigrationError::StepVerify {
                        migration_id: migration.id().to_string(),
                        step_id,
                        source,
                        rollback_errors,
                    }
                }));
            }
        }

        self.commit(&mut tx, ctx, backup, RecordOutcome::Applied)?;
        Ok(tx.into_report())
    }

    fn commit(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &mut MigrationContext,
        backup: &Backup,
        outcome: RecordOutcome,
    ) -> Result<(), MigrationError> {
        let record = MigrationRecord::now(
            tx.migration.id(),
            tx.from_version,
            tx.migration.to_version(),
            outcome,
        );
        if let Err(e) = self.ledger.append(&record) {
            let migration_id = tx.migration.id().to_string();
            let message = e.to_string();
            return Err(self.abort(tx, ctx, backup, |rollback_errors| {
                MigrationError::CommitFailed {
                    migration_id,
                    message,
                    rollback_errors,
                }
            }));
        }

        tx.transition(TransactionState::Committed);
        tracing::info!(
            migration = %tx.migration.id(),
            version = %tx.migration.to_version(),
            outcome = %outcome,
            "Migration committed"
        );
        Ok(())
    }

    /// Roll back executed steps in reverse, then restore the backup.
    fn abort(
        &self,
        tx: &mut Transaction<'_>,
        ctx: &mut MigrationContext,
        backup: &Backup,
        failure: impl FnOnce(RollbackErrors) -> MigrationError,
    ) -> MigrationError {
        let mut errors = Vec::new();
        for &idx in tx.executed.iter().rev() {
            let step = &tx.migration.steps()[idx];
            match step.rollback(ctx) {
                Ok(()) => tx.progress[idx].roll_back(),
                Err(source) => {
                    tracing::warn!(
                        migration = %tx.migration.id(),
                        step = %step.id(),
                        error = %source,
                        "Step rollback failed"
                    );
                    errors.push(RollbackError {
                        step_id: step.id().to_string(),
                        source,
                    });
                }
            }
        }
        let original = failure(RollbackErrors(errors));

        let restored = self.backups.restore(backup).and_then(|()| {
            self.ledger
                .record_restore(backup, backup.manifest.from_version)
                .map(|_| ())
        });
        match restored {
            Ok(()) => {
                tx.transition(TransactionState::RolledBack);
                tracing::warn!(
                    migration = %tx.migration.id(),
                    backup_id = %backup.id,
                    "Migration rolled back, workspace restored"
                );
                original
            }
            Err(restore) => {
                tx.transition(TransactionState::Failed);
                tracing::error!(
                    migration = %tx.migration.id(),
                    backup_id = %backup.id,
                    error = %restore,
                    "Restore after failed migration failed"
                );
                MigrationError::RestoreFailed {
                    migration_id: tx.migration.id().to_string(),
                    original: Box::new(original),
                    restore: Box::new(restore),
                }
            }
        }
    }
}
