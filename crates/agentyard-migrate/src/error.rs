//! Migration error types and stable outcome codes.

use crate::version::Version;
use std::fmt;
use thiserror::Error;

/// Error returned by a single [`Step`](crate::step::Step) operation.
#[derive(Debug, Error)]
pub enum StepError {
    /// Filesystem error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON encoding or decoding error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// The workspace is not in the state the step expects.
    #[error("{0}")]
    Invalid(String),
}

impl StepError {
    /// Build an [`StepError::Invalid`] from a message.
    pub fn invalid(message: impl Into<String>) -> Self {
        StepError::Invalid(message.into())
    }
}

/// A failed best-effort rollback of one step.
#[derive(Debug, Error)]
#[error("rollback of step {step_id} failed: {source}")]
pub struct RollbackError {
    /// The step whose rollback failed.
    pub step_id: String,
    /// What went wrong.
    #[source]
    pub source: StepError,
}

/// Rollback errors accumulated while unwinding a failed migration.
///
/// Displayed as a suffix of the originating error, empty when nothing failed.
#[derive(Debug, Default)]
pub struct RollbackErrors(pub Vec<RollbackError>);

impl RollbackErrors {
    /// Whether every rollback succeeded.
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Number of failed rollbacks.
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Iterate over the failures.
    pub fn iter(&self) -> impl Iterator<Item = &RollbackError> {
        self.0.iter()
    }
}

impl fmt::Display for RollbackErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.0.is_empty() {
            return Ok(());
        }
        write!(f, " (rollback errors: ")?;
        for (idx, err) in self.0.iter().enumerate() {
            if idx > 0 {
                write!(f, "; ")?;
            }
            write!(f, "{err}")?;
        }
        write!(f, ")")
    }
}

/// Migration engine errors.
///
/// Every variant maps onto one [`OutcomeCode`] so callers can branch on the
/// category without parsing messages.
#[derive(Debug, Error)]
pub enum MigrationError {
    /// The registered migration set is invalid. Detected at registry build time.
    #[error("configuration error: {0}")]
    Configuration(String),

    /// The workspace version matches no migration and is not the latest.
    #[error("unsupported workspace version {current} (latest known version is {latest})")]
    UnsupportedVersion {
        /// Version found in the workspace.
        current: Version,
        /// Latest version the registry can reach.
        latest: Version,
    },

    /// A version or version pattern string could not be parsed.
    #[error("invalid version {input:?}: {reason}")]
    InvalidVersion {
        /// The rejected input.
        input: String,
        /// Why it was rejected.
        reason: &'static str,
    },

    /// Snapshot creation or verification failed. Nothing was mutated.
    #[error("backup failed: {0}")]
    Backup(String),

    /// A step's check failed. Nothing was mutated by this migration.
    #[error("migration {migration_id}: check of step {step_id} failed: {source}")]
    StepCheck {
        /// Migration being checked.
        migration_id: String,
        /// Step whose check failed.
        step_id: String,
        /// Underlying step error.
        #[source]
        source: StepError,
    },

    /// A step's execute failed. The workspace was rolled back and restored.
    #[error("migration {migration_id}: step {step_id} failed: {source}{rollback_errors}")]
    StepExecute {
        /// Migration being executed.
        migration_id: String,
        /// Step whose execute failed.
        step_id: String,
        /// Underlying step error.
        #[source]
        source: StepError,
        /// Rollback failures collected while unwinding.
        rollback_errors: RollbackErrors,
    },

    /// A step's verify failed. The workspace was rolled back and restored.
    #[error("migration {migration_id}: verification of step {step_id} failed: {source}{rollback_errors}")]
    StepVerify {
        /// Migration being verified.
        migration_id: String,
        /// Step whose verify failed.
        step_id: String,
        /// Underlying step error.
        #[source]
        source: StepError,
        /// Rollback failures collected while unwinding.
        rollback_errors: RollbackErrors,
    },

    /// The ledger record could not be written. The workspace was rolled back and restored.
    #[error("migration {migration_id}: commit failed: {message}{rollback_errors}")]
    CommitFailed {
        /// Migration being committed.
        migration_id: String,
        /// Why the ledger append failed.
        message: String,
        /// Rollback failures collected while unwinding.
        rollback_errors: RollbackErrors,
    },

    /// Restoring the backup after a failed migration failed. Unrecoverable.
    #[error(
        "restore after failed migration {migration_id} failed: {restore}; original failure: {original}; \
         workspace integrity cannot be guaranteed, manual intervention required"
    )]
    RestoreFailed {
        /// Migration that failed.
        migration_id: String,
        /// The failure that triggered the restore.
        original: Box<MigrationError>,
        /// The restore failure.
        restore: Box<MigrationError>,
    },

    /// An explicit restore failed.
    #[error("restore from backup {backup_id} failed: {message}")]
    Restore {
        /// Backup being restored.
        backup_id: String,
        /// Description of the failure.
        message: String,
    },

    /// No backup with the given id exists.
    #[error("backup not found: {0}")]
    BackupNotFound(String),

    /// Rollback requested but no backups exist.
    #[error("no backups available")]
    NoBackups,

    /// Another run holds the workspace lock.
    #[error("workspace is locked by another migration run ({holder})")]
    Locked {
        /// Contents of the lock file.
        holder: String,
    },

    /// The workspace changed between planning and execution.
    #[error("workspace changed between planning and execution: {0}")]
    PreStateChanged(String),

    /// The ledger could not be read or is corrupted.
    #[error("ledger error: {0}")]
    Ledger(String),

    /// The registry manifest file could not be read or written.
    #[error("manifest error: {0}")]
    Manifest(String),

    /// IO error.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error.
    #[error("serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

impl MigrationError {
    /// Stable outcome code for this error category.
    pub fn outcome_code(&self) -> OutcomeCode {
        match self {
            MigrationError::Configuration(_) => OutcomeCode::Configuration,
            MigrationError::UnsupportedVersion { .. } | MigrationError::InvalidVersion { .. } => {
                OutcomeCode::UnsupportedVersion
            }
            MigrationError::Backup(_) => OutcomeCode::Backup,
            MigrationError::StepCheck { .. } => OutcomeCode::StepCheck,
            MigrationError::StepExecute { .. } => OutcomeCode::StepExecute,
            MigrationError::StepVerify { .. } => OutcomeCode::StepVerify,
            MigrationError::CommitFailed { .. } | MigrationError::Ledger(_) => OutcomeCode::Ledger,
            MigrationError::RestoreFailed { .. } => OutcomeCode::RestoreFailed,
            MigrationError::Restore { .. }
            | MigrationError::BackupNotFound(_)
            | MigrationError::NoBackups => OutcomeCode::Restore,
            MigrationError::Locked { .. } => OutcomeCode::Locked,
            MigrationError::PreStateChanged(_) => OutcomeCode::PreStateChanged,
            MigrationError::Manifest(_) | MigrationError::Io(_) | MigrationError::Json(_) => {
                OutcomeCode::Other
            }
        }
    }

    /// Whether the workspace may be left in an unverified state.
    pub fn is_unrecoverable(&self) -> bool {
        matches!(self, MigrationError::RestoreFailed { .. })
    }
}

/// Stable process outcome codes for the operation surface.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutcomeCode {
    /// Operation succeeded; for `check`, the workspace is up to date.
    Success,
    /// Unclassified failure (I/O, serialization, manifest).
    Other,
    /// The caller declined the confirmation prompt.
    Declined,
    /// `check` found pending migrations.
    MigrationPending,
    /// Invalid registry.
    Configuration,
    /// Workspace version unsupported.
    UnsupportedVersion,
    /// Backup creation or verification failed.
    Backup,
    /// Step check failed.
    StepCheck,
    /// Step execute failed (workspace restored).
    StepExecute,
    /// Step verify failed (workspace restored).
    StepVerify,
    /// Restore after a failed migration failed.
    RestoreFailed,
    /// Explicit restore failed.
    Restore,
    /// Workspace lock held by another run.
    Locked,
    /// Workspace changed between planning and execution.
    PreStateChanged,
    /// Ledger unreadable or commit failed.
    Ledger,
}

impl OutcomeCode {
    /// Numeric exit code.
    pub fn code(self) -> i32 {
        match self {
            OutcomeCode::Success => 0,
            OutcomeCode::Other => 1,
            OutcomeCode::Declined => 3,
            OutcomeCode::MigrationPending => 10,
            OutcomeCode::Configuration => 20,
            OutcomeCode::UnsupportedVersion => 21,
            OutcomeCode::Backup => 30,
            OutcomeCode::StepCheck => 40,
            OutcomeCode::StepExecute => 41,
            OutcomeCode::StepVerify => 42,
            OutcomeCode::RestoreFailed => 50,
            OutcomeCode::Restore => 51,
            OutcomeCode::Locked => 60,
            OutcomeCode::PreStateChanged => 61,
            OutcomeCode::Ledger => 70,
        }
    }
}

impl fmt::Display for OutcomeCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            OutcomeCode::Success => "success",
            OutcomeCode::Other => "error",
            OutcomeCode::Declined => "declined",
            OutcomeCode::MigrationPending => "migration_pending",
            OutcomeCode::Configuration => "configuration_error",
            OutcomeCode::UnsupportedVersion => "unsupported_version",
            OutcomeCode::Backup => "backup_error",
            OutcomeCode::StepCheck => "step_check_error",
            OutcomeCode::StepExecute => "step_execute_error",
            OutcomeCode::StepVerify => "step_verify_error",
            OutcomeCode::RestoreFailed => "restore_failed_after_failed_migration",
            OutcomeCode::Restore => "restore_error",
            OutcomeCode::Locked => "locked",
            OutcomeCode::PreStateChanged => "pre_state_changed",
            OutcomeCode::Ledger => "ledger_error",
        };
        write!(f, "{name} ({})", self.code())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rollback_errors_display() {
        assert_eq!(RollbackErrors::default().to_string(), "");

        let errors = RollbackErrors(vec![
            RollbackError {
                step_id: "b".to_string(),
                source: StepError::invalid("still busy"),
            },
            RollbackError {
                step_id: "a".to_string(),
                source: StepError::invalid("gone"),
            },
        ]);
        let text = errors.to_string();
        assert!(text.contains("rollback of step b failed: still busy"));
        assert!(text.contains("; rollback of step a failed: gone"));
    }

    #[test]
    fn test_execute_error_keeps_original_message_first() {
        let err = MigrationError::StepExecute {
            migration_id: "v1".to_string(),
            step_id: "write".to_string(),
            source: StepError::invalid("disk full"),
            rollback_errors: RollbackErrors(vec![RollbackError {
                step_id: "mkdir".to_string(),
                source: StepError::invalid("not empty"),
            }]),
        };
        let text = err.to_string();
        assert!(text.starts_with("migration v1: step write failed: disk full"));
        assert!(text.contains("mkdir"));
    }

    #[test]
    fn test_outcome_codes_are_distinct() {
        let codes = [
            OutcomeCode::Success,
            OutcomeCode::Other,
            OutcomeCode::Declined,
            OutcomeCode::MigrationPending,
            OutcomeCode::Configuration,
            OutcomeCode::UnsupportedVersion,
            OutcomeCode::Backup,
            OutcomeCode::StepCheck,
            OutcomeCode::StepExecute,
            OutcomeCode::StepVerify,
            OutcomeCode::RestoreFailed,
            OutcomeCode::Restore,
            OutcomeCode::Locked,
            OutcomeCode::PreStateChanged,
            OutcomeCode::Ledger,
        ];
        let unique: std::collections::HashSet<i32> = codes.iter().map(|c| c.code()).collect();
        assert_eq!(unique.len(), codes.len());
    }

    #[test]
    fn test_error_outcome_mapping() {
        let err = MigrationError::Configuration("dup".to_string());
        assert_eq!(err.outcome_code(), OutcomeCode::Configuration);

        let err = MigrationError::RestoreFailed {
            migration_id: "v1".to_string(),
            original: Box::new(MigrationError::Backup("x".to_string())),
            restore: Box::new(MigrationError::NoBackups),
        };
        assert_eq!(err.outcome_code(), OutcomeCode::RestoreFailed);
        assert!(err.is_unrecoverable());
    }
}
