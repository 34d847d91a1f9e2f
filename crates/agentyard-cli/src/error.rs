//! CLI errors.

use agentyard_migrate::{MigrationError, OutcomeCode};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum CliError {
    #[error(transparent)]
    Migration(#[from] MigrationError),

    #[error("failed to encode report: {0}")]
    Json(#[from] serde_json::Error),

    #[error("failed to read confirmation: {0}")]
    Prompt(#[from] std::io::Error),
}

impl CliError {
    /// Process exit code for this error.
    pub fn exit_code(&self) -> i32 {
        match self {
            CliError::Migration(e) => e.outcome_code().code(),
            CliError::Json(_) | CliError::Prompt(_) => OutcomeCode::Other.code(),
        }
    }
}
