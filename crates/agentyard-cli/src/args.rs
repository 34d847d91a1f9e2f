//! Command-line arguments.

use agentyard_migrate::{MigrationError, MigratorConfig, Version};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use std::time::Duration;

/// Agentyard workspace tool
#[derive(Parser, Debug)]
#[command(name = "yard")]
#[command(version, about = "Agentyard workspace tool")]
pub struct Args {
    /// Workspace root
    #[arg(short = 'w', long, env = "YARD_WORKSPACE", default_value = ".")]
    pub workspace: PathBuf,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Upgrade the workspace layout to the latest version
    Migrate(MigrateArgs),
}

/// Options for `yard migrate`.
///
/// With no mode flag the pending chain is executed after confirmation.
#[derive(ClapArgs, Debug, Default)]
pub struct MigrateArgs {
    /// Report whether migration is needed (exit code 10 if it is)
    #[arg(long, conflicts_with_all = ["dry_run", "execute", "rollback", "status"])]
    pub check: bool,

    /// Check every step without touching the workspace
    #[arg(long, conflicts_with_all = ["execute", "rollback", "status"])]
    pub dry_run: bool,

    /// Apply the pending chain
    #[arg(long, conflicts_with_all = ["rollback", "status"])]
    pub execute: bool,

    /// Skip the confirmation prompt
    #[arg(short = 'f', long)]
    pub force: bool,

    /// Restore a backup (the most recent one if no id is given)
    #[arg(long, value_name = "BACKUP_ID", num_args = 0..=1, conflicts_with = "status")]
    pub rollback: Option<Option<String>>,

    /// Show version, ledger and backup status
    #[arg(long)]
    pub status: bool,

    /// Print reports as JSON
    #[arg(long)]
    pub json: bool,

    /// Directory for backups (defaults to <workspace>/.yard-migrate/backups)
    #[arg(long, env = "YARD_BACKUP_ROOT")]
    pub backup_root: Option<PathBuf>,

    /// Version assumed when the ledger is empty
    #[arg(long)]
    pub initial_version: Option<String>,

    /// Age in seconds after which a leftover lock is considered stale
    #[arg(long)]
    pub stale_lock_secs: Option<u64>,
}

/// What `yard migrate` was asked to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Mode {
    Check,
    DryRun,
    Execute { force: bool },
    Rollback { backup_id: Option<String> },
    Status,
}

impl MigrateArgs {
    /// Select the operation. Rollback wins over status, status over check.
    pub fn mode(&self) -> Mode {
        if let Some(backup_id) = &self.rollback {
            Mode::Rollback {
                backup_id: backup_id.clone(),
            }
        } else if self.status {
            Mode::Status
        } else if self.check {
            Mode::Check
        } else if self.dry_run {
            Mode::DryRun
        } else {
            Mode::Execute { force: self.force }
        }
    }

    /// Build the engine configuration for `workspace`.
    pub fn into_config(self, workspace: PathBuf) -> Result<MigratorConfig, MigrationError> {
        let mut config = MigratorConfig::new(workspace);
        if let Some(backup_root) = self.backup_root {
            config = config.with_backup_root(backup_root);
        }
        if let Some(initial) = self.initial_version {
            config = config.with_initial_version(Version::parse(&initial)?);
        }
        if let Some(secs) = self.stale_lock_secs {
            config = config.with_stale_lock_after(Duration::from_secs(secs));
        }
        Ok(config)
    }
}
