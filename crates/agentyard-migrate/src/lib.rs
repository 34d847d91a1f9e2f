//! Workspace migration engine for Agentyard.
//!
//! Upgrades the on-disk layout of an agent workspace (coordinator config,
//! per-project directories, task routes) from one structure version to the
//! next with:
//! - Idempotent steps (check / execute / rollback / verify)
//! - A validated registry of migrations keyed by source version pattern
//! - Deterministic chain resolution to the latest version
//! - One verified backup per run, restored automatically on failure
//! - An append-only ledger of committed migrations
//!
//! # Outcomes
//!
//! | Situation | Workspace ends | Error |
//! |-----------|----------------|-------|
//! | Step check fails | untouched by that migration | `StepCheck` |
//! | Step execute or verify fails | restored from backup | `StepExecute` / `StepVerify` |
//! | Ledger append fails | restored from backup | `CommitFailed` |
//! | Restore after failure fails | unknown, manual repair | `RestoreFailed` |
//!
//! # Example
//!
//! ```ignore
//! use agentyard_migrate::{builtin, Migrator, MigratorConfig};
//!
//! let migrator = Migrator::open(MigratorConfig::new("/srv/hq"), builtin::registry()?)?;
//!
//! let plan = migrator.check()?;
//! if plan.needs_migration() {
//!     print!("{}", migrator.dry_run()?);
//!     let report = migrator.execute(true, &mut |_: &_| true)?;
//!     println!("now at {}", report.to_version);
//! }
//! ```

pub mod backup;
pub mod builtin;
pub mod config;
pub mod context;
pub mod error;
pub mod ledger;
pub mod lock;
pub mod manifest;
pub mod orchestrator;
pub mod registry;
pub mod report;
pub mod resolver;
pub mod runner;
pub mod state;
pub mod step;
pub mod steps;
pub mod tree;
pub mod version;

pub use backup::{Backup, BackupManager, BackupManifest, BackupScope};
pub use config::MigratorConfig;
pub use context::{LogSink, MigrationContext};
pub use error::{MigrationError, OutcomeCode, RollbackError, RollbackErrors, StepError};
pub use ledger::{Ledger, MigrationRecord, RecordOutcome};
pub use lock::WorkspaceLock;
pub use manifest::{ManifestDrift, RegistryManifest};
pub use orchestrator::{Confirm, Migrator};
pub use registry::{Migration, MigrationRegistry};
pub use report::{
    CheckReport, DryRunReport, ExecuteOutcome, ExecuteReport, MigrationPlan, MigrationSummary,
    RollbackReport, StatusReport, StepPlan, StepPlanStatus, TransactionReport,
};
pub use resolver::{resolve, MigrationPath};
pub use runner::TransactionRunner;
pub use state::{StepProgress, StepStatus, TransactionState};
pub use step::Step;
pub use version::{Version, VersionPattern};
