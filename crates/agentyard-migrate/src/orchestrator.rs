//! Top-level migration entry point.

use crate::backup::BackupManager;
use crate::config::MigratorConfig;
use crate::context::MigrationContext;
use crate::error::MigrationError;
use crate::ledger::Ledger;
use crate::lock::WorkspaceLock;
use crate::manifest::{ManifestDrift, RegistryManifest};
use crate::registry::MigrationRegistry;
use crate::report::{
    CheckReport, DryRunReport, ExecuteOutcome, ExecuteReport, MigrationSummary, RollbackReport,
    StatusReport,
};
use crate::resolver::{resolve, MigrationPath};
use crate::runner::TransactionRunner;
use crate::version::Version;
use std::sync::Arc;

/// Asks the caller whether a planned migration may proceed.
pub trait Confirm {
    /// Return `true` to proceed with `plan`.
    fn confirm(&mut self, plan: &CheckReport) -> bool;
}

impl<F> Confirm for F
where
    F: FnMut(&CheckReport) -> bool,
{
    fn confirm(&mut self, plan: &CheckReport) -> bool {
        self(plan)
    }
}

type ProgressSink = Arc<dyn Fn(&str, &str) + Send + Sync>;

/// Migrates one workspace using a fixed registry.
pub struct Migrator {
    config: MigratorConfig,
    registry: MigrationRegistry,
    backups: BackupManager,
    ledger: Ledger,
    drift: Vec<ManifestDrift>,
    progress: Option<ProgressSink>,
}

impl Migrator {
    /// Open a workspace.
    ///
    /// Reads the registry manifest left by the last successful run and logs
    /// any drift from `registry`. Nothing is written.
    pub fn open(config: MigratorConfig, registry: MigrationRegistry) -> Result<Self, MigrationError> {
        let backups = BackupManager::from_config(&config);
        let ledger = Ledger::new(config.ledger_path());

        let drift = match RegistryManifest::load(&config.manifest_path()) {
            Ok(Some(recorded)) => recorded.diff(&RegistryManifest::from_registry(&registry)),
            Ok(None) => Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "Ignoring unreadable registry manifest");
                Vec::new()
            }
        };
        for item in &drift {
            tracing::warn!(drift = %item, "Registry differs from the last successful run");
        }

        Ok(Self {
            config,
            registry,
            backups,
            ledger,
            drift,
            progress: None,
        })
    }

    /// Forward step progress messages to `sink` as `(migration id, message)`.
    pub fn with_progress(mut self, sink: impl Fn(&str, &str) + Send + Sync + 'static) -> Self {
        self.progress = Some(Arc::new(sink));
        self
    }

    /// Engine configuration.
    pub fn config(&self) -> &MigratorConfig {
        &self.config
    }

    /// Registered migrations.
    pub fn registry(&self) -> &MigrationRegistry {
        &self.registry
    }

    /// Backup manager for this workspace.
    pub fn backups(&self) -> &BackupManager {
        &self.backups
    }

    /// Differences between the registry and the manifest of the last run.
    pub fn manifest_drift(&self) -> &[ManifestDrift] {
        &self.drift
    }

    /// Version recorded in the ledger, or the configured initial version.
    pub fn current_version(&self) -> Result<Version, MigrationError> {
        self.ledger.current_version(self.config.initial_version)
    }

    fn context(&self, dry_run: bool) -> MigrationContext {
        let ctx = MigrationContext::new(&self.config.root).with_dry_run(dry_run);
        match &self.progress {
            Some(sink) => {
                let sink = Arc::clone(sink);
                ctx.with_sink(Box::new(move |migration, message| sink(migration, message)))
            }
            None => ctx,
        }
    }

    fn check_report(current: Version, path: &MigrationPath<'_>) -> CheckReport {
        CheckReport {
            current_version: current,
            target_version: path.to,
            pending: path.migrations.iter().map(|m| MigrationSummary::of(m)).collect(),
        }
    }

    /// Report whether migration is needed and which migrations would run.
    pub fn check(&self) -> Result<CheckReport, MigrationError> {
        let current = self.current_version()?;
        let path = resolve(&self.registry, current)?;
        Ok(Self::check_report(current, &path))
    }

    /// Check every step of the chain without touching the workspace.
    ///
    /// Migrations after the first are checked against the current tree, not
    /// the tree the earlier migrations would leave behind.
    pub fn dry_run(&self) -> Result<DryRunReport, MigrationError> {
        let current = self.current_version()?;
        let path = resolve(&self.registry, current)?;
        let runner = TransactionRunner::new(&self.backups, &self.ledger);

        let plans = path
            .migrations
            .iter()
            .map(|migration| runner.plan(migration, &mut self.context(true)))
            .collect();
        Ok(DryRunReport {
            current_version: current,
            target_version: path.to,
            plans,
        })
    }

    /// Apply the pending chain.
    ///
    /// Unless `force` is set, `confirm` must approve the plan first. One
    /// backup covers the whole chain; the first failing migration stops the
    /// run and the workspace is restored to the pre-chain state.
    pub fn execute(&self, force: bool, confirm: &mut dyn Confirm) -> Result<ExecuteReport, MigrationError> {
        let current = self.current_version()?;
        let path = resolve(&self.registry, current)?;
        if path.is_empty() {
            tracing::info!(version = %current, "Workspace is up to date");
            return Ok(ExecuteReport {
                from_version: current,
                to_version: current,
                backup_id: None,
                transactions: Vec::new(),
                outcome: ExecuteOutcome::UpToDate,
            });
        }

        let planned = self.backups.snapshot_listing()?;
        let plan = Self::check_report(current, &path);
        if !force && !confirm.confirm(&plan) {
            tracing::info!("Migration declined");
            return Ok(ExecuteReport {
                from_version: current,
                to_version: current,
                backup_id: None,
                transactions: Vec::new(),
                outcome: ExecuteOutcome::Declined,
            });
        }

        let _lock = WorkspaceLock::acquire(&self.config.lock_path(), self.config.stale_lock_after)?;

        let locked_version = self.current_version()?;
        if locked_version != current {
            return Err(MigrationError::PreStateChanged(format!(
                "workspace version changed from {current} to {locked_version}"
            )));
        }

        let first = path.migrations[0];
        let backup = self.backups.create(first.id(), current, path.to)?;
        if let Some(difference) = planned.first_difference(&backup.manifest.tree) {
            return Err(MigrationError::PreStateChanged(difference));
        }

        let runner = TransactionRunner::new(&self.backups, &self.ledger);
        let mut version = current;
        let mut transactions = Vec::with_capacity(path.len());
        for migration in &path.migrations {
            let report = runner.run(migration, version, &mut self.context(false), &backup)?;
            version = report.to_version;
            transactions.push(report);
        }

        if let Err(e) = RegistryManifest::from_registry(&self.registry).save(&self.config.manifest_path()) {
            tracing::warn!(error = %e, "Failed to record registry manifest");
        }

        tracing::info!(from = %current, to = %version, backup_id = %backup.id, "Workspace migrated");
        Ok(ExecuteReport {
            from_version: current,
            to_version: version,
            backup_id: Some(backup.id),
            transactions,
            outcome: ExecuteOutcome::Migrated,
        })
    }

    /// Restore the named backup, or the most recent one.
    ///
    /// The ledger is not part of any backup. A `rolled_back` record returns
    /// the workspace version to the one the backup was taken at.
    pub fn rollback(&self, backup_id: Option<&str>) -> Result<RollbackReport, MigrationError> {
        let _lock = WorkspaceLock::acquire(&self.config.lock_path(), self.config.stale_lock_after)?;

        let backup = match backup_id {
            Some(id) => self.backups.get(id)?,
            None => self.backups.latest()?.ok_or(MigrationError::NoBackups)?,
        };
        self.backups.restore(&backup)?;
        self.ledger.record_restore(&backup, self.config.initial_version)?;

        Ok(RollbackReport {
            files_restored: backup.manifest.file_count(),
            backup_id: backup.id,
            version: self.current_version()?,
        })
    }

    /// Current version, last record, pending chain and backups.
    pub fn status(&self) -> Result<StatusReport, MigrationError> {
        let current = self.current_version()?;
        let (pending, chain_error) = match resolve(&self.registry, current) {
            Ok(path) => (
                path.migrations.iter().map(|m| m.id().to_string()).collect(),
                None,
            ),
            Err(e) => (Vec::new(), Some(e.to_string())),
        };
        let backups = self.backups.list()?;

        Ok(StatusReport {
            current_version: current,
            latest_version: self.registry.latest(),
            last_record: self.ledger.last()?,
            pending,
            chain_error,
            backup_count: backups.len(),
            latest_backup: backups.last().map(|b| b.id.clone()),
            manifest_drift: self.drift.iter().map(ToString::to_string).collect(),
        })
    }
}

impl std::fmt::Debug for Migrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Migrator")
            .field("config", &self.config)
            .field("migrations", &self.registry.len())
            .field("drift", &self.drift)
            .finish()
    }
}
