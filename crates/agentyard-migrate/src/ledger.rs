//! Append-only ledger of committed migrations.
//!
//! One JSON record per line. The current workspace version is the
//! `to_version` of the last record, or the configured initial version.

use crate::backup::Backup;
use crate::error::MigrationError;
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

/// How a migration reached the committed state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordOutcome {
    /// At least one step executed.
    Applied,
    /// Every step reported nothing to do.
    AlreadySatisfied,
    /// A backup was restored; `to_version` is the version it was taken at.
    RolledBack,
}

impl std::fmt::Display for RecordOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RecordOutcome::Applied => write!(f, "applied"),
            RecordOutcome::AlreadySatisfied => write!(f, "already_satisfied"),
            RecordOutcome::RolledBack => write!(f, "rolled_back"),
        }
    }
}

/// One committed migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MigrationRecord {
    /// Migration id.
    pub migration_id: String,
    /// Commit time.
    pub applied_at: DateTime<Utc>,
    /// Version before the migration.
    pub from_version: Version,
    /// Version after the migration.
    pub to_version: Version,
    /// Applied or already satisfied.
    pub outcome: RecordOutcome,
}

impl MigrationRecord {
    /// Record a commit happening now.
    pub fn now(
        migration_id: impl Into<String>,
        from_version: Version,
        to_version: Version,
        outcome: RecordOutcome,
    ) -> Self {
        Self {
            migration_id: migration_id.into(),
            applied_at: Utc::now(),
            from_version,
            to_version,
            outcome,
        }
    }
}

/// The ledger file.
#[derive(Debug, Clone)]
pub struct Ledger {
    path: PathBuf,
}

impl Ledger {
    /// Ledger stored at `path`. Nothing is created until the first append.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Location of the ledger file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// All records, oldest first. A missing file is an empty ledger.
    pub fn records(&self) -> Result<Vec<MigrationRecord>, MigrationError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(MigrationError::Ledger(format!(
                    "cannot read {}: {e}",
                    self.path.display()
                )))
            }
        };

        let mut records = Vec::new();
        for (idx, line) in content.lines().enumerate() {
            if line.trim().is_empty() {
                continue;
            }
            let record = serde_json::from_str(line).map_err(|e| {
                MigrationError::Ledger(format!(
                    "{} line {} is corrupted: {e}",
                    self.path.display(),
                    idx + 1
                ))
            })?;
            records.push(record);
        }
        Ok(records)
    }

    /// The most recent record.
    pub fn last(&self) -> Result<Option<MigrationRecord>, MigrationError> {
        Ok(self.records()?.pop())
    }

    /// Current workspace version, `initial` when the ledger is empty.
    pub fn current_version(&self, initial: Version) -> Result<Version, MigrationError> {
        Ok(self.last()?.map_or(initial, |record| record.to_version))
    }

    /// Record that `backup` was restored, unless the ledger already stands at
    /// the version the backup was taken at.
    ///
    /// Returns whether a record was appended.
    pub fn record_restore(&self, backup: &Backup, initial: Version) -> Result<bool, MigrationError> {
        let from_version = self.current_version(initial)?;
        if from_version == backup.manifest.from_version {
            return Ok(false);
        }
        self.append(&MigrationRecord::now(
            backup.manifest.preceding_migration.as_str(),
            from_version,
            backup.manifest.from_version,
            RecordOutcome::RolledBack,
        ))?;
        Ok(true)
    }

    /// Append a record and sync it to disk.
    pub fn append(&self, record: &MigrationRecord) -> Result<(), MigrationError> {
        let write = || -> io::Result<()> {
            if let Some(parent) = self.path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut line = serde_json::to_vec(record)?;
            line.push(b'\n');
            let mut file = OpenOptions::new().create(true).append(true).open(&self.path)?;
            file.write_all(&line)?;
            file.sync_all()
        };
        write().map_err(|e| {
            MigrationError::Ledger(format!("cannot append to {}: {e}", self.path.display()))
        })?;

        tracing::debug!(
            migration = %record.migration_id,
            to_version = %record.to_version,
            outcome = %record.outcome,
            "Ledger record appended"
        );
        Ok(())
    }
}
