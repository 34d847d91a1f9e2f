//! Workspace snapshots and restore.
//!
//! # Layout
//!
//! ```text
//! <backup_root>/
//!   20260301-101500123-v0_1_to_v0_2/
//!     manifest.json      BackupManifest, including a hash of every file
//!     tree/              copy of the in-scope workspace entries
//!   .staging-<id>/       transient, during restore
//!   .displaced-<id>/     transient, during restore
//! ```
//!
//! # Restore
//!
//! A restore validates the backup against its manifest, stages a fresh copy,
//! moves live in-scope entries aside, moves staged entries into place and only
//! then deletes what was displaced. A failure during the swap puts the
//! displaced entries back. The restored tree is re-hashed and must match the
//! manifest exactly.

use crate::config::MigratorConfig;
use crate::error::MigrationError;
use crate::tree::{self, TreeListing};
use crate::version::Version;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use std::ffi::OsString;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// File holding a backup's manifest.
pub const BACKUP_MANIFEST_FILE: &str = "manifest.json";

/// Directory holding a backup's copy of the workspace.
pub const BACKUP_TREE_DIR: &str = "tree";

/// What a backup captures.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum BackupScope {
    /// The whole workspace.
    #[default]
    Full,
    /// Only these root-relative paths.
    Paths {
        /// Captured paths.
        paths: Vec<PathBuf>,
    },
}

/// Metadata stored next to each backup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupManifest {
    /// Backup id, also the directory name.
    pub id: String,
    /// Creation time.
    pub created_at: DateTime<Utc>,
    /// First migration of the chain the backup precedes.
    pub preceding_migration: String,
    /// Workspace version when the backup was taken.
    pub from_version: Version,
    /// Version the chain was heading to.
    pub to_version: Version,
    /// Workspace the backup was taken from.
    pub workspace_root: PathBuf,
    /// What was captured.
    pub scope: BackupScope,
    /// Every captured entry with content hashes.
    pub tree: TreeListing,
}

impl BackupManifest {
    /// Number of captured files.
    pub fn file_count(&self) -> usize {
        self.tree.files.len()
    }

    /// Total size of captured files.
    pub fn total_bytes(&self) -> u64 {
        self.tree.total_bytes()
    }
}

/// A backup on disk.
#[derive(Debug, Clone)]
pub struct Backup {
    /// Backup id.
    pub id: String,
    /// Backup directory.
    pub location: PathBuf,
    /// Parsed manifest.
    pub manifest: BackupManifest,
}

impl Backup {
    fn tree_dir(&self) -> PathBuf {
        self.location.join(BACKUP_TREE_DIR)
    }
}

enum SwapOp {
    Displaced(PathBuf),
    Installed(PathBuf),
}

/// Creates, lists, verifies and restores backups for one workspace.
#[derive(Debug, Clone)]
pub struct BackupManager {
    root: PathBuf,
    backup_root: PathBuf,
    scope: BackupScope,
    excludes: Vec<PathBuf>,
}

impl BackupManager {
    /// Create a manager. `excludes` are root-relative paths never captured or
    /// touched by a restore.
    pub fn new(
        root: impl Into<PathBuf>,
        backup_root: impl Into<PathBuf>,
        scope: BackupScope,
        excludes: Vec<PathBuf>,
    ) -> Self {
        Self {
            root: root.into(),
            backup_root: backup_root.into(),
            scope,
            excludes,
        }
    }

    /// Create a manager from engine configuration.
    pub fn from_config(config: &MigratorConfig) -> Self {
        Self::new(
            config.root.clone(),
            config.backup_root.clone(),
            config.backup_scope.clone(),
            config.excluded_paths(),
        )
    }

    /// Directory holding all backups.
    pub fn backup_root(&self) -> &Path {
        &self.backup_root
    }

    /// Hash every in-scope entry of the live workspace.
    pub fn snapshot_listing(&self) -> io::Result<TreeListing> {
        self.listing_of(&self.root, &self.scope)
    }

    fn listing_of(&self, root: &Path, scope: &BackupScope) -> io::Result<TreeListing> {
        match scope {
            BackupScope::Full => tree::scan(root, &self.excludes),
            BackupScope::Paths { paths } => tree::scan_paths(root, paths, &self.excludes),
        }
    }

    fn canonical_root(&self) -> PathBuf {
        fs::canonicalize(&self.root).unwrap_or_else(|_| self.root.clone())
    }

    /// Snapshot the workspace ahead of the chain starting at `preceding_migration`.
    ///
    /// The copy is re-hashed and compared with its manifest before returning.
    /// On any failure the partial backup is removed.
    pub fn create(
        &self,
        preceding_migration: &str,
        from_version: Version,
        to_version: Version,
    ) -> Result<Backup, MigrationError> {
        fs::create_dir_all(&self.backup_root).map_err(|e| {
            MigrationError::Backup(format!(
                "cannot create backup directory {}: {e}",
                self.backup_root.display()
            ))
        })?;

        let created_at = Utc::now();
        let (id, location) = self.allocate(&created_at, preceding_migration)?;

        let result = self.populate(
            &id,
            &location,
            created_at,
            preceding_migration,
            from_version,
            to_version,
        );
        match result {
            Ok(backup) => {
                tracing::info!(
                    backup_id = %backup.id,
                    files = backup.manifest.file_count(),
                    bytes = backup.manifest.total_bytes(),
                    "Backup created"
                );
                Ok(backup)
            }
            Err(message) => {
                if let Err(e) = tree::remove_path(&location) {
                    tracing::warn!(backup_id = %id, error = %e, "Failed to remove partial backup");
                }
                Err(MigrationError::Backup(message))
            }
        }
    }

    fn allocate(
        &self,
        created_at: &DateTime<Utc>,
        preceding_migration: &str,
    ) -> Result<(String, PathBuf), MigrationError> {
        let base = format!("{}-{}", created_at.format("%Y%m%d-%H%M%S%3f"), preceding_migration);
        let mut attempt = 1;
        loop {
            let id = if attempt == 1 {
                base.clone()
            } else {
                format!("{base}-{attempt}")
            };
            let location = self.backup_root.join(&id);
            match fs::create_dir(&location) {
                Ok(()) => return Ok((id, location)),
                Err(e) if e.kind() == io::ErrorKind::AlreadyExists => attempt += 1,
                Err(e) => {
                    return Err(MigrationError::Backup(format!(
                        "cannot create {}: {e}",
                        location.display()
                    )))
                }
            }
        }
    }

    fn populate(
        &self,
        id: &str,
        location: &Path,
        created_at: DateTime<Utc>,
        preceding_migration: &str,
        from_version: Version,
        to_version: Version,
    ) -> Result<Backup, String> {
        let listing = self
            .snapshot_listing()
            .map_err(|e| format!("cannot read workspace: {e}"))?;
        tree::copy_listing(&self.root, &location.join(BACKUP_TREE_DIR), &listing)
            .map_err(|e| format!("cannot copy workspace: {e}"))?;

        let manifest = BackupManifest {
            id: id.to_string(),
            created_at,
            preceding_migration: preceding_migration.to_string(),
            from_version,
            to_version,
            workspace_root: self.canonical_root(),
            scope: self.scope.clone(),
            tree: listing,
        };
        let json = serde_json::to_vec_pretty(&manifest).map_err(|e| e.to_string())?;
        fs::write(location.join(BACKUP_MANIFEST_FILE), json)
            .map_err(|e| format!("cannot write manifest: {e}"))?;

        let backup = Backup {
            id: id.to_string(),
            location: location.to_path_buf(),
            manifest,
        };
        self.check_copy(&backup)?;
        Ok(backup)
    }

    fn check_copy(&self, backup: &Backup) -> Result<(), String> {
        let copied = self
            .listing_of(&backup.tree_dir(), &backup.manifest.scope)
            .map_err(|e| format!("cannot read backup copy: {e}"))?;
        match backup.manifest.tree.first_difference(&copied) {
            Some(difference) => Err(format!("backup copy does not match manifest: {difference}")),
            None => Ok(()),
        }
    }

    /// Re-hash a backup and compare it with its manifest.
    pub fn verify(&self, backup: &Backup) -> Result<(), MigrationError> {
        self.check_copy(backup).map_err(|message| MigrationError::Restore {
            backup_id: backup.id.clone(),
            message,
        })
    }

    fn load(&self, location: &Path) -> Result<Backup, String> {
        let bytes = fs::read(location.join(BACKUP_MANIFEST_FILE)).map_err(|e| e.to_string())?;
        let manifest: BackupManifest = serde_json::from_slice(&bytes).map_err(|e| e.to_string())?;
        Ok(Backup {
            id: manifest.id.clone(),
            location: location.to_path_buf(),
            manifest,
        })
    }

    /// All readable backups, oldest first.
    pub fn list(&self) -> Result<Vec<Backup>, MigrationError> {
        let entries = match fs::read_dir(&self.backup_root) {
            Ok(entries) => entries,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(e.into()),
        };

        let mut backups = Vec::new();
        for entry in entries {
            let entry = entry?;
            if !entry.file_type()?.is_dir() || entry.file_name().to_string_lossy().starts_with('.') {
                continue;
            }
            match self.load(&entry.path()) {
                Ok(backup) => backups.push(backup),
                Err(e) => {
                    tracing::warn!(path = %entry.path().display(), error = %e, "Skipping unreadable backup");
                }
            }
        }
        backups.sort_by(|a, b| {
            a.manifest
                .created_at
                .cmp(&b.manifest.created_at)
                .then_with(|| a.id.cmp(&b.id))
        });
        Ok(backups)
    }

    /// The most recent backup, if any.
    pub fn latest(&self) -> Result<Option<Backup>, MigrationError> {
        Ok(self.list()?.pop())
    }

    /// Look up a backup by id.
    pub fn get(&self, id: &str) -> Result<Backup, MigrationError> {
        let plain = !id.is_empty()
            && !id.starts_with('.')
            && !id.contains(['/', '\\'])
            && id != "..";
        if !plain {
            return Err(MigrationError::BackupNotFound(id.to_string()));
        }
        self.load(&self.backup_root.join(id))
            .map_err(|_| MigrationError::BackupNotFound(id.to_string()))
    }

    /// Replace the live in-scope workspace content with the backup's content.
    pub fn restore(&self, backup: &Backup) -> Result<(), MigrationError> {
        let fail = |message: String| MigrationError::Restore {
            backup_id: backup.id.clone(),
            message,
        };

        if backup.manifest.workspace_root != self.canonical_root() {
            return Err(fail(format!(
                "backup belongs to workspace {}",
                backup.manifest.workspace_root.display()
            )));
        }
        self.verify(backup)?;

        let staging = self.backup_root.join(format!(".staging-{}", backup.id));
        let displaced = self.backup_root.join(format!(".displaced-{}", backup.id));
        tree::remove_path(&staging).map_err(|e| fail(format!("cannot clear staging area: {e}")))?;
        tree::remove_path(&displaced).map_err(|e| fail(format!("cannot clear displaced area: {e}")))?;

        tree::copy_listing(&backup.tree_dir(), &staging, &backup.manifest.tree)
            .map_err(|e| fail(format!("cannot stage backup: {e}")))?;

        let swap = self.swap_in(&backup.manifest.scope, &staging, &displaced);
        for transient in [&staging, &displaced] {
            if let Err(e) = tree::remove_path(transient) {
                tracing::warn!(path = %transient.display(), error = %e, "Failed to clean up after restore");
            }
        }
        swap.map_err(fail)?;

        let restored = self
            .listing_of(&self.root, &backup.manifest.scope)
            .map_err(|e| fail(format!("cannot read restored workspace: {e}")))?;
        if let Some(difference) = backup.manifest.tree.first_difference(&restored) {
            return Err(fail(format!("restored workspace does not match manifest: {difference}")));
        }

        tracing::info!(
            backup_id = %backup.id,
            files = backup.manifest.file_count(),
            "Workspace restored"
        );
        Ok(())
    }

    fn swap_in(&self, scope: &BackupScope, staging: &Path, displaced: &Path) -> Result<(), String> {
        let mut units = Vec::new();
        let mut holders = Vec::new();
        match scope {
            BackupScope::Full => self.expand_unit(Path::new(""), staging, &mut units, &mut holders)?,
            BackupScope::Paths { paths } => {
                for path in paths {
                    self.expand_unit(path, staging, &mut units, &mut holders)?;
                }
            }
        }

        for holder in &holders {
            fs::create_dir_all(self.root.join(holder))
                .map_err(|e| format!("cannot create {}: {e}", holder.display()))?;
        }

        let mut journal = Vec::new();
        if let Err(e) = self.swap_units(&units, staging, displaced, &mut journal) {
            self.undo_swap(journal, displaced);
            return Err(e);
        }
        Ok(())
    }

    /// Split `relative` into swappable units, descending into directories that
    /// hold excluded paths.
    fn expand_unit(
        &self,
        relative: &Path,
        staging: &Path,
        units: &mut Vec<PathBuf>,
        holders: &mut Vec<PathBuf>,
    ) -> Result<(), String> {
        if tree::is_excluded(relative, &self.excludes) {
            return Ok(());
        }
        let is_root = relative.as_os_str().is_empty();
        if !is_root && !tree::contains_excluded(relative, &self.excludes) {
            units.push(relative.to_path_buf());
            return Ok(());
        }
        if !is_root {
            holders.push(relative.to_path_buf());
        }

        let mut names = BTreeSet::new();
        names.extend(child_names(&self.root.join(relative))?);
        names.extend(child_names(&staging.join(relative))?);
        for name in names {
            self.expand_unit(&relative.join(name), staging, units, holders)?;
        }
        Ok(())
    }

    fn swap_units(
        &self,
        units: &[PathBuf],
        staging: &Path,
        displaced: &Path,
        journal: &mut Vec<SwapOp>,
    ) -> Result<(), String> {
        for unit in units {
            let live = self.root.join(unit);
            if path_exists(&live) {
                tree::move_path(&live, &displaced.join(unit))
                    .map_err(|e| format!("cannot move {} aside: {e}", unit.display()))?;
                journal.push(SwapOp::Displaced(unit.clone()));
            }
            let staged = staging.join(unit);
            if path_exists(&staged) {
                tree::move_path(&staged, &live)
                    .map_err(|e| format!("cannot install {}: {e}", unit.display()))?;
                journal.push(SwapOp::Installed(unit.clone()));
            }
        }
        Ok(())
    }

    fn undo_swap(&self, journal: Vec<SwapOp>, displaced: &Path) {
        for op in journal.into_iter().rev() {
            let result = match &op {
                SwapOp::Installed(unit) => tree::remove_path(&self.root.join(unit)),
                SwapOp::Displaced(unit) => tree::move_path(&displaced.join(unit), &self.root.join(unit)),
            };
            if let Err(e) = result {
                let unit = match &op {
                    SwapOp::Installed(unit) | SwapOp::Displaced(unit) => unit,
                };
                tracing::error!(path = %unit.display(), error = %e, "Failed to undo partial restore");
            }
        }
    }
}

fn path_exists(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok()
}

fn child_names(dir: &Path) -> Result<Vec<OsString>, String> {
    match fs::symlink_metadata(dir) {
        Ok(meta) if meta.is_dir() => {}
        _ => return Ok(Vec::new()),
    }
    let entries = fs::read_dir(dir).map_err(|e| format!("cannot list {}: {e}", dir.display()))?;
    let mut names = Vec::new();
    for entry in entries {
        names.push(entry.map_err(|e| e.to_string())?.file_name());
    }
    Ok(names)
}
