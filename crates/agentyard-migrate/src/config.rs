//! Engine configuration.

use crate::backup::BackupScope;
use crate::version::Version;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Directory under the workspace root holding engine state.
pub const STATE_DIR_NAME: &str = ".yard-migrate";

/// Append-only record of committed migrations.
pub const LEDGER_FILE_NAME: &str = "ledger.jsonl";

/// Registry snapshot recorded after the last successful run.
pub const MANIFEST_FILE_NAME: &str = "manifest.json";

/// Advisory lock file.
pub const LOCK_FILE_NAME: &str = "lock";

/// Default backup directory, inside the state directory.
pub const BACKUPS_DIR_NAME: &str = "backups";

/// Version assumed for a workspace with no ledger.
pub const DEFAULT_INITIAL_VERSION: Version = Version::new(0, 1, 0);

/// A lock older than this is considered abandoned.
pub const DEFAULT_STALE_LOCK_AFTER: Duration = Duration::from_secs(24 * 60 * 60);

/// Migration engine configuration.
#[derive(Debug, Clone)]
pub struct MigratorConfig {
    /// Workspace root.
    pub root: PathBuf,
    /// Engine state directory.
    pub state_dir: PathBuf,
    /// Where backups are written.
    pub backup_root: PathBuf,
    /// What backups capture.
    pub backup_scope: BackupScope,
    /// Version of a workspace that has never been migrated.
    pub initial_version: Version,
    /// Age after which a lock file is replaced.
    pub stale_lock_after: Duration,
}

impl Default for MigratorConfig {
    fn default() -> Self {
        Self::new(".")
    }
}

impl MigratorConfig {
    /// Configuration for the workspace at `root` with default locations.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        let root = root.into();
        let state_dir = root.join(STATE_DIR_NAME);
        Self {
            backup_root: state_dir.join(BACKUPS_DIR_NAME),
            state_dir,
            root,
            backup_scope: BackupScope::Full,
            initial_version: DEFAULT_INITIAL_VERSION,
            stale_lock_after: DEFAULT_STALE_LOCK_AFTER,
        }
    }

    /// Store backups somewhere else.
    pub fn with_backup_root(mut self, backup_root: impl Into<PathBuf>) -> Self {
        self.backup_root = backup_root.into();
        self
    }

    /// Set the backup scope.
    pub fn with_backup_scope(mut self, scope: BackupScope) -> Self {
        self.backup_scope = scope;
        self
    }

    /// Set the version assumed for an unmigrated workspace.
    pub fn with_initial_version(mut self, version: Version) -> Self {
        self.initial_version = version;
        self
    }

    /// Set the stale-lock threshold.
    pub fn with_stale_lock_after(mut self, after: Duration) -> Self {
        self.stale_lock_after = after;
        self
    }

    /// Path of the ledger file.
    pub fn ledger_path(&self) -> PathBuf {
        self.state_dir.join(LEDGER_FILE_NAME)
    }

    /// Path of the registry manifest.
    pub fn manifest_path(&self) -> PathBuf {
        self.state_dir.join(MANIFEST_FILE_NAME)
    }

    /// Path of the lock file.
    pub fn lock_path(&self) -> PathBuf {
        self.state_dir.join(LOCK_FILE_NAME)
    }

    /// Root-relative paths that snapshots, digests and restores skip.
    ///
    /// The backup directory (when inside the workspace), the lock file and
    /// the ledger. The ledger is append-only, so a restore never rewinds it.
    pub fn excluded_paths(&self) -> Vec<PathBuf> {
        [self.backup_root.clone(), self.lock_path(), self.ledger_path()]
            .iter()
            .filter_map(|path| relative_to(&self.root, path))
            .collect()
    }
}

fn relative_to(root: &Path, path: &Path) -> Option<PathBuf> {
    path.strip_prefix(root)
        .ok()
        .filter(|rel| !rel.as_os_str().is_empty())
        .map(Path::to_path_buf)
}
