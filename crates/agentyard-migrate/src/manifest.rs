//! Registry manifest: the set of migrations the last successful run knew about.
//!
//! Comparing it with the compiled registry surfaces drift, such as a binary
//! that dropped or renamed a migration the workspace was built with.

use crate::error::MigrationError;
use crate::registry::MigrationRegistry;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::Path;

/// Format version of the manifest file.
pub const MANIFEST_FORMAT_VERSION: u32 = 1;

/// One registered migration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ManifestEntry {
    /// Source pattern, e.g. `0.1.x`.
    pub from_pattern: String,
    /// Migration id.
    pub id: String,
    /// Target version.
    pub to_version: String,
    /// Description.
    pub description: String,
}

/// Persisted snapshot of the registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryManifest {
    /// Manifest format version.
    pub format: u32,
    /// Registered migrations.
    pub migrations: Vec<ManifestEntry>,
}

/// A difference between the manifest file and the compiled registry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ManifestDrift {
    /// The file uses another format version.
    FormatMismatch {
        /// Format found in the file.
        found: u32,
    },
    /// Recorded but no longer registered.
    Missing(ManifestEntry),
    /// Registered but not recorded.
    Unknown(ManifestEntry),
    /// Same id, different pattern, target or description.
    Changed {
        /// Recorded entry.
        recorded: ManifestEntry,
        /// Registered entry.
        registered: ManifestEntry,
    },
}

impl fmt::Display for ManifestDrift {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ManifestDrift::FormatMismatch { found } => write!(
                f,
                "manifest format {found} differs from {MANIFEST_FORMAT_VERSION}"
            ),
            ManifestDrift::Missing(entry) => {
                write!(f, "migration {} ({}) is no longer registered", entry.id, entry.from_pattern)
            }
            ManifestDrift::Unknown(entry) => {
                write!(f, "migration {} ({}) is new since the last run", entry.id, entry.from_pattern)
            }
            ManifestDrift::Changed { recorded, registered } => write!(
                f,
                "migration {} changed from {} -> {} to {} -> {}",
                recorded.id,
                recorded.from_pattern,
                recorded.to_version,
                registered.from_pattern,
                registered.to_version
            ),
        }
    }
}

impl RegistryManifest {
    /// Snapshot a registry.
    pub fn from_registry(registry: &MigrationRegistry) -> Self {
        Self {
            format: MANIFEST_FORMAT_VERSION,
            migrations: registry
                .iter()
                .map(|m| ManifestEntry {
                    from_pattern: m.from_pattern().to_string(),
                    id: m.id().to_string(),
                    to_version: m.to_version().to_string(),
                    description: m.description().to_string(),
                })
                .collect(),
        }
    }

    /// Load a manifest file; `None` if it does not exist.
    pub fn load(path: &Path) -> Result<Option<Self>, MigrationError> {
        let bytes = match fs::read(path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(MigrationError::Manifest(format!(
                    "cannot read {}: {e}",
                    path.display()
                )))
            }
        };
        serde_json::from_slice(&bytes)
            .map(Some)
            .map_err(|e| MigrationError::Manifest(format!("{} is corrupted: {e}", path.display())))
    }

    /// Write the manifest through a temporary file.
    pub fn save(&self, path: &Path) -> Result<(), MigrationError> {
        let write = || -> io::Result<()> {
            if let Some(parent) = path.parent() {
                fs::create_dir_all(parent)?;
            }
            let mut json = serde_json::to_vec_pretty(self)?;
            json.push(b'\n');
            crate::steps::write_atomic(path, &json)
        };
        write().map_err(|e| MigrationError::Manifest(format!("cannot write {}: {e}", path.display())))
    }

    /// Differences between this (recorded) manifest and `current`.
    pub fn diff(&self, current: &RegistryManifest) -> Vec<ManifestDrift> {
        let mut drift = Vec::new();
        if self.format != current.format {
            drift.push(ManifestDrift::FormatMismatch { found: self.format });
        }
        for recorded in &self.migrations {
            match current.migrations.iter().find(|e| e.id == recorded.id) {
                None => drift.push(ManifestDrift::Missing(recorded.clone())),
                Some(registered) if registered != recorded => drift.push(ManifestDrift::Changed {
                    recorded: recorded.clone(),
                    registered: registered.clone(),
                }),
                Some(_) => {}
            }
        }
        for registered in &current.migrations {
            if !self.migrations.iter().any(|e| e.id == registered.id) {
                drift.push(ManifestDrift::Unknown(registered.clone()));
            }
        }
        drift
    }
}
