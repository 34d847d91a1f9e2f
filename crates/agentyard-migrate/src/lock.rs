//! Advisory workspace lock.

use crate::error::MigrationError;
use std::fs::{self, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// RAII guard for the workspace lock file. Dropping it releases the lock.
#[derive(Debug)]
pub struct WorkspaceLock {
    path: PathBuf,
}

impl WorkspaceLock {
    /// Take the lock at `path`.
    ///
    /// A lock file older than `stale_after` is replaced with a warning; any
    /// other existing lock fails with [`MigrationError::Locked`].
    pub fn acquire(path: &Path, stale_after: Duration) -> Result<Self, MigrationError> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }

        match Self::create(path) {
            Ok(lock) => return Ok(lock),
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {}
            Err(e) => return Err(e.into()),
        }

        let holder = fs::read_to_string(path).unwrap_or_default();
        let age = fs::metadata(path)
            .and_then(|meta| meta.modified())
            .ok()
            .and_then(|modified| modified.elapsed().ok())
            .unwrap_or_default();
        if age <= stale_after {
            return Err(MigrationError::Locked {
                holder: holder.trim().replace('\n', ", "),
            });
        }

        tracing::warn!(
            age_hours = age.as_secs() / 3600,
            holder = %holder.trim(),
            "Found stale migration lock, removing"
        );
        match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => return Err(e.into()),
            _ => {}
        }
        Self::create(path).map_err(|e| match e.kind() {
            io::ErrorKind::AlreadyExists => MigrationError::Locked {
                holder: "another run took the lock".to_string(),
            },
            _ => e.into(),
        })
    }

    fn create(path: &Path) -> io::Result<Self> {
        let mut file = OpenOptions::new().write(true).create_new(true).open(path)?;
        writeln!(
            file,
            "pid:{}\ntime:{}",
            std::process::id(),
            chrono::Utc::now().to_rfc3339()
        )?;
        Ok(Self {
            path: path.to_path_buf(),
        })
    }

    /// Location of the lock file.
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        let _ = fs::remove_file(&self.path);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    const DAY: Duration = Duration::from_secs(24 * 60 * 60);

    #[test]
    fn test_lock_is_exclusive() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("state/lock");

        let lock = WorkspaceLock::acquire(&path, DAY).unwrap();
        assert!(path.exists());

        let err = WorkspaceLock::acquire(&path, DAY).unwrap_err();
        assert!(matches!(err, MigrationError::Locked { holder } if holder.contains("pid:")));

        drop(lock);
        assert!(!path.exists());
        WorkspaceLock::acquire(&path, DAY).unwrap();
    }

    #[test]
    fn test_stale_lock_is_replaced() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("lock");
        fs::write(&path, "pid:1").unwrap();

        std::thread::sleep(Duration::from_millis(20));
        let lock = WorkspaceLock::acquire(&path, Duration::from_millis(1)).unwrap();
        assert!(fs::read_to_string(lock.path()).unwrap().contains(&std::process::id().to_string()));
    }
}
