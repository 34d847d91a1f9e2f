//! Directory tree listings, content hashing and tree copies.
//!
//! Listings key every entry by its root-relative path joined with `/`, so two
//! listings of different roots compare directly. Directories that only exist
//! to hold an excluded path are not recorded.

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Size and content hash of one file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileDigest {
    /// Size in bytes.
    pub size: u64,
    /// Hex-encoded SHA-256 of the contents.
    pub sha256: String,
}

/// Every file, directory and symlink under a root.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TreeListing {
    /// Regular files.
    pub files: BTreeMap<String, FileDigest>,
    /// Directories, including empty ones.
    pub directories: BTreeSet<String>,
    /// Symlinks and their targets.
    #[serde(default)]
    pub symlinks: BTreeMap<String, String>,
}

impl TreeListing {
    /// Total number of entries.
    pub fn len(&self) -> usize {
        self.files.len() + self.directories.len() + self.symlinks.len()
    }

    /// Whether the listing is empty.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Total size of all files.
    pub fn total_bytes(&self) -> u64 {
        self.files.values().map(|digest| digest.size).sum()
    }

    /// Describe the first difference from `other`, if any.
    pub fn first_difference(&self, other: &TreeListing) -> Option<String> {
        for (path, digest) in &self.files {
            match other.files.get(path) {
                None => return Some(format!("file {path} is missing")),
                Some(found) if found != digest => {
                    return Some(format!("file {path} has different contents"))
                }
                _ => {}
            }
        }
        if let Some(path) = other.files.keys().find(|p| !self.files.contains_key(*p)) {
            return Some(format!("unexpected file {path}"));
        }
        if let Some(path) = self.directories.difference(&other.directories).next() {
            return Some(format!("directory {path} is missing"));
        }
        if let Some(path) = other.directories.difference(&self.directories).next() {
            return Some(format!("unexpected directory {path}"));
        }
        for (path, target) in &self.symlinks {
            if other.symlinks.get(path) != Some(target) {
                return Some(format!("symlink {path} is missing or retargeted"));
            }
        }
        if let Some(path) = other.symlinks.keys().find(|p| !self.symlinks.contains_key(*p)) {
            return Some(format!("unexpected symlink {path}"));
        }
        None
    }
}

/// Hash a file with SHA-256, streaming its contents.
pub fn hash_file(path: &Path) -> io::Result<FileDigest> {
    let mut file = fs::File::open(path)?;
    let mut hasher = Sha256::new();
    let size = io::copy(&mut file, &mut hasher)?;
    Ok(FileDigest {
        size,
        sha256: hex::encode(hasher.finalize()),
    })
}

/// Join path components with `/`.
pub fn relative_key(relative: &Path) -> String {
    relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy())
        .collect::<Vec<_>>()
        .join("/")
}

/// List the whole tree under `root`.
pub fn scan(root: &Path, excludes: &[PathBuf]) -> io::Result<TreeListing> {
    let mut listing = TreeListing::default();
    walk(root, Path::new(""), excludes, &mut listing)?;
    Ok(listing)
}

/// List only the given root-relative paths. Missing paths are skipped.
pub fn scan_paths(root: &Path, paths: &[PathBuf], excludes: &[PathBuf]) -> io::Result<TreeListing> {
    let mut listing = TreeListing::default();
    for relative in paths {
        match fs::symlink_metadata(root.join(relative)) {
            Ok(_) => walk(root, relative, excludes, &mut listing)?,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
    }
    Ok(listing)
}

/// Whether `relative` is an excluded path or lies inside one.
pub fn is_excluded(relative: &Path, excludes: &[PathBuf]) -> bool {
    excludes.iter().any(|ex| relative.starts_with(ex))
}

/// Whether `relative` is a proper ancestor of an excluded path.
pub fn contains_excluded(relative: &Path, excludes: &[PathBuf]) -> bool {
    excludes
        .iter()
        .any(|ex| ex.starts_with(relative) && ex.as_path() != relative)
}

fn walk(root: &Path, relative: &Path, excludes: &[PathBuf], listing: &mut TreeListing) -> io::Result<()> {
    if is_excluded(relative, excludes) {
        return Ok(());
    }
    let path = root.join(relative);
    let file_type = fs::symlink_metadata(&path)?.file_type();

    if file_type.is_symlink() {
        let target = fs::read_link(&path)?;
        listing
            .symlinks
            .insert(relative_key(relative), target.to_string_lossy().into_owned());
    } else if file_type.is_dir() {
        let key = relative_key(relative);
        if !key.is_empty() && !contains_excluded(relative, excludes) {
            listing.directories.insert(key);
        }
        let mut names = Vec::new();
        for entry in fs::read_dir(&path)? {
            names.push(entry?.file_name());
        }
        names.sort();
        for name in names {
            walk(root, &relative.join(name), excludes, listing)?;
        }
    } else if file_type.is_file() {
        listing
            .files
            .insert(relative_key(relative), hash_file(&path)?);
    }
    Ok(())
}

/// Copy every entry of `listing` from `src_root` to `dst_root`.
pub fn copy_listing(src_root: &Path, dst_root: &Path, listing: &TreeListing) -> io::Result<()> {
    fs::create_dir_all(dst_root)?;
    for dir in &listing.directories {
        fs::create_dir_all(dst_root.join(dir))?;
    }
    for path in listing.files.keys() {
        let dst = dst_root.join(path);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        fs::copy(src_root.join(path), dst)?;
    }
    for (path, target) in &listing.symlinks {
        let dst = dst_root.join(path);
        if let Some(parent) = dst.parent() {
            fs::create_dir_all(parent)?;
        }
        create_symlink(Path::new(target), &dst)?;
    }
    Ok(())
}

#[cfg(unix)]
fn create_symlink(target: &Path, link: &Path) -> io::Result<()> {
    std::os::unix::fs::symlink(target, link)
}

#[cfg(not(unix))]
fn create_symlink(_target: &Path, link: &Path) -> io::Result<()> {
    Err(io::Error::new(
        io::ErrorKind::Unsupported,
        format!("cannot recreate symlink {}", link.display()),
    ))
}

/// Move a file, directory or symlink, copying when a rename is impossible.
pub fn move_path(src: &Path, dst: &Path) -> io::Result<()> {
    if let Some(parent) = dst.parent() {
        fs::create_dir_all(parent)?;
    }
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    let file_type = fs::symlink_metadata(src)?.file_type();
    if file_type.is_dir() {
        let listing = scan(src, &[])?;
        copy_listing(src, dst, &listing)?;
        fs::remove_dir_all(src)
    } else if file_type.is_symlink() {
        create_symlink(&fs::read_link(src)?, dst)?;
        fs::remove_file(src)
    } else {
        fs::copy(src, dst)?;
        fs::remove_file(src)
    }
}

/// Remove a file, symlink or directory tree. Missing paths are fine.
pub fn remove_path(path: &Path) -> io::Result<()> {
    match fs::symlink_metadata(path) {
        Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
        Ok(_) => fs::remove_file(path),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(e),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn sample_tree() -> TempDir {
        let dir = TempDir::new().unwrap();
        fs::create_dir_all(dir.path().join("coordinator")).unwrap();
        fs::create_dir_all(dir.path().join("empty")).unwrap();
        fs::write(dir.path().join("coordinator/workspace.json"), "{}").unwrap();
        fs::write(dir.path().join("README"), "hello").unwrap();
        dir
    }

    #[test]
    fn test_hash_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("f");
        fs::write(&path, "abc").unwrap();
        let digest = hash_file(&path).unwrap();
        assert_eq!(digest.size, 3);
        assert_eq!(
            digest.sha256,
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_scan_lists_everything() {
        let dir = sample_tree();
        let listing = scan(dir.path(), &[]).unwrap();
        assert!(listing.files.contains_key("coordinator/workspace.json"));
        assert!(listing.files.contains_key("README"));
        assert!(listing.directories.contains("empty"));
        assert!(listing.directories.contains("coordinator"));
        assert_eq!(listing.total_bytes(), 7);
    }

    #[test]
    fn test_scan_skips_excluded() {
        let dir = sample_tree();
        fs::create_dir_all(dir.path().join(".state/backups/x")).unwrap();
        fs::write(dir.path().join(".state/backups/x/f"), "1").unwrap();
        fs::write(dir.path().join(".state/ledger"), "1").unwrap();

        let listing = scan(dir.path(), &[PathBuf::from(".state/backups")]).unwrap();
        assert!(listing.files.contains_key(".state/ledger"));
        assert!(!listing.files.keys().any(|k| k.starts_with(".state/backups")));
        assert!(!listing.directories.contains(".state"));
    }

    #[test]
    fn test_copy_listing_reproduces_tree() {
        let src = sample_tree();
        let dst = TempDir::new().unwrap();
        let listing = scan(src.path(), &[]).unwrap();
        copy_listing(src.path(), &dst.path().join("copy"), &listing).unwrap();

        let copied = scan(&dst.path().join("copy"), &[]).unwrap();
        assert_eq!(listing.first_difference(&copied), None);
        assert_eq!(listing, copied);
    }

    #[test]
    fn test_first_difference() {
        let dir = sample_tree();
        let before = scan(dir.path(), &[]).unwrap();
        fs::write(dir.path().join("README"), "changed").unwrap();
        let after = scan(dir.path(), &[]).unwrap();
        assert_eq!(
            before.first_difference(&after).unwrap(),
            "file README has different contents"
        );
    }

    #[test]
    fn test_scan_paths_skips_missing() {
        let dir = sample_tree();
        let listing = scan_paths(
            dir.path(),
            &[PathBuf::from("coordinator"), PathBuf::from("nope")],
            &[],
        )
        .unwrap();
        assert_eq!(listing.files.len(), 1);
        assert!(listing.directories.contains("coordinator"));
    }

    #[cfg(unix)]
    #[test]
    fn test_symlinks_are_recorded_not_followed() {
        let dir = sample_tree();
        std::os::unix::fs::symlink("coordinator", dir.path().join("link")).unwrap();
        let listing = scan(dir.path(), &[]).unwrap();
        assert_eq!(listing.symlinks.get("link").map(String::as_str), Some("coordinator"));
        assert!(!listing.files.contains_key("link/workspace.json"));
    }

    #[test]
    fn test_move_path_directory() {
        let dir = sample_tree();
        move_path(&dir.path().join("coordinator"), &dir.path().join("moved/coordinator")).unwrap();
        assert!(dir.path().join("moved/coordinator/workspace.json").exists());
        assert!(!dir.path().join("coordinator").exists());
    }
}
