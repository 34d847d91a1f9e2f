//! Reusable filesystem step kinds.
//!
//! Every kind is plain data plus logic, constructed explicitly when a
//! migration is declared. Undo information is kept in the context store under
//! the step id, never on the step value.

use crate::context::MigrationContext;
use crate::error::StepError;
use crate::step::Step;
use serde_json::Value;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Top-level directories that are never projects.
pub const NON_PROJECT_DIRS: &[&str] = &["coordinator", "docs"];

/// A top-level directory containing any of these entries is a project.
pub const PROJECT_MARKERS: &[&str] = &["crew", "workers", "reviewer", "queue"];

/// Find project directories directly under the workspace root.
///
/// Returns absolute paths in name order. Hidden directories and
/// [`NON_PROJECT_DIRS`] are skipped.
pub fn detect_projects(root: &Path) -> io::Result<Vec<PathBuf>> {
    let mut projects = Vec::new();
    for entry in fs::read_dir(root)? {
        let entry = entry?;
        if !entry.file_type()?.is_dir() {
            continue;
        }
        let name = entry.file_name();
        let name = name.to_string_lossy();
        if name.starts_with('.') || NON_PROJECT_DIRS.contains(&name.as_ref()) {
            continue;
        }
        let path = entry.path();
        if PROJECT_MARKERS.iter().any(|marker| path.join(marker).exists()) {
            projects.push(path);
        }
    }
    projects.sort();
    Ok(projects)
}

/// Which base directories a per-location step applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Targets {
    /// The workspace root only.
    Root,
    /// Every detected project.
    Projects,
    /// The root and every detected project.
    RootAndProjects,
}

impl Targets {
    fn resolve(self, root: &Path, relative: &Path) -> io::Result<Vec<PathBuf>> {
        let mut bases = Vec::new();
        if matches!(self, Targets::Root | Targets::RootAndProjects) {
            bases.push(root.to_path_buf());
        }
        if matches!(self, Targets::Projects | Targets::RootAndProjects) {
            bases.extend(detect_projects(root)?);
        }
        Ok(bases.into_iter().map(|base| base.join(relative)).collect())
    }
}

fn exists(path: &Path) -> io::Result<bool> {
    match fs::symlink_metadata(path) {
        Ok(_) => Ok(true),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

fn read_optional(path: &Path) -> io::Result<Option<Vec<u8>>> {
    match fs::read(path) {
        Ok(bytes) => Ok(Some(bytes)),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(None),
        Err(e) => Err(e),
    }
}

fn is_empty_dir(path: &Path) -> io::Result<bool> {
    match fs::read_dir(path) {
        Ok(mut entries) => Ok(entries.next().is_none()),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(false),
        Err(e) => Err(e),
    }
}

/// Create `dir` and any missing ancestors, returning what was created
/// (outermost first).
fn create_dirs(dir: &Path) -> io::Result<Vec<PathBuf>> {
    let mut missing = Vec::new();
    let mut cursor = Some(dir);
    while let Some(path) = cursor {
        if exists(path)? {
            break;
        }
        missing.push(path.to_path_buf());
        cursor = path.parent();
    }
    missing.reverse();
    fs::create_dir_all(dir)?;
    Ok(missing)
}

/// Remove directories created by [`create_dirs`] if they are still empty.
fn remove_created_dirs(created: &[PathBuf]) -> io::Result<()> {
    for dir in created.iter().rev() {
        if is_empty_dir(dir)? {
            fs::remove_dir(dir)?;
        }
    }
    Ok(())
}

/// Write through a temporary sibling and rename over the target.
pub(crate) fn write_atomic(path: &Path, contents: &[u8]) -> io::Result<()> {
    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".yard-tmp");
    let tmp = PathBuf::from(tmp);

    fs::write(&tmp, contents)?;
    if let Ok(meta) = fs::metadata(path) {
        fs::set_permissions(&tmp, meta.permissions())?;
    }
    if let Err(e) = fs::rename(&tmp, path) {
        let _ = fs::remove_file(&tmp);
        return Err(e);
    }
    Ok(())
}

/// Rename, falling back to copy + verify + delete across devices.
fn move_file(src: &Path, dst: &Path) -> io::Result<()> {
    if fs::rename(src, dst).is_ok() {
        return Ok(());
    }
    let original = fs::read(src)?;
    fs::copy(src, dst)?;
    if fs::read(dst)? != original {
        let _ = fs::remove_file(dst);
        return Err(io::Error::other(format!(
            "copy of {} did not verify",
            src.display()
        )));
    }
    fs::remove_file(src)
}

fn restore_previous(path: &Path, previous: Option<Vec<u8>>) -> io::Result<()> {
    match previous {
        Some(bytes) => write_atomic(path, &bytes),
        None => match fs::remove_file(path) {
            Err(e) if e.kind() != io::ErrorKind::NotFound => Err(e),
            _ => Ok(()),
        },
    }
}

/// Ensure a directory exists under the root and/or every project.
pub struct EnsureDirs {
    id: String,
    description: String,
    relative: PathBuf,
    targets: Targets,
}

impl EnsureDirs {
    /// Ensure `relative` exists under each of `targets`.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        relative: impl Into<PathBuf>,
        targets: Targets,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            relative: relative.into(),
            targets,
        }
    }
}

impl Step for EnsureDirs {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        for dir in self.targets.resolve(ctx.root(), &self.relative)? {
            if !dir.is_dir() {
                return Ok(true);
            }
        }
        Ok(false)
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let mut created = Vec::new();
        for dir in self.targets.resolve(ctx.root(), &self.relative)? {
            if dir.is_dir() {
                continue;
            }
            let result = create_dirs(&dir);
            match result {
                Ok(new_dirs) => created.extend(new_dirs),
                Err(e) => {
                    ctx.put(self.id.clone(), created);
                    return Err(e.into());
                }
            }
            ctx.log(format!("created {}", display_relative(ctx.root(), &dir)));
        }
        ctx.put(self.id.clone(), created);
        Ok(())
    }

    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let Some(created) = ctx.take::<Vec<PathBuf>>(&self.id) else {
            return Ok(());
        };
        remove_created_dirs(&created)?;
        Ok(())
    }

    fn verify(&self, ctx: &MigrationContext) -> Result<(), StepError> {
        for dir in self.targets.resolve(ctx.root(), &self.relative)? {
            if !dir.is_dir() {
                return Err(StepError::invalid(format!(
                    "{} is not a directory",
                    display_relative(ctx.root(), &dir)
                )));
            }
        }
        Ok(())
    }
}

struct FileUndo {
    previous: Option<Vec<u8>>,
    created_dirs: Vec<PathBuf>,
}

/// Write a file with exact contents.
pub struct WriteFile {
    id: String,
    description: String,
    relative: PathBuf,
    contents: Vec<u8>,
}

impl WriteFile {
    /// Write `contents` to `relative`, creating parent directories.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        relative: impl Into<PathBuf>,
        contents: impl Into<Vec<u8>>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            relative: relative.into(),
            contents: contents.into(),
        }
    }
}

impl Step for WriteFile {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        let current = read_optional(&ctx.path(&self.relative))?;
        Ok(current.as_deref() != Some(self.contents.as_slice()))
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let path = ctx.path(&self.relative);
        let previous = read_optional(&path)?;
        let created_dirs = match path.parent() {
            Some(parent) => create_dirs(parent)?,
            None => Vec::new(),
        };
        ctx.put(
            self.id.clone(),
            FileUndo {
                previous,
                created_dirs,
            },
        );
        write_atomic(&path, &self.contents)?;
        ctx.log(format!("wrote {}", self.relative.display()));
        Ok(())
    }

    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let Some(undo) = ctx.take::<FileUndo>(&self.id) else {
            return Ok(());
        };
        restore_previous(&ctx.path(&self.relative), undo.previous)?;
        remove_created_dirs(&undo.created_dirs)?;
        Ok(())
    }

    fn verify(&self, ctx: &MigrationContext) -> Result<(), StepError> {
        match read_optional(&ctx.path(&self.relative))? {
            Some(bytes) if bytes == self.contents => Ok(()),
            Some(_) => Err(StepError::invalid(format!(
                "{} has unexpected contents",
                self.relative.display()
            ))),
            None => Err(StepError::invalid(format!(
                "{} is missing",
                self.relative.display()
            ))),
        }
    }
}

/// Move files from one location to another.
///
/// A pair is pending while its source exists and its target does not.
pub struct MoveFiles {
    id: String,
    description: String,
    moves: Vec<(PathBuf, PathBuf)>,
}

impl MoveFiles {
    /// Move each `(from, to)` pair, relative to the root.
    pub fn new<P: Into<PathBuf>>(
        id: impl Into<String>,
        description: impl Into<String>,
        moves: impl IntoIterator<Item = (P, P)>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            moves: moves
                .into_iter()
                .map(|(from, to)| (from.into(), to.into()))
                .collect(),
        }
    }

    fn pending(&self, root: &Path) -> io::Result<Vec<(PathBuf, PathBuf)>> {
        let mut pending = Vec::new();
        for (from, to) in &self.moves {
            if exists(&root.join(from))? && !exists(&root.join(to))? {
                pending.push((from.clone(), to.clone()));
            }
        }
        Ok(pending)
    }
}

impl Step for MoveFiles {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        Ok(!self.pending(ctx.root())?.is_empty())
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let mut moved: Vec<(PathBuf, PathBuf)> = Vec::new();
        let mut result = Ok(());
        for (from, to) in self.pending(ctx.root())? {
            let src = ctx.path(&from);
            let dst = ctx.path(&to);
            if let Some(parent) = dst.parent() {
                if !parent.is_dir() {
                    result = Err(StepError::invalid(format!(
                        "target directory for {} does not exist",
                        to.display()
                    )));
                    break;
                }
            }
            if let Err(e) = move_file(&src, &dst) {
                result = Err(StepError::invalid(format!("moving {}: {e}", from.display())));
                break;
            }
            ctx.log(format!("moved {} to {}", from.display(), to.display()));
            moved.push((from, to));
        }
        ctx.put(self.id.clone(), moved);
        result
    }

    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let Some(moved) = ctx.take::<Vec<(PathBuf, PathBuf)>>(&self.id) else {
            return Ok(());
        };
        for (from, to) in moved.iter().rev() {
            move_file(&ctx.path(to), &ctx.path(from))?;
        }
        Ok(())
    }

    fn verify(&self, ctx: &MigrationContext) -> Result<(), StepError> {
        match self.pending(ctx.root())?.first() {
            Some((from, _)) => Err(StepError::invalid(format!(
                "{} was not moved",
                from.display()
            ))),
            None => Ok(()),
        }
    }
}

/// Replace literal tokens inside a text file. A missing file needs nothing.
pub struct ReplaceInFile {
    id: String,
    description: String,
    relative: PathBuf,
    replacements: Vec<(String, String)>,
}

impl ReplaceInFile {
    /// Replace every occurrence of each `(old, new)` pair in `relative`.
    pub fn new<S: Into<String>>(
        id: impl Into<String>,
        description: impl Into<String>,
        relative: impl Into<PathBuf>,
        replacements: impl IntoIterator<Item = (S, S)>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            relative: relative.into(),
            replacements: replacements
                .into_iter()
                .map(|(old, new)| (old.into(), new.into()))
                .collect(),
        }
    }

    fn has_old_tokens(&self, content: &str) -> bool {
        self.replacements.iter().any(|(old, _)| content.contains(old.as_str()))
    }

    fn read(&self, ctx: &MigrationContext) -> Result<Option<String>, StepError> {
        match read_optional(&ctx.path(&self.relative))? {
            Some(bytes) => String::from_utf8(bytes).map(Some).map_err(|_| {
                StepError::invalid(format!("{} is not valid UTF-8", self.relative.display()))
            }),
            None => Ok(None),
        }
    }
}

impl Step for ReplaceInFile {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        Ok(self
            .read(ctx)?
            .is_some_and(|content| self.has_old_tokens(&content)))
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let Some(original) = self.read(ctx)? else {
            return Ok(());
        };
        let mut updated = original.clone();
        for (old, new) in &self.replacements {
            updated = updated.replace(old.as_str(), new.as_str());
        }
        ctx.put(self.id.clone(), original);
        write_atomic(&ctx.path(&self.relative), updated.as_bytes())?;
        ctx.log(format!("rewrote {}", self.relative.display()));
        Ok(())
    }

    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        if let Some(original) = ctx.take::<String>(&self.id) {
            write_atomic(&ctx.path(&self.relative), original.as_bytes())?;
        }
        Ok(())
    }

    fn verify(&self, ctx: &MigrationContext) -> Result<(), StepError> {
        match self.read(ctx)? {
            Some(content) if self.has_old_tokens(&content) => Err(StepError::invalid(format!(
                "{} still contains legacy tokens",
                self.relative.display()
            ))),
            _ => Ok(()),
        }
    }
}

/// Ensure a line is present in a text file such as `.gitignore`.
pub struct AppendLine {
    id: String,
    description: String,
    relative: PathBuf,
    line: String,
    comment: Option<String>,
}

impl AppendLine {
    /// Append `line` to `relative` unless an identical line exists.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        relative: impl Into<PathBuf>,
        line: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            relative: relative.into(),
            line: line.into(),
            comment: None,
        }
    }

    /// Precede the appended line with a `# comment` line.
    pub fn with_comment(mut self, comment: impl Into<String>) -> Self {
        self.comment = Some(comment.into());
        self
    }

    fn is_present(&self, content: &str) -> bool {
        content.lines().any(|line| line.trim() == self.line)
    }

    fn read(&self, ctx: &MigrationContext) -> Result<Option<Vec<u8>>, StepError> {
        Ok(read_optional(&ctx.path(&self.relative))?)
    }
}

impl Step for AppendLine {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        Ok(match self.read(ctx)? {
            Some(bytes) => !self.is_present(&String::from_utf8_lossy(&bytes)),
            None => true,
        })
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let previous = self.read(ctx)?;
        let mut content = previous
            .as_deref()
            .map(|bytes| String::from_utf8_lossy(bytes).into_owned())
            .unwrap_or_default();
        if !content.is_empty() && !content.ends_with('\n') {
            content.push('\n');
        }
        if let Some(comment) = &self.comment {
            content.push_str("# ");
            content.push_str(comment);
            content.push('\n');
        }
        content.push_str(&self.line);
        content.push('\n');

        ctx.put(
            self.id.clone(),
            FileUndo {
                previous,
                created_dirs: Vec::new(),
            },
        );
        write_atomic(&ctx.path(&self.relative), content.as_bytes())?;
        Ok(())
    }

    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        if let Some(undo) = ctx.take::<FileUndo>(&self.id) {
            restore_previous(&ctx.path(&self.relative), undo.previous)?;
        }
        Ok(())
    }

    fn verify(&self, ctx: &MigrationContext) -> Result<(), StepError> {
        match self.read(ctx)? {
            Some(bytes) if self.is_present(&String::from_utf8_lossy(&bytes)) => Ok(()),
            _ => Err(StepError::invalid(format!(
                "{} does not contain {:?}",
                self.relative.display(),
                self.line
            ))),
        }
    }
}

/// Remove legacy directories that are empty. Non-empty ones are left alone.
pub struct PruneEmptyDirs {
    id: String,
    description: String,
    relative: PathBuf,
    targets: Targets,
}

impl PruneEmptyDirs {
    /// Prune `relative` under each of `targets` when empty.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        relative: impl Into<PathBuf>,
        targets: Targets,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            relative: relative.into(),
            targets,
        }
    }

    fn empty_dirs(&self, root: &Path) -> io::Result<Vec<PathBuf>> {
        let mut found = Vec::new();
        for dir in self.targets.resolve(root, &self.relative)? {
            if dir.is_dir() && is_empty_dir(&dir)? {
                found.push(dir);
            }
        }
        Ok(found)
    }
}

impl Step for PruneEmptyDirs {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        Ok(!self.empty_dirs(ctx.root())?.is_empty())
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let mut removed = Vec::new();
        let mut result = Ok(());
        for dir in self.empty_dirs(ctx.root())? {
            if let Err(e) = fs::remove_dir(&dir) {
                result = Err(e.into());
                break;
            }
            ctx.log(format!("removed empty {}", display_relative(ctx.root(), &dir)));
            removed.push(dir);
        }
        ctx.put(self.id.clone(), removed);
        result
    }

    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        if let Some(removed) = ctx.take::<Vec<PathBuf>>(&self.id) {
            for dir in removed {
                fs::create_dir_all(dir)?;
            }
        }
        Ok(())
    }

    fn verify(&self, ctx: &MigrationContext) -> Result<(), StepError> {
        match self.empty_dirs(ctx.root())?.first() {
            Some(dir) => Err(StepError::invalid(format!(
                "{} is still present",
                display_relative(ctx.root(), dir)
            ))),
            None => Ok(()),
        }
    }
}

/// Set a top-level field of a JSON object file.
///
/// The file is looked up at its path first, then at the fallback path (where
/// it lived before an earlier step moved it). A missing file needs nothing.
pub struct SetJsonField {
    id: String,
    description: String,
    relative: PathBuf,
    fallback: Option<PathBuf>,
    field: String,
    value: Value,
}

impl SetJsonField {
    /// Set `field` to `value` in the JSON object stored at `relative`.
    pub fn new(
        id: impl Into<String>,
        description: impl Into<String>,
        relative: impl Into<PathBuf>,
        field: impl Into<String>,
        value: Value,
    ) -> Self {
        Self {
            id: id.into(),
            description: description.into(),
            relative: relative.into(),
            fallback: None,
            field: field.into(),
            value,
        }
    }

    /// Also look for the file at `fallback` when `relative` is missing.
    pub fn with_fallback(mut self, fallback: impl Into<PathBuf>) -> Self {
        self.fallback = Some(fallback.into());
        self
    }

    /// Find the document, returning its location, raw bytes and parsed value.
    fn load(&self, ctx: &MigrationContext) -> Result<Option<(PathBuf, Vec<u8>, Value)>, StepError> {
        let candidates = std::iter::once(&self.relative).chain(self.fallback.as_ref());
        for relative in candidates {
            let Some(bytes) = read_optional(&ctx.path(relative))? else {
                continue;
            };
            let document: Value = serde_json::from_slice(&bytes)?;
            if !document.is_object() {
                return Err(StepError::invalid(format!(
                    "{} is not a JSON object",
                    relative.display()
                )));
            }
            return Ok(Some((relative.clone(), bytes, document)));
        }
        Ok(None)
    }
}

impl Step for SetJsonField {
    fn id(&self) -> &str {
        &self.id
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError> {
        Ok(self
            .load(ctx)?
            .is_some_and(|(_, _, document)| document.get(&self.field) != Some(&self.value)))
    }

    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        let Some((relative, original, mut document)) = self.load(ctx)? else {
            return Ok(());
        };
        if let Some(object) = document.as_object_mut() {
            object.insert(self.field.clone(), self.value.clone());
        }
        let mut rendered = serde_json::to_vec_pretty(&document)?;
        rendered.push(b'\n');

        write_atomic(&ctx.path(&relative), &rendered)?;
        ctx.log(format!("set {} in {}", self.field, relative.display()));
        ctx.put(self.id.clone(), (relative, original));
        Ok(())
    }

    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError> {
        if let Some((relative, original)) = ctx.take::<(PathBuf, Vec<u8>)>(&self.id) {
            write_atomic(&ctx.path(relative), &original)?;
        }
        Ok(())
    }

    fn verify(&self, ctx: &MigrationContext) -> Result<(), StepError> {
        match self.load(ctx)? {
            Some((relative, _, document)) if document.get(&self.field) != Some(&self.value) => {
                Err(StepError::invalid(format!(
                    "{} in {} was not updated",
                    self.field,
                    relative.display()
                )))
            }
            _ => Ok(()),
        }
    }
}

fn display_relative(root: &Path, path: &Path) -> String {
    path.strip_prefix(root)
        .unwrap_or(path)
        .display()
        .to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn setup() -> (TempDir, MigrationContext) {
        let dir = TempDir::new().unwrap();
        let ctx = MigrationContext::new(dir.path());
        (dir, ctx)
    }

    fn make_project(root: &Path, name: &str) {
        fs::create_dir_all(root.join(name).join("crew")).unwrap();
    }

    #[test]
    fn test_detect_projects_uses_markers() {
        let (dir, _) = setup();
        make_project(dir.path(), "alpha");
        make_project(dir.path(), "beta");
        fs::create_dir_all(dir.path().join("notes")).unwrap();
        fs::create_dir_all(dir.path().join(".hidden/crew")).unwrap();
        fs::create_dir_all(dir.path().join("coordinator/crew")).unwrap();

        let projects = detect_projects(dir.path()).unwrap();
        assert_eq!(
            projects,
            vec![dir.path().join("alpha"), dir.path().join("beta")]
        );
    }

    #[test]
    fn test_ensure_dirs_lifecycle() {
        let (dir, mut ctx) = setup();
        make_project(dir.path(), "alpha");
        let step = EnsureDirs::new("settings", "settings dirs", "settings", Targets::RootAndProjects);

        assert!(step.check(&ctx).unwrap());
        step.execute(&mut ctx).unwrap();
        step.verify(&ctx).unwrap();
        assert!(dir.path().join("settings").is_dir());
        assert!(dir.path().join("alpha/settings").is_dir());
        assert!(!step.check(&ctx).unwrap());

        step.rollback(&mut ctx).unwrap();
        assert!(!dir.path().join("settings").exists());
        assert!(!dir.path().join("alpha/settings").exists());
    }

    #[test]
    fn test_ensure_dirs_rollback_keeps_non_empty() {
        let (dir, mut ctx) = setup();
        let step = EnsureDirs::new("runtime", "runtime dir", ".runtime", Targets::Root);

        step.execute(&mut ctx).unwrap();
        fs::write(dir.path().join(".runtime/pid"), "1").unwrap();
        step.rollback(&mut ctx).unwrap();
        assert!(dir.path().join(".runtime/pid").exists());
    }

    #[test]
    fn test_write_file_rollback_restores_previous() {
        let (dir, mut ctx) = setup();
        let path = dir.path().join("conf/settings.json");
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(&path, "old").unwrap();

        let step = WriteFile::new("write", "write settings", "conf/settings.json", "new");
        assert!(step.check(&ctx).unwrap());
        step.execute(&mut ctx).unwrap();
        step.verify(&ctx).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "new");

        step.rollback(&mut ctx).unwrap();
        assert_eq!(fs::read_to_string(&path).unwrap(), "old");
    }

    #[test]
    fn test_write_file_rollback_removes_created() {
        let (dir, mut ctx) = setup();
        let step = WriteFile::new("write", "write settings", "a/b/settings.json", "{}");

        step.execute(&mut ctx).unwrap();
        assert!(dir.path().join("a/b/settings.json").exists());
        step.rollback(&mut ctx).unwrap();
        assert!(!dir.path().join("a").exists());
    }

    #[test]
    fn test_move_files_and_rollback() {
        let (dir, mut ctx) = setup();
        fs::write(dir.path().join("workspace.json"), "{\"name\":\"hq\"}").unwrap();
        fs::write(dir.path().join("projects.json"), "{}").unwrap();
        fs::create_dir(dir.path().join("coordinator")).unwrap();

        let step = MoveFiles::new(
            "move-config",
            "move config",
            [
                ("workspace.json", "coordinator/workspace.json"),
                ("projects.json", "coordinator/projects.json"),
                ("accounts.json", "coordinator/accounts.json"),
            ],
        );

        assert!(step.check(&ctx).unwrap());
        step.execute(&mut ctx).unwrap();
        step.verify(&ctx).unwrap();
        assert!(!dir.path().join("workspace.json").exists());
        assert_eq!(
            fs::read_to_string(dir.path().join("coordinator/workspace.json")).unwrap(),
            "{\"name\":\"hq\"}"
        );
        assert!(!step.check(&ctx).unwrap());

        step.rollback(&mut ctx).unwrap();
        assert!(dir.path().join("workspace.json").exists());
        assert!(dir.path().join("projects.json").exists());
        assert!(!dir.path().join("coordinator/workspace.json").exists());
    }

    #[test]
    fn test_move_files_requires_target_dir() {
        let (dir, mut ctx) = setup();
        fs::write(dir.path().join("workspace.json"), "{}").unwrap();
        let step = MoveFiles::new("move", "move", [("workspace.json", "missing/workspace.json")]);

        assert!(step.execute(&mut ctx).is_err());
        assert!(dir.path().join("workspace.json").exists());
    }

    #[test]
    fn test_replace_in_file() {
        let (dir, mut ctx) = setup();
        let routes = dir.path().join("routes.jsonl");
        fs::write(&routes, "{\"agent\":\"ws-coordinator\"}\n{\"agent\":\"ws-supervisor\"}\n").unwrap();
        let step = ReplaceInFile::new(
            "routes",
            "rename routes",
            "routes.jsonl",
            [
                ("\"ws-coordinator\"", "\"hq-coordinator\""),
                ("\"ws-supervisor\"", "\"hq-supervisor\""),
            ],
        );

        assert!(step.check(&ctx).unwrap());
        step.execute(&mut ctx).unwrap();
        step.verify(&ctx).unwrap();
        let content = fs::read_to_string(&routes).unwrap();
        assert!(content.contains("hq-coordinator") && content.contains("hq-supervisor"));

        step.rollback(&mut ctx).unwrap();
        assert!(fs::read_to_string(&routes).unwrap().contains("ws-coordinator"));
    }

    #[test]
    fn test_replace_in_missing_file_is_not_needed() {
        let (_dir, ctx) = setup();
        let step = ReplaceInFile::new("routes", "rename", "nope.jsonl", [("a", "b")]);
        assert!(!step.check(&ctx).unwrap());
        step.verify(&ctx).unwrap();
    }

    #[test]
    fn test_append_line() {
        let (dir, mut ctx) = setup();
        fs::write(dir.path().join(".gitignore"), "target").unwrap();
        let step = AppendLine::new("ignore", "ignore runtime", ".gitignore", ".runtime/")
            .with_comment("agent runtime state");

        assert!(step.check(&ctx).unwrap());
        step.execute(&mut ctx).unwrap();
        step.verify(&ctx).unwrap();
        assert_eq!(
            fs::read_to_string(dir.path().join(".gitignore")).unwrap(),
            "target\n# agent runtime state\n.runtime/\n"
        );
        assert!(!step.check(&ctx).unwrap());

        step.rollback(&mut ctx).unwrap();
        assert_eq!(fs::read_to_string(dir.path().join(".gitignore")).unwrap(), "target");
    }

    #[test]
    fn test_prune_empty_dirs() {
        let (dir, mut ctx) = setup();
        make_project(dir.path(), "alpha");
        fs::create_dir(dir.path().join(".agentyard")).unwrap();
        fs::create_dir(dir.path().join("alpha/.agentyard")).unwrap();
        fs::write(dir.path().join("alpha/.agentyard/keep"), "x").unwrap();

        let step = PruneEmptyDirs::new("prune", "prune legacy", ".agentyard", Targets::RootAndProjects);
        assert!(step.check(&ctx).unwrap());
        step.execute(&mut ctx).unwrap();
        step.verify(&ctx).unwrap();
        assert!(!dir.path().join(".agentyard").exists());
        assert!(dir.path().join("alpha/.agentyard/keep").exists());
        assert!(!step.check(&ctx).unwrap());

        step.rollback(&mut ctx).unwrap();
        assert!(dir.path().join(".agentyard").is_dir());
    }

    #[test]
    fn test_set_json_field() {
        let (dir, mut ctx) = setup();
        let path = dir.path().join("workspace.json");
        fs::write(&path, "{\"name\":\"hq\",\"version\":\"0.1.0\"}").unwrap();
        let step = SetJsonField::new(
            "stamp",
            "stamp version",
            "workspace.json",
            "version",
            Value::String("0.2.0".to_string()),
        );

        assert!(step.check(&ctx).unwrap());
        step.execute(&mut ctx).unwrap();
        step.verify(&ctx).unwrap();
        let doc: Value = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
        assert_eq!(doc["version"], "0.2.0");
        assert_eq!(doc["name"], "hq");

        step.rollback(&mut ctx).unwrap();
        assert_eq!(
            fs::read_to_string(&path).unwrap(),
            "{\"name\":\"hq\",\"version\":\"0.1.0\"}"
        );
    }

    #[test]
    fn test_set_json_field_follows_moved_file() {
        let (dir, mut ctx) = setup();
        fs::write(dir.path().join("workspace.json"), "{\"name\":\"hq\"}").unwrap();
        let step = SetJsonField::new(
            "stamp",
            "stamp version",
            "coordinator/workspace.json",
            "version",
            Value::String("0.2.0".to_string()),
        )
        .with_fallback("workspace.json");
        assert!(step.check(&ctx).unwrap());

        fs::create_dir(dir.path().join("coordinator")).unwrap();
        fs::rename(
            dir.path().join("workspace.json"),
            dir.path().join("coordinator/workspace.json"),
        )
        .unwrap();
        step.execute(&mut ctx).unwrap();
        step.verify(&ctx).unwrap();
        let doc: Value =
            serde_json::from_slice(&fs::read(dir.path().join("coordinator/workspace.json")).unwrap())
                .unwrap();
        assert_eq!(doc["version"], "0.2.0");
    }

    #[test]
    fn test_set_json_field_rejects_non_object() {
        let (dir, ctx) = setup();
        fs::write(dir.path().join("workspace.json"), "[1,2]").unwrap();
        let step = SetJsonField::new("stamp", "stamp", "workspace.json", "version", Value::Null);
        assert!(matches!(step.check(&ctx), Err(StepError::Invalid(_))));
    }
}
