//! Per-run context handed to every step operation.

use std::any::Any;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Caller-supplied sink for progress messages: `(migration id, message)`.
pub type LogSink = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Context provided to each step.
///
/// Holds the workspace root, the dry-run flag, a logging sink and a keyed
/// store that lets a step hand data from `execute` to `rollback` or `verify`
/// (or to a later step) without keeping state on the step value itself.
pub struct MigrationContext {
    root: PathBuf,
    dry_run: bool,
    migration_id: String,
    sink: Option<LogSink>,
    store: HashMap<String, Box<dyn Any>>,
}

impl MigrationContext {
    /// Create a context rooted at the workspace directory.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            dry_run: false,
            migration_id: String::new(),
            sink: None,
            store: HashMap::new(),
        }
    }

    /// Mark this run as a dry run.
    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    /// Attach a progress sink in addition to tracing output.
    pub fn with_sink(mut self, sink: LogSink) -> Self {
        self.sink = Some(sink);
        self
    }

    /// Workspace root.
    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Resolve a workspace-relative path.
    pub fn path(&self, relative: impl AsRef<Path>) -> PathBuf {
        self.root.join(relative)
    }

    /// Whether this is a dry run.
    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Id of the migration currently running, empty before the first one.
    pub fn migration_id(&self) -> &str {
        &self.migration_id
    }

    pub(crate) fn set_migration(&mut self, migration_id: &str) {
        self.migration_id = migration_id.to_string();
    }

    /// Emit a progress message.
    pub fn log(&self, message: impl AsRef<str>) {
        let message = message.as_ref();
        tracing::info!(migration = %self.migration_id, "{}", message);
        if let Some(sink) = &self.sink {
            sink(&self.migration_id, message);
        }
    }

    /// Store a value under `key`, replacing any previous value.
    pub fn put<T: Any>(&mut self, key: impl Into<String>, value: T) {
        self.store.insert(key.into(), Box::new(value));
    }

    /// Borrow the value under `key` if it exists and has type `T`.
    pub fn get<T: Any>(&self, key: &str) -> Option<&T> {
        self.store.get(key).and_then(|value| value.downcast_ref::<T>())
    }

    /// Remove and return the value under `key` if it has type `T`.
    ///
    /// A value of another type is left in place.
    pub fn take<T: Any>(&mut self, key: &str) -> Option<T> {
        if self.get::<T>(key).is_none() {
            return None;
        }
        self.store
            .remove(key)
            .and_then(|value| value.downcast::<T>().ok())
            .map(|value| *value)
    }

    /// Whether a value is stored under `key`.
    pub fn contains(&self, key: &str) -> bool {
        self.store.contains_key(key)
    }
}

impl std::fmt::Debug for MigrationContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MigrationContext")
            .field("root", &self.root)
            .field("dry_run", &self.dry_run)
            .field("migration_id", &self.migration_id)
            .field("stored_keys", &self.store.keys().collect::<Vec<_>>())
            .finish()
    }
}
