//! Migrations and the registry that holds them.

use crate::error::MigrationError;
use crate::step::Step;
use crate::version::{Version, VersionPattern};
use std::collections::HashSet;

/// An ordered group of steps moving a workspace from one version to the next.
#[derive(Debug)]
pub struct Migration {
    id: String,
    from: VersionPattern,
    to: Version,
    description: String,
    steps: Vec<Box<dyn Step>>,
}

impl Migration {
    /// Create a migration with no steps.
    pub fn new(
        id: impl Into<String>,
        from: VersionPattern,
        to: Version,
        description: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            from,
            to,
            description: description.into(),
            steps: Vec::new(),
        }
    }

    /// Append a step.
    pub fn with_step(mut self, step: impl Step + 'static) -> Self {
        self.steps.push(Box::new(step));
        self
    }

    /// Append an already boxed step.
    pub fn with_boxed_step(mut self, step: Box<dyn Step>) -> Self {
        self.steps.push(step);
        self
    }

    /// Unique identifier.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Versions this migration applies to.
    pub fn from_pattern(&self) -> VersionPattern {
        self.from
    }

    /// Version after a successful run.
    pub fn to_version(&self) -> Version {
        self.to
    }

    /// Human-readable description.
    pub fn description(&self) -> &str {
        &self.description
    }

    /// Steps in execution order.
    pub fn steps(&self) -> &[Box<dyn Step>] {
        &self.steps
    }
}

/// The validated set of known migrations.
///
/// Construction rejects ambiguous or cyclic sets, so lookups never have to.
#[derive(Debug)]
pub struct MigrationRegistry {
    migrations: Vec<Migration>,
}

impl MigrationRegistry {
    /// Validate and build a registry.
    ///
    /// Fails with [`MigrationError::Configuration`] on an empty or duplicate
    /// migration id, duplicate step ids within a migration, overlapping source
    /// patterns, or a migration whose target is not above every source
    /// version it matches.
    pub fn new(migrations: Vec<Migration>) -> Result<Self, MigrationError> {
        let mut ids = HashSet::new();
        for (idx, migration) in migrations.iter().enumerate() {
            if migration.id.trim().is_empty() {
                return Err(MigrationError::Configuration(format!(
                    "migration #{idx} has an empty id"
                )));
            }
            if !ids.insert(migration.id.as_str()) {
                return Err(MigrationError::Configuration(format!(
                    "duplicate migration id {}",
                    migration.id
                )));
            }
            if !migration.from.is_below(&migration.to) {
                return Err(MigrationError::Configuration(format!(
                    "migration {} does not move forward ({} -> {})",
                    migration.id, migration.from, migration.to
                )));
            }

            let mut step_ids = HashSet::new();
            for step in &migration.steps {
                if step.id().trim().is_empty() {
                    return Err(MigrationError::Configuration(format!(
                        "migration {} has a step with an empty id",
                        migration.id
                    )));
                }
                if !step_ids.insert(step.id()) {
                    return Err(MigrationError::Configuration(format!(
                        "migration {} has duplicate step id {}",
                        migration.id,
                        step.id()
                    )));
                }
            }

            for earlier in &migrations[..idx] {
                if earlier.from.overlaps(&migration.from) {
                    return Err(MigrationError::Configuration(format!(
                        "migrations {} ({}) and {} ({}) have overlapping source versions",
                        earlier.id, earlier.from, migration.id, migration.from
                    )));
                }
            }
        }
        Ok(Self { migrations })
    }

    /// The migration whose source pattern matches `version`.
    pub fn find(&self, version: &Version) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.from.matches(version))
    }

    /// Look up a migration by id.
    pub fn get(&self, id: &str) -> Option<&Migration> {
        self.migrations.iter().find(|m| m.id == id)
    }

    /// Highest target version across all migrations.
    pub fn latest(&self) -> Option<Version> {
        self.migrations.iter().map(|m| m.to).max()
    }

    /// Migrations in registration order.
    pub fn iter(&self) -> impl Iterator<Item = &Migration> {
        self.migrations.iter()
    }

    /// Number of migrations.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Whether no migrations are registered.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::MigrationContext;
    use crate::error::StepError;

    struct Noop(&'static str);

    impl Step for Noop {
        fn id(&self) -> &str {
            self.0
        }
        fn description(&self) -> &str {
            "does nothing"
        }
        fn check(&self, _ctx: &MigrationContext) -> Result<bool, StepError> {
            Ok(false)
        }
        fn execute(&self, _ctx: &mut MigrationContext) -> Result<(), StepError> {
            Ok(())
        }
        fn rollback(&self, _ctx: &mut MigrationContext) -> Result<(), StepError> {
            Ok(())
        }
        fn verify(&self, _ctx: &MigrationContext) -> Result<(), StepError> {
            Ok(())
        }
    }

    fn migration(id: &str, from: &str, to: &str) -> Migration {
        Migration::new(
            id,
            VersionPattern::parse(from).unwrap(),
            Version::parse(to).unwrap(),
            format!("{from} to {to}"),
        )
        .with_step(Noop("noop"))
    }

    #[test]
    fn test_find_and_latest() {
        let registry = MigrationRegistry::new(vec![
            migration("a", "0.1.x", "0.2.0"),
            migration("b", "0.2.x", "0.3.0"),
        ])
        .unwrap();

        assert_eq!(registry.find(&Version::new(0, 1, 7)).unwrap().id(), "a");
        assert_eq!(registry.find(&Version::new(0, 2, 0)).unwrap().id(), "b");
        assert!(registry.find(&Version::new(0, 3, 0)).is_none());
        assert_eq!(registry.latest(), Some(Version::new(0, 3, 0)));
        assert_eq!(registry.get("b").unwrap().steps().len(), 1);
    }

    #[test]
    fn test_empty_registry() {
        let registry = MigrationRegistry::new(Vec::new()).unwrap();
        assert!(registry.is_empty());
        assert_eq!(registry.latest(), None);
    }

    #[test]
    fn test_duplicate_pattern_rejected() {
        let err = MigrationRegistry::new(vec![
            migration("a", "0.2.x", "0.3.0"),
            migration("b", "0.2.x", "0.4.0"),
        ])
        .unwrap_err();
        assert!(matches!(err, MigrationError::Configuration(_)));
    }

    #[test]
    fn test_overlapping_pattern_rejected() {
        let err = MigrationRegistry::new(vec![
            migration("a", "0.2.x", "0.3.0"),
            migration("b", "0.2.4", "0.3.0"),
        ])
        .unwrap_err();
        assert!(matches!(err, MigrationError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_id_rejected() {
        let err = MigrationRegistry::new(vec![
            migration("a", "0.1.x", "0.2.0"),
            migration("a", "0.2.x", "0.3.0"),
        ])
        .unwrap_err();
        assert!(matches!(err, MigrationError::Configuration(_)));
    }

    #[test]
    fn test_backward_migration_rejected() {
        let err = MigrationRegistry::new(vec![migration("a", "0.2.x", "0.2.5")]).unwrap_err();
        assert!(matches!(err, MigrationError::Configuration(_)));
    }

    #[test]
    fn test_duplicate_step_id_rejected() {
        let m = migration("a", "0.1.x", "0.2.0").with_step(Noop("noop"));
        let err = MigrationRegistry::new(vec![m]).unwrap_err();
        assert!(matches!(err, MigrationError::Configuration(_)));
    }
}
