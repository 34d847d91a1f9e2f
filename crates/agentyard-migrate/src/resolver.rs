//! Migration path resolution.

use crate::error::MigrationError;
use crate::registry::{Migration, MigrationRegistry};
use crate::version::Version;

/// The ordered migrations that take a workspace to the latest version.
#[derive(Debug)]
pub struct MigrationPath<'a> {
    /// Starting version.
    pub from: Version,
    /// Version after the last migration, equal to `from` when empty.
    pub to: Version,
    /// Migrations in application order.
    pub migrations: Vec<&'a Migration>,
}

impl MigrationPath<'_> {
    /// Whether the workspace is already current.
    pub fn is_empty(&self) -> bool {
        self.migrations.is_empty()
    }

    /// Number of migrations in the path.
    pub fn len(&self) -> usize {
        self.migrations.len()
    }

    /// Migration ids in order.
    pub fn ids(&self) -> Vec<&str> {
        self.migrations.iter().map(|m| m.id()).collect()
    }
}

/// Resolve the chain of migrations starting at `current`.
///
/// An empty path means `current` is the latest version, or the registry is
/// empty. A version that matches nothing and is not the latest (including
/// one above the latest) is [`MigrationError::UnsupportedVersion`].
pub fn resolve(registry: &MigrationRegistry, current: Version) -> Result<MigrationPath<'_>, MigrationError> {
    let mut migrations = Vec::new();
    let mut version = current;

    // Registry validation guarantees every hop strictly increases the version.
    while let Some(migration) = registry.find(&version) {
        migrations.push(migration);
        version = migration.to_version();
    }

    if migrations.is_empty() {
        if let Some(latest) = registry.latest() {
            if current != latest {
                return Err(MigrationError::UnsupportedVersion { current, latest });
            }
        }
    }

    Ok(MigrationPath {
        from: current,
        to: version,
        migrations,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::version::VersionPattern;

    fn registry(pairs: &[(&str, &str, &str)]) -> MigrationRegistry {
        MigrationRegistry::new(
            pairs
                .iter()
                .map(|(id, from, to)| {
                    Migration::new(
                        *id,
                        VersionPattern::parse(from).unwrap(),
                        Version::parse(to).unwrap(),
                        "",
                    )
                })
                .collect(),
        )
        .unwrap()
    }

    #[test]
    fn test_resolve_chain() {
        let registry = registry(&[("b", "0.2.x", "0.3.0"), ("a", "0.1.x", "0.2.0")]);
        let path = resolve(&registry, Version::new(0, 1, 0)).unwrap();
        assert_eq!(path.ids(), vec!["a", "b"]);
        assert_eq!(path.to, Version::new(0, 3, 0));
    }

    #[test]
    fn test_resolve_at_latest_is_empty() {
        let registry = registry(&[("a", "0.1.x", "0.2.0")]);
        let path = resolve(&registry, Version::new(0, 2, 0)).unwrap();
        assert!(path.is_empty());
        assert_eq!(path.to, Version::new(0, 2, 0));
    }

    #[test]
    fn test_resolve_unsupported() {
        let registry = registry(&[("a", "0.1.x", "0.2.0")]);
        let err = resolve(&registry, Version::new(0, 0, 9)).unwrap_err();
        assert!(matches!(
            err,
            MigrationError::UnsupportedVersion { current, latest }
                if current == Version::new(0, 0, 9) && latest == Version::new(0, 2, 0)
        ));

        assert!(resolve(&registry, Version::new(0, 5, 0)).is_err());
    }

    #[test]
    fn test_resolve_partial_chain_stops_at_gap() {
        let registry = registry(&[("a", "0.1.x", "0.2.0"), ("c", "0.4.x", "0.5.0")]);
        let path = resolve(&registry, Version::new(0, 1, 2)).unwrap();
        assert_eq!(path.ids(), vec!["a"]);
        assert_eq!(path.to, Version::new(0, 2, 0));
    }

    #[test]
    fn test_resolve_empty_registry() {
        let registry = registry(&[]);
        assert!(resolve(&registry, Version::new(0, 1, 0)).unwrap().is_empty());
    }
}
