//! Workspace versions and the version-pattern grammar.
//!
//! A [`Version`] is `major.minor.patch`. A [`VersionPattern`] is either an
//! exact version (`0.2.0`) or a minor line with a wildcard patch (`0.2.x`).
//! Matching is structural; no other wildcard positions are accepted.

use crate::error::MigrationError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// A workspace structure version.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Version {
    /// Major component.
    pub major: u32,
    /// Minor component.
    pub minor: u32,
    /// Patch component.
    pub patch: u32,
}

impl Version {
    /// Create a version from its components.
    pub const fn new(major: u32, minor: u32, patch: u32) -> Self {
        Self {
            major,
            minor,
            patch,
        }
    }

    /// Parse `X.Y.Z`, with an optional leading `v`.
    pub fn parse(input: &str) -> Result<Self, MigrationError> {
        let [major, minor, patch] = split_components(input)?;
        Ok(Self {
            major: parse_component(input, major)?,
            minor: parse_component(input, minor)?,
            patch: parse_component(input, patch)?,
        })
    }
}

impl fmt::Display for Version {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl FromStr for Version {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Version::parse(s)
    }
}

impl TryFrom<String> for Version {
    type Error = MigrationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Version::parse(&value)
    }
}

impl From<Version> for String {
    fn from(version: Version) -> Self {
        version.to_string()
    }
}

/// The set of source versions a migration applies to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum VersionPattern {
    /// Exactly one version, e.g. `0.2.0`.
    Exact(Version),
    /// Any patch of one minor line, e.g. `0.2.x`.
    Minor {
        /// Major component.
        major: u32,
        /// Minor component.
        minor: u32,
    },
}

impl VersionPattern {
    /// Pattern matching any patch of `major.minor`.
    pub const fn minor(major: u32, minor: u32) -> Self {
        VersionPattern::Minor { major, minor }
    }

    /// Pattern matching exactly `version`.
    pub const fn exact(version: Version) -> Self {
        VersionPattern::Exact(version)
    }

    /// Parse `X.Y.Z` or `X.Y.x`.
    pub fn parse(input: &str) -> Result<Self, MigrationError> {
        let [major, minor, patch] = split_components(input)?;
        let major = parse_component(input, major)?;
        let minor = parse_component(input, minor)?;
        if patch == "x" {
            return Ok(VersionPattern::Minor { major, minor });
        }
        Ok(VersionPattern::Exact(Version::new(
            major,
            minor,
            parse_component(input, patch)?,
        )))
    }

    /// Whether `version` falls inside this pattern.
    pub fn matches(&self, version: &Version) -> bool {
        match self {
            VersionPattern::Exact(exact) => exact == version,
            VersionPattern::Minor { major, minor } => {
                version.major == *major && version.minor == *minor
            }
        }
    }

    /// Whether some version matches both patterns.
    pub fn overlaps(&self, other: &VersionPattern) -> bool {
        match (self, other) {
            (VersionPattern::Exact(a), _) => other.matches(a),
            (_, VersionPattern::Exact(b)) => self.matches(b),
            (
                VersionPattern::Minor { major, minor },
                VersionPattern::Minor {
                    major: other_major,
                    minor: other_minor,
                },
            ) => major == other_major && minor == other_minor,
        }
    }

    /// Whether every version matched by this pattern is strictly below `version`.
    pub fn is_below(&self, version: &Version) -> bool {
        match self {
            VersionPattern::Exact(exact) => exact < version,
            VersionPattern::Minor { major, minor } => (*major, *minor) < (version.major, version.minor),
        }
    }
}

impl fmt::Display for VersionPattern {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionPattern::Exact(version) => write!(f, "{version}"),
            VersionPattern::Minor { major, minor } => write!(f, "{major}.{minor}.x"),
        }
    }
}

impl FromStr for VersionPattern {
    type Err = MigrationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        VersionPattern::parse(s)
    }
}

fn split_components(input: &str) -> Result<[&str; 3], MigrationError> {
    let trimmed = input.trim();
    let body = trimmed.strip_prefix('v').unwrap_or(trimmed);
    let mut parts = body.split('.');
    match (parts.next(), parts.next(), parts.next(), parts.next()) {
        (Some(major), Some(minor), Some(patch), None) => Ok([major, minor, patch]),
        _ => Err(MigrationError::InvalidVersion {
            input: input.to_string(),
            reason: "expected three dot-separated components",
        }),
    }
}

fn parse_component(input: &str, component: &str) -> Result<u32, MigrationError> {
    if component.is_empty() || !component.bytes().all(|b| b.is_ascii_digit()) {
        return Err(MigrationError::InvalidVersion {
            input: input.to_string(),
            reason: "components must be unsigned integers (wildcard only allowed in patch position)",
        });
    }
    component.parse().map_err(|_| MigrationError::InvalidVersion {
        input: input.to_string(),
        reason: "component out of range",
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_version() {
        assert_eq!(Version::parse("0.1.3").unwrap(), Version::new(0, 1, 3));
        assert_eq!(Version::parse("v1.20.0").unwrap(), Version::new(1, 20, 0));
        assert_eq!(Version::parse(" 2.0.1 ").unwrap(), Version::new(2, 0, 1));
    }

    #[test]
    fn test_parse_version_rejects_bad_shapes() {
        for input in ["", "0.1", "0.1.2.3", "0.1.x", "a.b.c", "0..1", "0.1.+2", "-1.0.0"] {
            assert!(
                matches!(Version::parse(input), Err(MigrationError::InvalidVersion { .. })),
                "{input:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_version_ordering() {
        assert!(Version::new(0, 1, 9) < Version::new(0, 2, 0));
        assert!(Version::new(0, 10, 0) > Version::new(0, 9, 99));
        assert!(Version::new(1, 0, 0) > Version::new(0, 99, 99));
    }

    #[test]
    fn test_version_serde_as_string() {
        let json = serde_json::to_string(&Version::new(0, 2, 0)).unwrap();
        assert_eq!(json, "\"0.2.0\"");
        let back: Version = serde_json::from_str("\"0.3.1\"").unwrap();
        assert_eq!(back, Version::new(0, 3, 1));
        assert!(serde_json::from_str::<Version>("\"0.3\"").is_err());
    }

    #[test]
    fn test_pattern_parse_and_display() {
        assert_eq!(VersionPattern::parse("0.1.x").unwrap(), VersionPattern::minor(0, 1));
        assert_eq!(
            VersionPattern::parse("0.2.0").unwrap(),
            VersionPattern::exact(Version::new(0, 2, 0))
        );
        assert_eq!(VersionPattern::minor(3, 4).to_string(), "3.4.x");
        assert!(VersionPattern::parse("0.x.x").is_err());
        assert!(VersionPattern::parse("x.1.0").is_err());
        assert!(VersionPattern::parse("0.1.*").is_err());
        assert!(VersionPattern::parse("0.1.X").is_err());
    }

    #[test]
    fn test_pattern_matching() {
        let line = VersionPattern::minor(0, 1);
        assert!(line.matches(&Version::new(0, 1, 0)));
        assert!(line.matches(&Version::new(0, 1, 3)));
        assert!(!line.matches(&Version::new(0, 2, 0)));
        assert!(!line.matches(&Version::new(1, 1, 0)));

        let exact = VersionPattern::exact(Version::new(0, 2, 0));
        assert!(exact.matches(&Version::new(0, 2, 0)));
        assert!(!exact.matches(&Version::new(0, 2, 1)));
    }

    #[test]
    fn test_pattern_overlap_and_ordering() {
        let line = VersionPattern::minor(0, 2);
        let exact = VersionPattern::exact(Version::new(0, 2, 5));
        assert!(line.overlaps(&exact));
        assert!(exact.overlaps(&line));
        assert!(!line.overlaps(&VersionPattern::minor(0, 3)));

        assert!(line.is_below(&Version::new(0, 3, 0)));
        assert!(!line.is_below(&Version::new(0, 2, 9)));
        assert!(exact.is_below(&Version::new(0, 2, 6)));
    }
}
