//! Migrations shipped with the engine.
//!
//! Adding a migration means appending a constructor to [`migrations`]; the
//! registry validates the set when it is built.

use crate::error::MigrationError;
use crate::registry::{Migration, MigrationRegistry};
use crate::steps::{
    AppendLine, EnsureDirs, MoveFiles, PruneEmptyDirs, ReplaceInFile, SetJsonField, Targets,
};
use crate::version::{Version, VersionPattern};
use serde_json::Value;

/// Id of the 0.1 to 0.2 layout migration.
pub const V0_1_TO_V0_2: &str = "v0_1_to_v0_2";

/// All built-in migrations, in registration order.
pub fn migrations() -> Vec<Migration> {
    vec![v0_1_to_v0_2()]
}

/// A validated registry of the built-in migrations.
pub fn registry() -> Result<MigrationRegistry, MigrationError> {
    MigrationRegistry::new(migrations())
}

/// Moves coordinator config under `coordinator/` and adds per-project
/// settings and runtime directories.
fn v0_1_to_v0_2() -> Migration {
    let target = Version::new(0, 2, 0);

    Migration::new(
        V0_1_TO_V0_2,
        VersionPattern::minor(0, 1),
        target,
        "Move coordinator config under coordinator/ and add per-project settings and runtime directories",
    )
    .with_step(EnsureDirs::new(
        "create-coordinator-dir",
        "Create the coordinator/ directory",
        "coordinator",
        Targets::Root,
    ))
    .with_step(MoveFiles::new(
        "move-config-files",
        "Move workspace, project and account config into coordinator/",
        [
            ("workspace.json", "coordinator/workspace.json"),
            ("projects.json", "coordinator/projects.json"),
            ("accounts.json", "coordinator/accounts.json"),
        ],
    ))
    .with_step(EnsureDirs::new(
        "create-project-settings",
        "Create settings/ at the root and in every project",
        "settings",
        Targets::RootAndProjects,
    ))
    .with_step(EnsureDirs::new(
        "create-runtime-dirs",
        "Create .runtime/ at the root and in every project",
        ".runtime",
        Targets::RootAndProjects,
    ))
    .with_step(
        AppendLine::new(
            "ignore-runtime-dirs",
            "Ignore .runtime/ in the workspace .gitignore",
            ".gitignore",
            ".runtime/",
        )
        .with_comment("Agent runtime state"),
    )
    .with_step(ReplaceInFile::new(
        "rename-agent-routes",
        "Rename ws-* agent routes to hq-*",
        ".tasks/routes.jsonl",
        [
            ("\"ws-coordinator\"", "\"hq-coordinator\""),
            ("\"ws-supervisor\"", "\"hq-supervisor\""),
        ],
    ))
    .with_step(
        SetJsonField::new(
            "stamp-workspace-version",
            "Record the layout version in coordinator/workspace.json",
            "coordinator/workspace.json",
            "version",
            Value::String(target.to_string()),
        )
        .with_fallback("workspace.json"),
    )
    .with_step(PruneEmptyDirs::new(
        "prune-legacy-dirs",
        "Remove empty legacy .agentyard/ directories",
        ".agentyard",
        Targets::RootAndProjects,
    ))
}
