//! The step contract.

use crate::context::MigrationContext;
use crate::error::StepError;

/// The smallest unit of a migration.
///
/// The runner calls `check` on every step first. `execute` runs only for steps
/// that reported needed, `verify` runs for every step afterwards, and
/// `rollback` runs at most once, in reverse order, for steps that executed.
///
/// `check` and `verify` get a shared context: they must not mutate the
/// workspace.
pub trait Step: Send + Sync {
    /// Stable identifying slug, unique within its migration.
    fn id(&self) -> &str;

    /// Human-readable description.
    fn description(&self) -> &str;

    /// Whether the change still needs to be applied.
    fn check(&self, ctx: &MigrationContext) -> Result<bool, StepError>;

    /// Apply the change.
    fn execute(&self, ctx: &mut MigrationContext) -> Result<(), StepError>;

    /// Best-effort undo of a successful `execute`.
    fn rollback(&self, ctx: &mut MigrationContext) -> Result<(), StepError>;

    /// Confirm the post-condition holds.
    fn verify(&self, ctx: &MigrationContext) -> Result<(), StepError>;
}

impl std::fmt::Debug for dyn Step {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Step")
            .field("id", &self.id())
            .field("description", &self.description())
            .finish()
    }
}
