//! The repository and precondition-verifier boundaries (spec §6). Both are
//! external collaborators: the scheduler only calls through these traits and
//! never interprets the command payload itself.

use crate::model::{ApplyOutcome, ScheduledCommand};

/// Applies a scheduled command to its aggregate and persists the resulting
/// events (spec §6). Out of scope for this crate beyond this call boundary.
#[async_trait::async_trait]
pub trait Repository: Send + Sync {
    /// Apply `command`. `verify` is threaded through so the repository can
    /// re-check the command's precondition immediately before applying it,
    /// per spec §4.3/§4.4.
    async fn apply_scheduled_command(
        &self,
        command: &ScheduledCommand,
        verify: &dyn PreconditionVerifier,
    ) -> ApplyOutcome;
}

/// Answers whether a command's prerequisite event is durably observable yet
/// (spec §4.3).
#[async_trait::async_trait]
pub trait PreconditionVerifier: Send + Sync {
    async fn verify(&self, command: &ScheduledCommand) -> bool;
}

/// A precondition verifier that is always satisfied. Useful as a default for
/// commands that have no precondition.
pub struct AlwaysSatisfied;

#[async_trait::async_trait]
impl PreconditionVerifier for AlwaysSatisfied {
    async fn verify(&self, _command: &ScheduledCommand) -> bool {
        true
    }
}
