//! The command store contract (spec §4.2), shared by the Postgres-backed
//! durable store and the in-memory variant.

use chrono::{DateTime, Utc};

use crate::error::Result;
use crate::model::ScheduledCommand;

/// A request to persist a newly scheduled command.
#[derive(Clone, Debug)]
pub struct NewCommand {
    pub aggregate_id: String,
    pub aggregate_type: String,
    /// A negative value is the "please assign" sentinel (spec §4.2, §9):
    /// the store will decrement it on collision until an unused slot is
    /// found. A non-negative value is caller-assigned and collisions are
    /// surfaced as [`crate::error::ErrorKind::DuplicateSchedule`].
    pub sequence_number: i64,
    pub command_name: String,
    pub serialized_command: String,
    pub created_time: DateTime<Utc>,
    pub due_time: Option<DateTime<Utc>>,
    pub clock_name: String,
}

/// The durable (or in-memory) store of [`ScheduledCommand`] and
/// [`crate::model::CommandExecutionError`] rows.
///
/// Implementors must provide at-least read-committed isolation with unique
/// key enforcement on `(aggregate_id, sequence_number)`, per spec §4.2/§5.
///
/// The three `record_*` methods each perform the "increment attempts, then
/// record the outcome" step of spec §4.4 step 5 as a single atomic unit —
/// they are not built from smaller composable primitives so that
/// implementations can guarantee the failure-atomicity requirement of
/// spec §5 without relying on callers to sequence several calls inside a
/// shared transaction.
#[async_trait::async_trait]
pub trait CommandStore: Send + Sync {
    /// Insert a new command, retrying scheduler-assigned sequence number
    /// collisions as described on [`NewCommand::sequence_number`]. Returns
    /// the inserted row.
    async fn put(&self, command: NewCommand) -> Result<ScheduledCommand>;

    /// Load a single command by its identity.
    async fn load(
        &self,
        aggregate_id: &str,
        sequence_number: i64,
    ) -> Result<Option<ScheduledCommand>>;

    /// Up to `limit` pending commands on `clock_name` whose `due_time <=
    /// as_of`, ordered by `(due_time, sequence_number)` ascending. Callers
    /// drain a clock by calling this repeatedly until it returns empty
    /// (spec §4.6 step 2), so `limit` only bounds how much is held in
    /// flight per round, not how much is eventually delivered.
    async fn due_on(
        &self,
        clock_name: &str,
        as_of: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ScheduledCommand>>;

    /// Increment `attempts` and set `applied_time := at`.
    async fn record_success(&self, id: i64, at: DateTime<Utc>) -> Result<()>;

    /// Increment `attempts`, push `due_time` forward to `new_due_time`, and
    /// append a [`crate::model::CommandExecutionError`] row.
    async fn record_retry(
        &self,
        id: i64,
        new_due_time: DateTime<Utc>,
        serialized_error: &str,
    ) -> Result<()>;

    /// Increment `attempts`, set `final_attempt_time := at`, and append a
    /// [`crate::model::CommandExecutionError`] row.
    async fn record_abandonment(
        &self,
        id: i64,
        at: DateTime<Utc>,
        serialized_error: &str,
    ) -> Result<()>;
}
