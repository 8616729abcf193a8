//! Test-only collaborators shared by the integration tests in this
//! directory. Mirrors `sequencer`'s own `tests/support.rs`: integration test
//! binaries in different crates can't share a `tests/` module directly, so
//! this is a deliberate duplicate rather than an extracted dependency.

use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;

use chrono::{DateTime, Utc};
use sequencer_core::model::{ApplyFailure, ApplyOutcome, ScheduledCommand, ScheduledCommandEvent};
use sequencer_core::{PreconditionVerifier, Repository};

pub fn scheduled_event(
    aggregate_id: &str,
    sequence_number: i64,
    due_time: Option<DateTime<Utc>>,
    requires_durable_scheduling: bool,
) -> ScheduledCommandEvent {
    ScheduledCommandEvent {
        aggregate_id: aggregate_id.to_string(),
        aggregate_type: "order".to_string(),
        sequence_number,
        command_name: "ship".to_string(),
        requires_durable_scheduling,
        serialized_command: "{}".to_string(),
        due_time,
        metadata: Default::default(),
        etag: None,
    }
}

/// A repository whose response to each `(aggregate_id, sequence_number)` is
/// scripted in advance by the test, and whose calls are recorded for
/// assertions.
#[derive(Default)]
pub struct ScriptedRepository {
    outcomes: Mutex<HashMap<(String, i64), Vec<ApplyOutcome>>>,
    calls: Mutex<Vec<(String, i64)>>,
}

impl ScriptedRepository {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue `outcome` to be returned the next time `key` is applied. If the
    /// queue for a key is exhausted, the last queued outcome repeats.
    pub fn push(&self, aggregate_id: &str, sequence_number: i64, outcome: ApplyOutcome) {
        self.outcomes
            .lock()
            .unwrap()
            .entry((aggregate_id.to_string(), sequence_number))
            .or_default()
            .push(outcome);
    }

    pub fn call_count(&self, aggregate_id: &str, sequence_number: i64) -> usize {
        self.calls
            .lock()
            .unwrap()
            .iter()
            .filter(|k| k.0 == aggregate_id && k.1 == sequence_number)
            .count()
    }
}

#[async_trait::async_trait]
impl Repository for ScriptedRepository {
    async fn apply_scheduled_command(
        &self,
        command: &ScheduledCommand,
        _verify: &dyn PreconditionVerifier,
    ) -> ApplyOutcome {
        let key = (command.aggregate_id.clone(), command.sequence_number);
        self.calls.lock().unwrap().push(key.clone());

        let mut outcomes = self.outcomes.lock().unwrap();
        let queue = outcomes.entry(key).or_default();

        if queue.len() > 1 {
            queue.remove(0)
        } else {
            queue.last().cloned().unwrap_or(ApplyOutcome::Succeeded)
        }
    }
}

pub fn retryable_failure(previous_attempts: u32) -> ApplyOutcome {
    ApplyOutcome::Failed(ApplyFailure {
        is_canceled: false,
        number_of_previous_attempts: previous_attempts,
        retry_after: Some(Duration::from_millis(50)),
        exception: "transient failure".to_string(),
    })
}

pub fn permanent_failure(previous_attempts: u32) -> ApplyOutcome {
    ApplyOutcome::Failed(ApplyFailure {
        is_canceled: true,
        number_of_previous_attempts: previous_attempts,
        retry_after: None,
        exception: "precondition permanently violated".to_string(),
    })
}

/// A precondition verifier that is never satisfied, for exercising the
/// timeout path.
pub struct NeverSatisfied;

#[async_trait::async_trait]
impl PreconditionVerifier for NeverSatisfied {
    async fn verify(&self, _command: &ScheduledCommand) -> bool {
        false
    }
}
