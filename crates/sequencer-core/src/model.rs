//! Shared data model: the entities described in spec §3.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// A named logical time source.
///
/// Identity is the `name`; `now` only ever moves forward (see
/// [`crate::error::Error::ClockMovedBackward`]).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Clock {
    pub name: String,
    pub now: DateTime<Utc>,
    pub start_time: DateTime<Utc>,
}

/// A single scheduled unit of work.
///
/// Identity is `(aggregate_id, sequence_number)`.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduledCommand {
    pub id: i64,
    pub aggregate_id: String,
    pub sequence_number: i64,
    pub aggregate_type: String,

    /// Opaque command payload. The scheduler never interprets this.
    pub serialized_command: String,
    pub command_name: String,

    pub created_time: DateTime<Utc>,
    pub due_time: Option<DateTime<Utc>>,
    pub applied_time: Option<DateTime<Utc>>,
    pub final_attempt_time: Option<DateTime<Utc>>,

    pub attempts: i64,
    pub clock_name: String,

    /// If true, this command was (or will be) elided from durable storage
    /// because it was due immediately and did not require durable
    /// scheduling (spec §4.5 step 3).
    pub non_durable: bool,
}

impl ScheduledCommand {
    /// Whether this command has reached a terminal, successful state.
    pub fn is_applied(&self) -> bool {
        self.applied_time.is_some()
    }

    /// Whether this command has reached a terminal, abandoned state.
    pub fn is_abandoned(&self) -> bool {
        self.final_attempt_time.is_some() && self.applied_time.is_none()
    }

    /// Whether this command is still eligible for future delivery.
    pub fn is_pending(&self) -> bool {
        !self.is_applied() && !self.is_abandoned()
    }
}

/// An append-only record of a failed delivery attempt.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct CommandExecutionError {
    pub id: i64,
    pub scheduled_command_id: i64,
    pub error: String,
    pub recorded_at: DateTime<Utc>,
}

/// The outcome of a single attempt to apply a command through the
/// repository (spec §6).
#[derive(Clone, Debug)]
pub enum ApplyOutcome {
    Succeeded,
    Failed(ApplyFailure),
}

/// A failed repository application attempt.
#[derive(Clone, Debug)]
pub struct ApplyFailure {
    pub is_canceled: bool,
    pub number_of_previous_attempts: u32,
    pub retry_after: Option<Duration>,
    pub exception: String,
}

impl ApplyFailure {
    /// Per spec §4.4: non-retryable iff canceled or no `retry_after`.
    pub fn is_permanent(&self) -> bool {
        self.is_canceled || self.retry_after.is_none()
    }
}

/// A scheduling request as carried by a `CommandScheduled<T>` bus event
/// (spec §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScheduledCommandEvent {
    pub aggregate_id: String,
    pub aggregate_type: String,
    pub sequence_number: i64,
    pub command_name: String,
    pub requires_durable_scheduling: bool,
    pub serialized_command: String,
    pub due_time: Option<DateTime<Utc>>,
    pub metadata: std::collections::BTreeMap<String, String>,
    pub etag: Option<String>,
}

impl ScheduledCommandEvent {
    /// The recognized `ClockName` metadata key (spec §4.1 priority (a)).
    pub const CLOCK_NAME_KEY: &'static str = "ClockName";

    pub fn clock_name_override(&self) -> Option<&str> {
        self.metadata.get(Self::CLOCK_NAME_KEY).map(String::as_str)
    }
}

/// A notification published on the activity stream (spec §6).
#[derive(Clone, Debug, Serialize, Deserialize)]
pub enum ActivityEvent {
    CommandScheduled {
        aggregate_id: String,
        sequence_number: i64,
        clock_name: String,
    },
    CommandSucceeded {
        aggregate_id: String,
        sequence_number: i64,
    },
    CommandRetried {
        aggregate_id: String,
        sequence_number: i64,
        due_time: DateTime<Utc>,
    },
    CommandAbandoned {
        aggregate_id: String,
        sequence_number: i64,
    },
}
