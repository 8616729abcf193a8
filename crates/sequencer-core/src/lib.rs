//! Collaborator traits and shared data types for the `sequencer` command
//! scheduler.
//!
//! This crate owns only the boundaries described as "out of scope, external
//! collaborators" by the scheduler specification: the event bus
//! ([`event::EventSource`]), the event-sourced repository
//! ([`repository::Repository`]), and the precondition verifier
//! ([`repository::PreconditionVerifier`]); plus the data model both the
//! durable (`sequencer`) and in-memory (`sequencer-memory`) scheduler
//! variants share.

pub mod clock;
pub mod error;
pub mod event;
pub mod keyed_lock;
pub mod model;
pub mod repository;
pub mod scheduler;
pub mod store;

pub use clock::{Clock, SystemClock};
pub use error::{Error, ErrorKind, Result};
pub use event::{BusEvent, EventSource};
pub use keyed_lock::KeyedLock;
pub use model::{
    ActivityEvent, ApplyFailure, ApplyOutcome, CommandExecutionError, ScheduledCommand,
    ScheduledCommandEvent,
};
pub use repository::{AlwaysSatisfied, PreconditionVerifier, Repository};
pub use scheduler::{Component, NoopScheduler, ScheduleEvent, ScheduleGuard, Scheduler};
pub use store::{CommandStore, NewCommand};
