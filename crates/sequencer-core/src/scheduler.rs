//! Scheduler trait for deterministic interleaving control in tests.
//!
//! The [`Scheduler`] trait lets a test harness gate each concurrently
//! running piece of the command scheduler behind a permit, so it can
//! deterministically control execution order. In production the default
//! [`NoopScheduler`] never blocks.

use std::fmt;

/// Identifies a part of the scheduler that is requesting permission to
/// proceed.
#[derive(Clone, Debug)]
pub enum Component {
    /// The clock advancement driver is about to drain due commands for a
    /// named clock.
    ClockAdvance { clock: String },

    /// The delivery engine is about to attempt delivery of a command.
    Deliver { aggregate_id: String, sequence_number: i64 },

    /// The precondition gate is about to re-verify a command's precondition.
    PreconditionCheck { aggregate_id: String, sequence_number: i64 },

    /// The scheduling front-end is about to process a `CommandScheduled`
    /// event from the bus.
    FrontendDispatch,

    /// A user-defined component for downstream consumers of this crate.
    Custom(std::borrow::Cow<'static, str>),
}

/// Events emitted by the scheduler at key state transitions, delivered to
/// the [`Scheduler`] for logging, assertions, or driving test decisions.
#[derive(Clone, Debug)]
pub enum ScheduleEvent {
    /// A command was durably stored (or elided, if non-durable).
    CommandScheduled { aggregate_id: String, sequence_number: i64 },

    /// A command was successfully applied.
    CommandApplied { aggregate_id: String, sequence_number: i64 },

    /// A command failed and was rescheduled.
    CommandRescheduled {
        aggregate_id: String,
        sequence_number: i64,
        due_time: chrono::DateTime<chrono::Utc>,
    },

    /// A command failed permanently and was abandoned.
    CommandAbandoned { aggregate_id: String, sequence_number: i64 },

    /// A clock was advanced to a new `now`.
    ClockAdvanced { clock: String, now: chrono::DateTime<chrono::Utc> },
}

/// RAII guard returned by [`Scheduler::acquire`].
///
/// While held, the scheduler knows the component is actively executing.
/// Dropping the guard signals that the step completed. The default
/// implementation is a no-op.
pub struct ScheduleGuard {
    inner: Option<Box<dyn FnOnce() + Send>>,
}

impl ScheduleGuard {
    /// Create a no-op guard.
    pub fn noop() -> Self {
        Self { inner: None }
    }

    /// Create a guard that calls `f` when dropped.
    pub fn on_drop(f: impl FnOnce() + Send + 'static) -> Self {
        Self { inner: Some(Box::new(f)) }
    }
}

impl Drop for ScheduleGuard {
    fn drop(&mut self) {
        if let Some(f) = self.inner.take() {
            f();
        }
    }
}

impl fmt::Debug for ScheduleGuard {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScheduleGuard")
            .field("has_callback", &self.inner.is_some())
            .finish()
    }
}

/// Controls execution order of concurrently running scheduler components.
///
/// The default [`NoopScheduler`] never blocks and ignores all events. A
/// deterministic test scheduler can gate `acquire` calls to force a
/// particular interleaving and record `notify` events for assertions.
#[async_trait::async_trait]
pub trait Scheduler: Send + Sync {
    /// Called before a component does work. May delay arbitrarily to
    /// control ordering. Returns a guard held while the component runs.
    async fn acquire(&self, component: Component) -> ScheduleGuard;

    /// Informational notification of a state transition.
    fn notify(&self, event: ScheduleEvent);
}

/// A scheduler that never blocks and ignores all events. Used in production.
pub struct NoopScheduler;

#[async_trait::async_trait]
impl Scheduler for NoopScheduler {
    async fn acquire(&self, _component: Component) -> ScheduleGuard {
        ScheduleGuard::noop()
    }

    fn notify(&self, _event: ScheduleEvent) {}
}
