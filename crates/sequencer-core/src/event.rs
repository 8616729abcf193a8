//! The event bus boundary (spec §6). Delivery of events is out of scope —
//! only the trait the scheduling front-end and precondition gate consume is
//! owned here.

use crate::model::ScheduledCommandEvent;

/// A single notification read from the bus.
#[derive(Clone, Debug)]
pub enum BusEvent {
    /// A `CommandScheduled<T>` event (spec §6).
    CommandScheduled(ScheduledCommandEvent),

    /// Any other domain event. The precondition gate (spec §4.3) re-verifies
    /// outstanding preconditions whenever one of these arrives, since it may
    /// be the prerequisite event a pending command is waiting on.
    Other,
}

/// A source of bus events the scheduling front-end and precondition gate
/// react to.
///
/// Delivery of events onto the bus, and everything upstream of it, is out of
/// scope for this crate (spec §1); only this trait boundary is owned here.
#[async_trait::async_trait]
pub trait EventSource: Send {
    /// Wait for and return the next bus event.
    async fn next(&mut self) -> anyhow::Result<BusEvent>;
}
