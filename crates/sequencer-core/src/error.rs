//! Error types shared between the durable and in-memory scheduler variants.

/// An opaque error returned by scheduler operations.
///
/// Use [`Error::kind`] to inspect which error kind occurred without matching
/// on the (private) variant data directly.
#[derive(Debug, thiserror::Error)]
#[error(transparent)]
pub struct Error(ErrorData);

impl Error {
    pub fn kind(&self) -> ErrorKind {
        match &self.0 {
            ErrorData::DuplicateSchedule { .. } => ErrorKind::DuplicateSchedule,
            ErrorData::ClockMovedBackward { .. } => ErrorKind::ClockMovedBackward,
            ErrorData::StoreUnavailable(_) => ErrorKind::StoreUnavailable,
        }
    }

    pub fn duplicate_schedule(aggregate_id: impl Into<String>, sequence_number: i64) -> Self {
        Self(ErrorData::DuplicateSchedule {
            aggregate_id: aggregate_id.into(),
            sequence_number,
        })
    }

    pub fn clock_moved_backward(
        clock: impl Into<String>,
        current: chrono::DateTime<chrono::Utc>,
        target: chrono::DateTime<chrono::Utc>,
    ) -> Self {
        Self(ErrorData::ClockMovedBackward {
            clock: clock.into(),
            current,
            target,
        })
    }
}

/// The kind of error that occurred, for callers that want to branch on it
/// without downcasting.
#[non_exhaustive]
#[derive(Copy, Clone, Debug, Eq, PartialEq)]
pub enum ErrorKind {
    /// `(aggregateId, sequenceNumber)` already present and the caller
    /// supplied a non-negative (caller-assigned) sequence number.
    DuplicateSchedule,

    /// An `advance` target was older than the clock's current `now`.
    ClockMovedBackward,

    /// A transient error communicating with the command store.
    StoreUnavailable,
}

#[derive(Debug, thiserror::Error)]
enum ErrorData {
    #[error(
        "a scheduled command already exists for aggregate {aggregate_id:?} at sequence number \
         {sequence_number}"
    )]
    DuplicateSchedule {
        aggregate_id: String,
        sequence_number: i64,
    },

    #[error(
        "clock {clock:?} cannot be moved backward: current now is {current}, requested target \
         was {target}"
    )]
    ClockMovedBackward {
        clock: String,
        current: chrono::DateTime<chrono::Utc>,
        target: chrono::DateTime<chrono::Utc>,
    },

    #[error("the command store is unavailable: {0}")]
    StoreUnavailable(#[source] anyhow::Error),
}

impl From<anyhow::Error> for Error {
    fn from(value: anyhow::Error) -> Self {
        Self(ErrorData::StoreUnavailable(value))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
