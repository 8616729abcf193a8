//! Internal wall-clock abstraction.
//!
//! This is distinct from the domain [`Clock`](crate::model::Clock) entity
//! that the scheduler persists and advances on behalf of callers. This trait
//! instead controls the ambient time source the scheduler itself uses for
//! bookkeeping (`createdTime`, sleeps while waiting on preconditions, etc.),
//! so that it can be swapped out for a deterministic source in tests without
//! touching every call site.

use std::time::Duration;

use chrono::{DateTime, Utc};

/// The ambient time source used throughout the scheduler.
///
/// In production the default [`SystemClock`] delegates to `chrono::Utc::now()`
/// and `tokio::time::sleep`. Deterministic tests (see `sequencer-memory`) can
/// substitute a controlled clock so sleeps resolve when simulated time is
/// advanced rather than when real time elapses.
#[async_trait::async_trait]
pub trait Clock: Send + Sync {
    /// The current wall-clock time.
    fn now(&self) -> DateTime<Utc>;

    /// Sleep for the given duration, returning once it has elapsed.
    async fn sleep(&self, duration: Duration);
}

/// The default clock, backed by real system time.
pub struct SystemClock;

#[async_trait::async_trait]
impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }

    async fn sleep(&self, duration: Duration) {
        tokio::time::sleep(duration).await
    }
}
