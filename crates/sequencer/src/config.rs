use std::time::Duration;

/// Tunable knobs for the durable scheduler (spec §6 "Configuration
/// options", plus the ambient operational knobs every durable-style
/// component in this family carries).
pub struct Config {
    /// The clock name used when a `CommandScheduled` event names no clock
    /// and no [`ClockNameResolver`](crate::frontend::ClockNameResolver)
    /// callback or [`ClockMapping`](sequencer_core::model::Clock) match
    /// applies (spec §4.1 priority (d)).
    pub default_clock_name: String,

    /// How long the scheduling front-end waits for an unsatisfied
    /// precondition to become true before delivering the command anyway
    /// (spec §4.3). Default is 10 seconds for the durable scheduler (the
    /// in-memory variant in `sequencer-memory` defaults this to 3 seconds).
    pub precondition_timeout: Duration,

    /// The page size used by the clock advancement driver when draining due
    /// commands (spec §4.6 step 2's "repeatedly fetch"). Kept small enough
    /// that a single advancement doesn't hold an unbounded number of
    /// deliveries in flight at once.
    pub advance_poll_batch_size: u32,

    /// The maximum number of times [`crate::store::PgCommandStore::put`]
    /// will retry a scheduler-assigned sequence number collision (spec
    /// §4.2, §9) before giving up. Bounds the decrement loop under
    /// pathological contention on a single aggregate.
    pub store_retry_limit: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            default_clock_name: "default".to_string(),
            precondition_timeout: Duration::from_secs(10),
            advance_poll_batch_size: 256,
            store_retry_limit: 64,
        }
    }
}
