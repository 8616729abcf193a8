//! The in-memory command scheduler variant (spec §4.7): the same
//! `CommandStore` contract and delivery/precondition logic as the durable
//! engine, run entirely in-process against a [`VirtualClock`] so tests can
//! control time deterministically instead of sleeping real wall time.

pub mod clock;
pub mod store;

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use sequencer::delivery::{ActivityBus, DeliveryEngine};
use sequencer::precondition::PreconditionGate;
use sequencer_core::model::{ScheduledCommand, ScheduledCommandEvent};
use sequencer_core::{
    Clock, NewCommand, NoopScheduler, PreconditionVerifier, Repository, Result, Scheduler,
};

pub use self::clock::{install, VirtualClock, VirtualClockGuard, VIRTUAL_CLOCK_NAME};
pub use self::store::MemoryCommandStore;

/// Tunable knobs for the in-memory scheduler (spec §6, §4.7).
pub struct Config {
    /// Defaults to 3 seconds rather than the durable engine's 10: tests
    /// drive a [`VirtualClock`], so this bound is real wall time spent
    /// polling for an event, not simulated time, and should stay short.
    pub precondition_timeout: Duration,
    pub store_retry_limit: u32,
    /// Mirrors [`sequencer::config::Config::advance_poll_batch_size`].
    pub advance_poll_batch_size: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            precondition_timeout: Duration::from_secs(3),
            store_retry_limit: 64,
            advance_poll_batch_size: 256,
        }
    }
}

/// The assembled in-memory scheduler: a [`VirtualClock`], a
/// [`MemoryCommandStore`], and the same [`PreconditionGate`] /
/// [`DeliveryEngine`] the durable engine uses, parameterized over the
/// in-memory collaborators instead of a `sqlx::PgPool`.
pub struct MemoryEngine {
    clock: Arc<VirtualClock>,
    store: Arc<MemoryCommandStore>,
    precondition: Arc<PreconditionGate>,
    delivery: Arc<DeliveryEngine>,
    batch_size: u32,
}

impl MemoryEngine {
    pub fn builder(repository: Arc<dyn Repository>) -> MemoryEngineBuilder {
        MemoryEngineBuilder::new(repository)
    }

    pub fn clock(&self) -> Arc<VirtualClock> {
        self.clock.clone()
    }

    pub fn store(&self) -> Arc<MemoryCommandStore> {
        self.store.clone()
    }

    pub fn activity(&self) -> ActivityBus {
        self.delivery.activity()
    }

    /// Schedule a command directly (spec §4.5, collapsed to a direct call:
    /// the in-memory variant has no bus to subscribe to, so tests drive
    /// scheduling procedurally instead of through an `EventSource`).
    pub async fn schedule(&self, event: ScheduledCommandEvent) -> Result<()> {
        let now = self.clock.now();
        let due_time = event.due_time.unwrap_or(now);
        let due_now = due_time <= now;

        if due_now && !event.requires_durable_scheduling {
            let command = ScheduledCommand {
                id: 0,
                aggregate_id: event.aggregate_id,
                sequence_number: event.sequence_number,
                aggregate_type: event.aggregate_type,
                serialized_command: event.serialized_command,
                command_name: event.command_name,
                created_time: now,
                due_time: Some(due_time),
                applied_time: None,
                final_attempt_time: None,
                attempts: 0,
                clock_name: VIRTUAL_CLOCK_NAME.to_string(),
                non_durable: true,
            };

            tracing::debug!(
                target: "sequencer_memory",
                aggregate_id = %command.aggregate_id,
                sequence_number = command.sequence_number,
                "eliding storage for immediate non-durable command"
            );

            self.deliver_now(command).await;
            return Ok(());
        }

        let stored = self
            .store
            .put(NewCommand {
                aggregate_id: event.aggregate_id,
                aggregate_type: event.aggregate_type,
                sequence_number: event.sequence_number,
                command_name: event.command_name,
                serialized_command: event.serialized_command,
                created_time: now,
                due_time: Some(due_time),
                clock_name: VIRTUAL_CLOCK_NAME.to_string(),
            })
            .await?;

        if due_now {
            self.deliver_now(stored).await;
        }

        Ok(())
    }

    /// Deliver a command scheduled for "as soon as possible" (spec §4.5
    /// step 6): waits up to the configured precondition timeout for an
    /// unsatisfied precondition to turn true before attempting delivery
    /// regardless.
    async fn deliver_now(&self, command: ScheduledCommand) {
        let guard = self.clock.begin_delivery();
        self.precondition.wait_or_timeout(&command).await;

        if let Err(err) = self.delivery.deliver(&command).await {
            tracing::error!(target: "sequencer_memory", error = %err, "in-memory delivery failed");
        }

        drop(guard);
    }

    /// Deliver a command that fell due as a clock advanced past its
    /// `due_time` (spec §4.6 step 2). Re-verification of a still-unsatisfied
    /// precondition at due-time is the repository's job via the `verify`
    /// callback threaded into `Repository::apply_scheduled_command` (spec
    /// §4.4's tie-break note), not a bounded wait here — that wait is
    /// §4.5 step 6's job, run once at initial schedule-time dispatch.
    async fn deliver_due(&self, command: ScheduledCommand) {
        let guard = self.clock.begin_delivery();

        if let Err(err) = self.delivery.deliver(&command).await {
            tracing::error!(target: "sequencer_memory", error = %err, "in-memory delivery failed");
        }

        drop(guard);
    }

    /// Advance the virtual clock to `target`, deliver every command that
    /// falls due as a result, and block until quiescent (spec §4.6/§4.7).
    pub async fn advance_to(&self, target: DateTime<Utc>) -> Result<()> {
        self.clock.set_time(target)?;
        self.drain(target).await?;
        self.clock.wait_until_quiescent().await;
        Ok(())
    }

    /// Advance the virtual clock forward by `duration`. See
    /// [`Self::advance_to`].
    pub async fn advance_by(&self, duration: Duration) -> Result<()> {
        let target = self.clock.now()
            + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        self.advance_to(target).await
    }

    async fn drain(&self, as_of: DateTime<Utc>) -> Result<()> {
        loop {
            let due = self.store.due_on(VIRTUAL_CLOCK_NAME, as_of, self.batch_size).await?;
            if due.is_empty() {
                return Ok(());
            }

            // Commands sharing a due time may be delivered concurrently;
            // ordering across distinct due times is preserved by draining
            // one same-due-time group at a time (spec §5).
            let mut groups: Vec<Vec<ScheduledCommand>> = Vec::new();
            for command in due {
                match groups.last_mut() {
                    Some(last) if last[0].due_time == command.due_time => last.push(command),
                    _ => groups.push(vec![command]),
                }
            }

            for group in groups {
                join_all(group.into_iter().map(|command| self.deliver_due(command))).await;
            }
        }
    }
}

/// Constructs a [`MemoryEngine`]. Mirrors
/// [`sequencer::DurableEngineBuilder`]'s constructor-injection shape so both
/// variants are wired the same way.
pub struct MemoryEngineBuilder {
    config: Config,
    repository: Arc<dyn Repository>,
    verifier: Arc<dyn PreconditionVerifier>,
    scheduler: Arc<dyn Scheduler>,
    start_time: DateTime<Utc>,
}

impl MemoryEngineBuilder {
    pub fn new(repository: Arc<dyn Repository>) -> Self {
        Self {
            config: Config::default(),
            repository,
            verifier: Arc::new(sequencer_core::AlwaysSatisfied),
            scheduler: Arc::new(NoopScheduler),
            start_time: Utc::now(),
        }
    }

    pub fn config(mut self, config: Config) -> Self {
        self.config = config;
        self
    }

    pub fn precondition_verifier(mut self, verifier: Arc<dyn PreconditionVerifier>) -> Self {
        self.verifier = verifier;
        self
    }

    pub fn scheduler(mut self, scheduler: Arc<dyn Scheduler>) -> Self {
        self.scheduler = scheduler;
        self
    }

    pub fn start_time(mut self, start_time: DateTime<Utc>) -> Self {
        self.start_time = start_time;
        self
    }

    pub fn build(self) -> MemoryEngine {
        let batch_size = self.config.advance_poll_batch_size;
        let clock = VirtualClock::new(self.start_time);
        let store = Arc::new(MemoryCommandStore::new(self.config.store_retry_limit));
        let precondition =
            Arc::new(PreconditionGate::new(self.verifier.clone(), self.config.precondition_timeout));
        let activity = ActivityBus::new(1024);

        let clock_dyn: Arc<dyn Clock> = clock.clone();
        let delivery = Arc::new(DeliveryEngine::new(
            store.clone(),
            self.repository,
            self.verifier,
            self.scheduler,
            clock_dyn,
            activity,
        ));

        MemoryEngine { clock, store, precondition, delivery, batch_size }
    }
}
