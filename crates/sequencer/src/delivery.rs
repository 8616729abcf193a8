//! The delivery engine (spec §4.4): attempts to apply one scheduled command
//! and drives it to its next state.

use std::sync::Arc;

use sequencer_core::model::{ActivityEvent, ApplyOutcome, ScheduledCommand};
use sequencer_core::scheduler::{Component, ScheduleEvent};
use sequencer_core::{Clock, CommandStore, PreconditionVerifier, Repository, Result, Scheduler};
use tokio::sync::broadcast;

/// A fan-out of state transitions, for callers that want to observe the
/// scheduler's activity without polling the store (spec §6 "activity
/// stream"). Mirrors the broadcast channel the teacher threads through
/// `SharedState::notifications`.
#[derive(Clone)]
pub struct ActivityBus {
    sender: broadcast::Sender<ActivityEvent>,
}

impl ActivityBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ActivityEvent> {
        self.sender.subscribe()
    }

    pub(crate) fn publish(&self, event: ActivityEvent) {
        // No subscribers is a routine case (e.g. in tests); the send result
        // is not actionable.
        let _ = self.sender.send(event);
    }
}

/// Attempts delivery of scheduled commands and records the outcome.
pub struct DeliveryEngine {
    store: Arc<dyn CommandStore>,
    repository: Arc<dyn Repository>,
    verifier: Arc<dyn PreconditionVerifier>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    activity: ActivityBus,
}

impl DeliveryEngine {
    pub fn new(
        store: Arc<dyn CommandStore>,
        repository: Arc<dyn Repository>,
        verifier: Arc<dyn PreconditionVerifier>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        activity: ActivityBus,
    ) -> Self {
        Self { store, repository, verifier, scheduler, clock, activity }
    }

    pub fn activity(&self) -> ActivityBus {
        self.activity.clone()
    }

    /// Perform one delivery attempt for `command` (spec §4.4 steps 1-5).
    ///
    /// Step 1's "command context binding the command and a synthetic clock
    /// pinned to its due time" is the `command` argument itself: `command`
    /// already carries `due_time`, so the repository observes the command's
    /// due time as `domain.now()` simply by reading the field it was
    /// handed, without this engine needing to install an ambient clock.
    ///
    /// Distributed atomicity between the repository's own persistence and
    /// this engine's store update is not attempted: on a crash between the
    /// two, the command is redelivered on the next due-scan and the
    /// repository call is expected to be idempotent against that, exactly as
    /// permitted by spec §5's "at-least-once between repository commit and
    /// store update" resolution.
    pub async fn deliver(&self, command: &ScheduledCommand) -> Result<()> {
        let guard = self
            .scheduler
            .acquire(Component::Deliver {
                aggregate_id: command.aggregate_id.clone(),
                sequence_number: command.sequence_number,
            })
            .await;

        tracing::debug!(
            target: "sequencer::delivery",
            aggregate_id = %command.aggregate_id,
            sequence_number = command.sequence_number,
            attempts = command.attempts,
            "attempting delivery"
        );

        let outcome = self.repository.apply_scheduled_command(command, self.verifier.as_ref()).await;

        let result = match outcome {
            ApplyOutcome::Succeeded => self.record_success(command).await,
            ApplyOutcome::Failed(failure) if failure.is_permanent() => {
                self.record_abandonment(command, &failure.exception).await
            }
            ApplyOutcome::Failed(failure) => {
                let retry_after = failure
                    .retry_after
                    .expect("retry_after is Some whenever is_permanent() is false");
                self.record_retry(command, retry_after, &failure.exception).await
            }
        };

        drop(guard);
        result
    }

    async fn record_success(&self, command: &ScheduledCommand) -> Result<()> {
        let now = self.clock.now();
        self.store.record_success(command.id, now).await?;

        self.scheduler.notify(ScheduleEvent::CommandApplied {
            aggregate_id: command.aggregate_id.clone(),
            sequence_number: command.sequence_number,
        });
        self.activity.publish(ActivityEvent::CommandSucceeded {
            aggregate_id: command.aggregate_id.clone(),
            sequence_number: command.sequence_number,
        });

        tracing::info!(
            target: "sequencer::delivery",
            aggregate_id = %command.aggregate_id,
            sequence_number = command.sequence_number,
            "command applied"
        );

        Ok(())
    }

    async fn record_retry(
        &self,
        command: &ScheduledCommand,
        retry_after: std::time::Duration,
        exception: &str,
    ) -> Result<()> {
        let retry_after = chrono::Duration::from_std(retry_after).unwrap_or(chrono::Duration::zero());
        let new_due_time = self.clock.now() + retry_after;

        self.store.record_retry(command.id, new_due_time, exception).await?;

        self.scheduler.notify(ScheduleEvent::CommandRescheduled {
            aggregate_id: command.aggregate_id.clone(),
            sequence_number: command.sequence_number,
            due_time: new_due_time,
        });
        self.activity.publish(ActivityEvent::CommandRetried {
            aggregate_id: command.aggregate_id.clone(),
            sequence_number: command.sequence_number,
            due_time: new_due_time,
        });

        tracing::warn!(
            target: "sequencer::delivery",
            aggregate_id = %command.aggregate_id,
            sequence_number = command.sequence_number,
            due_time = %new_due_time,
            error = exception,
            "command delivery failed, rescheduled"
        );

        Ok(())
    }

    async fn record_abandonment(&self, command: &ScheduledCommand, exception: &str) -> Result<()> {
        let now = self.clock.now();
        self.store.record_abandonment(command.id, now, exception).await?;

        self.scheduler.notify(ScheduleEvent::CommandAbandoned {
            aggregate_id: command.aggregate_id.clone(),
            sequence_number: command.sequence_number,
        });
        self.activity.publish(ActivityEvent::CommandAbandoned {
            aggregate_id: command.aggregate_id.clone(),
            sequence_number: command.sequence_number,
        });

        tracing::error!(
            target: "sequencer::delivery",
            aggregate_id = %command.aggregate_id,
            sequence_number = command.sequence_number,
            error = exception,
            "command abandoned"
        );

        Ok(())
    }
}
