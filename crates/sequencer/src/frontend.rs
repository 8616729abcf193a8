//! The scheduling front-end (spec §4.5): reacts to bus events and turns
//! `CommandScheduled<T>` events into stored (or elided) commands.

use std::sync::Arc;

use sequencer_core::model::{ActivityEvent, ScheduledCommand, ScheduledCommandEvent};
use sequencer_core::scheduler::{Component, ScheduleEvent};
use sequencer_core::{BusEvent, Clock, CommandStore, EventSource, NewCommand, Result, Scheduler};
use tokio::sync::Mutex as AsyncMutex;
use tokio::sync::mpsc;

use crate::clock::ClockNameResolver;
use crate::clock::ClockRegistry;
use crate::config::Config;
use crate::delivery::{ActivityBus, DeliveryEngine};
use crate::precondition::PreconditionGate;

/// Consumes bus events and schedules the commands they carry.
///
/// Immediate, non-durable deliveries are not run inline on the event loop
/// task: `schedule` posts them onto an internal queue drained by
/// [`Self::run_immediate_deliveries`], which runs as a sibling task. This
/// keeps a slow or precondition-blocked delivery from stalling the read
/// side of the bus, and avoids recursing back into this front-end from
/// inside a delivery attempt, matching the single-task event-loop shape the
/// teacher's worker reactor uses.
pub struct SchedulingFrontend {
    registry: Arc<ClockRegistry>,
    store: Arc<dyn CommandStore>,
    delivery: Arc<DeliveryEngine>,
    precondition: Arc<PreconditionGate>,
    scheduler: Arc<dyn Scheduler>,
    clock: Arc<dyn Clock>,
    config: Config,
    clock_name_resolver: Option<ClockNameResolver>,
    clock_lookup_key_resolver: Option<ClockNameResolver>,
    activity: ActivityBus,
    immediate_tx: mpsc::UnboundedSender<ScheduledCommand>,
    immediate_rx: AsyncMutex<mpsc::UnboundedReceiver<ScheduledCommand>>,
}

impl SchedulingFrontend {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        registry: Arc<ClockRegistry>,
        store: Arc<dyn CommandStore>,
        delivery: Arc<DeliveryEngine>,
        precondition: Arc<PreconditionGate>,
        scheduler: Arc<dyn Scheduler>,
        clock: Arc<dyn Clock>,
        config: Config,
        clock_name_resolver: Option<ClockNameResolver>,
        clock_lookup_key_resolver: Option<ClockNameResolver>,
    ) -> Self {
        let activity = delivery.activity();
        let (immediate_tx, immediate_rx) = mpsc::unbounded_channel();

        Self {
            registry,
            store,
            delivery,
            precondition,
            scheduler,
            clock,
            config,
            clock_name_resolver,
            clock_lookup_key_resolver,
            activity,
            immediate_tx,
            immediate_rx: AsyncMutex::new(immediate_rx),
        }
    }

    /// Drive the front-end from `events` until the source is exhausted or
    /// errors. Intended to run as its own task, alongside
    /// [`Self::run_immediate_deliveries`].
    pub async fn run(&self, mut events: Box<dyn EventSource>) -> anyhow::Result<()> {
        loop {
            let event = events.next().await?;

            match event {
                BusEvent::CommandScheduled(scheduled) => {
                    if let Err(err) = self.schedule(scheduled).await {
                        tracing::error!(
                            target: "sequencer::frontend",
                            error = %err,
                            "failed to schedule command"
                        );
                    }
                }
                BusEvent::Other => {}
            }

            // Any bus event may be the prerequisite a pending precondition
            // wait is blocked on; wake every outstanding wait to re-check.
            let _ = self.precondition.ticker().send(());
        }
    }

    /// Drain immediate, non-durable deliveries queued by [`Self::schedule`].
    /// Runs until the queue's sender half is dropped.
    pub async fn run_immediate_deliveries(&self) {
        let mut rx = self.immediate_rx.lock().await;

        while let Some(command) = rx.recv().await {
            self.precondition.wait_or_timeout(&command).await;

            if let Err(err) = self.delivery.deliver(&command).await {
                tracing::error!(
                    target: "sequencer::frontend",
                    aggregate_id = %command.aggregate_id,
                    sequence_number = command.sequence_number,
                    error = %err,
                    "immediate delivery failed"
                );
            }
        }
    }

    /// Schedule a single `CommandScheduled<T>` event (spec §4.5 steps 1-4).
    pub async fn schedule(&self, event: ScheduledCommandEvent) -> Result<()> {
        let guard = self.scheduler.acquire(Component::FrontendDispatch).await;

        let clock_name = self
            .registry
            .resolve(
                &event,
                self.clock_name_resolver.as_ref(),
                self.clock_lookup_key_resolver.as_ref(),
                &self.config.default_clock_name,
            )
            .await?;

        let clock_row = self.registry.get_or_create(&clock_name).await?;
        let due_time = event.due_time.unwrap_or(clock_row.now);
        let due_now = due_time <= clock_row.now;

        // Step 3: a command that is due immediately and does not require
        // durable scheduling is elided from the store entirely and handed
        // straight to the delivery queue.
        if due_now && !event.requires_durable_scheduling {
            let command = ScheduledCommand {
                id: 0,
                aggregate_id: event.aggregate_id.clone(),
                sequence_number: event.sequence_number,
                aggregate_type: event.aggregate_type.clone(),
                serialized_command: event.serialized_command.clone(),
                command_name: event.command_name.clone(),
                created_time: self.clock.now(),
                due_time: Some(due_time),
                applied_time: None,
                final_attempt_time: None,
                attempts: 0,
                clock_name: clock_name.clone(),
                non_durable: true,
            };

            tracing::debug!(
                target: "sequencer::frontend",
                aggregate_id = %command.aggregate_id,
                sequence_number = command.sequence_number,
                "eliding durable storage for immediate non-durable command"
            );

            self.announce(&command, &clock_name);
            self.enqueue(command);
            drop(guard);
            return Ok(());
        }

        let stored = self
            .store
            .put(NewCommand {
                aggregate_id: event.aggregate_id.clone(),
                aggregate_type: event.aggregate_type.clone(),
                sequence_number: event.sequence_number,
                command_name: event.command_name.clone(),
                serialized_command: event.serialized_command.clone(),
                created_time: self.clock.now(),
                due_time: Some(due_time),
                clock_name: clock_name.clone(),
            })
            .await?;

        self.announce(&stored, &clock_name);

        if due_now {
            self.enqueue(stored);
        }

        drop(guard);
        Ok(())
    }

    fn announce(&self, command: &ScheduledCommand, clock_name: &str) {
        self.scheduler.notify(ScheduleEvent::CommandScheduled {
            aggregate_id: command.aggregate_id.clone(),
            sequence_number: command.sequence_number,
        });
        self.activity.publish(ActivityEvent::CommandScheduled {
            aggregate_id: command.aggregate_id.clone(),
            sequence_number: command.sequence_number,
            clock_name: clock_name.to_string(),
        });
    }

    fn enqueue(&self, command: ScheduledCommand) {
        if self.immediate_tx.send(command).is_err() {
            tracing::error!(
                target: "sequencer::frontend",
                "immediate delivery queue has no consumer; dropping due command"
            );
        }
    }
}
