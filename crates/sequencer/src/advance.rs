//! The clock advancement driver (spec §4.6): moves a named clock forward
//! and delivers every command that becomes due as a result.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures_util::future::join_all;
use sequencer_core::scheduler::{Component, ScheduleEvent};
use sequencer_core::{CommandStore, KeyedLock, Result, Scheduler};

use crate::clock::ClockRegistry;
use crate::delivery::DeliveryEngine;

/// Advances named clocks and drains commands that fall due.
///
/// Advancement of a single clock is serialized through
/// [`sequencer_core::KeyedLock`], keyed by clock name, so that two advances
/// of the *same* clock never interleave their drain loops while advances of
/// *different* clocks proceed fully in parallel (spec §5).
pub struct ClockAdvancer {
    registry: Arc<ClockRegistry>,
    store: Arc<dyn CommandStore>,
    delivery: Arc<DeliveryEngine>,
    scheduler: Arc<dyn Scheduler>,
    locks: KeyedLock<String>,
    /// Bounds how many due commands are fetched (and so held in flight) per
    /// drain round; see [`crate::config::Config::advance_poll_batch_size`].
    batch_size: u32,
}

impl ClockAdvancer {
    pub fn new(
        registry: Arc<ClockRegistry>,
        store: Arc<dyn CommandStore>,
        delivery: Arc<DeliveryEngine>,
        scheduler: Arc<dyn Scheduler>,
        batch_size: u32,
    ) -> Self {
        Self { registry, store, delivery, scheduler, locks: KeyedLock::new(), batch_size }
    }

    /// Move `clock_name`'s `now` to `target`, then repeatedly fetch and
    /// deliver every pending command due on that clock until none remain
    /// (spec §4.6 steps 1-2).
    pub async fn advance(&self, clock_name: &str, target: DateTime<Utc>) -> Result<()> {
        let _permit = self.locks.lock(&clock_name.to_string()).await;
        let guard = self
            .scheduler
            .acquire(Component::ClockAdvance { clock: clock_name.to_string() })
            .await;

        let advanced = self.registry.advance(clock_name, target).await?;

        self.scheduler.notify(ScheduleEvent::ClockAdvanced {
            clock: clock_name.to_string(),
            now: advanced.now,
        });
        tracing::debug!(
            target: "sequencer::advance",
            clock = clock_name,
            now = %advanced.now,
            "advanced clock, draining due commands"
        );

        loop {
            let due = self.store.due_on(clock_name, advanced.now, self.batch_size).await?;
            if due.is_empty() {
                break;
            }

            // Commands sharing a `due_time` may be delivered concurrently;
            // ordering across distinct due times is preserved by delivering
            // one same-due-time group at a time (spec §5). Re-verification
            // of a still-unsatisfied precondition at due-time is the
            // repository's job via the `verify` callback threaded into
            // `Repository::apply_scheduled_command` (spec §4.4's tie-break
            // note), not a bounded wait here: the precondition-timeout wait
            // is §4.5 step 6's job, run once at initial schedule-time
            // dispatch, not re-armed on every due-scan or post-retry
            // redelivery.
            for group in group_by_due_time(due) {
                let deliveries = group.iter().map(|command| self.delivery.deliver(command));

                for result in join_all(deliveries).await {
                    result?;
                }
            }
        }

        drop(guard);
        Ok(())
    }
}

/// Splits commands already sorted by `(due_time, sequence_number)` into
/// consecutive runs sharing the same `due_time`, preserving order.
fn group_by_due_time(
    commands: Vec<sequencer_core::model::ScheduledCommand>,
) -> Vec<Vec<sequencer_core::model::ScheduledCommand>> {
    let mut groups: Vec<Vec<sequencer_core::model::ScheduledCommand>> = Vec::new();

    for command in commands {
        match groups.last_mut() {
            Some(last) if last[0].due_time == command.due_time => last.push(command),
            _ => groups.push(vec![command]),
        }
    }

    groups
}
