//! The clock registry (spec §4.1): named, persisted logical time sources.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use sequencer_core::model::{Clock as ClockRow, ScheduledCommandEvent};
use sequencer_core::{Clock, Error, Result};
use sqlx::PgPool;
use sqlx::Row;

/// A callback resolving a clock name (or lookup key) directly from an event,
/// constructor-injected per spec §9's open question ("standardize on
/// constructor injection").
pub type ClockNameResolver = Arc<dyn Fn(&ScheduledCommandEvent) -> Option<String> + Send + Sync>;

/// Durable, Postgres-backed storage for [`ClockRow`] and `ClockMapping`
/// rows. Exclusively owns both tables (spec §3.3).
pub struct ClockRegistry {
    pool: PgPool,
    wall_clock: Arc<dyn Clock>,
}

impl ClockRegistry {
    pub fn new(pool: PgPool, wall_clock: Arc<dyn Clock>) -> Self {
        Self { pool, wall_clock }
    }

    /// Resolve the clock an event should be scheduled on, per spec §4.1's
    /// priority order:
    /// (a) the `ClockName` metadata attribute,
    /// (b) the `clock_name_resolver` callback,
    /// (c) a `ClockMapping` whose value matches `clock_lookup_key_resolver`,
    /// (d) `default_name`.
    pub async fn resolve(
        &self,
        event: &ScheduledCommandEvent,
        clock_name_resolver: Option<&ClockNameResolver>,
        clock_lookup_key_resolver: Option<&ClockNameResolver>,
        default_name: &str,
    ) -> Result<String> {
        if let Some(name) = event.clock_name_override() {
            return Ok(name.to_string());
        }

        if let Some(resolver) = clock_name_resolver {
            if let Some(name) = resolver(event) {
                return Ok(name);
            }
        }

        if let Some(resolver) = clock_lookup_key_resolver {
            if let Some(key) = resolver(event) {
                if let Some(name) = self.lookup_mapping(&key).await? {
                    return Ok(name);
                }
            }
        }

        Ok(default_name.to_string())
    }

    async fn lookup_mapping(&self, value: &str) -> Result<Option<String>> {
        let row = sqlx::query("SELECT clock_name FROM sequencer.clock_mapping WHERE value = $1")
            .bind(value)
            .fetch_optional(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;

        Ok(row.map(|row| row.get::<String, _>("clock_name")))
    }

    /// Associate `value` with `clock_name` for future [`Self::resolve`]
    /// lookups (spec §3.1 `ClockMapping`).
    pub async fn map(&self, value: &str, clock_name: &str) -> Result<()> {
        self.get_or_create(clock_name).await?;

        sqlx::query(
            "INSERT INTO sequencer.clock_mapping (value, clock_name) VALUES ($1, $2)
             ON CONFLICT (value) DO UPDATE SET clock_name = excluded.clock_name",
        )
        .bind(value)
        .bind(clock_name)
        .execute(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        Ok(())
    }

    /// Return the named clock, creating it (with `now = start_time =`
    /// current wall-clock time) if it does not yet exist.
    pub async fn get_or_create(&self, name: &str) -> Result<ClockRow> {
        if let Some(clock) = self.load(name).await? {
            return Ok(clock);
        }

        let now = self.wall_clock.now();
        let row = sqlx::query(
            "INSERT INTO sequencer.clock (name, now, start_time) VALUES ($1, $2, $2)
             ON CONFLICT (name) DO UPDATE SET name = sequencer.clock.name
             RETURNING name, now, start_time",
        )
        .bind(name)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        Ok(row_to_clock(&row))
    }

    pub async fn load(&self, name: &str) -> Result<Option<ClockRow>> {
        let row = sqlx::query("SELECT name, now, start_time FROM sequencer.clock WHERE name = $1")
            .bind(name)
            .fetch_optional(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;

        Ok(row.as_ref().map(row_to_clock))
    }

    /// Move `name`'s `now` forward to `target`. Fails with
    /// [`sequencer_core::ErrorKind::ClockMovedBackward`] if `target` is
    /// earlier than the clock's current `now` (spec §4.1).
    ///
    /// Locks the clock row for the duration of the update so concurrent
    /// advances of the *same* clock serialize at the database, matching the
    /// "atomic with respect to concurrent advances" requirement of spec
    /// §4.1. Callers additionally hold a [`sequencer_core::KeyedLock`]
    /// permit (see [`crate::advance::ClockAdvancer`]) so that the whole
    /// drain-until-quiescent loop is serialized per clock, not just this
    /// single update.
    pub async fn advance(&self, name: &str, target: DateTime<Utc>) -> Result<ClockRow> {
        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;

        let row = sqlx::query("SELECT now FROM sequencer.clock WHERE name = $1 FOR UPDATE")
            .bind(name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(anyhow::Error::from)?;

        let current: DateTime<Utc> = match row {
            Some(row) => row.get("now"),
            None => {
                // The clock didn't exist yet; create it at `target` directly.
                tx.rollback().await.map_err(anyhow::Error::from)?;
                self.get_or_create(name).await?;
                return self.advance(name, target).await;
            }
        };

        if target < current {
            return Err(Error::clock_moved_backward(name, current, target));
        }

        let row = sqlx::query(
            "UPDATE sequencer.clock SET now = $2 WHERE name = $1
             RETURNING name, now, start_time",
        )
        .bind(name)
        .bind(target)
        .fetch_one(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;

        tx.commit().await.map_err(anyhow::Error::from)?;

        tracing::debug!(target: "sequencer::clock", clock = name, now = %target, "advanced clock");

        Ok(row_to_clock(&row))
    }
}

fn row_to_clock(row: &sqlx::postgres::PgRow) -> ClockRow {
    ClockRow {
        name: row.get("name"),
        now: row.get("now"),
        start_time: row.get("start_time"),
    }
}
