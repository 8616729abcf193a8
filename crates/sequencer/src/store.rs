//! The Postgres-backed command store (spec §4.2).

use chrono::{DateTime, Utc};
use sequencer_core::model::ScheduledCommand;
use sequencer_core::{CommandStore, Error, NewCommand, Result};
use sqlx::{PgPool, Row};

/// Durable storage for [`ScheduledCommand`] and `CommandExecutionError`
/// rows, exclusively owned by this store (spec §3.3).
pub struct PgCommandStore {
    pool: PgPool,
    /// Bounds the scheduler-assigned sequence number collision-retry loop
    /// (spec §4.2, §9) under pathological contention on one aggregate.
    retry_limit: u32,
}

impl PgCommandStore {
    pub fn new(pool: PgPool, retry_limit: u32) -> Self {
        Self { pool, retry_limit }
    }
}

#[async_trait::async_trait]
impl CommandStore for PgCommandStore {
    async fn put(&self, command: NewCommand) -> Result<ScheduledCommand> {
        let assign = command.sequence_number < 0;
        let mut sequence_number = command.sequence_number;

        for attempt in 0..=self.retry_limit {
            let row = sqlx::query(
                "INSERT INTO sequencer.scheduled_command
                    (aggregate_id, sequence_number, aggregate_type, command_name,
                     serialized_command, created_time, due_time, clock_name)
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                 ON CONFLICT (aggregate_id, sequence_number) DO NOTHING
                 RETURNING id, aggregate_id, sequence_number, aggregate_type, command_name,
                           serialized_command, created_time, due_time, applied_time,
                           final_attempt_time, attempts, clock_name",
            )
            .bind(&command.aggregate_id)
            .bind(sequence_number)
            .bind(&command.aggregate_type)
            .bind(&command.command_name)
            .bind(&command.serialized_command)
            .bind(command.created_time)
            .bind(command.due_time)
            .bind(&command.clock_name)
            .fetch_optional(&self.pool)
            .await
            .map_err(anyhow::Error::from)?;

            match row {
                Some(row) => return Ok(row_to_command(&row)),
                None if assign => {
                    // Scheduler-assigned sentinel collided with an existing row;
                    // decrement and try the next free slot.
                    sequence_number -= 1;
                    let _ = attempt;
                }
                None => {
                    return Err(Error::duplicate_schedule(
                        command.aggregate_id,
                        command.sequence_number,
                    ))
                }
            }
        }

        Err(anyhow::anyhow!(
            "exhausted {} attempts to assign a scheduler sequence number for aggregate {:?}",
            self.retry_limit,
            command.aggregate_id
        )
        .into())
    }

    async fn load(
        &self,
        aggregate_id: &str,
        sequence_number: i64,
    ) -> Result<Option<ScheduledCommand>> {
        let row = sqlx::query(
            "SELECT id, aggregate_id, sequence_number, aggregate_type, command_name,
                    serialized_command, created_time, due_time, applied_time,
                    final_attempt_time, attempts, clock_name
             FROM sequencer.scheduled_command
             WHERE aggregate_id = $1 AND sequence_number = $2",
        )
        .bind(aggregate_id)
        .bind(sequence_number)
        .fetch_optional(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        Ok(row.as_ref().map(row_to_command))
    }

    async fn due_on(
        &self,
        clock_name: &str,
        as_of: DateTime<Utc>,
        limit: u32,
    ) -> Result<Vec<ScheduledCommand>> {
        let rows = sqlx::query(
            "SELECT id, aggregate_id, sequence_number, aggregate_type, command_name,
                    serialized_command, created_time, due_time, applied_time,
                    final_attempt_time, attempts, clock_name
             FROM sequencer.scheduled_command
             WHERE clock_name = $1
               AND due_time IS NOT NULL
               AND due_time <= $2
               AND applied_time IS NULL
               AND final_attempt_time IS NULL
             ORDER BY due_time ASC, sequence_number ASC
             LIMIT $3",
        )
        .bind(clock_name)
        .bind(as_of)
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        Ok(rows.iter().map(row_to_command).collect())
    }

    async fn record_success(&self, id: i64, at: DateTime<Utc>) -> Result<()> {
        sqlx::query(
            "UPDATE sequencer.scheduled_command
                SET attempts = attempts + 1, applied_time = $2
              WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&self.pool)
        .await
        .map_err(anyhow::Error::from)?;

        Ok(())
    }

    async fn record_retry(
        &self,
        id: i64,
        new_due_time: DateTime<Utc>,
        serialized_error: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;

        sqlx::query(
            "UPDATE sequencer.scheduled_command
                SET attempts = attempts + 1, due_time = $2
              WHERE id = $1",
        )
        .bind(id)
        .bind(new_due_time)
        .execute(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;

        sqlx::query(
            "INSERT INTO sequencer.command_execution_error (scheduled_command_id, error)
             VALUES ($1, $2)",
        )
        .bind(id)
        .bind(serialized_error)
        .execute(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;

        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(())
    }

    async fn record_abandonment(
        &self,
        id: i64,
        at: DateTime<Utc>,
        serialized_error: &str,
    ) -> Result<()> {
        let mut tx = self.pool.begin().await.map_err(anyhow::Error::from)?;

        sqlx::query(
            "UPDATE sequencer.scheduled_command
                SET attempts = attempts + 1, final_attempt_time = $2
              WHERE id = $1",
        )
        .bind(id)
        .bind(at)
        .execute(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;

        sqlx::query(
            "INSERT INTO sequencer.command_execution_error (scheduled_command_id, error)
             VALUES ($1, $2)",
        )
        .bind(id)
        .bind(serialized_error)
        .execute(&mut *tx)
        .await
        .map_err(anyhow::Error::from)?;

        tx.commit().await.map_err(anyhow::Error::from)?;
        Ok(())
    }
}

fn row_to_command(row: &sqlx::postgres::PgRow) -> ScheduledCommand {
    ScheduledCommand {
        id: row.get("id"),
        aggregate_id: row.get("aggregate_id"),
        sequence_number: row.get("sequence_number"),
        aggregate_type: row.get("aggregate_type"),
        command_name: row.get("command_name"),
        serialized_command: row.get("serialized_command"),
        created_time: row.get("created_time"),
        due_time: row.get("due_time"),
        applied_time: row.get("applied_time"),
        final_attempt_time: row.get("final_attempt_time"),
        attempts: row.get("attempts"),
        clock_name: row.get("clock_name"),
        non_durable: false,
    }
}
