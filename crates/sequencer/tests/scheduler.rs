//! Integration tests covering the durable scheduler's scenarios end to end
//! against a real Postgres database.

mod support;

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use sequencer::DurableEngineBuilder;
use sequencer_core::model::ScheduledCommandEvent;
use sequencer_core::NewCommand;
use support::{permanent_failure, retryable_failure, succeeded, wait_for, NeverSatisfied, ScriptedRepository};

fn scheduled_event(
    aggregate_id: &str,
    sequence_number: i64,
    due_time: Option<chrono::DateTime<Utc>>,
    requires_durable_scheduling: bool,
) -> ScheduledCommandEvent {
    ScheduledCommandEvent {
        aggregate_id: aggregate_id.to_string(),
        aggregate_type: "order".to_string(),
        sequence_number,
        command_name: "ship".to_string(),
        requires_durable_scheduling,
        serialized_command: "{}".to_string(),
        due_time,
        metadata: Default::default(),
        etag: None,
    }
}

/// S1: a command due immediately and requiring durable scheduling is
/// persisted and then applied without the caller having to advance any
/// clock.
#[sqlx::test]
async fn s1_immediate_happy_path(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let repository = Arc::new(ScriptedRepository::new());
    let engine = DurableEngineBuilder::new(pool).repository(repository.clone()).build().await?;

    let frontend = engine.frontend.clone();
    tokio::spawn({
        let frontend = frontend.clone();
        async move { frontend.run_immediate_deliveries().await }
    });

    frontend.schedule(scheduled_event("order-1", 1, None, true)).await?;

    let store = engine.store.clone();
    wait_for(Duration::from_secs(2), || {
        let store = store.clone();
        async move { Ok(store.load("order-1", 1).await?.filter(|c| c.is_applied())) }
    })
    .await;

    assert_eq!(repository.call_count("order-1", 1), 1);
    Ok(())
}

/// S2: a command due in the future is only applied once the clock it was
/// scheduled on is advanced past its due time.
#[sqlx::test]
async fn s2_future_delivery(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let repository = Arc::new(ScriptedRepository::new());
    let engine = DurableEngineBuilder::new(pool).repository(repository.clone()).build().await?;

    let due_time = Utc::now() + chrono::Duration::hours(1);
    engine.frontend.schedule(scheduled_event("order-2", 1, Some(due_time), true)).await?;

    let before = engine.store.load("order-2", 1).await?.expect("command should be stored");
    assert!(before.is_pending());
    assert_eq!(repository.call_count("order-2", 1), 0);

    engine.advancer.advance("default", due_time).await?;

    let after = engine.store.load("order-2", 1).await?.expect("command should still exist");
    assert!(after.is_applied());
    assert_eq!(repository.call_count("order-2", 1), 1);

    Ok(())
}

/// S3: a retryable failure reschedules the command to a later due time
/// without abandoning it.
#[sqlx::test]
async fn s3_retryable_failure_reschedules(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let repository = Arc::new(ScriptedRepository::new());
    repository.push("order-3", 1, retryable_failure(0));
    repository.push("order-3", 1, succeeded());

    let engine = DurableEngineBuilder::new(pool).repository(repository.clone()).build().await?;

    let due_time = Utc::now() + chrono::Duration::minutes(1);
    engine.frontend.schedule(scheduled_event("order-3", 1, Some(due_time), true)).await?;

    engine.advancer.advance("default", due_time).await?;

    let after_first = engine.store.load("order-3", 1).await?.expect("command should exist");
    assert!(after_first.is_pending());
    assert_eq!(after_first.attempts, 1);
    assert!(after_first.due_time.unwrap() > due_time);

    engine.advancer.advance("default", after_first.due_time.unwrap()).await?;

    let after_second = engine.store.load("order-3", 1).await?.expect("command should exist");
    assert!(after_second.is_applied());
    assert_eq!(after_second.attempts, 2);

    Ok(())
}

/// S4: a permanent (canceled) failure abandons the command instead of
/// rescheduling it.
#[sqlx::test]
async fn s4_permanent_failure_abandons(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let repository = Arc::new(ScriptedRepository::new());
    repository.push("order-4", 1, permanent_failure(0));

    let engine = DurableEngineBuilder::new(pool).repository(repository.clone()).build().await?;

    let due_time = Utc::now() + chrono::Duration::minutes(1);
    engine.frontend.schedule(scheduled_event("order-4", 1, Some(due_time), true)).await?;
    engine.advancer.advance("default", due_time).await?;

    let command = engine.store.load("order-4", 1).await?.expect("command should exist");
    assert!(command.is_abandoned());
    assert!(!command.is_applied());
    assert_eq!(command.attempts, 1);

    Ok(())
}

/// S6: scheduler-assigned sequence numbers never collide, even when two
/// commands are put for the same aggregate with the "please assign"
/// sentinel.
#[sqlx::test]
async fn s6_assigned_sequence_numbers_do_not_collide(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let repository = Arc::new(ScriptedRepository::new());
    let engine = DurableEngineBuilder::new(pool).repository(repository).build().await?;

    let now = Utc::now();
    let first = engine
        .store
        .put(NewCommand {
            aggregate_id: "order-6".to_string(),
            aggregate_type: "order".to_string(),
            sequence_number: -1,
            command_name: "ship".to_string(),
            serialized_command: "{}".to_string(),
            created_time: now,
            due_time: Some(now),
            clock_name: "default".to_string(),
        })
        .await?;

    let second = engine
        .store
        .put(NewCommand {
            aggregate_id: "order-6".to_string(),
            aggregate_type: "order".to_string(),
            sequence_number: -1,
            command_name: "ship".to_string(),
            serialized_command: "{}".to_string(),
            created_time: now,
            due_time: Some(now),
            clock_name: "default".to_string(),
        })
        .await?;

    assert_ne!(first.sequence_number, second.sequence_number);

    Ok(())
}

/// S5: a command whose precondition never becomes satisfied is delivered
/// anyway once the precondition timeout elapses.
#[sqlx::test]
async fn s5_precondition_timeout_delivers_anyway(pool: sqlx::PgPool) -> anyhow::Result<()> {
    use std::sync::Arc;
    use std::time::Duration;

    use sequencer::config::Config;

    let repository = Arc::new(ScriptedRepository::new());
    let engine = DurableEngineBuilder::new(pool)
        .repository(repository.clone())
        .precondition_verifier(Arc::new(NeverSatisfied))
        .config(Config { precondition_timeout: Duration::from_millis(100), ..Config::default() })
        .build()
        .await?;

    let frontend = engine.frontend.clone();
    tokio::spawn({
        let frontend = frontend.clone();
        async move { frontend.run_immediate_deliveries().await }
    });

    frontend.schedule(scheduled_event("order-5", 1, None, true)).await?;

    let store = engine.store.clone();
    wait_for(Duration::from_secs(2), || {
        let store = store.clone();
        async move { Ok(store.load("order-5", 1).await?.filter(|c| c.is_applied())) }
    })
    .await;

    assert_eq!(repository.call_count("order-5", 1), 1);
    Ok(())
}
