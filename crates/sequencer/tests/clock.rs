//! Integration tests for the clock registry's resolution priority (spec
//! §4.1), clock mapping, and monotonicity guarantees — not exercised by the
//! end-to-end delivery scenarios in `tests/scheduler.rs`.

use std::sync::Arc;

use chrono::Utc;
use sequencer::clock::{ClockNameResolver, ClockRegistry};
use sequencer_core::model::ScheduledCommandEvent;
use sequencer_core::SystemClock;

fn event(aggregate_id: &str) -> ScheduledCommandEvent {
    ScheduledCommandEvent {
        aggregate_id: aggregate_id.to_string(),
        aggregate_type: "order".to_string(),
        sequence_number: 1,
        command_name: "ship".to_string(),
        requires_durable_scheduling: true,
        serialized_command: "{}".to_string(),
        due_time: None,
        metadata: Default::default(),
        etag: None,
    }
}

/// Priority (d): with no metadata, no resolver, and no mapping match, the
/// configured default clock name is used.
#[sqlx::test]
async fn resolve_falls_back_to_default_name(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let registry = ClockRegistry::new(pool, Arc::new(SystemClock));

    let name = registry.resolve(&event("order-1"), None, None, "tenant-default").await?;

    assert_eq!(name, "tenant-default");
    Ok(())
}

/// Priority (a): the `ClockName` metadata attribute outranks everything
/// else, including a resolver callback that would otherwise match.
#[sqlx::test]
async fn resolve_prefers_metadata_over_resolver(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let registry = ClockRegistry::new(pool, Arc::new(SystemClock));

    let mut with_metadata = event("order-2");
    with_metadata
        .metadata
        .insert(ScheduledCommandEvent::CLOCK_NAME_KEY.to_string(), "from-metadata".to_string());

    let resolver: ClockNameResolver = Arc::new(|_event| Some("from-resolver".to_string()));

    let name =
        registry.resolve(&with_metadata, Some(&resolver), None, "default").await?;

    assert_eq!(name, "from-metadata");
    Ok(())
}

/// Priority (b): the `clock_name_resolver` callback outranks a
/// `ClockMapping` lookup when both could apply.
#[sqlx::test]
async fn resolve_prefers_resolver_over_mapping(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let registry = ClockRegistry::new(pool, Arc::new(SystemClock));
    registry.map("tenant-a", "from-mapping").await?;

    let resolver: ClockNameResolver = Arc::new(|_event| Some("from-resolver".to_string()));
    let lookup_key: ClockNameResolver = Arc::new(|_event| Some("tenant-a".to_string()));

    let name = registry
        .resolve(&event("order-3"), Some(&resolver), Some(&lookup_key), "default")
        .await?;

    assert_eq!(name, "from-resolver");
    Ok(())
}

/// Priority (c): when the name resolver declines to match, a `ClockMapping`
/// keyed by the lookup-key resolver's result is consulted.
#[sqlx::test]
async fn resolve_uses_mapping_when_resolver_declines(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let registry = ClockRegistry::new(pool, Arc::new(SystemClock));
    registry.map("tenant-b", "mapped-clock").await?;

    let resolver: ClockNameResolver = Arc::new(|_event| None);
    let lookup_key: ClockNameResolver = Arc::new(|_event| Some("tenant-b".to_string()));

    let name = registry
        .resolve(&event("order-4"), Some(&resolver), Some(&lookup_key), "default")
        .await?;

    assert_eq!(name, "mapped-clock");
    Ok(())
}

/// `get_or_create` returns the same row on repeated calls rather than
/// re-stamping `start_time`.
#[sqlx::test]
async fn get_or_create_is_idempotent(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let registry = ClockRegistry::new(pool, Arc::new(SystemClock));

    let first = registry.get_or_create("idempotent").await?;
    let second = registry.get_or_create("idempotent").await?;

    assert_eq!(first.start_time, second.start_time);
    assert_eq!(first.now, second.now);
    Ok(())
}

/// `advance` moves `now` forward and rejects any target earlier than the
/// clock's current `now` with `ClockMovedBackward` (spec §4.1, invariant 3).
#[sqlx::test]
async fn advance_rejects_backward_movement(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let registry = ClockRegistry::new(pool, Arc::new(SystemClock));

    let created = registry.get_or_create("monotonic").await?;
    let later = created.now + chrono::Duration::seconds(60);

    let advanced = registry.advance("monotonic", later).await?;
    assert_eq!(advanced.now, later);

    let err = registry.advance("monotonic", created.now).await.unwrap_err();
    assert_eq!(err.kind(), sequencer_core::ErrorKind::ClockMovedBackward);

    Ok(())
}

/// `advance` on a clock that does not exist yet creates it at the target
/// time rather than erroring.
#[sqlx::test]
async fn advance_creates_clock_if_absent(pool: sqlx::PgPool) -> anyhow::Result<()> {
    let registry = ClockRegistry::new(pool, Arc::new(SystemClock));

    let target = Utc::now() + chrono::Duration::minutes(5);
    let advanced = registry.advance("brand-new", target).await?;

    assert_eq!(advanced.now, target);
    Ok(())
}
