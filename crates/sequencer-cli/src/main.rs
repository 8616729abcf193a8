//! Runs the durable command scheduler against a Postgres database.
//!
//! The event bus and event-sourced repository are external collaborators
//! out of scope for this workspace (see `sequencer_core::EventSource` and
//! `sequencer_core::Repository`); this binary wires stand-ins for both so
//! the scheduler can be exercised end to end, and is meant to be adapted by
//! embedders who supply their own.

use std::sync::Arc;

use anyhow::Context;
use clap::Parser;
use sequencer::config::Config;
use sequencer::DurableEngineBuilder;
use sequencer_core::model::{ApplyOutcome, ScheduledCommand};
use sequencer_core::{BusEvent, EventSource, PreconditionVerifier, Repository};
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;

#[derive(Debug, clap::Parser)]
struct Args {
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,

    /// The clock name used when an event names no clock (spec §4.1 (d)).
    #[arg(long, env = "SEQUENCER_DEFAULT_CLOCK_NAME", default_value = "default")]
    default_clock_name: String,

    /// How long to wait for an unsatisfied precondition before delivering
    /// anyway (spec §4.3), e.g. `10s`.
    #[arg(long, env = "SEQUENCER_PRECONDITION_TIMEOUT", default_value = "10s")]
    precondition_timeout: humantime::Duration,
}

impl From<Args> for Config {
    fn from(args: Args) -> Self {
        Self {
            default_clock_name: args.default_clock_name,
            precondition_timeout: *args.precondition_timeout,
            ..Config::default()
        }
    }
}

/// A repository stand-in that always reports success without applying
/// anything. Production embedders supply their own event-sourced
/// repository; this exists only so the binary can run to completion.
struct NullRepository;

#[async_trait::async_trait]
impl Repository for NullRepository {
    async fn apply_scheduled_command(
        &self,
        command: &ScheduledCommand,
        _verify: &dyn PreconditionVerifier,
    ) -> ApplyOutcome {
        tracing::debug!(
            target: "sequencer_cli",
            aggregate_id = %command.aggregate_id,
            sequence_number = command.sequence_number,
            "no repository configured; reporting the command as applied"
        );
        ApplyOutcome::Succeeded
    }
}

/// An event source that never yields, for running the scheduler with no
/// live bus connection. Production embedders supply their own bus
/// subscription.
struct IdleEventSource;

#[async_trait::async_trait]
impl EventSource for IdleEventSource {
    async fn next(&mut self) -> anyhow::Result<BusEvent> {
        std::future::pending().await
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .with(tracing_subscriber::fmt::layer().without_time())
        .init();

    let args = Args::parse();
    let pool = sqlx::PgPool::connect(&args.database_url)
        .await
        .context("failed to connect to the database")?;
    let config = Config::from(args);

    let engine = DurableEngineBuilder::new(pool)
        .repository(Arc::new(NullRepository))
        .config(config)
        .build()
        .await
        .context("failed to assemble the scheduler")?;

    tokio::task::spawn(async move {
        let _ = tokio::signal::ctrl_c().await;
        tracing::info!(target: "sequencer_cli", "received Ctrl^C, shutting down");
        std::process::exit(0);
    });

    tracing::info!(target: "sequencer_cli", "sequencer starting up");
    engine.run(Box::new(IdleEventSource)).await?;

    Ok(())
}
