//! The precondition gate (spec §4.3).

use std::sync::Arc;
use std::time::Duration;

use sequencer_core::model::ScheduledCommand;
use sequencer_core::PreconditionVerifier;
use tokio::sync::broadcast;

/// Decides whether a command's prerequisite event is observable yet, and
/// arms a bounded wait for the case where it is not.
///
/// Re-verification is driven by a `tick` broadcast from
/// [`crate::frontend::SchedulingFrontend`] rather than each waiter
/// independently consuming the bus: the front-end owns the single
/// [`sequencer_core::EventSource`] stream and fans a lightweight
/// notification out to every outstanding wait whenever *any* bus event
/// arrives.
pub struct PreconditionGate {
    verifier: Arc<dyn PreconditionVerifier>,
    timeout: Duration,
    ticks: broadcast::Sender<()>,
}

impl PreconditionGate {
    pub fn new(verifier: Arc<dyn PreconditionVerifier>, timeout: Duration) -> Self {
        let (ticks, _) = broadcast::channel(128);
        Self { verifier, timeout, ticks }
    }

    /// A handle the front-end's event loop uses to wake every outstanding
    /// wait after processing a bus event.
    pub fn ticker(&self) -> broadcast::Sender<()> {
        self.ticks.clone()
    }

    pub async fn verify(&self, command: &ScheduledCommand) -> bool {
        self.verifier.verify(command).await
    }

    /// Block until the precondition holds or [`Config::precondition_timeout`]
    /// elapses, whichever comes first (spec §4.3). A timeout is not a
    /// failure — the caller proceeds to deliver the command regardless, and
    /// any resulting application failure is surfaced through the normal
    /// delivery path.
    ///
    /// The timeout is bounded by real elapsed time (`tokio::time`), not the
    /// domain [`sequencer_core::Clock`]: for the in-memory engine that clock
    /// is a [`sequencer_memory::VirtualClock`](../../sequencer_memory/struct.VirtualClock.html)
    /// whose passage of time is driven entirely by test code calling
    /// `advance_to`/`advance_by`, so racing against its `sleep` would block
    /// forever whenever nothing else advances it — exactly the "real wall
    /// time, not simulated time" bound this wait promises.
    ///
    /// [`Config::precondition_timeout`]: crate::config::Config::precondition_timeout
    pub async fn wait_or_timeout(&self, command: &ScheduledCommand) {
        if self.verify(command).await {
            return;
        }

        let mut rx = self.ticks.subscribe();
        let deadline = tokio::time::Instant::now() + self.timeout;

        loop {
            if tokio::time::Instant::now() >= deadline {
                return;
            }

            tokio::select! {
                biased;

                _ = tokio::time::sleep_until(deadline) => return,
                tick = rx.recv() => {
                    match tick {
                        Ok(()) | Err(broadcast::error::RecvError::Lagged(_)) => {
                            if self.verify(command).await {
                                return;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => return,
                    }
                }
            }
        }
    }
}
