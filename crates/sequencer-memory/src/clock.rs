//! The virtual clock (spec §4.7): an in-process, deterministically
//! advanceable stand-in for the durable clock registry plus wall clock.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, OnceLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use sequencer_core::{Error, Result};
use tokio::sync::Notify;

static INSTALLED: OnceLock<AtomicBool> = OnceLock::new();

/// The name stamped on every [`sequencer_core::model::ScheduledCommand`]
/// scheduled against a [`VirtualClock`]. The in-memory variant models a
/// single logical clock rather than the durable registry's named, persisted
/// set (spec §4.7's "Implementation contract" describes one advanceable
/// clock per test, not a registry of them).
pub const VIRTUAL_CLOCK_NAME: &str = "virtual";

/// A deterministic, manually-advanced clock used by in-memory scheduler
/// tests.
///
/// Built on advance-by/advance-to methods and `Notify`-based sleepers, plus
/// a quiescence barrier: [`Self::advance_to`] and [`Self::advance_by`] do
/// not return until every command that became due as a result has finished
/// being delivered (applied, retried, or abandoned) — callers drive
/// [`Self::begin_delivery`]/drop its guard around each delivery attempt so
/// the barrier knows when the system is quiescent again.
pub struct VirtualClock {
    now: Mutex<DateTime<Utc>>,
    notify: Notify,
    pending: AtomicU64,
    quiescent: Notify,
}

impl VirtualClock {
    pub fn new(start: DateTime<Utc>) -> Arc<Self> {
        Arc::new(Self {
            now: Mutex::new(start),
            notify: Notify::new(),
            pending: AtomicU64::new(0),
            quiescent: Notify::new(),
        })
    }

    pub fn now(&self) -> DateTime<Utc> {
        *self.now.lock()
    }

    /// Move `now` to `target`, waking any sleepers, without waiting for
    /// quiescence. Analogous to
    /// [`sequencer::clock::ClockRegistry::advance`]'s bare row update; the
    /// drain-until-quiescent orchestration is
    /// [`crate::MemoryEngine::advance_to`]'s job, mirroring how
    /// `ClockRegistry::advance` and `ClockAdvancer::advance` split the same
    /// concern in the durable variant.
    pub fn set_time(&self, target: DateTime<Utc>) -> Result<()> {
        let mut now = self.now.lock();
        if target < *now {
            return Err(Error::clock_moved_backward(VIRTUAL_CLOCK_NAME, *now, target));
        }
        *now = target;
        drop(now);

        self.notify.notify_waiters();
        Ok(())
    }

    /// Move `now` forward by `duration`.
    pub fn advance_time_by(&self, duration: Duration) -> Result<()> {
        let target = self.now() + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        self.set_time(target)
    }

    /// Block until no delivery is in flight (spec §4.7's quiescence
    /// barrier).
    pub async fn wait_until_quiescent(&self) {
        loop {
            if self.is_quiescent() {
                return;
            }
            self.quiescent.notified().await;
        }
    }

    /// Register a command as "due and not yet delivered." Hold the returned
    /// guard for the duration of the delivery attempt; dropping it marks the
    /// command settled.
    pub fn begin_delivery(self: &Arc<Self>) -> DeliveryGuard {
        self.pending.fetch_add(1, Ordering::SeqCst);
        DeliveryGuard { clock: self.clone() }
    }

    /// Whether the clock currently has no outstanding deliveries in flight.
    pub fn is_quiescent(&self) -> bool {
        self.pending.load(Ordering::SeqCst) == 0
    }
}

/// RAII marker for an in-flight delivery, used by [`VirtualClock`]'s
/// quiescence barrier.
pub struct DeliveryGuard {
    clock: Arc<VirtualClock>,
}

impl Drop for DeliveryGuard {
    fn drop(&mut self) {
        if self.clock.pending.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.clock.quiescent.notify_waiters();
        }
    }
}

#[async_trait::async_trait]
impl sequencer_core::Clock for VirtualClock {
    fn now(&self) -> DateTime<Utc> {
        VirtualClock::now(self)
    }

    async fn sleep(&self, duration: Duration) {
        if duration.is_zero() {
            return;
        }

        let deadline =
            VirtualClock::now(self) + chrono::Duration::from_std(duration).unwrap_or(chrono::Duration::zero());
        loop {
            if VirtualClock::now(self) >= deadline {
                return;
            }
            self.notify.notified().await;
        }
    }
}

/// RAII handle returned by [`install`]. Dropping it clears the process-wide
/// "a virtual clock is current" flag so a later test can install its own.
pub struct VirtualClockGuard {
    _private: (),
}

impl Drop for VirtualClockGuard {
    fn drop(&mut self) {
        if let Some(flag) = INSTALLED.get() {
            flag.store(false, Ordering::Release);
        }
    }
}

/// Mark `clock` as the process's current virtual clock (spec §4.7: "at most
/// one virtual clock is current at a time"). Panics if another guard from a
/// prior [`install`] call is still live.
pub fn install(_clock: &Arc<VirtualClock>) -> VirtualClockGuard {
    let flag = INSTALLED.get_or_init(|| AtomicBool::new(false));

    if flag.swap(true, Ordering::AcqRel) {
        panic!("a virtual clock is already installed in this process");
    }

    VirtualClockGuard { _private: () }
}

#[cfg(test)]
mod tests {
    use std::panic::AssertUnwindSafe;

    use sequencer_core::Clock as _;

    use super::*;

    #[test]
    fn advance_to_moves_now_forward() {
        let t0 = Utc::now();
        let clock = VirtualClock::new(t0);

        clock.set_time(t0 + chrono::Duration::seconds(60)).unwrap();

        assert_eq!((VirtualClock::now(&clock) - t0).num_seconds(), 60);
    }

    #[test]
    fn set_time_rejects_backward_movement() {
        let t0 = Utc::now();
        let clock = VirtualClock::new(t0);

        clock.set_time(t0 + chrono::Duration::seconds(10)).unwrap();
        let err = clock.set_time(t0).unwrap_err();

        assert_eq!(err.kind(), sequencer_core::ErrorKind::ClockMovedBackward);
    }

    #[tokio::test]
    async fn sleep_resolves_once_advanced_past_deadline() {
        let clock = VirtualClock::new(Utc::now());
        let clock2 = clock.clone();

        let handle = tokio::spawn(async move { clock2.sleep(Duration::from_secs(10)).await });

        tokio::task::yield_now().await;
        assert!(!handle.is_finished());

        clock.set_time(VirtualClock::now(&clock) + chrono::Duration::seconds(10)).unwrap();
        tokio::time::timeout(Duration::from_secs(1), handle).await.unwrap().unwrap();
    }

    #[test]
    fn quiescence_barrier_blocks_until_delivery_guard_drops() {
        let clock = VirtualClock::new(Utc::now());
        assert!(clock.is_quiescent());

        let guard = clock.begin_delivery();
        assert!(!clock.is_quiescent());

        drop(guard);
        assert!(clock.is_quiescent());
    }

    /// A second `install` while the first guard is still live panics; once
    /// the guard is dropped, a later `install` succeeds (spec §4.7
    /// "singleton discipline"). Run as a single test so the process-wide
    /// flag isn't raced by other tests in this binary.
    #[test]
    fn install_enforces_one_current_clock_at_a_time() {
        let first = VirtualClock::new(Utc::now());
        let guard = install(&first);

        let second = VirtualClock::new(Utc::now());
        let result = std::panic::catch_unwind(AssertUnwindSafe(|| install(&second)));
        assert!(result.is_err(), "installing a second virtual clock should panic");

        drop(guard);

        // Disposing the first guard restores the ability to install again.
        let _guard = install(&second);
    }
}
