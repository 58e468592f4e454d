//! Per-actor recurring timer
//!
//! TigerStyle: Bounded in-flight work, explicit cancellation.
//!
//! A ticker task drives the schedule. Each tick either claims the in-flight
//! flag and spawns a firing, or is dropped because the previous firing has
//! not finished. A firing waits for the actor's turn before entering
//! `on_timer`, and gives up if the timer is cancelled while it waits.

use futures::future::BoxFuture;
use selkie_core::{ActorKey, Result};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::time::{Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, trace};

/// Entry point into an actor's `on_timer`
pub(crate) type TimerCallback = Arc<dyn Fn() -> BoxFuture<'static, Result<()>> + Send + Sync>;

/// Snapshot of a lifecycle's timer counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TimerStats {
    /// Ticks that entered `on_timer`
    pub fired_count: u64,
    /// Ticks dropped because the previous firing was still running
    pub skipped_count: u64,
    /// Firings whose `on_timer` returned an error
    pub failed_count: u64,
}

#[derive(Debug, Default)]
pub(crate) struct TimerCounters {
    fired: AtomicU64,
    skipped: AtomicU64,
    failed: AtomicU64,
}

impl TimerCounters {
    pub(crate) fn snapshot(&self) -> TimerStats {
        TimerStats {
            fired_count: self.fired.load(Ordering::Relaxed),
            skipped_count: self.skipped.load(Ordering::Relaxed),
            failed_count: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// A running timer; cancelled when stopped or dropped
pub(crate) struct ActorTimer {
    cancel: CancellationToken,
}

impl ActorTimer {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn start(
        handle: &Handle,
        key: ActorKey,
        due: Duration,
        period: Duration,
        callback: TimerCallback,
        turn: Arc<Semaphore>,
        in_flight: Arc<AtomicBool>,
        counters: Arc<TimerCounters>,
    ) -> Self {
        debug_assert!(!period.is_zero());

        let cancel = CancellationToken::new();
        let ticker = Ticker {
            key,
            callback,
            turn,
            in_flight,
            counters,
            cancel: cancel.clone(),
            handle: handle.clone(),
        };
        handle.spawn(ticker.run(due, period));

        Self { cancel }
    }

    pub(crate) fn stop(self) {
        // Drop cancels
    }
}

impl Drop for ActorTimer {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

struct Ticker {
    key: ActorKey,
    callback: TimerCallback,
    turn: Arc<Semaphore>,
    in_flight: Arc<AtomicBool>,
    counters: Arc<TimerCounters>,
    cancel: CancellationToken,
    handle: Handle,
}

impl Ticker {
    async fn run(self, due: Duration, period: Duration) {
        let mut ticks = tokio::time::interval_at(Instant::now() + due, period);
        ticks.set_missed_tick_behavior(MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                biased;
                _ = self.cancel.cancelled() => break,
                _ = ticks.tick() => {}
            }

            if self
                .in_flight
                .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
                .is_err()
            {
                self.counters.skipped.fetch_add(1, Ordering::Relaxed);
                trace!(actor_key = %self.key, "Timer tick skipped; previous firing still running");
                continue;
            }

            let firing = Firing {
                key: self.key.clone(),
                callback: self.callback.clone(),
                turn: self.turn.clone(),
                counters: self.counters.clone(),
                cancel: self.cancel.clone(),
                _in_flight: InFlightGuard(self.in_flight.clone()),
            };
            self.handle.spawn(firing.run());
        }

        debug!(actor_key = %self.key, "Timer ticker exited");
    }
}

struct Firing {
    key: ActorKey,
    callback: TimerCallback,
    turn: Arc<Semaphore>,
    counters: Arc<TimerCounters>,
    cancel: CancellationToken,
    _in_flight: InFlightGuard,
}

impl Firing {
    async fn run(self) {
        let permit = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => return,
            permit = self.turn.acquire() => permit,
        };
        let Ok(_permit) = permit else {
            return;
        };

        // Stopped between the tick and the turn
        if self.cancel.is_cancelled() {
            return;
        }

        self.counters.fired.fetch_add(1, Ordering::Relaxed);
        if let Err(e) = (self.callback)().await {
            self.counters.failed.fetch_add(1, Ordering::Relaxed);
            error!(actor_key = %self.key, error = %e, "on_timer failed");
        }
    }
}

/// Clears the in-flight flag however the firing ends
struct InFlightGuard(Arc<AtomicBool>);

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
