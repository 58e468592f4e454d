//! Actor lifecycle and activation state machine
//!
//! TigerStyle: Explicit lifecycle states, lock-free transitions.
//!
//! ```text
//!   +----------+  activate   +--------+  deactivate  +-------------+
//!   | Inactive | ----------> | Active | -----------> | Deactivated |
//!   +----------+             +--------+              +-------------+
//!        ^                       |
//!        +-----------------------+
//!          on_activate failed
//! ```
//!
//! Transitions are compare-and-swap on an atomic state, so racing callers
//! resolve to exactly one winner and every loser is a silent no-op. An
//! instance never leaves `Deactivated`; a fresh instance must be built.

use crate::timer::{ActorTimer, TimerCallback, TimerCounters, TimerStats};
use async_trait::async_trait;
use futures::FutureExt;
use selkie_core::constants::{
    ACTOR_DEACTIVATION_TURN_WAIT_MS_MAX, ACTOR_TIMER_INTERVAL_MS_MAX, ACTOR_TURN_PERMITS_COUNT,
};
use selkie_core::{ActorKey, Error, RequestContext, Result};
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, OnceLock};
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::{debug, error, info, instrument, warn};

// =============================================================================
// ActivationState
// =============================================================================

/// Actor lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ActivationState {
    /// Constructed, not yet activated (or activation failed)
    #[default]
    Inactive,
    /// Activated and accepting calls
    Active,
    /// Deactivated; terminal for this instance
    Deactivated,
}

impl ActivationState {
    /// Check if actor can accept new calls
    pub fn can_invoke(&self) -> bool {
        matches!(self, ActivationState::Active)
    }

    /// Check if this is the terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self, ActivationState::Deactivated)
    }

    /// Check if a transition is part of the state machine
    pub fn can_transition_to(&self, next: ActivationState) -> bool {
        matches!(
            (self, next),
            (ActivationState::Inactive, ActivationState::Active)
                | (ActivationState::Active, ActivationState::Inactive)
                | (ActivationState::Active, ActivationState::Deactivated)
        )
    }

    fn as_u8(self) -> u8 {
        match self {
            ActivationState::Inactive => 0,
            ActivationState::Active => 1,
            ActivationState::Deactivated => 2,
        }
    }

    fn from_u8(value: u8) -> Self {
        match value {
            0 => ActivationState::Inactive,
            1 => ActivationState::Active,
            _ => ActivationState::Deactivated,
        }
    }
}

impl std::fmt::Display for ActivationState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ActivationState::Inactive => write!(f, "inactive"),
            ActivationState::Active => write!(f, "active"),
            ActivationState::Deactivated => write!(f, "deactivated"),
        }
    }
}

// =============================================================================
// Actor Trait
// =============================================================================

/// Actor trait - every virtual actor implements it
///
/// Capability traits declare `Actor` as a supertrait; the registry hands out
/// `Dispatcher<dyn Capability>` handles for them.
///
/// # TigerStyle
/// - Turn-based execution (no concurrent calls or timer bodies per instance)
/// - Explicit lifecycle hooks, no-ops unless overridden
#[async_trait]
pub trait Actor: Send + Sync + 'static {
    /// The lifecycle embedded in this actor
    fn lifecycle(&self) -> &ActorLifecycle;

    /// Called once, when the instance becomes active
    async fn on_activate(&self, _ctx: &RequestContext) -> Result<()> {
        Ok(())
    }

    /// Called once, when the instance is deactivated (after its timer stops)
    async fn on_deactivate(&self, _ctx: &RequestContext) -> Result<()> {
        Ok(())
    }

    /// Called on every accepted timer tick
    async fn on_timer(&self) -> Result<()> {
        Ok(())
    }
}

// =============================================================================
// ActorLifecycle
// =============================================================================

/// Per-actor lifecycle state: activation flag, turn gate, and timer
///
/// Concrete actors embed one and return it from [`Actor::lifecycle`].
pub struct ActorLifecycle {
    key: ActorKey,
    state: AtomicU8,
    /// Binary semaphore: one call or timer body in flight
    turn: Arc<Semaphore>,
    /// Entry point into `on_timer`, bound on activation
    timer_target: OnceLock<TimerCallback>,
    timer: Mutex<Option<ActorTimer>>,
    /// Reentrancy guard: set while a timer firing is running
    timer_in_flight: Arc<AtomicBool>,
    timer_counters: Arc<TimerCounters>,
}

impl ActorLifecycle {
    /// Create an inactive lifecycle for the actor at `key`
    pub fn new(key: ActorKey) -> Self {
        Self {
            key,
            state: AtomicU8::new(ActivationState::Inactive.as_u8()),
            turn: Arc::new(Semaphore::new(ACTOR_TURN_PERMITS_COUNT)),
            timer_target: OnceLock::new(),
            timer: Mutex::new(None),
            timer_in_flight: Arc::new(AtomicBool::new(false)),
            timer_counters: Arc::new(TimerCounters::default()),
        }
    }

    /// The actor's key
    pub fn key(&self) -> &ActorKey {
        &self.key
    }

    /// Current activation state
    pub fn state(&self) -> ActivationState {
        ActivationState::from_u8(self.state.load(Ordering::Acquire))
    }

    /// Check whether the actor is active
    pub fn is_active(&self) -> bool {
        self.state() == ActivationState::Active
    }

    /// Attach a recurring timer: first tick after `due`, then every `period`
    ///
    /// A tick that arrives while the previous `on_timer` is still running is
    /// dropped. Each accepted tick waits for the actor's turn, so timer bodies
    /// never overlap calls.
    ///
    /// # Errors
    /// - `TimerAlreadyRunning` if a timer is attached
    /// - `InvalidArgument` if `period` is zero or an interval exceeds the limit
    /// - `InvalidState` if the actor was never activated, is deactivated, or
    ///   no tokio runtime is available
    pub fn set_timer(&self, due: Duration, period: Duration) -> Result<()> {
        if period.is_zero() {
            return Err(Error::invalid_argument("period", "must be greater than zero"));
        }

        let interval_max = Duration::from_millis(ACTOR_TIMER_INTERVAL_MS_MAX);
        if due > interval_max || period > interval_max {
            return Err(Error::invalid_argument(
                "period",
                format!("timer intervals must not exceed {}ms", ACTOR_TIMER_INTERVAL_MS_MAX),
            ));
        }

        if self.state().is_terminal() {
            return Err(Error::InvalidState {
                key: self.key.to_string(),
                reason: "cannot set a timer on a deactivated actor".into(),
            });
        }

        let callback = self.timer_target.get().cloned().ok_or_else(|| Error::InvalidState {
            key: self.key.to_string(),
            reason: "timer target not bound; activate the actor first".into(),
        })?;

        let handle = tokio::runtime::Handle::try_current().map_err(|_| Error::InvalidState {
            key: self.key.to_string(),
            reason: "timers require a tokio runtime".into(),
        })?;

        let mut slot = self.timer_slot();

        // Deactivation swaps the state before it clears this slot
        if self.state().is_terminal() {
            return Err(Error::InvalidState {
                key: self.key.to_string(),
                reason: "cannot set a timer on a deactivated actor".into(),
            });
        }

        if slot.is_some() {
            return Err(Error::TimerAlreadyRunning {
                key: self.key.to_string(),
            });
        }

        *slot = Some(ActorTimer::start(
            &handle,
            self.key.clone(),
            due,
            period,
            callback,
            self.turn.clone(),
            self.timer_in_flight.clone(),
            self.timer_counters.clone(),
        ));

        debug!(actor_key = %self.key, ?due, ?period, "Timer set");
        Ok(())
    }

    /// Stop the timer, if any
    ///
    /// Idempotent. A tick still waiting for the actor's turn is abandoned;
    /// an `on_timer` body already running completes.
    pub fn stop_timer(&self) {
        if let Some(timer) = self.timer_slot().take() {
            timer.stop();
            debug!(actor_key = %self.key, "Timer stopped");
        }
    }

    /// Check whether a timer is attached
    pub fn has_timer(&self) -> bool {
        self.timer_slot().is_some()
    }

    /// Timer counters since construction
    pub fn timer_stats(&self) -> TimerStats {
        self.timer_counters.snapshot()
    }

    pub(crate) fn turn(&self) -> &Arc<Semaphore> {
        &self.turn
    }

    fn timer_slot(&self) -> MutexGuard<'_, Option<ActorTimer>> {
        // The guarded value is a plain Option; a panic elsewhere cannot leave it torn
        self.timer.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn transition(&self, from: ActivationState, to: ActivationState) -> bool {
        debug_assert!(from.can_transition_to(to), "invalid transition {} -> {}", from, to);
        self.state
            .compare_exchange(from.as_u8(), to.as_u8(), Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    fn bind<T: Actor + ?Sized>(&self, actor: &Arc<T>) {
        let weak = Arc::downgrade(actor);
        let callback: TimerCallback = Arc::new(move || {
            let weak = weak.clone();
            async move {
                match weak.upgrade() {
                    Some(actor) => actor.on_timer().await,
                    None => Ok(()),
                }
            }
            .boxed()
        });
        // Already bound on an earlier activation attempt; the target is the same
        let _ = self.timer_target.set(callback);
    }
}

impl std::fmt::Debug for ActorLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorLifecycle")
            .field("key", &self.key)
            .field("state", &self.state())
            .field("has_timer", &self.has_timer())
            .finish()
    }
}

// =============================================================================
// Transitions
// =============================================================================

/// Activate an actor instance
///
/// Returns `Ok(true)` for the caller that performed the transition and ran
/// `on_activate`, `Ok(false)` for every other caller. If `on_activate` fails
/// the instance returns to `Inactive`, any timer it set is stopped, and the
/// hook's error is returned unchanged.
#[instrument(
    skip(actor, ctx),
    fields(actor_key = %actor.lifecycle().key(), correlation_id = %ctx.correlation_id()),
    level = "debug"
)]
pub async fn activate<T: Actor + ?Sized>(actor: &Arc<T>, ctx: &RequestContext) -> Result<bool> {
    let lifecycle = actor.lifecycle();

    if !lifecycle.transition(ActivationState::Inactive, ActivationState::Active) {
        debug!(state = %lifecycle.state(), "Activation skipped");
        return Ok(false);
    }

    lifecycle.bind(actor);

    if let Err(e) = actor.on_activate(ctx).await {
        lifecycle.stop_timer();
        // A concurrent deactivation may already have won; leave it terminal
        let _ = lifecycle.transition(ActivationState::Active, ActivationState::Inactive);
        error!(actor_key = %lifecycle.key(), error = %e, "on_activate failed");
        return Err(e);
    }

    info!(actor_key = %lifecycle.key(), "Actor activated");
    Ok(true)
}

/// Deactivate an actor instance
///
/// Returns `Ok(true)` for the caller that performed the transition. The
/// winner stops the timer, waits for the actor's turn so `on_deactivate`
/// never overlaps a call or timer body, and then runs the hook. The wait is
/// bounded by `ACTOR_DEACTIVATION_TURN_WAIT_MS_MAX`; past it the hook runs
/// without the turn. A hook failure is returned unchanged but the instance
/// stays `Deactivated`.
#[instrument(
    skip(actor, ctx),
    fields(actor_key = %actor.lifecycle().key(), correlation_id = %ctx.correlation_id()),
    level = "debug"
)]
pub async fn deactivate<T: Actor + ?Sized>(actor: &T, ctx: &RequestContext) -> Result<bool> {
    let lifecycle = actor.lifecycle();

    if !lifecycle.transition(ActivationState::Active, ActivationState::Deactivated) {
        debug!(state = %lifecycle.state(), "Deactivation skipped");
        return Ok(false);
    }

    lifecycle.stop_timer();

    let wait = Duration::from_millis(ACTOR_DEACTIVATION_TURN_WAIT_MS_MAX);
    let _turn = match tokio::time::timeout(wait, lifecycle.turn().acquire()).await {
        Ok(Ok(permit)) => Some(permit),
        Ok(Err(_)) => None,
        Err(_) => {
            warn!(
                actor_key = %lifecycle.key(),
                wait_ms = ACTOR_DEACTIVATION_TURN_WAIT_MS_MAX,
                "Turn still held; running on_deactivate without it"
            );
            None
        }
    };

    if let Err(e) = actor.on_deactivate(ctx).await {
        error!(actor_key = %lifecycle.key(), error = %e, "on_deactivate failed");
        return Err(e);
    }

    info!(
        actor_key = %lifecycle.key(),
        timer_fired = lifecycle.timer_stats().fired_count,
        "Actor deactivated"
    );
    Ok(true)
}
