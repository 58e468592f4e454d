//! Turn-based call dispatch
//!
//! TigerStyle: One call in flight per actor, bounded wait, errors surfaced
//! unchanged.
//!
//! A `Dispatcher` is the handle callers get back from the registry. Every
//! call goes through [`Dispatcher::invoke`], which waits (up to the call
//! timeout) for the actor's turn, runs the call body, and releases the turn
//! however the body ends. Timer firings take the same turn.

use crate::lifecycle::{ActivationState, Actor};
use selkie_core::io::{TimeProvider, WallClockTime};
use selkie_core::{ActorKey, Error, RequestContext};
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tracing::{instrument, trace, warn};

// =============================================================================
// ActivationStats
// =============================================================================

/// Statistics for one activated actor
#[derive(Debug, Clone, Default)]
pub struct ActivationStats {
    /// When the dispatcher was created (monotonic ms)
    pub activated_at_ms: Option<u64>,
    /// Last time a call finished (monotonic ms)
    pub last_activity_at_ms: Option<u64>,
    /// Calls that ran their body
    pub invocation_count: u64,
    /// Calls whose body returned an error
    pub error_count: u64,
    /// Calls that gave up waiting for the turn
    pub timeout_count: u64,
    /// Total time spent in call bodies, in ms
    pub total_processing_time_ms: u64,
}

impl ActivationStats {
    fn with_time(time: &dyn TimeProvider) -> Self {
        Self {
            activated_at_ms: Some(time.monotonic_ms()),
            ..Default::default()
        }
    }

    fn record_invocation(&mut self, duration_ms: u64, is_error: bool, now_ms: u64) {
        self.invocation_count = self.invocation_count.saturating_add(1);
        self.total_processing_time_ms = self.total_processing_time_ms.saturating_add(duration_ms);
        self.last_activity_at_ms = Some(now_ms);
        if is_error {
            self.error_count = self.error_count.saturating_add(1);
        }
    }

    /// Average time per call body, in ms
    pub fn average_processing_time_ms(&self) -> f64 {
        if self.invocation_count == 0 {
            0.0
        } else {
            self.total_processing_time_ms as f64 / self.invocation_count as f64
        }
    }

    /// Time since the last call finished (or since activation)
    pub fn idle_time_ms(&self, time: &dyn TimeProvider) -> u64 {
        let since = self.last_activity_at_ms.or(self.activated_at_ms).unwrap_or(0);
        time.monotonic_ms().saturating_sub(since)
    }
}

// =============================================================================
// Dispatcher
// =============================================================================

/// Handle that serializes calls into one actor instance
///
/// Cheap to clone; every clone shares the same instance and turn.
pub struct Dispatcher<T: Actor + ?Sized> {
    inner: Arc<DispatcherInner<T>>,
}

struct DispatcherInner<T: Actor + ?Sized> {
    instance: Arc<T>,
    call_timeout: Duration,
    time: Arc<dyn TimeProvider>,
    stats: Mutex<ActivationStats>,
}

impl<T: Actor + ?Sized> Clone for Dispatcher<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Actor + ?Sized> Dispatcher<T> {
    /// Create a dispatcher over an instance
    pub fn new(instance: Arc<T>, call_timeout: Duration) -> Self {
        Self::with_time(instance, call_timeout, Arc::new(WallClockTime::new()))
    }

    /// Create a dispatcher with a custom time provider
    pub fn with_time(instance: Arc<T>, call_timeout: Duration, time: Arc<dyn TimeProvider>) -> Self {
        debug_assert!(!call_timeout.is_zero(), "call timeout must be positive");

        let stats = ActivationStats::with_time(time.as_ref());
        Self {
            inner: Arc::new(DispatcherInner {
                instance,
                call_timeout,
                time,
                stats: Mutex::new(stats),
            }),
        }
    }

    /// The actor's key
    pub fn key(&self) -> &ActorKey {
        self.inner.instance.lifecycle().key()
    }

    /// The wrapped instance
    ///
    /// Calls made directly on the instance bypass the turn gate.
    pub fn instance(&self) -> &Arc<T> {
        &self.inner.instance
    }

    /// The instance's activation state
    pub fn state(&self) -> ActivationState {
        self.inner.instance.lifecycle().state()
    }

    /// How long a call waits for the turn
    pub fn call_timeout(&self) -> Duration {
        self.inner.call_timeout
    }

    /// Snapshot of the call statistics
    pub fn stats(&self) -> ActivationStats {
        self.stats_slot().clone()
    }

    /// Run `call` against the instance once it is this caller's turn
    ///
    /// Waits at most the call timeout for the turn. The turn is released when
    /// the body completes, fails, or panics.
    ///
    /// # Errors
    /// - `ActorInvocationTimeout` if the turn was not obtained in time; the
    ///   body does not run
    /// - `Cancelled` if the context was cancelled while waiting
    /// - `ActorNotActive` if the instance is no longer active
    /// - whatever the body returned, unchanged
    #[instrument(
        skip(self, ctx, call),
        fields(actor_key = %self.key(), correlation_id = %ctx.correlation_id()),
        level = "debug"
    )]
    pub async fn invoke<F, Fut, R, E>(
        &self,
        ctx: &RequestContext,
        operation: &str,
        call: F,
    ) -> std::result::Result<R, E>
    where
        F: FnOnce(Arc<T>) -> Fut,
        Fut: Future<Output = std::result::Result<R, E>>,
        E: From<Error>,
    {
        let lifecycle = self.inner.instance.lifecycle();

        let acquired = tokio::select! {
            biased;
            _ = ctx.cancellation_token().cancelled() => {
                return Err(Error::Cancelled { operation: operation.to_string() }.into());
            }
            acquired = tokio::time::timeout(self.inner.call_timeout, lifecycle.turn().acquire()) => acquired,
        };

        let _turn = match acquired {
            Ok(Ok(permit)) => permit,
            Ok(Err(_)) => return Err(Error::internal("actor turn gate closed").into()),
            Err(_) => {
                self.stats_slot().timeout_count += 1;
                let timeout_ms = self.inner.call_timeout.as_millis() as u64;
                warn!(operation, timeout_ms, "Timed out waiting for actor turn");
                return Err(Error::ActorInvocationTimeout {
                    key: self.key().to_string(),
                    operation: operation.to_string(),
                    timeout_ms,
                }
                .into());
            }
        };

        let state = lifecycle.state();
        if !state.can_invoke() {
            return Err(Error::ActorNotActive {
                key: self.key().to_string(),
                state: state.to_string(),
            }
            .into());
        }

        let start_ms = self.inner.time.monotonic_ms();
        let result = call(self.inner.instance.clone()).await;
        let now_ms = self.inner.time.monotonic_ms();
        let duration_ms = now_ms.saturating_sub(start_ms);

        self.stats_slot()
            .record_invocation(duration_ms, result.is_err(), now_ms);
        trace!(operation, duration_ms, is_error = result.is_err(), "Call completed");

        result
    }

    fn stats_slot(&self) -> MutexGuard<'_, ActivationStats> {
        self.inner
            .stats
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl<T: Actor + ?Sized> std::fmt::Debug for Dispatcher<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("key", self.key())
            .field("state", &self.state())
            .field("call_timeout", &self.inner.call_timeout)
            .finish()
    }
}
