//! Activation registry
//!
//! TigerStyle: Single activation guarantee, bounded actor count.
//!
//! The registry maps `(interface, key)` to the one activated instance for
//! that key. Each pair owns a slot with an async mutex: the first caller to
//! lock an empty slot builds and activates the instance while every other
//! caller for the same pair waits and then reuses the result. Work on
//! different keys never contends beyond the short map lock.
//!
//! A slot that is removed (deactivation, or a failed activation) is marked
//! retired before it leaves the map, so a waiter that wakes on it goes back
//! to the map instead of activating into an orphaned slot.

use crate::dispatcher::Dispatcher;
use crate::lifecycle::{self, ActivationState, Actor};
use async_trait::async_trait;
use futures::future::join_all;
use selkie_core::io::{TimeProvider, WallClockTime};
use selkie_core::{ActorKey, Error, RegistryConfig, RequestContext, Result};
use std::any::{type_name, Any, TypeId};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, RwLock};
use tokio::runtime::Handle;
use tokio::sync::OwnedMutexGuard;
use tracing::{debug, info, instrument, warn, Instrument};

/// Builds an instance for a key
///
/// Factories receive the caller's context and the registry, so an actor can
/// keep proxies to the actors it depends on.
pub type ActorFactoryFn<T> =
    Arc<dyn Fn(&RequestContext, &ActorKey, &ActorRegistry) -> Result<Arc<T>> + Send + Sync>;

// =============================================================================
// Activation Records
// =============================================================================

/// Type-erased view of a stored dispatcher
#[async_trait]
trait ActivationRecord: Send + Sync {
    fn as_any(&self) -> &(dyn Any + Send + Sync);

    fn state(&self) -> ActivationState;

    async fn deactivate(&self, ctx: &RequestContext) -> Result<bool>;
}

#[async_trait]
impl<T: Actor + ?Sized> ActivationRecord for Dispatcher<T> {
    fn as_any(&self) -> &(dyn Any + Send + Sync) {
        self
    }

    fn state(&self) -> ActivationState {
        Dispatcher::state(self)
    }

    async fn deactivate(&self, ctx: &RequestContext) -> Result<bool> {
        lifecycle::deactivate(self.instance().as_ref(), ctx).await
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct RecordKey {
    interface: TypeId,
    key: ActorKey,
}

impl RecordKey {
    fn of<T: ?Sized + 'static>(key: &ActorKey) -> Self {
        Self {
            interface: TypeId::of::<T>(),
            key: key.clone(),
        }
    }
}

struct ActivationSlot {
    interface: &'static str,
    key: ActorKey,
    entry: Arc<tokio::sync::Mutex<SlotEntry>>,
}

#[derive(Default)]
struct SlotEntry {
    record: Option<Arc<dyn ActivationRecord>>,
    /// Removed from the map; waiters must look the key up again
    retired: bool,
}

/// Holds a slot's lock while its first instance is built and activated
///
/// Dropped without `commit` (activation failed, or the caller's future was
/// dropped mid-`on_activate`), it retires the slot, removes it from the map
/// and deactivates whatever instance had already been built.
struct PendingActivation<'a> {
    registry: &'a ActorRegistry,
    record_key: &'a RecordKey,
    slot: &'a Arc<ActivationSlot>,
    ctx: RequestContext,
    entry: OwnedMutexGuard<SlotEntry>,
    record: Option<Arc<dyn ActivationRecord>>,
    committed: bool,
}

impl PendingActivation<'_> {
    fn commit(mut self) {
        self.entry.record = self.record.take();
        self.committed = true;
    }
}

impl Drop for PendingActivation<'_> {
    fn drop(&mut self) {
        if self.committed {
            return;
        }

        self.entry.retired = true;
        self.registry.release_slot(self.record_key, self.slot);

        let Some(record) = self.record.take() else {
            return;
        };
        if record.state() != ActivationState::Active {
            return;
        }

        warn!(actor_key = %self.slot.key, "Activation abandoned; deactivating instance");
        match Handle::try_current() {
            Ok(handle) => {
                let ctx = self.ctx.clone();
                handle.spawn(async move {
                    let _ = record.deactivate(&ctx).await;
                });
            }
            Err(_) => {
                warn!(actor_key = %self.slot.key, "No runtime to deactivate abandoned instance");
            }
        }
    }
}

struct Registration {
    interface: &'static str,
    /// `ActorFactoryFn<T>` for the interface's `T`
    factory: Box<dyn Any + Send + Sync>,
}

// =============================================================================
// DeactivationSummary
// =============================================================================

/// One instance whose `on_deactivate` failed during a bulk deactivation
#[derive(Debug)]
pub struct DeactivationFailure {
    /// Interface name the instance was registered under
    pub interface: &'static str,
    /// The instance's key
    pub key: ActorKey,
    /// The hook's error
    pub error: Error,
}

/// Outcome of [`ActorRegistry::deactivate_all`]
#[derive(Debug, Default)]
pub struct DeactivationSummary {
    /// Instances deactivated cleanly
    pub deactivated: usize,
    /// Instances whose hook failed; they are still removed and terminal
    pub failures: Vec<DeactivationFailure>,
}

impl DeactivationSummary {
    /// Instances visited
    pub fn total(&self) -> usize {
        self.deactivated + self.failures.len()
    }

    /// Check whether every hook succeeded
    pub fn is_clean(&self) -> bool {
        self.failures.is_empty()
    }

    /// Collapse into the number of instances, or an aggregated error
    pub fn into_result(self) -> Result<usize> {
        if self.is_clean() {
            return Ok(self.deactivated);
        }

        let total = self.total();
        Err(Error::DeactivationIncomplete {
            failed: self.failures.len(),
            total,
            reasons: self
                .failures
                .into_iter()
                .map(|f| format!("{} {}: {}", f.interface, f.key, f.error))
                .collect(),
        })
    }
}

// =============================================================================
// ActorRegistry
// =============================================================================

/// Registry of actor factories and activated instances
///
/// Cheap to clone; clones share state.
#[derive(Clone)]
pub struct ActorRegistry {
    inner: Arc<RegistryInner>,
}

struct RegistryInner {
    config: RegistryConfig,
    time: Arc<dyn TimeProvider>,
    factories: RwLock<HashMap<TypeId, Registration>>,
    slots: Mutex<HashMap<RecordKey, Arc<ActivationSlot>>>,
}

impl ActorRegistry {
    /// Create a registry
    ///
    /// # Errors
    /// `InvalidConfiguration` if the configuration does not validate
    pub fn new(config: RegistryConfig) -> Result<Self> {
        Self::with_time(config, Arc::new(WallClockTime::new()))
    }

    /// Create a registry whose dispatchers use a custom time provider
    pub fn with_time(config: RegistryConfig, time: Arc<dyn TimeProvider>) -> Result<Self> {
        config.validate()?;

        debug!(
            call_timeout_ms = config.call_timeout_ms,
            max_actors = config.max_actors_count,
            "Registry created"
        );

        Ok(Self {
            inner: Arc::new(RegistryInner {
                config,
                time,
                factories: RwLock::new(HashMap::new()),
                slots: Mutex::new(HashMap::new()),
            }),
        })
    }

    /// The registry configuration
    pub fn config(&self) -> &RegistryConfig {
        &self.inner.config
    }

    /// Register the factory for interface `T`, replacing any earlier one
    ///
    /// `T` is usually a capability trait object (`dyn Cache`); a concrete
    /// actor type works too.
    pub fn register<T, F>(&self, factory: F)
    where
        T: Actor + ?Sized,
        F: Fn(&RequestContext, &ActorKey, &ActorRegistry) -> Result<Arc<T>> + Send + Sync + 'static,
    {
        let factory: ActorFactoryFn<T> = Arc::new(factory);
        let registration = Registration {
            interface: type_name::<T>(),
            factory: Box::new(factory),
        };

        let replaced = self
            .factories()
            .insert(TypeId::of::<T>(), registration)
            .is_some();

        if replaced {
            warn!(interface = type_name::<T>(), "Factory replaced");
        } else {
            debug!(interface = type_name::<T>(), "Factory registered");
        }
    }

    /// Check whether interface `T` has a factory
    pub fn is_registered<T: Actor + ?Sized>(&self) -> bool {
        self.factories_read().contains_key(&TypeId::of::<T>())
    }

    /// Get the dispatcher for `key`, activating an instance on first use
    ///
    /// Concurrent callers for the same key get the same instance; the factory
    /// and `on_activate` run once. If either fails nothing is stored and the
    /// error is returned to this caller; the next call tries again.
    ///
    /// # Errors
    /// - `NotRegistered` if `T` has no factory
    /// - `ActorCapacityExceeded` if the registry is full
    /// - the factory's or `on_activate`'s error, unchanged
    #[instrument(
        skip(self, ctx),
        fields(interface = type_name::<T>(), actor_key = %key, correlation_id = %ctx.correlation_id()),
        level = "debug"
    )]
    pub async fn create_proxy<T: Actor + ?Sized>(
        &self,
        ctx: &RequestContext,
        key: &ActorKey,
    ) -> Result<Dispatcher<T>> {
        let factory = self.factory::<T>()?;
        let record_key = RecordKey::of::<T>(key);

        loop {
            let slot = self.claim_slot::<T>(&record_key)?;
            let mut entry = slot.entry.clone().lock_owned().await;

            if entry.retired {
                continue;
            }

            if let Some(record) = &entry.record {
                if record.state() == ActivationState::Active {
                    return downcast::<T>(record.as_ref());
                }
                // Deactivated behind the registry's back; replace it
                debug!("Replacing stale activation");
                entry.record = None;
            }

            let mut pending = PendingActivation {
                registry: self,
                record_key: &record_key,
                slot: &slot,
                ctx: ctx.clone(),
                entry,
                record: None,
                committed: false,
            };

            let activation_ctx = ctx.child("activation");
            let activated = async {
                let instance = factory(ctx, key, self)?;
                let dispatcher = Dispatcher::with_time(
                    instance,
                    self.inner.config.call_timeout(),
                    self.inner.time.clone(),
                );
                pending.record = Some(Arc::new(dispatcher.clone()));
                lifecycle::activate(dispatcher.instance(), ctx).await?;
                Ok::<_, Error>(dispatcher)
            }
            .instrument(activation_ctx.span())
            .await;

            return match activated {
                Ok(dispatcher) => {
                    pending.commit();
                    info!("Activation registered");
                    Ok(dispatcher)
                }
                Err(e) => {
                    drop(pending);
                    warn!(error = %e, "Activation failed");
                    Err(e)
                }
            };
        }
    }

    /// Get the dispatcher for `key` if an instance is active
    ///
    /// Never activates. Waits for an activation of `key` already in progress.
    pub async fn get<T: Actor + ?Sized>(&self, key: &ActorKey) -> Result<Option<Dispatcher<T>>> {
        let slot = self.slots().get(&RecordKey::of::<T>(key)).cloned();
        let Some(slot) = slot else {
            return Ok(None);
        };

        let entry = slot.entry.lock().await;
        match &entry.record {
            Some(record) if record.state() == ActivationState::Active => {
                downcast::<T>(record.as_ref()).map(Some)
            }
            _ => Ok(None),
        }
    }

    /// Deactivate the instance for `key` and forget it
    ///
    /// Returns `Ok(false)` if there was no instance. The record is removed
    /// even if `on_deactivate` fails; the hook's error is then returned.
    #[instrument(
        skip(self, ctx),
        fields(interface = type_name::<T>(), actor_key = %key, correlation_id = %ctx.correlation_id()),
        level = "debug"
    )]
    pub async fn deactivate<T: Actor + ?Sized>(
        &self,
        ctx: &RequestContext,
        key: &ActorKey,
    ) -> Result<bool> {
        let slot = self.slots().remove(&RecordKey::of::<T>(key));
        let Some(slot) = slot else {
            debug!("No activation to deactivate");
            return Ok(false);
        };

        let Some(record) = retire(&slot).await else {
            return Ok(false);
        };

        record
            .deactivate(ctx)
            .instrument(ctx.child("deactivation").span())
            .await
            .map(|_| true)
    }

    /// Deactivate every instance and empty the registry
    ///
    /// Hooks run concurrently. A failing hook does not stop the others; its
    /// error is reported in the summary.
    #[instrument(skip(self, ctx), fields(correlation_id = %ctx.correlation_id()), level = "info")]
    pub async fn deactivate_all(&self, ctx: &RequestContext) -> DeactivationSummary {
        let slots: Vec<Arc<ActivationSlot>> = self.slots().drain().map(|(_, slot)| slot).collect();
        let sweep_ctx = ctx.child("deactivation");

        let outcomes = join_all(slots.iter().map(|slot| {
            async move {
                let record = retire(slot).await?;
                Some(record.deactivate(ctx).await)
            }
            .instrument(sweep_ctx.span())
        }))
        .await;

        let mut summary = DeactivationSummary::default();
        for (slot, outcome) in slots.iter().zip(outcomes) {
            match outcome {
                None => {}
                Some(Ok(_)) => summary.deactivated += 1,
                Some(Err(error)) => summary.failures.push(DeactivationFailure {
                    interface: slot.interface,
                    key: slot.key.clone(),
                    error,
                }),
            }
        }

        if summary.is_clean() {
            info!(deactivated = summary.deactivated, "All actors deactivated");
        } else {
            warn!(
                deactivated = summary.deactivated,
                failed = summary.failures.len(),
                "Deactivation finished with failures"
            );
        }

        summary
    }

    /// Number of keys with an activation (including ones in progress)
    pub fn active_count(&self) -> usize {
        self.slots().len()
    }

    fn factory<T: Actor + ?Sized>(&self) -> Result<ActorFactoryFn<T>> {
        let factories = self.factories_read();
        let registration = factories
            .get(&TypeId::of::<T>())
            .ok_or_else(|| Error::not_registered(type_name::<T>()))?;

        registration
            .factory
            .downcast_ref::<ActorFactoryFn<T>>()
            .cloned()
            .ok_or_else(|| {
                Error::internal(format!(
                    "factory for {} has the wrong type",
                    registration.interface
                ))
            })
    }

    /// Get the slot for `record_key`, inserting an empty one if absent
    fn claim_slot<T: ?Sized>(&self, record_key: &RecordKey) -> Result<Arc<ActivationSlot>> {
        let mut slots = self.slots();
        if let Some(slot) = slots.get(record_key) {
            return Ok(slot.clone());
        }

        let limit = self.inner.config.max_actors_count;
        if slots.len() >= limit {
            warn!(limit, "Actor capacity exceeded");
            return Err(Error::ActorCapacityExceeded { limit });
        }

        let slot = Arc::new(ActivationSlot {
            interface: type_name::<T>(),
            key: record_key.key.clone(),
            entry: Arc::new(tokio::sync::Mutex::new(SlotEntry::default())),
        });
        slots.insert(record_key.clone(), slot.clone());

        debug_assert!(slots.len() <= limit);
        Ok(slot)
    }

    /// Remove `slot` from the map if it is still the current one
    fn release_slot(&self, record_key: &RecordKey, slot: &Arc<ActivationSlot>) {
        let mut slots = self.slots();
        if slots
            .get(record_key)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            slots.remove(record_key);
        }
    }

    fn slots(&self) -> MutexGuard<'_, HashMap<RecordKey, Arc<ActivationSlot>>> {
        self.inner
            .slots
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn factories(&self) -> std::sync::RwLockWriteGuard<'_, HashMap<TypeId, Registration>> {
        self.inner
            .factories
            .write()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn factories_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<TypeId, Registration>> {
        self.inner
            .factories
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for ActorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ActorRegistry")
            .field("config", &self.inner.config)
            .field("registered", &self.factories_read().len())
            .field("active", &self.active_count())
            .finish()
    }
}

/// Mark a removed slot retired and take its record
async fn retire(slot: &ActivationSlot) -> Option<Arc<dyn ActivationRecord>> {
    let mut entry = slot.entry.lock().await;
    entry.retired = true;
    entry.record.take()
}

fn downcast<T: Actor + ?Sized>(record: &dyn ActivationRecord) -> Result<Dispatcher<T>> {
    record
        .as_any()
        .downcast_ref::<Dispatcher<T>>()
        .cloned()
        .ok_or_else(|| Error::internal(format!("activation is not a {}", type_name::<T>())))
}
