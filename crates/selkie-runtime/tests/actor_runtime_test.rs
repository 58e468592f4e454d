//! End-to-end tests for the actor runtime
//!
//! TigerStyle: Each test pins one runtime guarantee through the public API
//! only: registry, dispatcher, lifecycle.

use async_trait::async_trait;
use selkie_core::{ActorKey, Error, ManualClock, RegistryConfig, RequestContext, Result};
use selkie_runtime::{ActivationState, Actor, ActorLifecycle, ActorRegistry, Dispatcher};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::Instant;

// =============================================================================
// Test Actor Definition
// =============================================================================

#[async_trait]
trait TokenCache: Actor {
    async fn refresh(&self, hold: Duration) -> Result<u64>;

    async fn fail(&self, message: &str) -> Result<()>;

    fn generation(&self) -> u64;
}

#[derive(Default)]
struct Probe {
    built: AtomicUsize,
    activations: AtomicUsize,
    deactivations: AtomicUsize,
    timer_entries: AtomicUsize,
    busy: AtomicBool,
    overlaps: AtomicUsize,
    intervals: Mutex<Vec<(Instant, Instant)>>,
    seen_tenant: Mutex<Option<String>>,
}

impl Probe {
    fn enter(&self) {
        if self.busy.swap(true, Ordering::SeqCst) {
            self.overlaps.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn exit(&self) {
        self.busy.store(false, Ordering::SeqCst);
    }
}

struct TokenCacheActor {
    lifecycle: ActorLifecycle,
    probe: Arc<Probe>,
    generation: AtomicUsize,
    timer: Option<(Duration, Duration)>,
    timer_work: Duration,
    activation_delay: Duration,
    fail_deactivation: bool,
}

#[async_trait]
impl Actor for TokenCacheActor {
    fn lifecycle(&self) -> &ActorLifecycle {
        &self.lifecycle
    }

    async fn on_activate(&self, ctx: &RequestContext) -> Result<()> {
        self.probe.activations.fetch_add(1, Ordering::SeqCst);
        *self.probe.seen_tenant.lock().unwrap() = ctx
            .property("tenant")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        if let Some((due, period)) = self.timer {
            self.lifecycle.set_timer(due, period)?;
        }
        if !self.activation_delay.is_zero() {
            tokio::time::sleep(self.activation_delay).await;
        }
        Ok(())
    }

    async fn on_deactivate(&self, _ctx: &RequestContext) -> Result<()> {
        self.probe.enter();
        self.probe.deactivations.fetch_add(1, Ordering::SeqCst);
        self.probe.exit();
        if self.fail_deactivation {
            return Err(Error::internal("flush failed"));
        }
        Ok(())
    }

    async fn on_timer(&self) -> Result<()> {
        self.probe.enter();
        self.probe.timer_entries.fetch_add(1, Ordering::SeqCst);
        tokio::time::sleep(self.timer_work).await;
        self.probe.exit();
        Ok(())
    }
}

#[async_trait]
impl TokenCache for TokenCacheActor {
    async fn refresh(&self, hold: Duration) -> Result<u64> {
        self.probe.enter();
        let start = Instant::now();
        tokio::time::sleep(hold).await;
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) as u64 + 1;
        self.probe.intervals.lock().unwrap().push((start, Instant::now()));
        self.probe.exit();
        Ok(generation)
    }

    async fn fail(&self, message: &str) -> Result<()> {
        Err(anyhow::anyhow!(message.to_string()).into())
    }

    fn generation(&self) -> u64 {
        self.generation.load(Ordering::SeqCst) as u64
    }
}

#[derive(Clone, Default)]
struct CacheSetup {
    timer: Option<(Duration, Duration)>,
    timer_work: Duration,
    activation_delay: Duration,
    failing_key: Option<&'static str>,
}

fn registry_with(config: RegistryConfig, setup: CacheSetup, probe: Arc<Probe>) -> ActorRegistry {
    let registry = ActorRegistry::new(config).unwrap();
    registry.register::<dyn TokenCache, _>(move |_ctx, key, _registry| {
        probe.built.fetch_add(1, Ordering::SeqCst);
        Ok(Arc::new(TokenCacheActor {
            lifecycle: ActorLifecycle::new(key.clone()),
            probe: probe.clone(),
            generation: AtomicUsize::new(0),
            timer: setup.timer,
            timer_work: setup.timer_work,
            activation_delay: setup.activation_delay,
            fail_deactivation: setup.failing_key == Some(key.vector_key()),
        }) as Arc<dyn TokenCache>)
    });
    registry
}

fn key(name: &str) -> ActorKey {
    ActorKey::new(name).unwrap()
}

async fn proxy(registry: &ActorRegistry, name: &str) -> Dispatcher<dyn TokenCache> {
    registry
        .create_proxy::<dyn TokenCache>(&RequestContext::new(), &key(name))
        .await
        .unwrap()
}

// =============================================================================
// Keys
// =============================================================================

#[test]
fn test_key_is_case_insensitive() {
    for s in ["Thumbprint-AB12", "user@example.com", "MiXeD cAsE"] {
        assert_eq!(key(s), key(&s.to_lowercase()));
        assert_eq!(key(s).key(), key(&s.to_uppercase()).key());
        assert_eq!(key(s), key(s));
    }
    assert_ne!(key("a"), key("b"));
}

// =============================================================================
// Single Activation
// =============================================================================

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_create_proxy_builds_one_instance() {
    let probe = Arc::new(Probe::default());
    let registry = registry_with(RegistryConfig::default(), CacheSetup::default(), probe.clone());

    let tasks: Vec<_> = (0..32)
        .map(|i| {
            let registry = registry.clone();
            // Alternate casing; the key is the same
            let name = if i % 2 == 0 { "tenant-1" } else { "TENANT-1" };
            tokio::spawn(async move { proxy(&registry, name).await })
        })
        .collect();

    let mut dispatchers = Vec::new();
    for task in tasks {
        dispatchers.push(task.await.unwrap());
    }

    assert_eq!(probe.built.load(Ordering::SeqCst), 1);
    assert_eq!(probe.activations.load(Ordering::SeqCst), 1);
    assert_eq!(registry.active_count(), 1);
    assert!(dispatchers
        .iter()
        .all(|d| Arc::ptr_eq(d.instance(), dispatchers[0].instance())));
}

#[tokio::test]
async fn test_context_reaches_activation_hook() {
    let probe = Arc::new(Probe::default());
    let registry = registry_with(RegistryConfig::default(), CacheSetup::default(), probe.clone());

    let ctx = RequestContext::with_correlation_id("req-42").with_property("tenant", "contoso");
    registry
        .create_proxy::<dyn TokenCache>(&ctx, &key("ctx"))
        .await
        .unwrap();

    assert_eq!(probe.seen_tenant.lock().unwrap().as_deref(), Some("contoso"));
}

#[tokio::test]
async fn test_deactivated_key_gets_fresh_instance() {
    let probe = Arc::new(Probe::default());
    let registry = registry_with(RegistryConfig::default(), CacheSetup::default(), probe.clone());
    let ctx = RequestContext::new();

    let first = proxy(&registry, "k").await;
    first
        .invoke(&ctx, "refresh", |c| async move { c.refresh(Duration::ZERO).await })
        .await
        .unwrap();
    assert_eq!(first.instance().generation(), 1);

    registry.deactivate::<dyn TokenCache>(&ctx, &key("k")).await.unwrap();

    // The old handle is dead
    let err = first
        .invoke(&ctx, "refresh", |c| async move { c.refresh(Duration::ZERO).await })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ActorNotActive { .. }));

    let second = proxy(&registry, "k").await;
    assert_eq!(second.instance().generation(), 0);
    assert_eq!(probe.built.load(Ordering::SeqCst), 2);
}

#[tokio::test(start_paused = true)]
async fn test_get_waits_for_activation_in_progress() {
    let probe = Arc::new(Probe::default());
    let setup = CacheSetup {
        activation_delay: Duration::from_millis(100),
        ..Default::default()
    };
    let registry = registry_with(RegistryConfig::default(), setup, probe.clone());

    let creating = {
        let registry = registry.clone();
        tokio::spawn(async move { proxy(&registry, "warming").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(probe.activations.load(Ordering::SeqCst), 1);

    let start = Instant::now();
    let found = registry
        .get::<dyn TokenCache>(&key("warming"))
        .await
        .unwrap()
        .expect("activation finished while get waited");
    assert!(start.elapsed() >= Duration::from_millis(90));

    let created = creating.await.unwrap();
    assert!(Arc::ptr_eq(found.instance(), created.instance()));
    assert_eq!(probe.built.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_deactivate_all_racing_activation() {
    let probe = Arc::new(Probe::default());
    let setup = CacheSetup {
        activation_delay: Duration::from_millis(100),
        ..Default::default()
    };
    let registry = registry_with(RegistryConfig::default(), setup, probe.clone());

    let creating = {
        let registry = registry.clone();
        tokio::spawn(async move { proxy(&registry, "racing").await })
    };
    tokio::time::sleep(Duration::from_millis(10)).await;

    let summary = registry.deactivate_all(&RequestContext::new()).await;
    assert_eq!(summary.deactivated, 1);
    assert!(summary.is_clean());

    // The in-flight activation completed and was swept, not leaked
    let created = creating.await.unwrap();
    assert_eq!(created.state(), ActivationState::Deactivated);
    assert_eq!(probe.deactivations.load(Ordering::SeqCst), 1);
    assert_eq!(registry.active_count(), 0);
}

// =============================================================================
// Turn-Based Calls
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_concurrent_calls_never_overlap() {
    let probe = Arc::new(Probe::default());
    let registry = registry_with(RegistryConfig::default(), CacheSetup::default(), probe.clone());
    let cache = proxy(&registry, "serial").await;
    let ctx = RequestContext::new();

    let calls = (0u64..10).map(|i| {
        cache.invoke(&ctx, "refresh", move |c| async move {
            c.refresh(Duration::from_millis(3 + i % 4)).await
        })
    });
    let results = futures::future::join_all(calls).await;

    let mut generations: Vec<u64> = results.into_iter().map(|r| r.unwrap()).collect();
    generations.sort_unstable();
    assert_eq!(generations, (1..=10).collect::<Vec<u64>>());

    let mut intervals = probe.intervals.lock().unwrap().clone();
    intervals.sort_by_key(|(start, _)| *start);
    for pair in intervals.windows(2) {
        assert!(pair[0].1 <= pair[1].0, "calls overlapped: {:?}", pair);
    }
    assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn test_error_kind_and_message_preserved() {
    let probe = Arc::new(Probe::default());
    let registry = registry_with(RegistryConfig::default(), CacheSetup::default(), probe);
    let cache = proxy(&registry, "errors").await;

    let err = cache
        .invoke(&RequestContext::new(), "fail", |c| async move { c.fail("boom").await })
        .await
        .unwrap_err();

    assert!(matches!(err, Error::Other(_)));
    assert_eq!(err.to_string(), "boom");
}

#[tokio::test(start_paused = true)]
async fn test_waiting_call_times_out_without_running() {
    let probe = Arc::new(Probe::default());
    let config = RegistryConfig::default().with_call_timeout(Duration::from_millis(100));
    let registry = registry_with(config, CacheSetup::default(), probe);
    let cache = proxy(&registry, "slow").await;

    let slow = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .invoke(&RequestContext::new(), "refresh", |c| async move {
                    c.refresh(Duration::from_secs(1)).await
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    let err = cache
        .invoke(&RequestContext::new(), "refresh", |c| async move {
            c.refresh(Duration::ZERO).await
        })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::ActorInvocationTimeout { .. }));

    assert_eq!(slow.await.unwrap().unwrap(), 1);
    assert_eq!(cache.instance().generation(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_while_waiting_for_turn() {
    let probe = Arc::new(Probe::default());
    let registry = registry_with(RegistryConfig::default(), CacheSetup::default(), probe);
    let cache = proxy(&registry, "busy").await;

    let holder = {
        let cache = cache.clone();
        tokio::spawn(async move {
            cache
                .invoke(&RequestContext::new(), "refresh", |c| async move {
                    c.refresh(Duration::from_secs(1)).await
                })
                .await
        })
    };
    tokio::time::sleep(Duration::from_millis(1)).await;

    let ctx = RequestContext::new();
    let canceller = {
        let ctx = ctx.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            ctx.cancel();
        })
    };

    let start = Instant::now();
    let err = cache
        .invoke(&ctx, "refresh", |c| async move { c.refresh(Duration::ZERO).await })
        .await
        .unwrap_err();
    assert!(matches!(err, Error::Cancelled { .. }));
    assert!(start.elapsed() < Duration::from_secs(1));

    canceller.await.unwrap();
    assert_eq!(holder.await.unwrap().unwrap(), 1);
    assert_eq!(cache.instance().generation(), 1);
}

// =============================================================================
// Timers
// =============================================================================

#[tokio::test(start_paused = true)]
async fn test_slow_timer_skips_overlapping_ticks() {
    let probe = Arc::new(Probe::default());
    let setup = CacheSetup {
        timer: Some((Duration::ZERO, Duration::from_millis(10))),
        timer_work: Duration::from_millis(35),
        ..Default::default()
    };
    let registry = registry_with(RegistryConfig::default(), setup, probe.clone());
    let cache = proxy(&registry, "timer").await;

    let window = Duration::from_millis(200);
    tokio::time::sleep(window).await;

    let entries = probe.timer_entries.load(Ordering::SeqCst);
    assert!(entries > 0);
    assert!(entries < (window.as_millis() / 10) as usize);
    assert!(cache.instance().lifecycle().timer_stats().skipped_count > 0);
}

#[tokio::test(start_paused = true)]
async fn test_timer_and_calls_share_the_turn() {
    let probe = Arc::new(Probe::default());
    let setup = CacheSetup {
        timer: Some((Duration::from_millis(5), Duration::from_millis(10))),
        timer_work: Duration::from_millis(4),
        ..Default::default()
    };
    let registry = registry_with(RegistryConfig::default(), setup, probe.clone());
    let cache = proxy(&registry, "shared").await;
    let ctx = RequestContext::new();

    for _ in 0..20 {
        cache
            .invoke(&ctx, "refresh", |c| async move {
                c.refresh(Duration::from_millis(7)).await
            })
            .await
            .unwrap();
    }

    assert!(probe.timer_entries.load(Ordering::SeqCst) > 0);
    assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
}

#[tokio::test(start_paused = true)]
async fn test_deactivation_stops_timer() {
    let probe = Arc::new(Probe::default());
    let setup = CacheSetup {
        timer: Some((Duration::from_millis(100), Duration::from_millis(100))),
        ..Default::default()
    };
    let registry = registry_with(RegistryConfig::default(), setup, probe.clone());
    let cache = proxy(&registry, "stopping").await;

    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(probe.timer_entries.load(Ordering::SeqCst), 2);

    registry
        .deactivate::<dyn TokenCache>(&RequestContext::new(), &key("stopping"))
        .await
        .unwrap();
    assert!(!cache.instance().lifecycle().has_timer());
    let after = probe.timer_entries.load(Ordering::SeqCst);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(probe.timer_entries.load(Ordering::SeqCst), after);
}

#[tokio::test(start_paused = true)]
async fn test_deactivation_waits_for_running_timer_body() {
    let probe = Arc::new(Probe::default());
    let setup = CacheSetup {
        timer: Some((Duration::ZERO, Duration::from_secs(1))),
        timer_work: Duration::from_millis(200),
        ..Default::default()
    };
    let registry = registry_with(RegistryConfig::default(), setup, probe.clone());
    let _cache = proxy(&registry, "flushing").await;

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(probe.timer_entries.load(Ordering::SeqCst), 1);

    let start = Instant::now();
    registry
        .deactivate::<dyn TokenCache>(&RequestContext::new(), &key("flushing"))
        .await
        .unwrap();

    assert!(start.elapsed() >= Duration::from_millis(150));
    assert_eq!(probe.deactivations.load(Ordering::SeqCst), 1);
    assert_eq!(probe.overlaps.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Bulk Deactivation
// =============================================================================

#[tokio::test]
async fn test_deactivate_all_tolerates_failing_hook() {
    let probe = Arc::new(Probe::default());
    let setup = CacheSetup {
        failing_key: Some("cache-2"),
        ..Default::default()
    };
    let registry = registry_with(RegistryConfig::default(), setup, probe.clone());

    let mut caches = Vec::new();
    for i in 0..5 {
        caches.push(proxy(&registry, &format!("cache-{}", i)).await);
    }

    let summary = registry.deactivate_all(&RequestContext::new()).await;

    assert_eq!(summary.total(), 5);
    assert_eq!(summary.deactivated, 4);
    assert_eq!(summary.failures.len(), 1);
    assert_eq!(summary.failures[0].key, key("cache-2"));
    assert_eq!(probe.deactivations.load(Ordering::SeqCst), 5);
    assert!(caches
        .iter()
        .all(|c| c.state() == ActivationState::Deactivated));
    assert_eq!(registry.active_count(), 0);

    assert!(matches!(
        summary.into_result(),
        Err(Error::DeactivationIncomplete { failed: 1, total: 5, .. })
    ));
}

#[tokio::test]
async fn test_registry_stats_use_injected_clock() {
    let clock = Arc::new(ManualClock::new(10_000));
    let registry = ActorRegistry::with_time(RegistryConfig::default(), clock.clone()).unwrap();
    let probe = Arc::new(Probe::default());

    registry.register::<dyn TokenCache, _>(move |_ctx, key, _registry| {
        Ok(Arc::new(TokenCacheActor {
            lifecycle: ActorLifecycle::new(key.clone()),
            probe: probe.clone(),
            generation: AtomicUsize::new(0),
            timer: None,
            timer_work: Duration::ZERO,
            activation_delay: Duration::ZERO,
            fail_deactivation: false,
        }) as Arc<dyn TokenCache>)
    });

    let cache = proxy(&registry, "clocked").await;
    assert_eq!(cache.stats().activated_at_ms, Some(10_000));

    clock.advance(500);
    cache
        .invoke(&RequestContext::new(), "refresh", |c| async move {
            c.refresh(Duration::ZERO).await
        })
        .await
        .unwrap();

    let stats = cache.stats();
    assert_eq!(stats.invocation_count, 1);
    assert_eq!(stats.last_activity_at_ms, Some(10_500));
}
