//! Selkie Runtime
//!
//! Activation registry and dispatcher for Selkie virtual actors.
//!
//! # Overview
//!
//! The runtime provides:
//! - On-demand activation (one instance per key, created on first use)
//! - Turn-based calls (one call or timer body in flight per instance)
//! - Per-actor recurring timers with overlap suppression
//! - Lifecycle management (activate/deactivate, bulk shutdown)
//!
//! # Example
//!
//! ```rust,ignore
//! let registry = ActorRegistry::new(RegistryConfig::default())?;
//! registry.register::<dyn TokenCache, _>(|_ctx, key, _registry| {
//!     Ok(Arc::new(TokenCacheActor::new(key.clone())) as Arc<dyn TokenCache>)
//! });
//!
//! let cache = registry.create_proxy::<dyn TokenCache>(&ctx, &key).await?;
//! let token = cache.invoke(&ctx, "get", |c| async move { c.get().await }).await?;
//! ```
//!
//! # TigerStyle
//! - Single activation guarantee (one actor instance per key)
//! - Explicit lifecycle states
//! - Bounded waits (no call blocks past its timeout)

pub mod dispatcher;
pub mod lifecycle;
pub mod registry;
mod timer;

pub use dispatcher::{ActivationStats, Dispatcher};
pub use lifecycle::{activate, deactivate, ActivationState, Actor, ActorLifecycle};
pub use registry::{ActorFactoryFn, ActorRegistry, DeactivationFailure, DeactivationSummary};
pub use timer::TimerStats;
