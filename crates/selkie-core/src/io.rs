//! Time abstraction
//!
//! TigerStyle: All clock reads go through a trait so tests can substitute
//! a controlled clock for the wall clock.

use async_trait::async_trait;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

// ============================================================================
// Time Provider
// ============================================================================

/// Time provider abstraction
///
/// # Implementations
///
/// - `WallClockTime`: Production - uses system clock
/// - `ManualClock`: Tests - advanced explicitly
#[async_trait]
pub trait TimeProvider: Send + Sync + std::fmt::Debug {
    /// Get current time in milliseconds since epoch
    fn now_ms(&self) -> u64;

    /// Sleep for the specified duration
    async fn sleep_ms(&self, ms: u64);

    /// Get monotonic timestamp (for measuring durations)
    fn monotonic_ms(&self) -> u64 {
        self.now_ms()
    }
}

/// Production time provider using wall clock
#[derive(Debug, Clone, Default)]
pub struct WallClockTime;

impl WallClockTime {
    /// Create a new wall clock time provider
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TimeProvider for WallClockTime {
    fn now_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map(|d| d.as_millis() as u64)
            .unwrap_or(0)
    }

    async fn sleep_ms(&self, ms: u64) {
        tokio::time::sleep(tokio::time::Duration::from_millis(ms)).await;
    }
}

/// Manually advanced clock
///
/// `sleep_ms` advances the clock instead of waiting.
#[derive(Debug, Default)]
pub struct ManualClock {
    now_ms: AtomicU64,
}

impl ManualClock {
    /// Create a clock starting at `initial_ms`
    pub fn new(initial_ms: u64) -> Self {
        Self {
            now_ms: AtomicU64::new(initial_ms),
        }
    }

    /// Move the clock forward
    pub fn advance(&self, ms: u64) {
        self.now_ms.fetch_add(ms, Ordering::SeqCst);
    }
}

#[async_trait]
impl TimeProvider for ManualClock {
    fn now_ms(&self) -> u64 {
        self.now_ms.load(Ordering::SeqCst)
    }

    async fn sleep_ms(&self, ms: u64) {
        self.advance(ms);
    }
}

// ============================================================================
// Tests
// ============================================================================
