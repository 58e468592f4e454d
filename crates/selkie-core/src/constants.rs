//! TigerStyle constants for Selkie
//!
//! All limits are explicit, use big-endian naming (most significant first),
//! and include units in the name.

// =============================================================================
// Actor Key Limits
// =============================================================================

/// Maximum length of an actor vector key in bytes
pub const ACTOR_VECTOR_KEY_LENGTH_BYTES_MAX: usize = 1024;

/// Length of the derived actor key in bytes (128 bits)
pub const ACTOR_KEY_LENGTH_BYTES: usize = 16;

// =============================================================================
// Actor Limits
// =============================================================================

/// Default time a call waits for an actor's turn in milliseconds (30 sec)
pub const ACTOR_CALL_TIMEOUT_MS_DEFAULT: u64 = 30 * 1000;

/// Maximum time a call may wait for an actor's turn in milliseconds (10 min)
pub const ACTOR_CALL_TIMEOUT_MS_MAX: u64 = 10 * 60 * 1000;

/// Default maximum number of activated actors per registry
pub const ACTOR_COUNT_DEFAULT: usize = 100_000;

/// Maximum number of activated actors per registry
pub const ACTOR_CONCURRENT_COUNT_MAX: usize = 1_000_000;

/// Number of concurrent calls admitted into one actor (turn-based)
pub const ACTOR_TURN_PERMITS_COUNT: usize = 1;

/// How long deactivation waits for a running call or timer body to finish
/// before running `on_deactivate` anyway
pub const ACTOR_DEACTIVATION_TURN_WAIT_MS_MAX: u64 = 30 * 1000;

// =============================================================================
// Timer Limits
// =============================================================================

/// Maximum timer due time or period in milliseconds (24 hours)
pub const ACTOR_TIMER_INTERVAL_MS_MAX: u64 = 24 * 60 * 60 * 1000;

// Compile-time assertions for constant validity
const _: () = {
    assert!(ACTOR_KEY_LENGTH_BYTES == 16);
    assert!(ACTOR_VECTOR_KEY_LENGTH_BYTES_MAX >= 64);
    assert!(ACTOR_CALL_TIMEOUT_MS_DEFAULT <= ACTOR_CALL_TIMEOUT_MS_MAX);
    assert!(ACTOR_COUNT_DEFAULT <= ACTOR_CONCURRENT_COUNT_MAX);
    assert!(ACTOR_TURN_PERMITS_COUNT == 1);
    assert!(ACTOR_DEACTIVATION_TURN_WAIT_MS_MAX <= ACTOR_CALL_TIMEOUT_MS_MAX);
};

