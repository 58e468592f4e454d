//! Selkie Core
//!
//! Core types, errors, and constants for the Selkie virtual actor runtime.
//!
//! # Overview
//!
//! Selkie addresses long-lived, stateful objects ("actors") by a stable
//! logical key, keeps at most one activated instance per key, and serializes
//! every call into that instance. This crate holds the leaf types shared by
//! the runtime and by actor implementations: keys, the request context,
//! errors, limits and configuration.
//!
//! # TigerStyle
//!
//! - Explicit limits with big-endian naming (e.g., `ACTOR_CALL_TIMEOUT_MS_MAX`)
//! - Validation on construction
//! - No recursion (bounded iteration only)

pub mod config;
pub mod constants;
pub mod context;
pub mod error;
pub mod io;
pub mod key;
pub mod telemetry;

pub use config::RegistryConfig;
pub use constants::*;
pub use context::RequestContext;
pub use error::{Error, Result};
pub use io::{ManualClock, TimeProvider, WallClockTime};
pub use key::ActorKey;
pub use telemetry::{init_telemetry, TelemetryConfig, TelemetryGuard};
