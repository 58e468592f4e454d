//! Error types for Selkie
//!
//! TigerStyle: Explicit error types with context, using thiserror.

use thiserror::Error;

/// Result type alias for Selkie operations
pub type Result<T> = std::result::Result<T, Error>;

/// Selkie error types
///
/// Business failures raised by actor methods are not represented here: they
/// travel back through the dispatcher as the caller's own error type. Actors
/// that fail through `anyhow` land in [`Error::Other`], which keeps the
/// original message untouched.
#[derive(Error, Debug)]
pub enum Error {
    // =========================================================================
    // Validation Errors
    // =========================================================================
    #[error("Invalid argument: {name}, reason: {reason}")]
    InvalidArgument { name: String, reason: String },

    #[error("Invalid configuration: {field}, reason: {reason}")]
    InvalidConfiguration { field: String, reason: String },

    // =========================================================================
    // Lifecycle Errors
    // =========================================================================
    #[error("Timer already running for actor: {key}")]
    TimerAlreadyRunning { key: String },

    #[error("Invalid actor state: {key}, reason: {reason}")]
    InvalidState { key: String, reason: String },

    #[error("Actor not active: {key}, state: {state}")]
    ActorNotActive { key: String, state: String },

    // =========================================================================
    // Registry Errors
    // =========================================================================
    #[error("No factory registered for interface: {interface}")]
    NotRegistered { interface: String },

    #[error("Actor capacity exceeded: limit {limit}")]
    ActorCapacityExceeded { limit: usize },

    #[error("Deactivation incomplete: {failed} of {total} actors failed: {reasons:?}")]
    DeactivationIncomplete {
        failed: usize,
        total: usize,
        reasons: Vec<String>,
    },

    // =========================================================================
    // Invocation Errors
    // =========================================================================
    #[error("Actor invocation timeout: {key}, operation: {operation}, timeout: {timeout_ms}ms")]
    ActorInvocationTimeout {
        key: String,
        operation: String,
        timeout_ms: u64,
    },

    #[error("Operation cancelled: {operation}")]
    Cancelled { operation: String },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    #[error("Internal error: {reason}")]
    Internal { reason: String },

    #[error(transparent)]
    Other(#[from] anyhow::Error),
}

impl Error {
    /// Create an invalid argument error
    pub fn invalid_argument(name: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            reason: reason.into(),
        }
    }

    /// Create an invalid configuration error
    pub fn invalid_configuration(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidConfiguration {
            field: field.into(),
            reason: reason.into(),
        }
    }

    /// Create a not registered error for the given interface name
    pub fn not_registered(interface: impl Into<String>) -> Self {
        Self::NotRegistered {
            interface: interface.into(),
        }
    }

    /// Create an internal error
    pub fn internal(reason: impl Into<String>) -> Self {
        Self::Internal {
            reason: reason.into(),
        }
    }

    /// Check if this error is retriable
    ///
    /// Only a timed-out wait for an actor's turn is worth retrying. Every
    /// other failure is either a programmer error or a business failure.
    pub fn is_retriable(&self) -> bool {
        matches!(self, Self::ActorInvocationTimeout { .. })
    }
}
