//! Configuration for Selkie
//!
//! TigerStyle: Explicit defaults, validation, reasonable limits.

use crate::constants::*;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Activation registry configuration
///
/// The call timeout is shared by every dispatcher the registry creates.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryConfig {
    /// How long a call waits for an actor's turn (milliseconds)
    #[serde(default = "default_call_timeout_ms")]
    pub call_timeout_ms: u64,

    /// Maximum number of activated actors held by the registry
    #[serde(default = "default_max_actors")]
    pub max_actors_count: usize,
}

fn default_call_timeout_ms() -> u64 {
    ACTOR_CALL_TIMEOUT_MS_DEFAULT
}

fn default_max_actors() -> usize {
    ACTOR_COUNT_DEFAULT
}

impl Default for RegistryConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: default_call_timeout_ms(),
            max_actors_count: default_max_actors(),
        }
    }
}

impl RegistryConfig {
    /// Set the call timeout
    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout_ms = u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX);
        self
    }

    /// Set the maximum number of activated actors
    pub fn with_max_actors(mut self, count: usize) -> Self {
        self.max_actors_count = count;
        self
    }

    /// The call timeout as a `Duration`
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    /// Validate the configuration
    pub fn validate(&self) -> Result<()> {
        if self.call_timeout_ms == 0 {
            return Err(Error::InvalidConfiguration {
                field: "call_timeout_ms".into(),
                reason: "must be greater than zero".into(),
            });
        }

        if self.call_timeout_ms > ACTOR_CALL_TIMEOUT_MS_MAX {
            return Err(Error::InvalidConfiguration {
                field: "call_timeout_ms".into(),
                reason: format!(
                    "{} exceeds limit {}",
                    self.call_timeout_ms, ACTOR_CALL_TIMEOUT_MS_MAX
                ),
            });
        }

        if self.max_actors_count == 0 {
            return Err(Error::InvalidConfiguration {
                field: "max_actors_count".into(),
                reason: "must be greater than zero".into(),
            });
        }

        if self.max_actors_count > ACTOR_CONCURRENT_COUNT_MAX {
            return Err(Error::InvalidConfiguration {
                field: "max_actors_count".into(),
                reason: format!(
                    "{} exceeds limit {}",
                    self.max_actors_count, ACTOR_CONCURRENT_COUNT_MAX
                ),
            });
        }

        Ok(())
    }
}
