//! Pool and queue configuration structures.
//!
//! All timeouts are given in milliseconds; a value of 0 disables the
//! corresponding transition.

use std::collections::HashMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::core::PoolSettings;
use crate::infra::OverflowPolicy;

/// Overflow mode names as they appear in configuration files.
///
/// `Block` is recognized for compatibility but not implemented; queues
/// configured with it fall back to `Exception` with a warning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OnOverflow {
    /// Reject the push with an error.
    Exception,
    /// Silently drop the new entry.
    Discard,
    /// Drop the oldest entry to make room.
    DiscardOldest,
    /// Block the producer until space is free (not implemented).
    Block,
}

impl OnOverflow {
    /// Map the configured mode to a queue policy, falling back for
    /// unsupported modes.
    #[must_use]
    pub fn to_policy(self, queue: &str) -> OverflowPolicy {
        match self {
            Self::Exception => OverflowPolicy::Exception,
            Self::Discard => OverflowPolicy::Discard,
            Self::DiscardOldest => OverflowPolicy::DiscardOldest,
            Self::Block => {
                warn!(queue, "onOverflow mode 'block' is not implemented, using 'exception'");
                OverflowPolicy::Exception
            }
        }
    }
}

/// Configuration for one resource pool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolConfig {
    /// Maximum concurrently busy instances.
    pub max_instances: usize,
    /// Busy-to-idle timeout in milliseconds (0 = never auto-demote).
    #[serde(default)]
    pub busy_to_idle_timeout_ms: u64,
    /// Idle-to-erase timeout in milliseconds (0 = never auto-evict).
    #[serde(default)]
    pub idle_to_erase_timeout_ms: u64,
}

impl PoolConfig {
    /// Validate pool configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_instances == 0 {
            return Err("max_instances must be greater than 0".into());
        }
        Ok(())
    }

    /// Convert to the settings the pool consumes.
    #[must_use]
    pub const fn to_settings(&self) -> PoolSettings {
        PoolSettings {
            max_instances: self.max_instances,
            busy_to_idle_timeout: Duration::from_millis(self.busy_to_idle_timeout_ms),
            idle_to_erase_timeout: Duration::from_millis(self.idle_to_erase_timeout_ms),
        }
    }
}

/// Configuration for one bounded queue.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueConfig {
    /// Maximum number of buffered entries.
    pub max_entries: usize,
    /// Reaction when a push hits the capacity limit.
    #[serde(default = "default_overflow")]
    pub on_overflow: OnOverflow,
}

const fn default_overflow() -> OnOverflow {
    OnOverflow::Exception
}

impl QueueConfig {
    /// Validate queue configuration values.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid field.
    pub fn validate(&self) -> Result<(), String> {
        if self.max_entries == 0 {
            return Err("max_entries must be greater than 0".into());
        }
        Ok(())
    }
}

/// Root configuration: named pools and queues.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CoreConfig {
    /// Map of pool name to configuration.
    #[serde(default)]
    pub pools: HashMap<String, PoolConfig>,
    /// Map of queue name to configuration.
    #[serde(default)]
    pub queues: HashMap<String, QueueConfig>,
}

impl CoreConfig {
    /// Validate every pool and queue definition.
    ///
    /// # Errors
    ///
    /// Returns a description of the first invalid definition.
    pub fn validate(&self) -> Result<(), String> {
        for (name, pool) in &self.pools {
            pool.validate()
                .map_err(|e| format!("pool `{name}` invalid: {e}"))?;
        }
        for (name, queue) in &self.queues {
            queue
                .validate()
                .map_err(|e| format!("queue `{name}` invalid: {e}"))?;
        }
        Ok(())
    }

    /// Parse configuration from a JSON string and validate.
    ///
    /// # Errors
    ///
    /// Returns a description of the parse or validation failure.
    pub fn from_json_str(input: &str) -> Result<Self, String> {
        let cfg: Self = serde_json::from_str(input).map_err(|e| format!("parse error: {e}"))?;
        cfg.validate()?;
        Ok(cfg)
    }
}
