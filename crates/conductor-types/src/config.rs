//! Engine configuration types.
//!
//! `EngineConfig` represents the top-level `conductor.toml`. All fields have
//! defaults so an empty or missing file yields a working engine.

use serde::{Deserialize, Serialize};

use crate::advise::DEFAULT_INTERVENTION_TIMEOUT_SECS;

/// Top-level configuration for the orchestration engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// How many times a version conflict is re-fetched and re-evaluated
    /// before the operation fails as transient.
    #[serde(default = "default_max_version_retries")]
    pub max_version_retries: u32,

    /// Intervention timeout used when retries are exhausted into manual
    /// intervention and no explicit timeout is configured.
    #[serde(default = "default_intervention_timeout_secs")]
    pub default_intervention_timeout_secs: u64,

    /// Capacity of the orchestration event broadcast channel.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// How long the waiter remembers fired or cancelled correlation keys
    /// and unclaimed early responses.
    #[serde(default = "default_wait_key_retention_secs")]
    pub wait_key_retention_secs: u64,

    /// SQLite URL for the node execution store. `None` keeps executions in memory.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

fn default_max_version_retries() -> u32 {
    3
}

fn default_intervention_timeout_secs() -> u64 {
    DEFAULT_INTERVENTION_TIMEOUT_SECS
}

fn default_event_bus_capacity() -> usize {
    1024
}

fn default_wait_key_retention_secs() -> u64 {
    3600
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_version_retries: default_max_version_retries(),
            default_intervention_timeout_secs: default_intervention_timeout_secs(),
            event_bus_capacity: default_event_bus_capacity(),
            wait_key_retention_secs: default_wait_key_retention_secs(),
            database_url: None,
        }
    }
}
