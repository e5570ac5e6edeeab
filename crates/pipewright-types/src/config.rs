//! Engine configuration.
//!
//! `EngineConfig` mirrors `{data_dir}/config.toml`. Every field has a
//! default, so an empty or partial file is valid.

use serde::{Deserialize, Serialize};

/// Top-level configuration for a Pipewright engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Capacity of the orchestration event broadcast channel.
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// How often the timeout tracker sweeps for expired deadlines.
    #[serde(default = "default_timeout_sweep_interval_ms")]
    pub timeout_sweep_interval_ms: u64,

    /// Deadline for a waiting node whose plan node declares none.
    #[serde(default = "default_task_timeout_secs")]
    pub default_task_timeout_secs: u64,

    /// Intervention wait used when an adviser gives no timeout.
    #[serde(default = "default_intervention_timeout_secs")]
    pub default_intervention_timeout_secs: u64,

    #[serde(default)]
    pub delegate: DelegateConfig,

    /// Restraints registered at startup.
    #[serde(default)]
    pub resource_constraints: Vec<ResourceConstraintConfig>,

    /// Overrides the SQLite URL derived from the data dir.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub database_url: Option<String>,
}

fn default_event_bus_capacity() -> usize {
    1024
}

fn default_timeout_sweep_interval_ms() -> u64 {
    500
}

fn default_task_timeout_secs() -> u64 {
    600
}

fn default_intervention_timeout_secs() -> u64 {
    86_400
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            event_bus_capacity: default_event_bus_capacity(),
            timeout_sweep_interval_ms: default_timeout_sweep_interval_ms(),
            default_task_timeout_secs: default_task_timeout_secs(),
            default_intervention_timeout_secs: default_intervention_timeout_secs(),
            delegate: DelegateConfig::default(),
            resource_constraints: Vec::new(),
            database_url: None,
        }
    }
}

/// Remote worker endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DelegateConfig {
    /// Base URL of the worker's task API. Unset means no remote worker; task
    /// submissions are rejected.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    30
}

impl Default for DelegateConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            request_timeout_secs: default_request_timeout_secs(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceConstraintConfig {
    pub key: String,
    pub capacity: u32,
}
