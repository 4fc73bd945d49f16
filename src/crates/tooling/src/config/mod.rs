//! Environment-driven configuration helpers
//!
//! Small helpers for reading typed settings from the process environment,
//! plus the [`RuntimeSettings`] bundle the executor builders consult for
//! overridable defaults.

use std::str::FromStr;

/// Read an environment variable, falling back to a default
pub fn env_or(key: &str, default: &str) -> String {
    std::env::var(key).unwrap_or_else(|_| default.to_string())
}

/// Read and parse an environment variable
///
/// Returns `None` when the variable is unset or fails to parse.
pub fn env_parse<T: FromStr>(key: &str) -> Option<T> {
    std::env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Read a boolean flag from the environment
///
/// Accepts `1`, `true`, `yes`, `on` (case-insensitive) as true.
pub fn env_flag(key: &str) -> bool {
    match std::env::var(key) {
        Ok(v) => matches!(v.to_lowercase().as_str(), "1" | "true" | "yes" | "on"),
        Err(_) => false,
    }
}

/// Runtime defaults that can be overridden from the environment
///
/// | Variable | Setting |
/// |---|---|
/// | `AGENTFLOW_MAX_AGENT_STEPS` | step budget for agent runs |
/// | `AGENTFLOW_MAX_GRAPH_STEPS` | step budget for graph runs |
/// | `AGENTFLOW_MAX_CONCURRENCY` | bound for parallel fan-out |
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RuntimeSettings {
    pub max_agent_steps: usize,
    pub max_graph_steps: usize,
    pub max_concurrency: usize,
}

impl Default for RuntimeSettings {
    fn default() -> Self {
        Self {
            max_agent_steps: 10,
            max_graph_steps: 25,
            max_concurrency: 4,
        }
    }
}

impl RuntimeSettings {
    /// Load settings, applying environment overrides over the defaults
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            max_agent_steps: env_parse("AGENTFLOW_MAX_AGENT_STEPS")
                .unwrap_or(defaults.max_agent_steps),
            max_graph_steps: env_parse("AGENTFLOW_MAX_GRAPH_STEPS")
                .unwrap_or(defaults.max_graph_steps),
            max_concurrency: env_parse("AGENTFLOW_MAX_CONCURRENCY")
                .unwrap_or(defaults.max_concurrency),
        }
    }
}
