//! Run configuration for the Cascade engine.

use serde::{Deserialize, Serialize};

/// Immutable configuration threaded into the engine's entry point.
///
/// Per-run state (the execution context) is never shared across runs; this
/// struct only carries defaults and operational limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    /// Model used when a step doesn't override it.
    #[serde(default = "default_model")]
    pub default_model: String,
    /// Timeout applied to each individual provider call.
    #[serde(default = "default_timeout_per_call_secs")]
    pub timeout_per_call_secs: u64,
    /// Transport-level retries (timeouts, connection failures) per call.
    #[serde(default = "default_max_transport_retries")]
    pub max_transport_retries: u32,
    /// Auto-continuation budget for steps that don't set their own.
    #[serde(default)]
    pub default_max_auto_retry_attempts: u32,
    /// Collection parallelism when a step doesn't set `max_parallel`.
    #[serde(default = "default_max_parallel")]
    pub default_max_parallel: usize,
    /// Collection batch size when a step doesn't set `batch_size`.
    #[serde(default = "default_batch_size")]
    pub default_batch_size: usize,
}

fn default_model() -> String {
    "gpt-4o-mini".to_string()
}

fn default_timeout_per_call_secs() -> u64 {
    60
}

fn default_max_transport_retries() -> u32 {
    3
}

fn default_max_parallel() -> usize {
    3
}

fn default_batch_size() -> usize {
    10
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            default_model: default_model(),
            timeout_per_call_secs: default_timeout_per_call_secs(),
            max_transport_retries: default_max_transport_retries(),
            default_max_auto_retry_attempts: 0,
            default_max_parallel: default_max_parallel(),
            default_batch_size: default_batch_size(),
        }
    }
}
