//! Process-wide configuration (§6).
//!
//! Layered like the rest of the pack's configuration surfaces: built-in
//! defaults, then an optional config file, then environment overrides
//! (prefixed `FORGELINE_`). Changing any field only takes effect for runs
//! accepted after the process re-reads it — nothing here is hot-reloaded
//! mid-run.

use crate::work_queue::OverflowPolicy;
use forgeline_sandbox::SandboxCaps;
use forgeline_workflow::RetryPolicy;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Full process configuration, per §6's enumeration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoreConfig {
    /// Upper bound on nodes executing concurrently across the whole process.
    pub max_process_parallelism: u32,
    /// Default per-run concurrency hint, overridable per workflow.
    pub per_run_default_parallelism: u32,
    /// Default wall-clock ceiling for an entire run, in milliseconds.
    pub default_run_timeout_ms: u64,
    /// Default wall-clock ceiling for a single node, in milliseconds.
    pub default_node_timeout_ms: u64,
    /// Retry policy applied when a node doesn't declare its own.
    pub retry_defaults: RetryPolicy,
    /// Sandbox caps applied when a script node doesn't declare its own.
    pub sandbox_caps_defaults: SandboxCapsConfig,
    /// Bounded work queue capacity.
    pub queue_capacity: usize,
    /// Behaviour when the work queue is full.
    pub queue_full_policy: QueueFullPolicyConfig,
    /// How often buffered `append_node_attempt` records are flushed.
    pub state_store_flush_interval_ms: u64,
    /// Consecutive failures before a circuit breaker opens.
    pub breaker_failure_threshold: u32,
    /// How long an open breaker stays open before probing.
    pub breaker_open_duration_ms: i64,
    /// How far back the scheduler looks for missed trigger fires on restart.
    pub scheduler_backlog_window_ms: i64,
}

/// Serializable mirror of [`SandboxCaps`] for config-file loading.
///
/// `forgeline_sandbox::SandboxCaps` isn't itself `Deserialize` (its
/// `HashSet<String>` egress list round-trips more naturally as a `Vec` in a
/// config file); this converts.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxCapsConfig {
    pub max_wall_clock_ms: u64,
    pub max_cpu_time_ms: u64,
    pub max_memory_bytes: u64,
    pub max_output_bytes: u64,
    pub max_open_files: u64,
    pub max_processes: u64,
    pub network_allowed: bool,
    pub filesystem_allowed: bool,
    pub allowed_egress_domains: Vec<String>,
}

impl Default for SandboxCapsConfig {
    fn default() -> Self {
        let caps = SandboxCaps::default();
        Self {
            max_wall_clock_ms: caps.max_wall_clock.as_millis() as u64,
            max_cpu_time_ms: caps.max_cpu_time.as_millis() as u64,
            max_memory_bytes: caps.max_memory_bytes,
            max_output_bytes: caps.max_output_bytes,
            max_open_files: caps.max_open_files,
            max_processes: caps.max_processes,
            network_allowed: caps.network_allowed,
            filesystem_allowed: caps.filesystem_allowed,
            allowed_egress_domains: Vec::new(),
        }
    }
}

impl From<&SandboxCapsConfig> for SandboxCaps {
    fn from(cfg: &SandboxCapsConfig) -> Self {
        let mut caps = SandboxCaps {
            max_wall_clock: Duration::from_millis(cfg.max_wall_clock_ms),
            max_cpu_time: Duration::from_millis(cfg.max_cpu_time_ms),
            max_memory_bytes: cfg.max_memory_bytes,
            max_output_bytes: cfg.max_output_bytes,
            max_open_files: cfg.max_open_files,
            max_processes: cfg.max_processes,
            network_allowed: cfg.network_allowed,
            filesystem_allowed: cfg.filesystem_allowed,
            allowed_egress_domains: Default::default(),
        };
        caps.allowed_egress_domains.extend(cfg.allowed_egress_domains.iter().cloned());
        caps
    }
}

/// Serializable mirror of [`OverflowPolicy`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum QueueFullPolicyConfig {
    DropNewest,
    DropOldest,
    BlockCaller { block_timeout_ms: u64 },
}

impl From<QueueFullPolicyConfig> for OverflowPolicy {
    fn from(cfg: QueueFullPolicyConfig) -> Self {
        match cfg {
            QueueFullPolicyConfig::DropNewest => OverflowPolicy::DropNewest,
            QueueFullPolicyConfig::DropOldest => OverflowPolicy::DropOldest,
            QueueFullPolicyConfig::BlockCaller { block_timeout_ms } => {
                OverflowPolicy::BlockCaller { block_timeout: Duration::from_millis(block_timeout_ms) }
            }
        }
    }
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            max_process_parallelism: 32,
            per_run_default_parallelism: 4,
            default_run_timeout_ms: 3_600_000,
            default_node_timeout_ms: 30_000,
            retry_defaults: RetryPolicy::default(),
            sandbox_caps_defaults: SandboxCapsConfig::default(),
            queue_capacity: 1024,
            queue_full_policy: QueueFullPolicyConfig::DropOldest,
            state_store_flush_interval_ms: 250,
            breaker_failure_threshold: 5,
            breaker_open_duration_ms: 30_000,
            scheduler_backlog_window_ms: 300_000,
        }
    }
}

impl CoreConfig {
    /// Loads configuration layered as built-in defaults, then an optional
    /// config file at `path` (if it exists), then `FORGELINE_`-prefixed
    /// environment variables.
    ///
    /// # Errors
    ///
    /// Returns the underlying `config` crate error if the file or
    /// environment values don't deserialize into [`CoreConfig`].
    pub fn load(path: Option<&str>) -> Result<Self, config::ConfigError> {
        let mut builder = config::Config::builder();

        if let Some(path) = path {
            if std::path::Path::new(path).exists() {
                builder = builder.add_source(config::File::with_name(path));
            }
        }

        builder = builder.add_source(
            config::Environment::with_prefix("FORGELINE").separator("__").try_parsing(true),
        );

        builder.build()?.try_deserialize()
    }
}
