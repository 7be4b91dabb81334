//! Resource caps enforced around a single sandbox invocation (§4.4).

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

/// Caps passed into a single [`crate::SandboxRuntime::run`] invocation.
///
/// Every field is enforced by the runtime itself, not by the evaluated
/// body: a script cannot raise its own ceiling.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SandboxCaps {
    /// Wall-clock budget for the whole invocation.
    pub max_wall_clock: Duration,
    /// CPU-time budget (out-of-process mode only; in-process evaluation has
    /// no per-thread CPU accounting and is bounded by wall clock alone).
    pub max_cpu_time: Duration,
    /// Resident memory ceiling, in bytes.
    pub max_memory_bytes: u64,
    /// Ceiling on stdout/result-envelope size, in bytes.
    pub max_output_bytes: u64,
    /// Maximum open file descriptors (out-of-process mode).
    pub max_open_files: u64,
    /// Maximum child processes the body may spawn. Scripts never spawn
    /// children directly; this bounds the runner harness itself.
    pub max_processes: u64,
    /// Whether the body may perform network egress at all.
    pub network_allowed: bool,
    /// Whether the body may touch the filesystem at all.
    pub filesystem_allowed: bool,
    /// Domains the egress filter allows when `network_allowed` is set.
    /// Supports a single leading wildcard per entry (e.g. `"*.example.com"`).
    pub allowed_egress_domains: HashSet<String>,
}

impl Default for SandboxCaps {
    /// A conservative default: no network, no filesystem, short wall clock.
    fn default() -> Self {
        Self {
            max_wall_clock: Duration::from_secs(5),
            max_cpu_time: Duration::from_secs(5),
            max_memory_bytes: 64 * 1024 * 1024,
            max_output_bytes: 1024 * 1024,
            max_open_files: 16,
            max_processes: 1,
            network_allowed: false,
            filesystem_allowed: false,
            allowed_egress_domains: HashSet::new(),
        }
    }
}

impl SandboxCaps {
    /// Which cap, if any, would not be violated by allowing network egress.
    #[must_use]
    pub fn permits_domain(&self, host: &str) -> bool {
        self.allowed_egress_domains.iter().any(|pattern| {
            pattern
                .strip_prefix("*.")
                .map_or(pattern == host, |suffix| {
                    host == suffix || host.ends_with(&format!(".{suffix}"))
                })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_caps_deny_network_and_filesystem() {
        let caps = SandboxCaps::default();
        assert!(!caps.network_allowed);
        assert!(!caps.filesystem_allowed);
    }

    #[test]
    fn permits_domain_exact_match() {
        let mut caps = SandboxCaps::default();
        caps.allowed_egress_domains.insert("api.example.com".to_string());
        assert!(caps.permits_domain("api.example.com"));
        assert!(!caps.permits_domain("other.example.com"));
    }

    #[test]
    fn permits_domain_wildcard_match() {
        let mut caps = SandboxCaps::default();
        caps.allowed_egress_domains.insert("*.example.com".to_string());
        assert!(caps.permits_domain("api.example.com"));
        assert!(caps.permits_domain("example.com"));
        assert!(!caps.permits_domain("example.org"));
    }
}
