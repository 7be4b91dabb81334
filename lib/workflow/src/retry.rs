//! Retry and error-handling policy data types.
//!
//! These are plain configuration records consulted by the retry/circuit-breaker
//! layer during execution. This crate only defines their shape; the backoff
//! timer and circuit-breaker state machine that interpret them live in the
//! runtime crate.

use serde::{Deserialize, Serialize};

/// How a run reacts when one of its nodes fails.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorHandlingPolicy {
    /// The failure skips every still-pending node and the run is marked failed
    /// once in-flight work drains.
    #[default]
    FailFast,
    /// Only nodes that depend on the failed node's unproduced output are
    /// skipped; unrelated branches run to completion.
    ContinueOnError,
    /// The failure is confined to its own branch; the run fails only if every
    /// branch ends in failure.
    IsolateBranch,
}

/// Exponential backoff with jitter, applied between node execution attempts.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicy {
    /// Maximum attempts, including the first. `1` disables retry.
    pub max_attempts: u32,
    /// Delay before the first retry.
    pub initial_backoff_ms: u64,
    /// Multiplier applied to the backoff after each failed attempt.
    pub backoff_multiplier: f64,
    /// Ceiling on the computed backoff, applied before jitter.
    pub max_backoff_ms: u64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 250,
            backoff_multiplier: 2.0,
            max_backoff_ms: 30_000,
        }
    }
}

impl RetryPolicy {
    /// A policy that never retries.
    #[must_use]
    pub fn none() -> Self {
        Self {
            max_attempts: 1,
            initial_backoff_ms: 0,
            backoff_multiplier: 1.0,
            max_backoff_ms: 0,
        }
    }

    /// Returns true if another attempt is permitted after `attempt` has failed.
    #[must_use]
    pub fn should_retry(&self, attempt: u32) -> bool {
        attempt < self.max_attempts
    }

    /// Un-jittered backoff, in milliseconds, before retrying after `attempt` has failed.
    ///
    /// `attempt` is 1-based (the attempt number that just failed). Callers add
    /// their own jitter; this returns the deterministic ceiling of the window.
    #[must_use]
    pub fn backoff_for_attempt(&self, attempt: u32) -> u64 {
        let exponent = attempt.saturating_sub(1);
        let scaled = self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent as i32);
        (scaled as u64).min(self.max_backoff_ms)
    }
}

/// Defaults applied to every node execution in a run, unless a node's own
/// overrides replace them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionDefaults {
    /// Upper bound on nodes executing concurrently within this run.
    pub parallelism: u32,
    /// Default per-node timeout in milliseconds.
    pub timeout_ms: u64,
    /// Default retry policy for node failures classified as retryable.
    pub retry: RetryPolicy,
    /// How the run reacts to a node failure.
    pub error_handling: ErrorHandlingPolicy,
}

impl Default for ExecutionDefaults {
    fn default() -> Self {
        Self {
            parallelism: 4,
            timeout_ms: 30_000,
            retry: RetryPolicy::default(),
            error_handling: ErrorHandlingPolicy::default(),
        }
    }
}

impl ExecutionDefaults {
    /// Sets parallelism. Clamped to a minimum of 1.
    #[must_use]
    pub fn with_parallelism(mut self, parallelism: u32) -> Self {
        self.parallelism = parallelism.max(1);
        self
    }

    /// Sets the default node timeout.
    #[must_use]
    pub fn with_timeout_ms(mut self, timeout_ms: u64) -> Self {
        self.timeout_ms = timeout_ms;
        self
    }

    /// Sets the default retry policy.
    #[must_use]
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Sets the error-handling policy.
    #[must_use]
    pub fn with_error_handling(mut self, policy: ErrorHandlingPolicy) -> Self {
        self.error_handling = policy;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execution_defaults_default_values() {
        let defaults = ExecutionDefaults::default();
        assert_eq!(defaults.parallelism, 4);
        assert_eq!(defaults.error_handling, ErrorHandlingPolicy::FailFast);
    }

    #[test]
    fn with_parallelism_clamps_to_one() {
        let defaults = ExecutionDefaults::default().with_parallelism(0);
        assert_eq!(defaults.parallelism, 1);
    }

    #[test]
    fn retry_policy_none_never_retries() {
        let policy = RetryPolicy::none();
        assert!(!policy.should_retry(1));
    }

    #[test]
    fn retry_policy_should_retry_until_max_attempts() {
        let policy = RetryPolicy::default();
        assert!(policy.should_retry(1));
        assert!(policy.should_retry(2));
        assert!(!policy.should_retry(3));
    }

    #[test]
    fn backoff_grows_exponentially_and_caps() {
        let policy = RetryPolicy {
            max_attempts: 10,
            initial_backoff_ms: 100,
            backoff_multiplier: 2.0,
            max_backoff_ms: 1000,
        };
        assert_eq!(policy.backoff_for_attempt(1), 100);
        assert_eq!(policy.backoff_for_attempt(2), 200);
        assert_eq!(policy.backoff_for_attempt(3), 400);
        assert_eq!(policy.backoff_for_attempt(10), 1000);
    }

    #[test]
    fn error_handling_policy_serde_roundtrip() {
        let policy = ErrorHandlingPolicy::ContinueOnError;
        let json = serde_json::to_string(&policy).expect("serialize");
        assert_eq!(json, "\"continue-on-error\"");
        let parsed: ErrorHandlingPolicy = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(policy, parsed);
    }
}
