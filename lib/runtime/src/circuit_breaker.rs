//! Circuit breaker state machine (§4.5).
//!
//! One breaker exists per *breaker key* — typically a node type plus a
//! coarse external-dependency identifier the node exposes (its
//! `dependency_key`). Breakers are process-local: a worker process that
//! restarts starts every breaker `closed`, which is acceptable because a
//! freshly-started worker has no history to distrust yet.

use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::Mutex;

/// Configuration for a circuit breaker.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BreakerPolicy {
    /// Consecutive failures in `closed` before the breaker opens.
    pub failure_threshold: u32,
    /// How long the breaker stays `open` before moving to `half-open`.
    pub open_duration_ms: i64,
    /// Probe invocations permitted while `half-open`.
    pub half_open_probes: u32,
}

impl Default for BreakerPolicy {
    fn default() -> Self {
        Self { failure_threshold: 5, open_duration_ms: 30_000, half_open_probes: 1 }
    }
}

/// The breaker's observable state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BreakerState {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Clone)]
struct BreakerRecord {
    state: BreakerState,
    consecutive_failures: u32,
    opened_at: Option<DateTime<Utc>>,
    probes_in_flight: u32,
}

impl BreakerRecord {
    fn new() -> Self {
        Self { state: BreakerState::Closed, consecutive_failures: 0, opened_at: None, probes_in_flight: 0 }
    }
}

/// Whether a call against a breaker key is currently permitted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Admission {
    /// The executor may be invoked.
    Allowed,
    /// Short-circuited; the caller should treat this as `circuit-open`.
    Rejected,
}

/// Keyed registry of circuit breakers.
///
/// Decisions are consulted before invoking the executor and updated with the
/// outcome afterward; the two calls ([`CircuitBreakerRegistry::admit`] and
/// either [`CircuitBreakerRegistry::record_success`] or
/// [`CircuitBreakerRegistry::record_failure`]) always come in pairs per call.
pub struct CircuitBreakerRegistry {
    policy: BreakerPolicy,
    breakers: Mutex<HashMap<String, BreakerRecord>>,
}

impl CircuitBreakerRegistry {
    /// Creates a registry where every breaker key uses the same policy.
    #[must_use]
    pub fn new(policy: BreakerPolicy) -> Self {
        Self { policy, breakers: Mutex::new(HashMap::new()) }
    }

    /// Consults (and if necessary transitions) the breaker for `key`.
    ///
    /// An `open` breaker whose `open_duration` has elapsed transitions to
    /// `half-open` here, admitting this call as a probe.
    pub fn admit(&self, key: &str) -> Admission {
        let mut breakers = self.breakers.lock().expect("breaker registry mutex poisoned");
        let record = breakers.entry(key.to_string()).or_insert_with(BreakerRecord::new);

        match record.state {
            BreakerState::Closed => Admission::Allowed,
            BreakerState::HalfOpen => {
                if record.probes_in_flight < self.policy.half_open_probes {
                    record.probes_in_flight += 1;
                    Admission::Allowed
                } else {
                    Admission::Rejected
                }
            }
            BreakerState::Open => {
                let elapsed = record
                    .opened_at
                    .map(|t| (Utc::now() - t).num_milliseconds())
                    .unwrap_or(i64::MAX);
                if elapsed >= self.policy.open_duration_ms {
                    record.state = BreakerState::HalfOpen;
                    record.probes_in_flight = 1;
                    Admission::Allowed
                } else {
                    Admission::Rejected
                }
            }
        }
    }

    /// Records a successful call against `key`.
    ///
    /// A success while `half-open` closes the breaker; a success while
    /// `closed` just resets the failure streak.
    pub fn record_success(&self, key: &str) {
        let mut breakers = self.breakers.lock().expect("breaker registry mutex poisoned");
        let record = breakers.entry(key.to_string()).or_insert_with(BreakerRecord::new);
        record.consecutive_failures = 0;
        record.probes_in_flight = 0;
        record.state = BreakerState::Closed;
        record.opened_at = None;
    }

    /// Records a failed call against `key`.
    ///
    /// A failure while `half-open` re-opens the breaker with a fresh
    /// `open_duration`. A failure while `closed` counts toward
    /// `failure_threshold`.
    pub fn record_failure(&self, key: &str) {
        let mut breakers = self.breakers.lock().expect("breaker registry mutex poisoned");
        let record = breakers.entry(key.to_string()).or_insert_with(BreakerRecord::new);

        match record.state {
            BreakerState::HalfOpen => {
                record.state = BreakerState::Open;
                record.opened_at = Some(Utc::now());
                record.probes_in_flight = 0;
            }
            BreakerState::Closed => {
                record.consecutive_failures += 1;
                if record.consecutive_failures >= self.policy.failure_threshold {
                    record.state = BreakerState::Open;
                    record.opened_at = Some(Utc::now());
                }
            }
            BreakerState::Open => {}
        }
    }

    /// Returns the current state for `key`, without side effects.
    #[must_use]
    pub fn state_of(&self, key: &str) -> BreakerState {
        let breakers = self.breakers.lock().expect("breaker registry mutex poisoned");
        breakers.get(key).map_or(BreakerState::Closed, |r| r.state)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> BreakerPolicy {
        BreakerPolicy { failure_threshold: 3, open_duration_ms: 50, half_open_probes: 1 }
    }

    #[test]
    fn closed_breaker_admits_calls() {
        let registry = CircuitBreakerRegistry::new(policy());
        assert_eq!(registry.admit("http:example"), Admission::Allowed);
    }

    #[test]
    fn opens_after_reaching_failure_threshold() {
        let registry = CircuitBreakerRegistry::new(policy());
        for _ in 0..3 {
            registry.admit("http:example");
            registry.record_failure("http:example");
        }
        assert_eq!(registry.state_of("http:example"), BreakerState::Open);
        assert_eq!(registry.admit("http:example"), Admission::Rejected);
    }

    #[test]
    fn success_resets_the_failure_streak() {
        let registry = CircuitBreakerRegistry::new(policy());
        registry.admit("http:example");
        registry.record_failure("http:example");
        registry.admit("http:example");
        registry.record_failure("http:example");
        registry.admit("http:example");
        registry.record_success("http:example");
        registry.admit("http:example");
        registry.record_failure("http:example");
        registry.admit("http:example");
        registry.record_failure("http:example");
        // Two failures post-reset, below threshold of 3.
        assert_eq!(registry.state_of("http:example"), BreakerState::Closed);
    }

    #[test]
    fn half_open_success_closes_the_breaker() {
        let registry = CircuitBreakerRegistry::new(policy());
        for _ in 0..3 {
            registry.admit("http:example");
            registry.record_failure("http:example");
        }
        std::thread::sleep(std::time::Duration::from_millis(60));
        assert_eq!(registry.admit("http:example"), Admission::Allowed);
        assert_eq!(registry.state_of("http:example"), BreakerState::HalfOpen);
        registry.record_success("http:example");
        assert_eq!(registry.state_of("http:example"), BreakerState::Closed);
    }

    #[test]
    fn half_open_failure_reopens_with_fresh_duration() {
        let registry = CircuitBreakerRegistry::new(policy());
        for _ in 0..3 {
            registry.admit("http:example");
            registry.record_failure("http:example");
        }
        std::thread::sleep(std::time::Duration::from_millis(60));
        registry.admit("http:example");
        registry.record_failure("http:example");
        assert_eq!(registry.state_of("http:example"), BreakerState::Open);
        // Immediately re-checking should still be rejected; the re-open reset the clock.
        assert_eq!(registry.admit("http:example"), Admission::Rejected);
    }

    #[test]
    fn distinct_keys_have_independent_state() {
        let registry = CircuitBreakerRegistry::new(policy());
        for _ in 0..3 {
            registry.admit("http:a");
            registry.record_failure("http:a");
        }
        assert_eq!(registry.state_of("http:a"), BreakerState::Open);
        assert_eq!(registry.state_of("http:b"), BreakerState::Closed);
    }
}
