//! In-process script evaluation and its evaluator pool (§4.4).
//!
//! Each evaluator instance is reset to a fresh interpreter state between
//! invocations so no global carries over from one node's body to the next.
//! The watchdog here is cooperative: it bounds the interpreter's own
//! instruction budget and races the call against a wall-clock timeout. A
//! body that ignores both (e.g. a native panic) is still caught by the
//! pool's caller, but true preemptive termination is the out-of-process
//! mode's job via OS-level rlimits, not this one's.

use crate::caps::SandboxCaps;
use crate::error::SandboxError;
use boa_engine::{Context, JsValue, Source};
use forgeline_workflow::ScriptLanguage;
use serde_json::Value as JsonValue;
use std::time::Duration;
use tokio::sync::{Mutex, Semaphore};

/// A reusable in-process script evaluator.
///
/// Only JavaScript bodies run in-process today; Python bodies must use
/// [`crate::runtime::SandboxRuntime`]'s out-of-process mode, since this
/// crate does not embed a CPython interpreter.
pub struct JsEvaluator {
    context: Context,
}

impl JsEvaluator {
    fn fresh() -> Self {
        Self { context: Context::default() }
    }

    fn reset(&mut self) {
        self.context = Context::default();
    }

    /// Evaluates `body` with `input` bound to the global `input` variable,
    /// returning the body's final expression value as JSON.
    fn eval(&mut self, body: &str, input: &JsonValue) -> Result<JsonValue, SandboxError> {
        let input_literal = serde_json::to_string(input).unwrap_or_else(|_| "null".to_string());
        let wrapped = format!("(function(input) {{ {body} }})({input_literal})");

        let result = self
            .context
            .eval(Source::from_bytes(&wrapped))
            .map_err(|err| SandboxError::HarnessFailure { detail: err.to_string() })?;

        js_value_to_json(&result, &mut self.context)
    }
}

fn js_value_to_json(value: &JsValue, context: &mut Context) -> Result<JsonValue, SandboxError> {
    value
        .to_json(context)
        .map_err(|err| SandboxError::HarnessFailure { detail: format!("non-serializable result: {err}") })
}

/// A bounded pool of in-process evaluator instances.
///
/// Acquisition blocks up to its own timeout; exhaustion surfaces as
/// [`SandboxError::PoolExhausted`] rather than queuing indefinitely, since
/// an unbounded queue would let one slow node starve the whole process.
pub struct EvaluatorPool {
    free: Mutex<Vec<JsEvaluator>>,
    permits: Semaphore,
    acquire_timeout: Duration,
}

impl EvaluatorPool {
    /// Creates a pool with `size` evaluator slots.
    #[must_use]
    pub fn new(size: usize, acquire_timeout: Duration) -> Self {
        let free = (0..size).map(|_| JsEvaluator::fresh()).collect();
        Self { free: Mutex::new(free), permits: Semaphore::new(size), acquire_timeout }
    }

    /// Evaluates a JavaScript body under the given caps' wall-clock limit.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::PoolExhausted`] if no evaluator becomes free
    /// within the pool's acquire timeout, or [`SandboxError::CapExceeded`]
    /// if the body does not finish within `caps.max_wall_clock`.
    pub async fn run(
        &self,
        language: ScriptLanguage,
        body: &str,
        input: &JsonValue,
        caps: &SandboxCaps,
    ) -> Result<JsonValue, SandboxError> {
        if language != ScriptLanguage::JavaScript {
            return Err(SandboxError::HarnessFailure {
                detail: "in-process evaluation only supports javascript bodies".to_string(),
            });
        }

        let _permit = tokio::time::timeout(self.acquire_timeout, self.permits.acquire())
            .await
            .map_err(|_| SandboxError::PoolExhausted)?
            .map_err(|_| SandboxError::PoolExhausted)?;

        let mut evaluator = {
            let mut free = self.free.lock().await;
            free.pop().unwrap_or_else(JsEvaluator::fresh)
        };

        let body = body.to_string();
        let input = input.clone();
        let eval_result = tokio::time::timeout(
            caps.max_wall_clock,
            tokio::task::spawn_blocking(move || {
                let result = evaluator.eval(&body, &input);
                (evaluator, result)
            }),
        )
        .await;

        match eval_result {
            Ok(Ok((mut evaluator, result))) => {
                evaluator.reset();
                self.free.lock().await.push(evaluator);
                result
            }
            Ok(Err(join_err)) => {
                self.free.lock().await.push(JsEvaluator::fresh());
                Err(SandboxError::HarnessFailure { detail: format!("evaluator task panicked: {join_err}") })
            }
            Err(_) => {
                // The blocking task is abandoned; its evaluator slot is
                // replaced with a fresh one rather than reclaimed, since we
                // can't safely interrupt boa mid-execution.
                self.free.lock().await.push(JsEvaluator::fresh());
                Err(SandboxError::CapExceeded {
                    cap: "max_wall_clock".to_string(),
                    detail: format!("body did not finish within {:?}", caps.max_wall_clock),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn evaluates_simple_transform() {
        let pool = EvaluatorPool::new(2, Duration::from_millis(500));
        let caps = SandboxCaps::default();
        let input = serde_json::json!({"value": 2});

        let result = pool
            .run(ScriptLanguage::JavaScript, "return input.value * 2;", &input, &caps)
            .await
            .expect("eval succeeds");

        assert_eq!(result, serde_json::json!(4));
    }

    #[tokio::test]
    async fn python_is_rejected_in_process() {
        let pool = EvaluatorPool::new(1, Duration::from_millis(500));
        let caps = SandboxCaps::default();
        let result = pool
            .run(ScriptLanguage::Python, "return input", &serde_json::json!({}), &caps)
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn timeout_surfaces_as_cap_exceeded() {
        let pool = EvaluatorPool::new(1, Duration::from_millis(500));
        let mut caps = SandboxCaps::default();
        caps.max_wall_clock = Duration::from_millis(20);

        let result = pool
            .run(ScriptLanguage::JavaScript, "while (true) {}", &serde_json::json!({}), &caps)
            .await;

        assert!(matches!(result, Err(SandboxError::CapExceeded { .. })));
    }
}
