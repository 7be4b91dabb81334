//! Sandbox runtime entry point (C1).
//!
//! Exposes the single operation §4.4 specifies: `run(language,
//! body_or_reference, input_snapshot, caps) → output_snapshot | violation`.
//! Native compiled modules bypass this crate entirely — they're loaded
//! in-process by the runtime crate's executor with no sandboxing, since
//! they're first-party code, never user-supplied.

use crate::blocklist;
use crate::caps::SandboxCaps;
use crate::error::SandboxError;
use crate::evaluator::EvaluatorPool;
use crate::harness;
use forgeline_workflow::{ScriptLanguage, ScriptMode};
use serde_json::Value as JsonValue;
use std::time::Duration;

/// The sandboxed evaluator for script node bodies.
///
/// Holds the in-process evaluator pool; out-of-process invocations spawn a
/// fresh subprocess per call and need no shared state here.
pub struct SandboxRuntime {
    pool: EvaluatorPool,
}

impl SandboxRuntime {
    /// Creates a runtime with an in-process pool of `pool_size` evaluators.
    #[must_use]
    pub fn new(pool_size: usize, pool_acquire_timeout: Duration) -> Self {
        Self { pool: EvaluatorPool::new(pool_size, pool_acquire_timeout) }
    }

    /// Evaluates a script body under the given mode and caps.
    ///
    /// Always re-runs the static-analysis blocklist, even though the
    /// registry should have already rejected a bad body at admission time —
    /// this is the last line of defense before untrusted code executes.
    ///
    /// # Errors
    ///
    /// Returns [`SandboxError::BlocklistViolation`] if the body contains a
    /// forbidden symbol, or any evaluator/harness error from the chosen
    /// execution mode.
    pub async fn run(
        &self,
        language: ScriptLanguage,
        mode: ScriptMode,
        body: &str,
        input_snapshot: &JsonValue,
        caps: &SandboxCaps,
    ) -> Result<JsonValue, SandboxError> {
        blocklist::scan(language, body)?;

        match mode {
            ScriptMode::InProcess => self.pool.run(language, body, input_snapshot, caps).await,
            ScriptMode::OutOfProcess => harness::run(language, body, input_snapshot, caps).await,
        }
    }
}
