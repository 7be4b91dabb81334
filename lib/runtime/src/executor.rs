//! The node executor that backs a production worker (C4).
//!
//! Routes `Script` nodes into [`forgeline_sandbox::SandboxRuntime`];
//! `Native` nodes into a registered in-process closure table; `ExternalCall`
//! and `Composite` nodes are out of scope per the core's Non-goals (concrete
//! HTTP/SQL clients and sub-workflow recursion are left to callers that
//! compose this crate), so they report `UnsupportedNodeType` here rather
//! than silently no-opping.

use async_trait::async_trait;
use forgeline_sandbox::{SandboxCaps, SandboxRuntime};
use forgeline_workflow::node::{Node, NodeConfig};
use forgeline_workflow::worker::{NodeExecutionError, NodeExecutor};
use serde_json::Value as JsonValue;
use std::collections::HashMap;

/// An in-process native module, registered by name.
///
/// Native nodes run trusted, first-party code with no sandboxing — this is
/// the seam a host binary uses to plug in its own built-in operations
/// (fan-out/fan-in helpers, data-shape adapters) without routing through
/// the registry's admission checks meant for sandboxed bodies.
pub trait NativeModule: Send + Sync {
    fn call(&self, parameters: &JsonValue, input: &JsonValue) -> Result<JsonValue, String>;
}

/// The default production [`NodeExecutor`].
pub struct CoreNodeExecutor {
    sandbox: SandboxRuntime,
    default_caps: SandboxCaps,
    native_modules: HashMap<String, Box<dyn NativeModule>>,
}

impl CoreNodeExecutor {
    /// Creates an executor with the given sandbox pool size and default caps.
    #[must_use]
    pub fn new(sandbox: SandboxRuntime, default_caps: SandboxCaps) -> Self {
        Self { sandbox, default_caps, native_modules: HashMap::new() }
    }

    /// Registers a native module under `name`, reachable from a `Native`
    /// node whose `module` field matches.
    #[must_use]
    pub fn with_native_module(mut self, name: impl Into<String>, module: Box<dyn NativeModule>) -> Self {
        self.native_modules.insert(name.into(), module);
        self
    }

    fn caps_for(&self, node: &Node) -> SandboxCaps {
        match &node.overrides.resource_caps {
            Some(raw) => serde_json::from_value(raw.clone()).unwrap_or_else(|_| self.default_caps.clone()),
            None => self.default_caps.clone(),
        }
    }
}

#[async_trait]
impl NodeExecutor for CoreNodeExecutor {
    async fn execute(
        &self,
        node: &Node,
        inputs: HashMap<String, JsonValue>,
    ) -> Result<JsonValue, NodeExecutionError> {
        match &node.config {
            NodeConfig::Script(script) => {
                let input_snapshot = JsonValue::Object(inputs.into_iter().collect());
                let caps = self.caps_for(node);
                self.sandbox
                    .run(script.language, script.mode, &script.body, &input_snapshot, &caps)
                    .await
                    .map_err(|e| match e {
                        forgeline_sandbox::SandboxError::CapExceeded { .. } => {
                            NodeExecutionError::Timeout
                        }
                        other => NodeExecutionError::ExecutionFailed { message: other.to_string() },
                    })
            }
            NodeConfig::Native(native) => {
                let module = self.native_modules.get(&native.module).ok_or_else(|| {
                    NodeExecutionError::UnsupportedNodeType { node_type: native.module.clone() }
                })?;
                let input_snapshot = JsonValue::Object(inputs.into_iter().collect());
                module
                    .call(&native.parameters, &input_snapshot)
                    .map_err(|message| NodeExecutionError::ExecutionFailed { message })
            }
            NodeConfig::ExternalCall(_) | NodeConfig::Composite(_) => {
                Err(NodeExecutionError::UnsupportedNodeType { node_type: node.kind_name().to_string() })
            }
        }
    }
}
