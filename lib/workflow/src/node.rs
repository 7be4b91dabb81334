//! Workflow node types and configurations.
//!
//! A node instance in a workflow graph carries:
//! - A unique ID within the workflow
//! - A node *type* name, resolved against the registry at admission time
//! - A kind-specific configuration bag
//! - Input and output ports
//!
//! Node kinds form a closed tagged union (script, native, external-call,
//! composite). The registry dispatches on the tag; there is no subclass
//! hierarchy among node types.

use crate::port::{InputPort, OutputPort, PortSchema};
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use ulid::Ulid;

/// A unique identifier for a node within a workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct NodeId(Ulid);

impl NodeId {
    /// Creates a new random node ID.
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }

    /// Creates a node ID from a ULID.
    #[must_use]
    pub const fn from_ulid(ulid: Ulid) -> Self {
        Self(ulid)
    }
}

impl Default for NodeId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for NodeId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "node_{}", self.0)
    }
}

/// Language for a scripted node body.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptLanguage {
    JavaScript,
    Python,
}

/// Execution mode for a scripted node body, chosen independently of language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScriptMode {
    /// Interpreted in-process by a pooled evaluator instance.
    InProcess,
    /// Evaluated in a subprocess under a pre-built runner harness.
    OutOfProcess,
}

/// Configuration for a sandboxed script node.
///
/// The body is pre-validated by the sandbox's static analyser before a run
/// is ever scheduled; see the sandbox runtime's blocklist.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScriptNodeConfig {
    /// The scripting language the body is written in.
    pub language: ScriptLanguage,
    /// Which sandbox execution mode evaluates this body.
    pub mode: ScriptMode,
    /// The script source.
    pub body: String,
}

/// Configuration for a native compiled module node.
///
/// Native nodes load in-process with no additional isolation. Reserved for
/// first-party, trusted code; never used for user-supplied bodies.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NativeNodeConfig {
    /// The registered module name to invoke.
    pub module: String,
    /// Module-specific parameters.
    pub parameters: JsonValue,
}

/// Configuration for a node that calls out to an external service or
/// protocol client (HTTP, SQL, message bus, etc.).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalCallNodeConfig {
    /// The external service identifier (e.g. "http", "postgres").
    pub service: String,
    /// The operation to perform against that service.
    pub operation: String,
    /// Operation-specific parameters.
    pub parameters: JsonValue,
}

/// Configuration for a node that invokes another workflow as a sub-unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompositeNodeConfig {
    /// Reference to the sub-workflow definition.
    pub workflow_ref: String,
    /// How this node's inputs map onto the sub-workflow's parameters.
    pub input_mapping: JsonValue,
}

/// Configuration for a node, dispatched by kind.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum NodeConfig {
    /// Sandboxed script body.
    Script(ScriptNodeConfig),
    /// Trusted in-process native module.
    Native(NativeNodeConfig),
    /// Call to an external service.
    ExternalCall(ExternalCallNodeConfig),
    /// Invocation of another workflow.
    Composite(CompositeNodeConfig),
}

impl NodeConfig {
    /// Returns the tag name for this node kind.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Script(_) => "script",
            Self::Native(_) => "native",
            Self::ExternalCall(_) => "external_call",
            Self::Composite(_) => "composite",
        }
    }

    /// Whether this node kind ever evaluates user-supplied, untrusted code.
    ///
    /// Only script nodes are routed through the sandbox runtime; native,
    /// external-call, and composite nodes run without sandboxing.
    #[must_use]
    pub fn is_sandboxed(&self) -> bool {
        matches!(self, Self::Script(_))
    }
}

/// Per-node overrides of the workflow's timeout/retry/resource defaults.
///
/// Any field left `None` falls back to the workflow's or the process-wide
/// `CoreConfig` default.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeOverrides {
    /// Node wall-clock timeout override, in milliseconds.
    pub timeout_ms: Option<u64>,
    /// Maximum retry attempts override.
    pub max_attempts: Option<u32>,
    /// Resource cap overrides, validated against the sandbox's cap schema
    /// at admission time. Ignored for non-sandboxed node kinds.
    pub resource_caps: Option<JsonValue>,
}

/// A workflow node instance.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Node {
    /// Unique identifier for this node within the workflow.
    pub id: NodeId,
    /// Human-readable name for this node.
    pub name: String,
    /// The registered node-type name this instance resolves to.
    pub node_type: String,
    /// Node configuration (determines kind and behaviour).
    pub config: NodeConfig,
    /// Timeout/retry/resource overrides for this node.
    pub overrides: NodeOverrides,
    /// Idempotency key template, resolved per attempt and passed to the
    /// executor for at-most-once external-side-effect semantics.
    pub idempotency_key_template: Option<String>,
    /// Input ports for this node.
    pub inputs: Vec<InputPort>,
    /// Output ports for this node.
    pub outputs: Vec<OutputPort>,
}

impl Node {
    /// Creates a new node with the given configuration.
    ///
    /// The node type defaults to the configuration's kind name; use
    /// [`Node::with_type`] to register under a more specific type name.
    #[must_use]
    pub fn new(name: impl Into<String>, config: NodeConfig) -> Self {
        let (inputs, outputs) = Self::default_ports(&config);
        let node_type = config.kind_name().to_string();
        Self {
            id: NodeId::new(),
            name: name.into(),
            node_type,
            config,
            overrides: NodeOverrides::default(),
            idempotency_key_template: None,
            inputs,
            outputs,
        }
    }

    /// Creates a new node with a specific ID.
    #[must_use]
    pub fn with_id(id: NodeId, name: impl Into<String>, config: NodeConfig) -> Self {
        let mut node = Self::new(name, config);
        node.id = id;
        node
    }

    /// Overrides the registered node-type name (e.g. "http_request" for an
    /// `ExternalCall` node rather than the generic "external_call" tag).
    #[must_use]
    pub fn with_type(mut self, node_type: impl Into<String>) -> Self {
        self.node_type = node_type.into();
        self
    }

    /// Attaches an idempotency key template.
    #[must_use]
    pub fn with_idempotency_key(mut self, template: impl Into<String>) -> Self {
        self.idempotency_key_template = Some(template.into());
        self
    }

    /// Returns the kind tag of this node's configuration.
    #[must_use]
    pub fn kind_name(&self) -> &'static str {
        self.config.kind_name()
    }

    /// Returns the input port with the given name, if any.
    #[must_use]
    pub fn input_port(&self, name: &str) -> Option<&InputPort> {
        self.inputs.iter().find(|p| p.name == name)
    }

    /// Returns the output port with the given name, if any.
    #[must_use]
    pub fn output_port(&self, name: &str) -> Option<&OutputPort> {
        self.outputs.iter().find(|p| p.name == name)
    }

    /// Generates default ports based on node configuration.
    fn default_ports(config: &NodeConfig) -> (Vec<InputPort>, Vec<OutputPort>) {
        match config {
            NodeConfig::Script(_) | NodeConfig::Native(_) | NodeConfig::ExternalCall(_) => (
                vec![InputPort::optional("input", PortSchema::any())],
                vec![OutputPort::new("output", PortSchema::any())],
            ),
            NodeConfig::Composite(_) => (
                vec![InputPort::required("input", PortSchema::object())],
                vec![OutputPort::new("output", PortSchema::object())],
            ),
        }
    }
}
