//! Workflow definition and DAG execution primitives for forgeline.
//!
//! This crate provides the core workflow data model and single-run execution
//! state machine, including:
//!
//! - **Graph Model**: Directed graphs using petgraph with typed nodes and edges
//! - **Node Registry**: Closed set of built-in node kinds plus admission checks
//! - **Port System**: Named input/output ports with JSON Schema typing
//! - **DAG Resolver**: Ready-set computation and cycle detection
//! - **Execution**: Event-sourced state machine for tracking workflow runs
//! - **Triggers**: Schedule, interval, event, and webhook trigger definitions

pub mod definition;
pub mod edge;
pub mod envelope;
pub mod error;
pub mod execution;
pub mod graph;
pub mod node;
pub mod orchestrator;
pub mod port;
pub mod registry;
pub mod remaining_work;
pub mod resolver;
pub mod retry;
pub mod run_state;
pub mod trigger;
pub mod worker;

pub use definition::{Workflow, WorkflowMetadata};
pub use edge::Edge;
pub use envelope::Envelope;
pub use error::{ErrorKind, ExecutionError, GraphError, WorkflowError};
pub use execution::{ExecutionState, NodeExecution, NodeExecutionState, WorkflowRun};
pub use graph::WorkflowGraph;
pub use node::{
    CompositeNodeConfig, ExternalCallNodeConfig, NativeNodeConfig, Node, NodeConfig, NodeId,
    NodeOverrides, ScriptLanguage, ScriptMode, ScriptNodeConfig,
};
pub use orchestrator::{Orchestrator, OrchestratorError, WorkItem, WorkItemResult};
pub use port::{InputPort, OutputPort, PortSchema};
pub use registry::{NodeRegistry, NodeTypeDescriptor, RegistryError};
pub use resolver::{DagResolver, ResolverError};
pub use retry::{ErrorHandlingPolicy, ExecutionDefaults, RetryPolicy};
pub use run_state::{RunState, RunStateBuilder};
pub use trigger::{OverlapPolicy, Trigger, TriggerConfig, TriggerType};
pub use worker::{NodeExecutor, NodeExecutionError, Worker};
