//! Workflow orchestrator for coordinating execution.
//!
//! - One orchestrator per run
//! - Determines ready nodes, publishes work items
//! - Handles graph logic (workers handle execution)
//! - JetStream ack handles crash recovery
//!
//! The orchestrator runs the execution loop:
//! 1. Load/reconstruct run state from events
//! 2. Determine ready nodes
//! 3. Publish work items for workers
//! 4. Process completion/failure events
//! 5. Finalize the run when complete

use crate::definition::Workflow;
use crate::envelope::Envelope;
use crate::execution::{ExecutionEvent, ExecutionState};
use crate::node::NodeId;
use crate::retry::ErrorHandlingPolicy;
use crate::run_state::{RunState, RunStateBuilder, RunStateError};
use crate::worker::ObjectStore;
use async_trait::async_trait;
use chrono::Utc;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use forgeline_core::WorkflowRunId;
use std::collections::HashMap;

/// A work item to be executed by a worker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkItem {
    /// The run this work item belongs to.
    pub run_id: WorkflowRunId,
    /// The node to execute.
    pub node_id: NodeId,
    /// Input data for the node (collected from predecessor outputs).
    pub inputs: HashMap<String, String>, // port_name -> object_store_key
}

/// Result of a work item execution.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum WorkItemResult {
    /// Node executed successfully.
    Completed {
        /// The run ID.
        run_id: WorkflowRunId,
        /// The node ID.
        node_id: NodeId,
        /// Object store key for the output.
        output_key: String,
    },
    /// Node execution failed.
    Failed {
        /// The run ID.
        run_id: WorkflowRunId,
        /// The node ID.
        node_id: NodeId,
        /// Error message.
        error: String,
    },
}

/// Trait for event persistence and messaging.
///
/// This abstraction allows the orchestrator to be tested with an in-memory
/// store while still supporting a durable, implementation-specific store
/// (filesystem, database, message bus) in production.
#[async_trait]
pub trait EventStore: Send + Sync {
    /// Publishes an event to the event stream.
    async fn publish(&self, event: Envelope<ExecutionEvent>) -> Result<(), EventStoreError>;

    /// Loads all events for a run.
    async fn load_events(
        &self,
        run_id: WorkflowRunId,
    ) -> Result<Vec<ExecutionEvent>, EventStoreError>;

    /// Publishes a work item for workers to process.
    async fn publish_work_item(&self, item: Envelope<WorkItem>) -> Result<(), EventStoreError>;
}

/// Errors from event store operations.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventStoreError {
    /// Failed to connect to the event store.
    ConnectionFailed { message: String },
    /// Failed to publish event.
    PublishFailed { message: String },
    /// Failed to load events.
    LoadFailed { message: String },
}

impl std::fmt::Display for EventStoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::ConnectionFailed { message } => {
                write!(f, "event store connection failed: {message}")
            }
            Self::PublishFailed { message } => write!(f, "event publish failed: {message}"),
            Self::LoadFailed { message } => write!(f, "event load failed: {message}"),
        }
    }
}

impl std::error::Error for EventStoreError {}

/// Errors that can occur during orchestration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OrchestratorError {
    /// Event store error.
    EventStore(EventStoreError),
    /// Run state error.
    RunState(RunStateError),
    /// Run not found.
    RunNotFound { run_id: WorkflowRunId },
    /// Run already in terminal state.
    RunAlreadyTerminal { run_id: WorkflowRunId },
}

impl std::fmt::Display for OrchestratorError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EventStore(e) => write!(f, "event store error: {e}"),
            Self::RunState(e) => write!(f, "run state error: {e}"),
            Self::RunNotFound { run_id } => write!(f, "run not found: {run_id}"),
            Self::RunAlreadyTerminal { run_id } => {
                write!(f, "run already in terminal state: {run_id}")
            }
        }
    }
}

impl std::error::Error for OrchestratorError {}

impl From<EventStoreError> for OrchestratorError {
    fn from(e: EventStoreError) -> Self {
        Self::EventStore(e)
    }
}

impl From<RunStateError> for OrchestratorError {
    fn from(e: RunStateError) -> Self {
        Self::RunState(e)
    }
}

/// The workflow orchestrator.
///
/// Coordinates execution of a single workflow run. Holds an [`ObjectStore`]
/// handle alongside the event store so `finalize_run` can resolve sink-node
/// output keys into the run's actual `run_result` values (§4.3) rather than
/// leaving callers to chase down object-store keys themselves.
pub struct Orchestrator<E: EventStore, O: ObjectStore> {
    workflow: Workflow,
    event_store: E,
    object_store: O,
    state: Option<RunState>,
}

impl<E: EventStore, O: ObjectStore> Orchestrator<E, O> {
    /// Creates a new orchestrator for the given workflow.
    pub fn new(workflow: Workflow, event_store: E, object_store: O) -> Self {
        Self {
            workflow,
            event_store,
            object_store,
            state: None,
        }
    }

    /// Initializes or resumes a run.
    ///
    /// If run_id is provided, loads existing state from events.
    /// Otherwise, creates a new run.
    pub async fn initialize(
        &mut self,
        run_id: Option<WorkflowRunId>,
    ) -> Result<(), OrchestratorError> {
        match run_id {
            Some(id) => self.resume(id).await,
            None => self.start_new_run().await,
        }
    }

    /// Starts a new run.
    async fn start_new_run(&mut self) -> Result<(), OrchestratorError> {
        let run_id = WorkflowRunId::new();
        let workflow_id = self.workflow.id;
        let timestamp = Utc::now();

        // Publish RunQueued event
        let event = ExecutionEvent::RunQueued {
            run_id,
            workflow_id,
            trigger_id: None,
            input: None,
            timestamp,
        };
        self.event_store
            .publish(Envelope::new(event.clone()))
            .await?;

        // Build initial state
        let builder = RunStateBuilder::new(self.workflow.graph.clone());
        let state = builder.build_from_events(vec![event])?;
        self.state = Some(state);

        Ok(())
    }

    /// Resumes an existing run from events.
    async fn resume(&mut self, run_id: WorkflowRunId) -> Result<(), OrchestratorError> {
        let events = self.event_store.load_events(run_id).await?;
        if events.is_empty() {
            return Err(OrchestratorError::RunNotFound { run_id });
        }

        let builder = RunStateBuilder::new(self.workflow.graph.clone());
        let state = builder.build_from_events(events)?;

        if state.execution_state.is_terminal() {
            return Err(OrchestratorError::RunAlreadyTerminal { run_id });
        }

        self.state = Some(state);
        Ok(())
    }

    /// Starts execution of the run.
    ///
    /// Publishes RunStarted event and schedules ready nodes.
    pub async fn start(&mut self) -> Result<(), OrchestratorError> {
        let state = self.state.as_mut().ok_or(OrchestratorError::RunNotFound {
            run_id: WorkflowRunId::new(), // placeholder
        })?;

        if state.execution_state != ExecutionState::Queued {
            return Ok(()); // Already started
        }

        let run_id = state.run_id;
        let timestamp = Utc::now();

        // Publish RunStarted event
        let event = ExecutionEvent::RunStarted { run_id, timestamp };
        self.event_store.publish(Envelope::new(event)).await?;
        state.execution_state = ExecutionState::Running;
        state.started_at = Some(timestamp);

        // Schedule ready nodes
        self.schedule_ready_nodes().await?;

        Ok(())
    }

    /// Schedules ready nodes for execution, up to the run's parallelism budget.
    ///
    /// Per §4.3 step 1: move from `ready` to `running` as many nodes as the
    /// per-run parallelism budget allows, strictly bounded by
    /// `workflow.defaults.parallelism`.
    async fn schedule_ready_nodes(&mut self) -> Result<(), OrchestratorError> {
        // First, collect all the information we need while borrowing immutably
        let (run_id, nodes_to_schedule) = {
            let state = self.state.as_ref().ok_or(OrchestratorError::RunNotFound {
                run_id: WorkflowRunId::new(),
            })?;

            let run_id = state.run_id;
            let executing = state.remaining_work().executing_nodes().len();
            let budget = (self.workflow.defaults.parallelism as usize).saturating_sub(executing);
            let ready = state.ready_nodes();

            // Collect inputs for each ready node, capped at the remaining budget.
            let nodes_to_schedule: Vec<(NodeId, HashMap<String, String>)> = ready
                .into_iter()
                .take(budget)
                .map(|node_id| {
                    let inputs = self.collect_inputs_immutable(state, node_id);
                    (node_id, inputs)
                })
                .collect();

            (run_id, nodes_to_schedule)
        };

        // Now process each node
        let timestamp = Utc::now();
        for (node_id, inputs) in nodes_to_schedule {
            let input_json = serde_json::to_value(&inputs).unwrap_or(JsonValue::Null);

            // Publish NodeStarted event
            let event = ExecutionEvent::NodeStarted {
                run_id,
                node_id,
                input: Some(input_json.clone()),
                timestamp,
            };
            self.event_store.publish(Envelope::new(event)).await?;

            // Update state
            if let Some(state) = self.state.as_mut() {
                state.mark_node_executing(node_id, Some(input_json));
            }

            // Publish work item for workers
            let work_item = WorkItem {
                run_id,
                node_id,
                inputs,
            };
            self.event_store
                .publish_work_item(Envelope::new(work_item))
                .await?;
        }

        Ok(())
    }

    /// Collects inputs for a node from predecessor outputs (immutable borrow version).
    fn collect_inputs_immutable(
        &self,
        state: &RunState,
        node_id: NodeId,
    ) -> HashMap<String, String> {
        let mut inputs = HashMap::new();

        // Get predecessors from workflow graph
        for (predecessor, edge) in self.workflow.graph.predecessors(node_id) {
            if let Some(exec) = state.node_states.get(&predecessor.id)
                && let Some(output_key) = &exec.output_key
            {
                // Map output port to input port
                inputs.insert(edge.target_port.clone(), output_key.clone());
            }
        }

        inputs
    }

    /// Handles a work item result (completion or failure).
    pub async fn handle_result(&mut self, result: WorkItemResult) -> Result<(), OrchestratorError> {
        let state = self.state.as_mut().ok_or(OrchestratorError::RunNotFound {
            run_id: WorkflowRunId::new(),
        })?;

        let timestamp = Utc::now();
        let mut failed_node = None;

        match result {
            WorkItemResult::Completed {
                run_id,
                node_id,
                output_key,
            } => {
                // Publish NodeCompleted event
                let event = ExecutionEvent::NodeCompleted {
                    run_id,
                    node_id,
                    output_key: output_key.clone(),
                    timestamp,
                };
                self.event_store.publish(Envelope::new(event)).await?;
                state.mark_node_completed(node_id, output_key);
            }
            WorkItemResult::Failed {
                run_id,
                node_id,
                error,
            } => {
                // Publish NodeFailed event
                let event = ExecutionEvent::NodeFailed {
                    run_id,
                    node_id,
                    error: error.clone(),
                    timestamp,
                };
                self.event_store.publish(Envelope::new(event)).await?;
                state.mark_node_failed(node_id, error);
                failed_node = Some(node_id);
            }
        }

        if let Some(node_id) = failed_node {
            self.apply_error_handling_policy(node_id).await?;
        }

        // Check if run is complete
        let is_complete = self
            .state
            .as_ref()
            .ok_or(OrchestratorError::RunNotFound { run_id: WorkflowRunId::new() })?
            .remaining_work()
            .is_complete();

        if is_complete {
            self.finalize_run().await?;
        } else {
            // Schedule any newly ready nodes
            self.schedule_ready_nodes().await?;
        }

        Ok(())
    }

    /// Applies §4.2's error-handling policy to the nodes left pending after
    /// `failed_node` just failed, skipping whichever of them the policy says
    /// shouldn't run.
    ///
    /// `FailFast` skips every node still tracked by the remaining work
    /// graph that isn't the node that just failed (in flight work still
    /// drains to its own terminal outcome; it just won't be joined by
    /// anything new). `ContinueOnError` and `IsolateBranch` skip only the
    /// nodes downstream of the failure, since unrelated branches are meant
    /// to run to completion under both policies; the distinction between
    /// the two is entirely in how `finalize_run` scores the outcome.
    async fn apply_error_handling_policy(&mut self, failed_node: NodeId) -> Result<(), OrchestratorError> {
        let policy = self.workflow.defaults.error_handling;

        let to_skip: Vec<NodeId> = {
            let state = self.state.as_ref().ok_or(OrchestratorError::RunNotFound {
                run_id: WorkflowRunId::new(),
            })?;
            match policy {
                ErrorHandlingPolicy::FailFast => state
                    .remaining_work()
                    .remaining_node_ids()
                    .into_iter()
                    .filter(|&id| id != failed_node && !state.remaining_work().executing_nodes().contains(&id))
                    .collect(),
                ErrorHandlingPolicy::ContinueOnError | ErrorHandlingPolicy::IsolateBranch => {
                    state.remaining_work().blocked_nodes()
                }
            }
        };

        if to_skip.is_empty() {
            return Ok(());
        }

        let run_id = self
            .state
            .as_ref()
            .ok_or(OrchestratorError::RunNotFound { run_id: WorkflowRunId::new() })?
            .run_id;
        let reason = format!("skipped due to failure of node {failed_node} under {policy:?}");

        for node_id in to_skip {
            let timestamp = Utc::now();
            let event = ExecutionEvent::NodeSkipped {
                run_id,
                node_id,
                reason: reason.clone(),
                timestamp,
            };
            self.event_store.publish(Envelope::new(event)).await?;
            if let Some(state) = self.state.as_mut() {
                state.mark_node_skipped(node_id);
            }
        }

        Ok(())
    }

    /// Cancels the run: every node the remaining work graph still tracks
    /// and that isn't in `in_flight` is marked cancelled, then the run
    /// transitions `cancelling -> cancelled` (§5, §6 op 4).
    ///
    /// `in_flight` is the set of nodes a caller has already dispatched to a
    /// worker and is waiting to drain to a real terminal outcome; those are
    /// left alone here; the caller folds their eventual `handle_result`
    /// into the same run before or after this call.
    pub async fn cancel(
        &mut self,
        reason: String,
        in_flight: &std::collections::HashSet<NodeId>,
    ) -> Result<(), OrchestratorError> {
        let run_id = self
            .state
            .as_ref()
            .ok_or(OrchestratorError::RunNotFound { run_id: WorkflowRunId::new() })?
            .run_id;

        if let Some(state) = self.state.as_mut() {
            state.execution_state = ExecutionState::Cancelling;
        }

        let to_cancel: Vec<NodeId> = self
            .state
            .as_ref()
            .ok_or(OrchestratorError::RunNotFound { run_id })?
            .remaining_work()
            .remaining_node_ids()
            .into_iter()
            .filter(|id| !in_flight.contains(id))
            .collect();

        for node_id in to_cancel {
            let timestamp = Utc::now();
            let event = ExecutionEvent::NodeCancelled { run_id, node_id, timestamp };
            self.event_store.publish(Envelope::new(event)).await?;
            if let Some(state) = self.state.as_mut() {
                state.mark_node_cancelled(node_id);
            }
        }

        let timestamp = Utc::now();
        let event = ExecutionEvent::RunCancelled { run_id, reason: reason.clone(), timestamp };
        self.event_store.publish(Envelope::new(event)).await?;
        if let Some(state) = self.state.as_mut() {
            state.cancel(timestamp);
        }

        Ok(())
    }

    /// Finalizes the run (marks as completed or failed).
    ///
    /// Under `isolate-branch`, a run with failures is only marked `Failed`
    /// if every branch ended in failure; if at least one node succeeded,
    /// the failure is confined to its own branch and the run completes.
    async fn finalize_run(&mut self) -> Result<(), OrchestratorError> {
        let run_id = self
            .state
            .as_ref()
            .ok_or(OrchestratorError::RunNotFound { run_id: WorkflowRunId::new() })?
            .run_id;
        let timestamp = Utc::now();

        let has_failures = self
            .state
            .as_ref()
            .ok_or(OrchestratorError::RunNotFound { run_id })?
            .has_failures();
        let any_succeeded = self
            .state
            .as_ref()
            .ok_or(OrchestratorError::RunNotFound { run_id })?
            .node_states
            .values()
            .any(|exec| exec.state == crate::execution::NodeExecutionState::Succeeded);

        let policy = self.workflow.defaults.error_handling;
        let run_failed = has_failures
            && !(policy == ErrorHandlingPolicy::IsolateBranch && any_succeeded);

        if run_failed {
            // Run failed due to node failures
            let event = ExecutionEvent::RunFailed {
                run_id,
                error: "workflow failed due to node failures".to_string(),
                timestamp,
            };
            self.event_store.publish(Envelope::new(event)).await?;
            if let Some(state) = self.state.as_mut() {
                state.fail("workflow failed due to node failures".to_string(), timestamp);
            }
        } else {
            // Run completed successfully; resolve sink-node outputs into
            // the terminal result before publishing.
            let output = self.collect_sink_outputs().await;
            let event = ExecutionEvent::RunCompleted { run_id, output: output.clone(), timestamp };
            self.event_store.publish(Envelope::new(event)).await?;
            if let Some(state) = self.state.as_mut() {
                state.complete(output, timestamp);
            }
        }

        Ok(())
    }

    /// Resolves the final port values of sink nodes (nodes with no
    /// successors) into the run's terminal output (§4.3's `run_result`
    /// contract).
    ///
    /// A single sink's value is returned directly; with more than one sink
    /// the result is a JSON object keyed by node name. Sinks that never
    /// produced output (skipped, or a branch that didn't run) are omitted
    /// rather than erroring the whole collection.
    async fn collect_sink_outputs(&self) -> Option<JsonValue> {
        let state = self.state.as_ref()?;

        let sinks: Vec<&crate::node::Node> = self
            .workflow
            .graph
            .nodes()
            .filter(|node| self.workflow.graph.successors(node.id).is_empty())
            .collect();

        let mut values = Vec::new();
        for node in sinks {
            let Some(exec) = state.node_states.get(&node.id) else { continue };
            let Some(output_key) = &exec.output_key else { continue };
            let Ok(bytes) = self.object_store.get(output_key).await else { continue };
            let Ok(value) = serde_json::from_slice::<JsonValue>(&bytes) else { continue };
            values.push((node.name.clone(), value));
        }

        match values.len() {
            0 => None,
            1 => Some(values.into_iter().next().unwrap().1),
            _ => Some(JsonValue::Object(values.into_iter().collect())),
        }
    }

    /// Returns the current run state.
    #[must_use]
    pub fn state(&self) -> Option<&RunState> {
        self.state.as_ref()
    }

    /// Returns the run ID.
    #[must_use]
    pub fn run_id(&self) -> Option<WorkflowRunId> {
        self.state.as_ref().map(|s| s.run_id)
    }

    /// Returns true if the run is complete.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.state.as_ref().is_some_and(|s| s.is_complete())
    }

    /// Returns the workflow definition this orchestrator is driving.
    #[must_use]
    pub fn workflow(&self) -> &Workflow {
        &self.workflow
    }
}
