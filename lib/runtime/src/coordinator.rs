//! Run coordinator (C9).
//!
//! Ties the orchestrator, work queue, worker, and circuit-breaker registry
//! together for a single run: drains the run's work items, executes each
//! through the retry/breaker-guarded executor, and feeds results back into
//! the orchestrator until the run reaches a terminal state. A coordinator
//! crash between a dequeue and the matching `handle_result` is exactly the
//! gap the recovery pass (§4.6) covers on the next worker startup.

use crate::state_store::RunStatusTracking;
use crate::work_queue::WorkQueue;
use forgeline_core::WorkflowRunId;
use forgeline_workflow::definition::Workflow;
use forgeline_workflow::execution::ExecutionState;
use forgeline_workflow::node::NodeId;
use forgeline_workflow::orchestrator::{EventStore, Orchestrator, OrchestratorError, WorkItemResult};
use forgeline_workflow::worker::{NodeExecutor, ObjectStore, Worker};
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{info, info_span, Instrument};

/// Signalled externally to stop dispatching new work for a run; in-flight
/// nodes still drain to a terminal state.
#[derive(Clone, Default)]
pub struct CancellationToken(Arc<AtomicBool>);

impl CancellationToken {
    #[must_use]
    pub fn new() -> Self {
        Self(Arc::new(AtomicBool::new(false)))
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

/// Drives a single run to completion.
pub struct RunCoordinator<
    S: EventStore + RunStatusTracking + Clone,
    O: ObjectStore + Clone + 'static,
    E: NodeExecutor + 'static,
> {
    orchestrator: Orchestrator<S, O>,
    status_store: S,
    worker: Arc<Worker<O, E>>,
    queue: Arc<WorkQueue>,
    cancellation: CancellationToken,
}

impl<S, O, E> RunCoordinator<S, O, E>
where
    S: EventStore + RunStatusTracking + Clone,
    O: ObjectStore + Clone + 'static,
    E: NodeExecutor + 'static,
{
    /// Creates a coordinator for `workflow`, wiring the given stores and
    /// executor together.
    #[must_use]
    pub fn new(
        workflow: Workflow,
        event_store: S,
        object_store: O,
        executor: E,
        queue: Arc<WorkQueue>,
    ) -> Self {
        Self {
            orchestrator: Orchestrator::new(workflow, event_store.clone(), object_store.clone()),
            status_store: event_store,
            worker: Arc::new(Worker::new(object_store, executor)),
            queue,
            cancellation: CancellationToken::new(),
        }
    }

    /// Returns a token external callers can use to request cancellation.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancellation.clone()
    }

    /// Starts a new run and drives it to a terminal state.
    ///
    /// Dispatches up to the run's `parallelism` budget of work items
    /// concurrently via a [`JoinSet`], feeding completions back into the
    /// orchestrator as they arrive rather than one at a time (§4.3, §5).
    /// On cancellation, dispatch of new work stops immediately but
    /// already-spawned work drains to its own terminal outcome before the
    /// orchestrator cancels whatever is left (§5, §6 op 4).
    ///
    /// # Errors
    ///
    /// Returns [`OrchestratorError`] if the orchestrator's event store
    /// fails at any step.
    pub async fn run_to_completion(&mut self) -> Result<WorkflowRunId, OrchestratorError> {
        self.orchestrator.initialize(None).await?;
        let run_id = self.orchestrator.run_id().expect("run_id set by initialize");
        let span = info_span!("run", %run_id);

        if let Err(e) = self.status_store.create_run(run_id).await {
            tracing::warn!(%run_id, error = %e, "failed to write initial run status");
        }

        async {
            self.orchestrator.start().await?;
            if let Err(e) = self.status_store.update_run_status(run_id, ExecutionState::Running, None).await {
                tracing::warn!(%run_id, error = %e, "failed to record running status");
            }

            let parallelism = (self.orchestrator.workflow().defaults.parallelism as usize).max(1);
            let mut in_flight: JoinSet<WorkItemResult> = JoinSet::new();
            let mut running_nodes: HashSet<NodeId> = HashSet::new();
            let mut cancelling = false;

            loop {
                if self.orchestrator.is_complete() && in_flight.is_empty() {
                    break;
                }

                if !cancelling && self.cancellation.is_cancelled() {
                    cancelling = true;
                    info!("cancellation requested, draining in-flight work");
                    if let Err(e) =
                        self.status_store.update_run_status(run_id, ExecutionState::Cancelling, None).await
                    {
                        tracing::warn!(%run_id, error = %e, "failed to record cancelling status");
                    }
                }

                let may_dispatch =
                    !cancelling && !self.orchestrator.is_complete() && in_flight.len() < parallelism;

                if may_dispatch {
                    if let Some(work_item) = self.queue.dequeue().await {
                        let node = self
                            .orchestrator
                            .workflow()
                            .graph
                            .get_node(work_item.node_id)
                            .cloned();

                        let Some(node) = node else {
                            self.queue.dead_letter(work_item, "node not found in workflow graph").await;
                            continue;
                        };

                        let node_id = node.id;
                        running_nodes.insert(node_id);
                        let worker = Arc::clone(&self.worker);
                        in_flight.spawn(
                            async move { worker.process(work_item, &node).await }
                                .instrument(info_span!("node", node_id = %node_id, attempt = 1)),
                        );
                        continue;
                    }

                    if in_flight.is_empty() {
                        // Nothing queued yet and nothing to wait on; yield
                        // briefly rather than busy-spin.
                        tokio::time::sleep(std::time::Duration::from_millis(5)).await;
                        continue;
                    }
                }

                if let Some(joined) = in_flight.join_next().await {
                    match joined {
                        Ok(result) => {
                            let node_id = match &result {
                                WorkItemResult::Completed { node_id, .. }
                                | WorkItemResult::Failed { node_id, .. } => *node_id,
                            };
                            running_nodes.remove(&node_id);
                            self.orchestrator.handle_result(result).await?;
                        }
                        Err(join_err) => {
                            tracing::warn!(%run_id, error = %join_err, "worker task panicked");
                        }
                    }
                    continue;
                }

                if cancelling {
                    self.orchestrator.cancel("cancellation requested".to_string(), &running_nodes).await?;
                    break;
                }

                tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            }

            if let Some(state) = self.orchestrator.state() {
                let failure_cause = match state.execution_state {
                    ExecutionState::Failed => Some("node failure".to_string()),
                    ExecutionState::Cancelled => Some("cancelled".to_string()),
                    _ => None,
                };
                if let Err(e) = self
                    .status_store
                    .update_run_status(run_id, state.execution_state, failure_cause)
                    .await
                {
                    tracing::warn!(%run_id, error = %e, "failed to record terminal run status");
                }
            }

            Ok(run_id)
        }
        .instrument(span)
        .await
    }
}
