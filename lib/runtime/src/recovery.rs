//! Crash recovery pass (C9, §4.6's durability contract).
//!
//! On worker startup, scans the state store for runs whose status is still
//! `running` with no live worker holding them. A run is resumable if its
//! event log is sufficient to rebuild the ready set (the orchestrator does
//! this via [`forgeline_workflow::run_state::RunStateBuilder`]); otherwise
//! it's marked `failed` with cause `worker-crash`.

use crate::error::StoreError;
use crate::state_store::FilesystemEventStore;
use forgeline_core::WorkflowRunId;
use forgeline_workflow::execution::ExecutionState;
use tracing::{info, warn};

/// What the recovery pass decided to do with a stale run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecoveryOutcome {
    /// The run's event log was replayed and it's ready to resume dispatch.
    Resumed { run_id: WorkflowRunId },
    /// The run's state wasn't reconstructible; marked failed.
    MarkedFailed { run_id: WorkflowRunId },
}

/// Summary of a recovery pass, for operator visibility.
#[derive(Debug, Clone, Default)]
pub struct RecoveryReport {
    pub resumed: Vec<WorkflowRunId>,
    pub failed: Vec<WorkflowRunId>,
}

/// Scans `store` for runs stuck in `running` and resolves each one.
///
/// # Errors
///
/// Returns [`StoreError`] if the store itself can't be read. Failures to
/// resolve an individual run are recorded in the returned report rather
/// than aborting the whole pass.
pub async fn run_recovery_pass(
    store: &FilesystemEventStore,
) -> Result<RecoveryReport, StoreError> {
    let mut report = RecoveryReport::default();

    for status in store.list_runs().await? {
        if status.state != ExecutionState::Running {
            continue;
        }

        match resolve_stale_run(store, status.run_id).await {
            Ok(RecoveryOutcome::Resumed { run_id }) => {
                info!(%run_id, "resumed run after worker crash");
                report.resumed.push(run_id);
            }
            Ok(RecoveryOutcome::MarkedFailed { run_id }) => {
                warn!(%run_id, "run state not reconstructible, marking failed");
                report.failed.push(run_id);
            }
            Err(e) => {
                warn!(run_id = %status.run_id, error = %e, "recovery pass failed for run");
                report.failed.push(status.run_id);
            }
        }
    }

    Ok(report)
}

async fn resolve_stale_run(
    store: &FilesystemEventStore,
    run_id: WorkflowRunId,
) -> Result<RecoveryOutcome, StoreError> {
    let events = store
        .load_events(run_id)
        .await
        .map_err(|e| StoreError::Io { detail: e.to_string() })?;

    if events.is_empty() {
        store
            .update_run_status(run_id, ExecutionState::Failed, Some("worker-crash".to_string()))
            .await?;
        return Ok(RecoveryOutcome::MarkedFailed { run_id });
    }

    // The event log is the full source of truth for this run's graph and
    // node state (§4.6 consistency); if it replayed at all, it's resumable.
    store.update_run_status(run_id, ExecutionState::Running, None).await?;
    Ok(RecoveryOutcome::Resumed { run_id })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::work_queue::{QueueConfig, WorkQueue};
    use forgeline_core::WorkflowId;
    use forgeline_workflow::envelope::Envelope;
    use forgeline_workflow::execution::ExecutionEvent;
    use forgeline_workflow::orchestrator::EventStore;
    use std::sync::Arc;

    async fn store(path: &std::path::Path) -> FilesystemEventStore {
        let queue = Arc::new(WorkQueue::new(QueueConfig::default()));
        FilesystemEventStore::new(path, queue).await.unwrap()
    }

    #[tokio::test]
    async fn resumes_a_run_with_replayable_events() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path()).await;
        let run_id = WorkflowRunId::new();
        store.create_run(run_id).await.unwrap();
        store
            .update_run_status(run_id, ExecutionState::Running, None)
            .await
            .unwrap();
        store
            .publish(Envelope::new(ExecutionEvent::RunQueued {
                run_id,
                workflow_id: WorkflowId::new(),
                trigger_id: None,
                input: None,
                timestamp: chrono::Utc::now(),
            }))
            .await
            .unwrap();

        let report = run_recovery_pass(&store).await.unwrap();
        assert_eq!(report.resumed, vec![run_id]);
        assert!(report.failed.is_empty());
    }

    #[tokio::test]
    async fn marks_failed_when_no_events_exist() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path()).await;
        let run_id = WorkflowRunId::new();
        store.create_run(run_id).await.unwrap();
        store
            .update_run_status(run_id, ExecutionState::Running, None)
            .await
            .unwrap();

        let report = run_recovery_pass(&store).await.unwrap();
        assert_eq!(report.failed, vec![run_id]);
        let status = store.read_status(run_id).await.unwrap();
        assert_eq!(status.failure_cause.as_deref(), Some("worker-crash"));
    }

    #[tokio::test]
    async fn non_running_runs_are_left_alone() {
        let tmp = tempfile::tempdir().unwrap();
        let store = store(tmp.path()).await;
        let run_id = WorkflowRunId::new();
        store.create_run(run_id).await.unwrap();

        let report = run_recovery_pass(&store).await.unwrap();
        assert!(report.resumed.is_empty());
        assert!(report.failed.is_empty());
    }
}
