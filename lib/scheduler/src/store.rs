//! Filesystem-backed implementations of [`TriggerManager`] and
//! [`ScheduleEvaluator`].
//!
//! Triggers and scheduled executions are each stored as one JSON file per
//! record under the store root, the same JSON-file-per-record layout
//! `forgeline-runtime`'s state store uses for runs. No database is assumed;
//! a denormalized directory scan stands in for the indexed lookups a real
//! deployment would back with a table.

use crate::error::{ScheduleError, TriggerError};
use crate::manager::{TriggerManager, TriggerRecord};
use crate::schedule::{CronSchedule, ScheduleEvaluator, ScheduledExecution, ScheduledExecutionId};
use async_trait::async_trait;
use chrono::{Duration, Utc};
use forgeline_core::{TriggerId, WorkflowId};
use forgeline_workflow::trigger::{MissedExecutionBehavior, Trigger, TriggerConfig, TriggerType};
use std::path::{Path, PathBuf};

const TRIGGERS_DIR: &str = "triggers";
const EXECUTIONS_DIR: &str = "executions";

/// Threshold past which a pending execution counts as missed.
const MISSED_THRESHOLD_SECS: i64 = 60;

fn trigger_path(root: &Path, id: TriggerId) -> PathBuf {
    root.join(TRIGGERS_DIR).join(format!("{id}.json"))
}

fn execution_path(root: &Path, id: ScheduledExecutionId) -> PathBuf {
    root.join(EXECUTIONS_DIR).join(format!("{id}.json"))
}

async fn read_trigger(path: &Path) -> Option<Trigger> {
    let bytes = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

async fn read_execution(path: &Path) -> Option<ScheduledExecution> {
    let bytes = tokio::fs::read(path).await.ok()?;
    serde_json::from_slice(&bytes).ok()
}

/// A [`TriggerManager`] and [`ScheduleEvaluator`] backed by JSON files on
/// disk, rooted at a directory holding `triggers/` and `executions/`
/// subdirectories.
pub struct FilesystemScheduleStore {
    root: PathBuf,
}

impl FilesystemScheduleStore {
    /// Creates a store rooted at `root`, creating its subdirectories if
    /// absent.
    ///
    /// # Errors
    ///
    /// Returns [`TriggerError::StorageFailed`] if the directories can't be
    /// created.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, TriggerError> {
        let root = root.into();
        for sub in [TRIGGERS_DIR, EXECUTIONS_DIR] {
            tokio::fs::create_dir_all(root.join(sub)).await.map_err(|e| {
                TriggerError::StorageFailed { reason: format!("create {sub} dir: {e}") }
            })?;
        }
        Ok(Self { root })
    }

    async fn all_triggers(&self) -> Result<Vec<Trigger>, TriggerError> {
        let mut entries = tokio::fs::read_dir(self.root.join(TRIGGERS_DIR))
            .await
            .map_err(|e| TriggerError::StorageFailed { reason: format!("read triggers dir: {e}") })?;
        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| TriggerError::StorageFailed { reason: e.to_string() })?
        {
            if let Some(trigger) = read_trigger(&entry.path()).await {
                out.push(trigger);
            }
        }
        Ok(out)
    }

    async fn all_executions(&self) -> Result<Vec<ScheduledExecution>, ScheduleError> {
        let mut entries = tokio::fs::read_dir(self.root.join(EXECUTIONS_DIR)).await.map_err(|e| {
            ScheduleError::EvaluationFailed { reason: format!("read executions dir: {e}") }
        })?;
        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| ScheduleError::EvaluationFailed { reason: e.to_string() })?
        {
            if let Some(execution) = read_execution(&entry.path()).await {
                out.push(execution);
            }
        }
        Ok(out)
    }

    async fn write_trigger(&self, trigger: &Trigger) -> Result<(), TriggerError> {
        let bytes = serde_json::to_vec_pretty(trigger)
            .map_err(|e| TriggerError::StorageFailed { reason: e.to_string() })?;
        tokio::fs::write(trigger_path(&self.root, trigger.id), bytes)
            .await
            .map_err(|e| TriggerError::StorageFailed { reason: e.to_string() })
    }

    async fn write_execution(&self, execution: &ScheduledExecution) -> Result<(), ScheduleError> {
        let bytes = serde_json::to_vec_pretty(execution)
            .map_err(|e| ScheduleError::EvaluationFailed { reason: e.to_string() })?;
        tokio::fs::write(execution_path(&self.root, execution.id), bytes)
            .await
            .map_err(|e| ScheduleError::EvaluationFailed { reason: e.to_string() })
    }
}

#[async_trait]
impl TriggerManager for FilesystemScheduleStore {
    async fn register(&self, trigger: Trigger) -> Result<TriggerId, TriggerError> {
        let path = trigger_path(&self.root, trigger.id);
        if path.exists() {
            return Err(TriggerError::AlreadyExists { id: trigger.id });
        }
        self.write_trigger(&trigger).await?;
        Ok(trigger.id)
    }

    async fn get(&self, id: TriggerId) -> Result<Trigger, TriggerError> {
        read_trigger(&trigger_path(&self.root, id)).await.ok_or(TriggerError::NotFound { id })
    }

    async fn update(&self, trigger: Trigger) -> Result<(), TriggerError> {
        if !trigger_path(&self.root, trigger.id).exists() {
            return Err(TriggerError::NotFound { id: trigger.id });
        }
        self.write_trigger(&trigger).await
    }

    async fn delete(&self, id: TriggerId) -> Result<(), TriggerError> {
        match tokio::fs::remove_file(trigger_path(&self.root, id)).await {
            Ok(()) | Err(_) => Ok(()),
        }
    }

    async fn delete_for_workflow(&self, workflow_id: WorkflowId) -> Result<u32, TriggerError> {
        let triggers = self.all_triggers().await?;
        let mut deleted = 0u32;
        for trigger in triggers.into_iter().filter(|t| t.workflow_id == workflow_id) {
            self.delete(trigger.id).await?;
            deleted += 1;
        }
        Ok(deleted)
    }

    async fn list_for_workflow(&self, workflow_id: WorkflowId) -> Result<Vec<Trigger>, TriggerError> {
        Ok(self
            .all_triggers()
            .await?
            .into_iter()
            .filter(|t| t.workflow_id == workflow_id)
            .collect())
    }

    async fn find_by_webhook_path(&self, path: &str) -> Result<Vec<TriggerRecord>, TriggerError> {
        Ok(self
            .all_triggers()
            .await?
            .iter()
            .filter(|t| matches!(&t.config, TriggerConfig::Webhook { path: p, .. } if p == path))
            .map(TriggerRecord::from_trigger)
            .collect())
    }

    async fn find_by_event_name(&self, event_name: &str) -> Result<Vec<TriggerRecord>, TriggerError> {
        Ok(self
            .all_triggers()
            .await?
            .iter()
            .filter(|t| {
                matches!(&t.config, TriggerConfig::Event { event_name: e, .. } if e == event_name)
            })
            .map(TriggerRecord::from_trigger)
            .collect())
    }

    async fn get_schedule_triggers(&self) -> Result<Vec<TriggerRecord>, TriggerError> {
        Ok(self
            .all_triggers()
            .await?
            .iter()
            .filter(|t| t.enabled && matches!(t.trigger_type(), TriggerType::Cron | TriggerType::Interval))
            .map(TriggerRecord::from_trigger)
            .collect())
    }

    async fn reconcile(
        &self,
        workflow_id: WorkflowId,
        triggers: Vec<Trigger>,
    ) -> Result<crate::manager::ReconcileResult, TriggerError> {
        let existing = self.list_for_workflow(workflow_id).await?;
        let mut result = crate::manager::ReconcileResult::default();

        for incoming in &triggers {
            match existing.iter().find(|t| t.node_id == incoming.node_id) {
                Some(current) if current.config != incoming.config => {
                    let mut updated = current.clone();
                    updated.config = incoming.config.clone();
                    updated.updated_at = Utc::now();
                    self.write_trigger(&updated).await?;
                    result.updated += 1;
                }
                Some(_) => {}
                None => {
                    self.write_trigger(incoming).await?;
                    result.added += 1;
                }
            }
        }

        let incoming_nodes: Vec<_> = triggers.iter().map(|t| t.node_id).collect();
        for stale in existing.iter().filter(|t| !incoming_nodes.contains(&t.node_id)) {
            self.delete(stale.id).await?;
            result.deleted += 1;
        }

        Ok(result)
    }
}

#[async_trait]
impl ScheduleEvaluator for FilesystemScheduleStore {
    async fn get_ready_executions(&self) -> Result<Vec<ScheduledExecution>, ScheduleError> {
        Ok(self.all_executions().await?.into_iter().filter(ScheduledExecution::is_ready).collect())
    }

    async fn schedule_next(
        &self,
        trigger_id: TriggerId,
        workflow_id: WorkflowId,
        schedule: &CronSchedule,
    ) -> Result<ScheduledExecution, ScheduleError> {
        let next = schedule.next_after(Utc::now()).ok_or_else(|| ScheduleError::EvaluationFailed {
            reason: format!("no future fire time for '{}'", schedule.expression),
        })?;
        let execution = ScheduledExecution::new(trigger_id, workflow_id, next);
        self.write_execution(&execution).await?;
        Ok(execution)
    }

    async fn handle_missed_executions(
        &self,
        trigger_id: TriggerId,
        behavior: MissedExecutionBehavior,
    ) -> Result<Vec<ScheduledExecution>, ScheduleError> {
        let threshold = Duration::seconds(MISSED_THRESHOLD_SECS);
        let missed: Vec<_> = self
            .all_executions()
            .await?
            .into_iter()
            .filter(|e| e.trigger_id == trigger_id && e.is_missed(threshold))
            .collect();

        let mut handled = Vec::with_capacity(missed.len());
        for mut execution in missed {
            match behavior {
                MissedExecutionBehavior::Skip | MissedExecutionBehavior::RunAtNextWindow => {
                    execution.skip();
                    self.write_execution(&execution).await?;
                }
                MissedExecutionBehavior::RunImmediately => {
                    // Left pending with its original `scheduled_for`; the
                    // next `get_ready_executions` poll picks it up.
                }
            }
            handled.push(execution);
        }
        Ok(handled)
    }

    async fn update_execution(&self, execution: ScheduledExecution) -> Result<(), ScheduleError> {
        self.write_execution(&execution).await
    }
}
