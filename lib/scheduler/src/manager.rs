//! Trigger manager for workflow triggers.
//!
//! Manages the denormalized trigger table for efficient lookup.

use crate::error::TriggerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use forgeline_core::{TriggerId, WorkflowId};
use forgeline_workflow::trigger::{Trigger, TriggerConfig, TriggerType};
use forgeline_workflow::NodeId;

/// A denormalized trigger record optimized for lookup.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TriggerRecord {
    /// Trigger ID.
    pub id: TriggerId,
    /// Workflow ID.
    pub workflow_id: WorkflowId,
    /// Node ID in the workflow.
    pub node_id: NodeId,
    /// Trigger type.
    pub trigger_type: TriggerType,
    /// Whether enabled.
    pub enabled: bool,
    /// Lookup key (type-specific).
    pub lookup_key: TriggerLookupKey,
    /// When created.
    pub created_at: DateTime<Utc>,
    /// When updated.
    pub updated_at: DateTime<Utc>,
}

/// Type-specific lookup key for efficient trigger matching.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerLookupKey {
    /// Cron trigger lookup key.
    Cron {
        /// Cron expression.
        expression: String,
        /// Timezone.
        timezone: Option<String>,
    },
    /// Interval trigger lookup key.
    Interval {
        /// Period in milliseconds.
        period_ms: u64,
    },
    /// Webhook trigger lookup key.
    Webhook {
        /// Webhook path.
        path: String,
    },
    /// Event trigger lookup key.
    Event {
        /// Event name.
        event_name: String,
    },
    /// Manual trigger (no lookup needed).
    Manual,
}

impl From<&TriggerConfig> for TriggerLookupKey {
    fn from(config: &TriggerConfig) -> Self {
        match config {
            TriggerConfig::Cron {
                expression,
                timezone,
                ..
            } => Self::Cron {
                expression: expression.clone(),
                timezone: timezone.clone(),
            },
            TriggerConfig::Interval { period_ms, .. } => Self::Interval {
                period_ms: *period_ms,
            },
            TriggerConfig::Webhook { path, .. } => Self::Webhook { path: path.clone() },
            TriggerConfig::Event { event_name, .. } => Self::Event {
                event_name: event_name.clone(),
            },
            TriggerConfig::Manual => Self::Manual,
        }
    }
}

impl TriggerRecord {
    /// Creates a trigger record from a trigger.
    #[must_use]
    pub fn from_trigger(trigger: &Trigger) -> Self {
        Self {
            id: trigger.id,
            workflow_id: trigger.workflow_id,
            node_id: trigger.node_id,
            trigger_type: trigger.trigger_type(),
            enabled: trigger.enabled,
            lookup_key: TriggerLookupKey::from(&trigger.config),
            created_at: trigger.created_at,
            updated_at: trigger.updated_at,
        }
    }
}

/// Trait for trigger storage and lookup.
#[async_trait]
pub trait TriggerManager: Send + Sync {
    /// Registers a trigger.
    async fn register(&self, trigger: Trigger) -> Result<TriggerId, TriggerError>;

    /// Gets a trigger by ID.
    async fn get(&self, id: TriggerId) -> Result<Trigger, TriggerError>;

    /// Updates a trigger.
    async fn update(&self, trigger: Trigger) -> Result<(), TriggerError>;

    /// Deletes a trigger.
    async fn delete(&self, id: TriggerId) -> Result<(), TriggerError>;

    /// Deletes all triggers for a workflow.
    async fn delete_for_workflow(&self, workflow_id: WorkflowId) -> Result<u32, TriggerError>;

    /// Lists triggers for a workflow.
    async fn list_for_workflow(&self, workflow_id: WorkflowId) -> Result<Vec<Trigger>, TriggerError>;

    /// Finds triggers by webhook path.
    async fn find_by_webhook_path(&self, path: &str) -> Result<Vec<TriggerRecord>, TriggerError>;

    /// Finds triggers listening for the given event name.
    async fn find_by_event_name(&self, event_name: &str) -> Result<Vec<TriggerRecord>, TriggerError>;

    /// Gets all cron and interval triggers that need evaluation.
    async fn get_schedule_triggers(&self) -> Result<Vec<TriggerRecord>, TriggerError>;

    /// Reconciles triggers for a workflow (syncs from graph).
    ///
    /// This is called when a workflow is saved to ensure the trigger table
    /// matches the trigger nodes in the workflow graph.
    async fn reconcile(
        &self,
        workflow_id: WorkflowId,
        triggers: Vec<Trigger>,
    ) -> Result<ReconcileResult, TriggerError>;
}

/// Result of trigger reconciliation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReconcileResult {
    /// Number of triggers added.
    pub added: u32,
    /// Number of triggers updated.
    pub updated: u32,
    /// Number of triggers deleted.
    pub deleted: u32,
}

impl ReconcileResult {
    /// Returns whether any changes were made.
    #[must_use]
    pub fn has_changes(&self) -> bool {
        self.added > 0 || self.updated > 0 || self.deleted > 0
    }
}
