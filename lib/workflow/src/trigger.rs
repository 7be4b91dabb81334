//! Trigger types for workflow initiation.
//!
//! Triggers are denormalized to a separate table for efficient lookup by
//! the scheduler; they are not nodes in the workflow graph.

use crate::node::NodeId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use forgeline_core::{TriggerId, WorkflowId};

/// The type of trigger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TriggerType {
    /// Cron-expression scheduled trigger.
    Cron,
    /// Fixed-interval trigger.
    Interval,
    /// External event-bus trigger.
    Event,
    /// HTTP webhook trigger.
    Webhook,
    /// Manual trigger (user- or API-initiated).
    Manual,
}

/// The overlap policy for a trigger, governing what happens when a fire
/// occurs while a previous run of the same trigger is still active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OverlapPolicy {
    /// Concurrent runs are permitted.
    #[default]
    Allow,
    /// Drop this fire if the previous run is still active.
    Skip,
    /// Serialize fires behind a bounded queue; overflow drops the oldest.
    Queue,
}

/// Configuration for a trigger, stored in the denormalized triggers table.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum TriggerConfig {
    /// Cron-style scheduled trigger.
    Cron {
        /// Cron expression (e.g., "0 7 * * *" for 7am daily).
        expression: String,
        /// Timezone for the schedule.
        timezone: Option<String>,
        /// Next scheduled execution time (computed).
        next_run: Option<DateTime<Utc>>,
        /// Behavior for missed executions.
        missed_execution: MissedExecutionBehavior,
        /// Overlap policy for concurrent fires.
        overlap_policy: OverlapPolicy,
    },
    /// Fixed-interval trigger, firing every `period_ms` since its last fire.
    Interval {
        /// Period between fires, in milliseconds.
        period_ms: u64,
        /// Overlap policy for concurrent fires.
        overlap_policy: OverlapPolicy,
    },
    /// External event-bus trigger.
    Event {
        /// The event name this trigger listens for.
        event_name: String,
        /// Optional filter expression matched against the event payload.
        filter: Option<String>,
        /// Overlap policy for concurrent fires.
        overlap_policy: OverlapPolicy,
    },
    /// HTTP webhook trigger.
    Webhook {
        /// The webhook endpoint identifier (e.g., "/hooks/my-workflow").
        path: String,
        /// Optional secret for webhook validation.
        secret: Option<String>,
        /// Overlap policy for concurrent fires.
        overlap_policy: OverlapPolicy,
    },
    /// Manual trigger (user- or API-initiated).
    Manual,
}

/// Behavior when a scheduled execution is missed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MissedExecutionBehavior {
    /// Skip the missed execution.
    #[default]
    Skip,
    /// Run immediately when detected.
    RunImmediately,
    /// Run at the next scheduled window.
    RunAtNextWindow,
}

/// A denormalized trigger record for efficient lookup.
///
/// This is stored separately from the workflow graph for indexing.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Trigger {
    /// Unique identifier for this trigger.
    pub id: TriggerId,
    /// The workflow this trigger belongs to.
    pub workflow_id: WorkflowId,
    /// The node ID within the workflow graph.
    pub node_id: NodeId,
    /// Whether this trigger is currently enabled.
    pub enabled: bool,
    /// Trigger configuration.
    pub config: TriggerConfig,
    /// When this trigger was created.
    pub created_at: DateTime<Utc>,
    /// When this trigger was last updated.
    pub updated_at: DateTime<Utc>,
}

impl Trigger {
    /// Creates a new trigger.
    #[must_use]
    pub fn new(workflow_id: WorkflowId, node_id: NodeId, config: TriggerConfig) -> Self {
        let now = Utc::now();
        Self {
            id: TriggerId::new(),
            workflow_id,
            node_id,
            enabled: true,
            config,
            created_at: now,
            updated_at: now,
        }
    }

    /// Returns the trigger type.
    #[must_use]
    pub fn trigger_type(&self) -> TriggerType {
        match &self.config {
            TriggerConfig::Cron { .. } => TriggerType::Cron,
            TriggerConfig::Interval { .. } => TriggerType::Interval,
            TriggerConfig::Webhook { .. } => TriggerType::Webhook,
            TriggerConfig::Event { .. } => TriggerType::Event,
            TriggerConfig::Manual => TriggerType::Manual,
        }
    }

    /// Enables this trigger.
    pub fn enable(&mut self) {
        self.enabled = true;
        self.updated_at = Utc::now();
    }

    /// Disables this trigger.
    pub fn disable(&mut self) {
        self.enabled = false;
        self.updated_at = Utc::now();
    }
}
