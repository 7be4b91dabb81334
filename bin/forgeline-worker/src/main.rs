//! Worker process entry point.
//!
//! Wires the scheduler/sandbox/runtime crates together into the set of
//! operations §6 describes as external interfaces: submitting a workflow
//! definition and running it once, serving a workflow on a recurring cron
//! schedule, checking a run's status, and replaying the crash-recovery pass
//! on startup.

use clap::{Parser, Subcommand};
use forgeline_core::WorkflowRunId;
use forgeline_runtime::{
    run_recovery_pass, BreakerPolicy, CircuitBreakerRegistry, CoreConfig, CoreNodeExecutor,
    FilesystemEventStore, FilesystemObjectStore, QueueConfig, RetryingExecutor, RunCoordinator,
    WorkQueue,
};
use forgeline_sandbox::SandboxRuntime;
use forgeline_scheduler::{CronSchedule, FilesystemScheduleStore, ScheduleEvaluator, TriggerManager};
use forgeline_workflow::definition::Workflow;
use forgeline_workflow::node::NodeId;
use forgeline_workflow::trigger::{MissedExecutionBehavior, OverlapPolicy, Trigger, TriggerConfig};
use forgeline_workflow::{ErrorKind, RetryPolicy};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

#[derive(Parser)]
#[command(name = "forgeline-worker", version, about = "forgeline workflow execution worker")]
struct Cli {
    /// Optional config file, layered under environment overrides.
    #[arg(long, global = true)]
    config: Option<String>,
    /// Directory the state store reads and writes under.
    #[arg(long, global = true, default_value = "./forgeline-data")]
    store: PathBuf,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Validate and run a workflow definition (JSON) to completion.
    Run {
        /// Path to a serialized `Workflow` definition.
        workflow: PathBuf,
    },
    /// Register a cron trigger for a workflow and run it every time the
    /// schedule fires, until interrupted.
    Serve {
        /// Path to a serialized `Workflow` definition.
        workflow: PathBuf,
        /// Cron expression controlling when the workflow fires.
        #[arg(long)]
        cron: String,
        /// How often to poll for due executions, in milliseconds.
        #[arg(long, default_value_t = 1000)]
        poll_interval_ms: u64,
    },
    /// Scan the state store for runs orphaned by a worker crash.
    Recover,
    /// Print a run's current status projection.
    Status {
        /// A run id, e.g. `run_01hx...`.
        run_id: String,
    },
}

fn init_tracing() {
    use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .with(tracing_subscriber::fmt::layer())
        .init();
}

/// Builds a fresh sandbox-backed, retrying executor from `config` and drives
/// `workflow` through a [`RunCoordinator`] to completion.
///
/// A new [`FilesystemObjectStore`] and node executor are built per call
/// rather than shared, since neither holds state that needs to outlive a
/// single run.
async fn run_workflow(
    workflow: Workflow,
    config: &CoreConfig,
    store_root: &std::path::Path,
    events: FilesystemEventStore,
    queue: Arc<WorkQueue>,
) -> Result<WorkflowRunId, Box<dyn std::error::Error>> {
    workflow.graph.validate()?;
    tracing::info!(
        workflow = %workflow.metadata.name,
        nodes = workflow.graph.node_count(),
        "admitted workflow"
    );

    let objects = FilesystemObjectStore::new(store_root.join("objects")).await?;
    let sandbox = SandboxRuntime::new(
        config.max_process_parallelism as usize,
        Duration::from_millis(config.default_node_timeout_ms),
    );
    let executor = CoreNodeExecutor::new(sandbox, (&config.sandbox_caps_defaults).into());
    let breakers = Arc::new(CircuitBreakerRegistry::new(BreakerPolicy {
        failure_threshold: config.breaker_failure_threshold,
        open_duration_ms: config.breaker_open_duration_ms,
        half_open_probes: 1,
    }));
    let retrying = RetryingExecutor::new(
        executor,
        breakers,
        0.1,
        vec![
            ErrorKind::Transient,
            ErrorKind::CircuitOpen,
            ErrorKind::Infrastructure,
            ErrorKind::TimedOut,
        ],
        RetryPolicy {
            max_attempts: config.retry_defaults.max_attempts,
            initial_backoff_ms: config.retry_defaults.initial_backoff_ms,
            backoff_multiplier: config.retry_defaults.backoff_multiplier,
            max_backoff_ms: config.retry_defaults.max_backoff_ms,
        },
    );

    let mut coordinator = RunCoordinator::new(workflow, events, objects, retrying, queue);
    Ok(coordinator.run_to_completion().await?)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    init_tracing();

    let cli = Cli::parse();
    let config = CoreConfig::load(cli.config.as_deref())?;
    tracing::info!(parallelism = config.per_run_default_parallelism, "loaded configuration");

    let queue = Arc::new(WorkQueue::new(QueueConfig {
        capacity: config.queue_capacity,
        overflow: config.queue_full_policy.into(),
    }));
    let events = FilesystemEventStore::new(cli.store.join("events"), queue.clone()).await?;

    match cli.command {
        Command::Run { workflow } => {
            let bytes = tokio::fs::read(&workflow).await?;
            let workflow: Workflow = serde_json::from_slice(&bytes)?;
            let run_id = run_workflow(workflow, &config, &cli.store, events, queue).await?;
            println!("run {run_id} finished");
        }
        Command::Serve { workflow, cron, poll_interval_ms } => {
            let bytes = tokio::fs::read(&workflow).await?;
            let workflow: Workflow = serde_json::from_slice(&bytes)?;
            workflow.graph.validate()?;

            let schedule = CronSchedule::new(cron.clone());
            schedule.validate()?;

            let scheduler = FilesystemScheduleStore::new(cli.store.join("scheduler")).await?;
            let trigger = Trigger::new(
                workflow.id,
                NodeId::new(),
                TriggerConfig::Cron {
                    expression: cron.clone(),
                    timezone: None,
                    next_run: None,
                    missed_execution: MissedExecutionBehavior::Skip,
                    overlap_policy: OverlapPolicy::Skip,
                },
            );
            let trigger_id = trigger.id;
            scheduler.register(trigger).await?;
            scheduler.schedule_next(trigger_id, workflow.id, &schedule).await?;

            tracing::info!(workflow = %workflow.metadata.name, cron = %cron, "serving workflow on schedule");

            loop {
                scheduler
                    .handle_missed_executions(trigger_id, MissedExecutionBehavior::Skip)
                    .await?;

                for mut execution in scheduler.get_ready_executions().await? {
                    execution.start();
                    scheduler.update_execution(execution.clone()).await?;

                    let outcome =
                        run_workflow(workflow.clone(), &config, &cli.store, events.clone(), queue.clone())
                            .await;
                    match outcome {
                        Ok(run_id) => {
                            tracing::info!(%run_id, "scheduled fire completed");
                            execution.complete();
                        }
                        Err(e) => {
                            tracing::warn!(error = %e, "scheduled fire failed");
                            execution.fail();
                        }
                    }
                    scheduler.update_execution(execution).await?;
                    scheduler.schedule_next(trigger_id, workflow.id, &schedule).await?;
                }

                tokio::time::sleep(Duration::from_millis(poll_interval_ms)).await;
            }
        }
        Command::Recover => {
            let report = run_recovery_pass(&events).await?;
            println!("resumed {} run(s), marked {} failed", report.resumed.len(), report.failed.len());
        }
        Command::Status { run_id } => {
            let run_id: WorkflowRunId = run_id.parse()?;
            let status = events.read_status(run_id).await?;
            println!("{}", serde_json::to_string_pretty(&status)?);
        }
    }

    Ok(())
}
