//! Execution runtime for forgeline workflows.
//!
//! This crate provides:
//!
//! - **Circuit breaker**: per-dependency admission state (C5)
//! - **Dispatch**: retry-with-backoff wrapper around a `NodeExecutor` (C5)
//! - **State store**: filesystem-backed event log and object store (C6)
//! - **Work queue**: bounded, priority-laned, overflow-aware queue (C8)
//! - **Recovery**: crash-recovery pass over stale runs (C9)
//! - **Coordinator**: drives a single run to completion (C9)
//! - **Executor**: the production `NodeExecutor` (sandboxed scripts, native modules)
//! - **Config**: process-wide configuration (§6)

pub mod circuit_breaker;
pub mod config;
pub mod coordinator;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod recovery;
pub mod state_store;
pub mod work_queue;

pub use circuit_breaker::{Admission, BreakerPolicy, BreakerState, CircuitBreakerRegistry};
pub use config::{CoreConfig, QueueFullPolicyConfig, SandboxCapsConfig};
pub use coordinator::{CancellationToken, RunCoordinator};
pub use dispatch::{breaker_key, RetryingExecutor};
pub use error::{DispatchError, QueueError, StoreError};
pub use executor::{CoreNodeExecutor, NativeModule};
pub use recovery::{run_recovery_pass, RecoveryOutcome, RecoveryReport};
pub use state_store::{FilesystemEventStore, FilesystemObjectStore, RunStatusRecord, RunStatusTracking};
pub use work_queue::{OverflowPolicy, Priority, QueueConfig, WorkQueue};
