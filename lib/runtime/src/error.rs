//! Crate-local error types for the execution engine, retry/breaker layer,
//! and durability components.

use forgeline_workflow::ErrorKind;

/// Errors from the filesystem-backed event/object store (C6).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// The run directory or file could not be created or written.
    Io { detail: String },
    /// A stored record failed to (de)serialize.
    Codec { detail: String },
    /// The requested run or key does not exist in the store.
    NotFound { detail: String },
}

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Io { detail } => write!(f, "store io error: {detail}"),
            Self::Codec { detail } => write!(f, "store codec error: {detail}"),
            Self::NotFound { detail } => write!(f, "store record not found: {detail}"),
        }
    }
}

impl std::error::Error for StoreError {}

impl StoreError {
    /// Classifies this error per §7.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Io { .. } | Self::Codec { .. } => ErrorKind::Infrastructure,
            Self::NotFound { .. } => ErrorKind::Permanent,
        }
    }
}

/// Errors from the bounded work queue (C8).
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum QueueError {
    /// The queue was full and the caller's `block-caller` wait timed out.
    EnqueueTimedOut,
    /// The queue was full and its overflow policy is `drop-newest` or
    /// `drop-oldest`; the caller's item (or a displaced one) was dropped.
    Dropped { detail: String },
}

impl std::fmt::Display for QueueError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EnqueueTimedOut => write!(f, "enqueue timed out waiting for queue capacity"),
            Self::Dropped { detail } => write!(f, "request dropped: {detail}"),
        }
    }
}

impl std::error::Error for QueueError {}

impl QueueError {
    /// Classifies this error per §7.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::EnqueueTimedOut => ErrorKind::TimedOut,
            Self::Dropped { .. } => ErrorKind::Infrastructure,
        }
    }
}

/// Errors surfaced by the retry/circuit-breaker dispatch layer (C5).
#[derive(Debug, Clone, PartialEq)]
pub enum DispatchError {
    /// The breaker for this key is open; the call was rejected without
    /// invoking the executor.
    CircuitOpen { breaker_key: String },
    /// The underlying node executor reported a failure, wrapped with the
    /// kind the retry policy classified it under.
    ExecutorFailed { message: String, kind: ErrorKind },
    /// Every permitted attempt was exhausted.
    RetriesExhausted { attempts: u32, last_error: String },
}

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CircuitOpen { breaker_key } => {
                write!(f, "circuit open for breaker key {breaker_key}")
            }
            Self::ExecutorFailed { message, .. } => write!(f, "executor failed: {message}"),
            Self::RetriesExhausted { attempts, last_error } => {
                write!(f, "retries exhausted after {attempts} attempts: {last_error}")
            }
        }
    }
}

impl std::error::Error for DispatchError {}

impl DispatchError {
    /// Classifies this error per §7.
    #[must_use]
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::CircuitOpen { .. } => ErrorKind::CircuitOpen,
            Self::ExecutorFailed { kind, .. } => *kind,
            Self::RetriesExhausted { .. } => ErrorKind::Permanent,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_not_found_is_permanent() {
        let err = StoreError::NotFound { detail: "run_01".to_string() };
        assert_eq!(err.kind(), ErrorKind::Permanent);
    }

    #[test]
    fn queue_timeout_is_timed_out() {
        assert_eq!(QueueError::EnqueueTimedOut.kind(), ErrorKind::TimedOut);
    }

    #[test]
    fn dispatch_circuit_open_kind() {
        let err = DispatchError::CircuitOpen { breaker_key: "http:example".to_string() };
        assert_eq!(err.kind(), ErrorKind::CircuitOpen);
    }
}
