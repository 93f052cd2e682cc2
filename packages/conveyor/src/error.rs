//! Structured error types for the engine.
//!
//! [`DispatchError`] provides pattern-matchable errors at the dispatch
//! boundary instead of generic `anyhow::Error`. [`ExecutionError`]
//! classifies how a single execution ended; the worker maps it onto a
//! final status and audit rows.
//!
//! Handlers themselves return `anyhow::Result<()>`; `anyhow` is the
//! internal transport, the typed enums are the externalized surface.

use std::time::Duration;

use thiserror::Error;
use uuid::Uuid;

/// Errors surfaced by the dispatch API.
#[derive(Debug, Error)]
pub enum DispatchError {
    /// Dispatch was called with an empty request type.
    #[error("cannot dispatch an empty task request")]
    NullTask,

    /// The recurring configuration produced no next run at dispatch time.
    #[error("recurring configuration for task {task_id} yields no next run")]
    InvalidRecurring { task_id: Uuid },

    /// No handler is registered for the request type.
    #[error("no handler registered for request type {request_type}")]
    HandlerNotRegistered { request_type: String },

    /// The storage write failed and the engine is configured to propagate.
    #[error("failed to persist task {task_id}: {source}")]
    PersistenceFailed {
        task_id: Uuid,
        source: anyhow::Error,
    },

    /// The target queue is full and its policy is `Drop`.
    #[error("queue {queue} is full")]
    QueueFull { queue: String },

    /// The referenced task does not exist in storage.
    #[error("task {task_id} not found")]
    TaskNotFound { task_id: Uuid },

    /// The engine is shutting down and no longer accepts work.
    #[error("engine is shutting down")]
    ServiceStopping,

    /// Request payload serialization failed.
    #[error("failed to serialize request of type {request_type}")]
    Serialization {
        request_type: String,
        #[source]
        source: serde_json::Error,
    },
}

/// How a single task execution ended, short of success.
#[derive(Debug, Error)]
pub enum ExecutionError {
    /// The handler returned an error on every attempt the policy allowed.
    #[error("handler failed after {attempts} attempt(s): {source}")]
    HandlerFailed {
        attempts: u32,
        source: anyhow::Error,
    },

    /// An attempt exceeded the handler's configured timeout.
    #[error("handler timed out after {timeout:?} on attempt {attempt}")]
    Timeout { attempt: u32, timeout: Duration },

    /// The task was cancelled through the public `cancel` operation.
    #[error("task was cancelled by the user")]
    UserCancelled,

    /// The host shut down while the task was in flight.
    #[error("service stopped while the task was in flight")]
    ServiceStopping,
}

impl ExecutionError {
    /// Whether this outcome was a cancellation rather than a failure.
    pub fn is_cancellation(&self) -> bool {
        matches!(
            self,
            ExecutionError::UserCancelled | ExecutionError::ServiceStopping
        )
    }
}

/// Render an error and its source chain as a multi-line string for storage.
///
/// Persisted exceptions are diagnostic only; they are never rethrown.
pub fn render_error_chain(error: &anyhow::Error) -> String {
    let mut out = format!("{error}");
    for (depth, cause) in error.chain().skip(1).enumerate() {
        out.push_str(&format!("\n  caused by [{depth}]: {cause}"));
    }
    out
}
