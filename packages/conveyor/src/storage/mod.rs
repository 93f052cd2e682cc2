//! Storage contract for persisted tasks, audits and execution logs.
//!
//! The engine consumes this trait; hosts supply the backend (relational,
//! embedded file, …). The crate ships [`InMemoryTaskStore`] as the default
//! and reference implementation.
//!
//! Guarantees the engine assumes:
//! - every write is durable before the call returns;
//! - predicates evaluate against the whole store;
//! - [`TaskStore::retrieve_pending`] is stable under concurrent writes:
//!   keyset pagination ordered by `(created_at_utc, id)`.

mod memory;

pub use memory::InMemoryTaskStore;

use anyhow::Result;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::task::{AuditLevel, LogLevel, QueuedTask, RunsAudit, TaskExecutionLog, TaskStatus};

/// Predicate over persisted tasks, object-safe for trait methods.
pub type TaskPredicate<'a> = &'a (dyn Fn(&QueuedTask) -> bool + Send + Sync);

/// Persistence operations the engine relies on.
#[async_trait]
pub trait TaskStore: Send + Sync {
    /// Insert a new task row.
    async fn persist(&self, task: QueuedTask) -> Result<()>;

    /// Replace an existing row in place (task-key update path).
    async fn update_task(&self, task: QueuedTask) -> Result<()>;

    async fn get_by_id(&self, id: Uuid) -> Result<Option<QueuedTask>>;

    /// Look a task up by its deduplication key.
    async fn get_by_task_key(&self, key: &str) -> Result<Option<QueuedTask>>;

    async fn get(&self, predicate: TaskPredicate<'_>) -> Result<Vec<QueuedTask>>;

    async fn get_all(&self) -> Result<Vec<QueuedTask>>;

    /// Remove a task and, by cascade, its audit and log rows.
    async fn remove(&self, id: Uuid) -> Result<()>;

    /// Keyset page of unfinished work: statuses {Queued, Pending,
    /// ServiceStopped, InProgress} within their run bounds, ordered by
    /// `(created_at_utc, id)`, strictly after the cursor.
    async fn retrieve_pending(
        &self,
        last_created_at: Option<DateTime<Utc>>,
        last_id: Option<Uuid>,
        take: usize,
    ) -> Result<Vec<QueuedTask>>;

    /// Transition status, storing the exception and appending a
    /// [`crate::task::StatusAudit`] row when the level records it.
    async fn set_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        exception: Option<String>,
        audit_level: AuditLevel,
    ) -> Result<()>;

    async fn set_cancelled_by_user(&self, id: Uuid) -> Result<()>;

    /// Mark a task interrupted by shutdown, keeping the diagnostic string.
    async fn set_cancelled_by_service(&self, id: Uuid, exception: String) -> Result<()>;

    async fn set_queued(&self, id: Uuid) -> Result<()>;

    async fn set_in_progress(&self, id: Uuid) -> Result<()>;

    async fn set_completed(&self, id: Uuid) -> Result<()>;

    /// Record one finished run: updates `last_execution_utc` and appends a
    /// [`RunsAudit`] row when the level records it.
    async fn record_run(&self, id: Uuid, run: RunsAudit, audit_level: AuditLevel) -> Result<()>;

    /// Advance a recurring task: bump `current_run_count`, set the next run.
    async fn update_current_run(
        &self,
        id: Uuid,
        next_run_utc: Option<DateTime<Utc>>,
        audit_level: AuditLevel,
    ) -> Result<()>;

    async fn get_current_run_count(&self, id: Uuid) -> Result<u32>;

    /// Batched write of captured execution logs.
    async fn save_execution_logs(&self, task_id: Uuid, logs: Vec<TaskExecutionLog>) -> Result<()>;

    async fn get_execution_logs(
        &self,
        task_id: Uuid,
        skip: usize,
        take: usize,
        level_filter: Option<LogLevel>,
    ) -> Result<Vec<TaskExecutionLog>>;
}

/// Factory the host implements to supply its own storage backend.
pub trait TaskStoreFactory: Send + Sync {
    fn create_store(&self) -> Result<Arc<dyn TaskStore>>;
}

/// Factory for the built-in in-memory store.
#[derive(Debug, Clone, Copy, Default)]
pub struct InMemoryTaskStoreFactory;

impl TaskStoreFactory for InMemoryTaskStoreFactory {
    fn create_store(&self) -> Result<Arc<dyn TaskStore>> {
        Ok(Arc::new(InMemoryTaskStore::new()))
    }
}

/// Statuses the recovery scan considers unfinished.
pub fn is_recoverable_status(status: TaskStatus) -> bool {
    matches!(
        status,
        TaskStatus::Queued | TaskStatus::Pending | TaskStatus::ServiceStopped | TaskStatus::InProgress
    )
}
