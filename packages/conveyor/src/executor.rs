//! The in-memory unit of work.
//!
//! A [`TaskExecutor`] carries one task from dispatch through scheduling into
//! a worker. It holds the serialized request plus everything needed to run
//! it; in lazy mode the handler reference is dropped and rebuilt from the
//! registry at execution time.

use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use uuid::Uuid;

use crate::handler::ErasedHandler;
use crate::recurring::RecurringTask;
use crate::task::{AuditLevel, QueuedTask, TaskStatus};

/// Well-known queue names, pre-configured on every engine.
pub const DEFAULT_QUEUE: &str = "default";
pub const HIGH_PRIORITY_QUEUE: &str = "high-priority";
pub const BACKGROUND_QUEUE: &str = "background";
pub const RECURRING_QUEUE: &str = "recurring";

#[derive(Clone)]
pub struct TaskExecutor {
    pub persistence_id: Uuid,
    pub request_json: String,
    pub request_type: String,
    pub handler_type: String,
    /// Absolute due instant; `None` means immediate.
    pub execution_time: Option<DateTime<Utc>>,
    pub recurring: Option<RecurringTask>,
    pub queue_name: Option<String>,
    /// The materialised handler, or `None` in lazy mode.
    pub handler: Option<Arc<dyn ErasedHandler>>,
    pub task_key: Option<String>,
    pub audit_level: AuditLevel,
}

impl TaskExecutor {
    pub fn is_lazy(&self) -> bool {
        self.handler.is_none()
    }

    /// Drop the handler reference for lazy routing.
    ///
    /// The abandoned instance must not have `dispose` invoked: its dispose
    /// contract presumes an execution that never happened.
    pub fn make_lazy(&mut self) {
        self.handler = None;
    }

    /// The queue this executor routes to.
    pub fn resolved_queue_name(&self) -> &str {
        match &self.queue_name {
            Some(name) => name,
            None if self.recurring.is_some() => RECURRING_QUEUE,
            None => DEFAULT_QUEUE,
        }
    }

    /// Build the persisted row for this executor.
    pub fn to_queued_task(&self, now: DateTime<Utc>) -> Result<QueuedTask> {
        let (recurring_task, recurring_info, max_runs, run_until) = match &self.recurring {
            Some(cfg) => (
                Some(serde_json::to_string(cfg).context("serializing recurring configuration")?),
                Some(cfg.describe()),
                cfg.max_runs,
                cfg.run_until,
            ),
            None => (None, None, None, None),
        };

        Ok(QueuedTask {
            id: self.persistence_id,
            request_type: self.request_type.clone(),
            handler_type: self.handler_type.clone(),
            status: TaskStatus::WaitingQueue,
            created_at_utc: now,
            last_execution_utc: None,
            scheduled_execution_utc: self.execution_time,
            next_run_utc: self.execution_time,
            request: self.request_json.clone(),
            exception: None,
            is_recurring: self.recurring.is_some(),
            recurring_task,
            recurring_info,
            current_run_count: 0,
            max_runs,
            run_until,
            queue_name: self.queue_name.clone(),
            task_key: self.task_key.clone(),
            audit_level: self.audit_level,
        })
    }

    /// Rebuild an executor from a persisted row, in lazy mode.
    ///
    /// Used by recovery; the handler is resolved from the registry when the
    /// task reaches a worker.
    pub fn from_queued_task(task: &QueuedTask) -> Result<Self> {
        let recurring = match &task.recurring_task {
            Some(json) => Some(
                serde_json::from_str::<RecurringTask>(json)
                    .map_err(|e| anyhow!("invalid recurring configuration for task {}: {e}", task.id))?,
            ),
            None => None,
        };

        Ok(Self {
            persistence_id: task.id,
            request_json: task.request.clone(),
            request_type: task.request_type.clone(),
            handler_type: task.handler_type.clone(),
            execution_time: task.next_run_utc.or(task.scheduled_execution_utc),
            recurring,
            queue_name: task.queue_name.clone(),
            handler: None,
            task_key: task.task_key.clone(),
            audit_level: task.audit_level,
        })
    }
}

impl std::fmt::Debug for TaskExecutor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskExecutor")
            .field("persistence_id", &self.persistence_id)
            .field("request_type", &self.request_type)
            .field("execution_time", &self.execution_time)
            .field("recurring", &self.recurring.is_some())
            .field("queue_name", &self.queue_name)
            .field("lazy", &self.is_lazy())
            .finish()
    }
}
