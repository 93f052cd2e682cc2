//! In-memory task store.
//!
//! Default backend and reference implementation of the storage contract.
//! Everything lives behind one small mutex; no lock is held across an await.
//! Useful in production for hosts that accept losing queued work on restart,
//! and in tests for asserting on audit trails.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{is_recoverable_status, TaskPredicate, TaskStore};
use crate::ids::{IdGenerator, TimeOrderedIdGenerator};
use crate::task::{
    AuditLevel, LogLevel, QueuedTask, RunsAudit, StatusAudit, TaskExecutionLog, TaskStatus,
};

#[derive(Default)]
struct StoreInner {
    tasks: HashMap<Uuid, QueuedTask>,
    status_audits: Vec<StatusAudit>,
    runs_audits: Vec<RunsAudit>,
    logs: HashMap<Uuid, Vec<TaskExecutionLog>>,
}

pub struct InMemoryTaskStore {
    inner: Mutex<StoreInner>,
    ids: Arc<dyn IdGenerator>,
}

impl InMemoryTaskStore {
    pub fn new() -> Self {
        Self::with_id_generator(Arc::new(TimeOrderedIdGenerator))
    }

    pub fn with_id_generator(ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            inner: Mutex::new(StoreInner::default()),
            ids,
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Status audit rows for one task, insertion-ordered. Test inspection.
    pub fn status_audits_for(&self, task_id: Uuid) -> Vec<StatusAudit> {
        self.lock()
            .status_audits
            .iter()
            .filter(|a| a.queued_task_id == task_id)
            .cloned()
            .collect()
    }

    /// Run audit rows for one task, insertion-ordered. Test inspection.
    pub fn runs_audits_for(&self, task_id: Uuid) -> Vec<RunsAudit> {
        self.lock()
            .runs_audits
            .iter()
            .filter(|a| a.queued_task_id == task_id)
            .cloned()
            .collect()
    }

    pub fn task_count(&self) -> usize {
        self.lock().tasks.len()
    }

    fn transition(
        &self,
        id: Uuid,
        status: TaskStatus,
        exception: Option<String>,
        audit_level: Option<AuditLevel>,
    ) -> Result<()> {
        let mut inner = self.lock();
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| anyhow!("task {id} not found"))?;
        task.status = status;
        if exception.is_some() {
            task.exception = exception.clone();
        }
        // Terminal tasks have no next run; ServiceStopped keeps it so
        // recovery can re-schedule after restart.
        if status.is_terminal() && status != TaskStatus::ServiceStopped {
            task.next_run_utc = None;
        }
        let level = audit_level.unwrap_or(task.audit_level);
        if level.records_status(status) {
            let audit = StatusAudit {
                id: self.ids.next_id(),
                queued_task_id: id,
                updated_at_utc: Utc::now(),
                new_status: status,
                exception,
            };
            inner.status_audits.push(audit);
        }
        Ok(())
    }
}

impl Default for InMemoryTaskStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl TaskStore for InMemoryTaskStore {
    async fn persist(&self, task: QueuedTask) -> Result<()> {
        let mut inner = self.lock();
        if inner.tasks.contains_key(&task.id) {
            return Err(anyhow!("task {} already exists", task.id));
        }
        let level = task.audit_level;
        let status = task.status;
        let id = task.id;
        inner.tasks.insert(id, task);
        if level.records_status(status) {
            let audit = StatusAudit {
                id: self.ids.next_id(),
                queued_task_id: id,
                updated_at_utc: Utc::now(),
                new_status: status,
                exception: None,
            };
            inner.status_audits.push(audit);
        }
        Ok(())
    }

    async fn update_task(&self, task: QueuedTask) -> Result<()> {
        let mut inner = self.lock();
        if !inner.tasks.contains_key(&task.id) {
            return Err(anyhow!("task {} not found", task.id));
        }
        inner.tasks.insert(task.id, task);
        Ok(())
    }

    async fn get_by_id(&self, id: Uuid) -> Result<Option<QueuedTask>> {
        Ok(self.lock().tasks.get(&id).cloned())
    }

    async fn get_by_task_key(&self, key: &str) -> Result<Option<QueuedTask>> {
        Ok(self
            .lock()
            .tasks
            .values()
            .find(|t| t.task_key.as_deref() == Some(key))
            .cloned())
    }

    async fn get(&self, predicate: TaskPredicate<'_>) -> Result<Vec<QueuedTask>> {
        Ok(self
            .lock()
            .tasks
            .values()
            .filter(|t| predicate(t))
            .cloned()
            .collect())
    }

    async fn get_all(&self) -> Result<Vec<QueuedTask>> {
        Ok(self.lock().tasks.values().cloned().collect())
    }

    async fn remove(&self, id: Uuid) -> Result<()> {
        let mut inner = self.lock();
        inner.tasks.remove(&id);
        // Cascade: audit and log rows belong to the task.
        inner.status_audits.retain(|a| a.queued_task_id != id);
        inner.runs_audits.retain(|a| a.queued_task_id != id);
        inner.logs.remove(&id);
        Ok(())
    }

    async fn retrieve_pending(
        &self,
        last_created_at: Option<DateTime<Utc>>,
        last_id: Option<Uuid>,
        take: usize,
    ) -> Result<Vec<QueuedTask>> {
        let now = Utc::now();
        let mut page: Vec<QueuedTask> = self
            .lock()
            .tasks
            .values()
            .filter(|t| is_recoverable_status(t.status))
            .filter(|t| t.within_run_bounds(now))
            .filter(|t| match (last_created_at, last_id) {
                (Some(created), Some(id)) => {
                    (t.created_at_utc, t.id) > (created, id)
                }
                (Some(created), None) => t.created_at_utc > created,
                _ => true,
            })
            .cloned()
            .collect();
        page.sort_by_key(|t| (t.created_at_utc, t.id));
        page.truncate(take);
        Ok(page)
    }

    async fn set_status(
        &self,
        id: Uuid,
        status: TaskStatus,
        exception: Option<String>,
        audit_level: AuditLevel,
    ) -> Result<()> {
        self.transition(id, status, exception, Some(audit_level))
    }

    async fn set_cancelled_by_user(&self, id: Uuid) -> Result<()> {
        self.transition(id, TaskStatus::Cancelled, None, None)
    }

    async fn set_cancelled_by_service(&self, id: Uuid, exception: String) -> Result<()> {
        self.transition(id, TaskStatus::ServiceStopped, Some(exception), None)
    }

    async fn set_queued(&self, id: Uuid) -> Result<()> {
        self.transition(id, TaskStatus::Queued, None, None)
    }

    async fn set_in_progress(&self, id: Uuid) -> Result<()> {
        self.transition(id, TaskStatus::InProgress, None, None)
    }

    async fn set_completed(&self, id: Uuid) -> Result<()> {
        self.transition(id, TaskStatus::Completed, None, None)
    }

    async fn record_run(&self, id: Uuid, run: RunsAudit, audit_level: AuditLevel) -> Result<()> {
        let mut inner = self.lock();
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| anyhow!("task {id} not found"))?;
        task.last_execution_utc = Some(run.executed_at);
        let succeeded = !matches!(run.status, TaskStatus::Failed);
        if audit_level.records_run(succeeded) {
            inner.runs_audits.push(run);
        }
        Ok(())
    }

    async fn update_current_run(
        &self,
        id: Uuid,
        next_run_utc: Option<DateTime<Utc>>,
        _audit_level: AuditLevel,
    ) -> Result<()> {
        let mut inner = self.lock();
        let task = inner
            .tasks
            .get_mut(&id)
            .ok_or_else(|| anyhow!("task {id} not found"))?;
        task.current_run_count += 1;
        task.next_run_utc = next_run_utc;
        Ok(())
    }

    async fn get_current_run_count(&self, id: Uuid) -> Result<u32> {
        self.lock()
            .tasks
            .get(&id)
            .map(|t| t.current_run_count)
            .ok_or_else(|| anyhow!("task {id} not found"))
    }

    async fn save_execution_logs(&self, task_id: Uuid, logs: Vec<TaskExecutionLog>) -> Result<()> {
        if logs.is_empty() {
            return Ok(());
        }
        let mut inner = self.lock();
        let entry = inner.logs.entry(task_id).or_default();
        entry.extend(logs);
        entry.sort_by_key(|l| l.sequence_number);
        Ok(())
    }

    async fn get_execution_logs(
        &self,
        task_id: Uuid,
        skip: usize,
        take: usize,
        level_filter: Option<LogLevel>,
    ) -> Result<Vec<TaskExecutionLog>> {
        Ok(self
            .lock()
            .logs
            .get(&task_id)
            .map(|logs| {
                logs.iter()
                    .filter(|l| level_filter.map_or(true, |min| l.level >= min))
                    .skip(skip)
                    .take(take)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}
