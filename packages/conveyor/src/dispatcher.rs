//! Public dispatch surface.
//!
//! The dispatcher is the engine's entry point: it resolves the handler for
//! a typed request, resolves the task key against storage, computes the
//! first run for recurring work, persists the row, decides lazy-vs-eager
//! materialisation and routes the executor (scheduler for future work,
//! queue manager for due work).

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cancellation::CancellationRegistry;
use crate::error::DispatchError;
use crate::events::{EventBus, TaskEventData};
use crate::executor::TaskExecutor;
use crate::ids::IdGenerator;
use crate::queue::QueueManager;
use crate::recurring::RecurringTask;
use crate::registry::HandlerRegistry;
use crate::scheduler::Scheduler;
use crate::storage::TaskStore;
use crate::task::{QueuedTask, TaskStatus};

/// Recurring tasks resolve lazily when every interval is at least this long.
const LAZY_MIN_RECURRING_INTERVAL: Duration = Duration::from_secs(5 * 60);
/// Delayed tasks resolve lazily from this delay on; shorter delays keep the
/// eager instance, longer ones should not pin a handler graph for hours.
const LAZY_MIN_DELAY: Duration = Duration::from_secs(30 * 60);

/// When a dispatched task should run.
#[derive(Debug, Clone)]
pub enum RunSchedule {
    Immediate,
    After(Duration),
    At(DateTime<Utc>),
    Recurring(RecurringTask),
}

pub(crate) struct DispatcherShared {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) queues: Arc<QueueManager>,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) cancellations: Arc<CancellationRegistry>,
    pub(crate) events: EventBus,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) host: CancellationToken,
    pub(crate) throw_if_unable_to_persist: bool,
    pub(crate) use_lazy_handler_resolution: bool,
    pub(crate) default_audit_level: crate::task::AuditLevel,
}

/// The engine's public dispatch API. Cheap to clone.
#[derive(Clone)]
pub struct Dispatcher {
    shared: Arc<DispatcherShared>,
}

impl Dispatcher {
    pub(crate) fn new(shared: Arc<DispatcherShared>) -> Self {
        Self { shared }
    }

    /// Dispatch for immediate execution.
    pub async fn dispatch<R>(&self, request: R) -> Result<Uuid, DispatchError>
    where
        R: Serialize + Send + 'static,
    {
        self.dispatch_with(request, RunSchedule::Immediate, None)
            .await
    }

    /// Dispatch after a relative delay.
    pub async fn dispatch_after<R>(&self, request: R, delay: Duration) -> Result<Uuid, DispatchError>
    where
        R: Serialize + Send + 'static,
    {
        self.dispatch_with(request, RunSchedule::After(delay), None)
            .await
    }

    /// Dispatch at an absolute instant.
    pub async fn dispatch_at<R>(
        &self,
        request: R,
        at: DateTime<Utc>,
    ) -> Result<Uuid, DispatchError>
    where
        R: Serialize + Send + 'static,
    {
        self.dispatch_with(request, RunSchedule::At(at), None).await
    }

    /// Dispatch on a recurring cadence.
    pub async fn dispatch_recurring<R>(
        &self,
        request: R,
        recurring: RecurringTask,
    ) -> Result<Uuid, DispatchError>
    where
        R: Serialize + Send + 'static,
    {
        self.dispatch_with(request, RunSchedule::Recurring(recurring), None)
            .await
    }

    /// Full dispatch: schedule plus an optional deduplication key.
    ///
    /// With a task key, at most one non-terminal task exists per key: a
    /// terminal task under the key is deleted and replaced, an in-progress
    /// one wins (its id is returned unchanged), and a waiting one is updated
    /// in place, keeping its id.
    pub async fn dispatch_with<R>(
        &self,
        request: R,
        schedule: RunSchedule,
        task_key: Option<String>,
    ) -> Result<Uuid, DispatchError>
    where
        R: Serialize + Send + 'static,
    {
        let shared = &self.shared;
        if shared.host.is_cancelled() {
            return Err(DispatchError::ServiceStopping);
        }

        let request_type = std::any::type_name::<R>();
        let registration =
            shared
                .registry
                .resolve(request_type)
                .ok_or_else(|| DispatchError::HandlerNotRegistered {
                    request_type: request_type.to_string(),
                })?;

        let request_json =
            serde_json::to_string(&request).map_err(|source| DispatchError::Serialization {
                request_type: request_type.to_string(),
                source,
            })?;
        if request_json == "null" {
            return Err(DispatchError::NullTask);
        }

        let now = Utc::now();

        // Task-key resolution against storage.
        let mut adopted: Option<QueuedTask> = None;
        if let Some(key) = &task_key {
            match shared.store.get_by_task_key(key).await {
                Ok(Some(existing)) if existing.status.is_terminal() => {
                    if let Err(error) = shared.store.remove(existing.id).await {
                        tracing::warn!(task_key = %key, error = %error, "failed to remove finished task under key");
                    }
                }
                Ok(Some(existing)) if existing.status == TaskStatus::InProgress => {
                    tracing::debug!(task_key = %key, task_id = %existing.id, "task key held by in-progress task");
                    return Ok(existing.id);
                }
                Ok(Some(existing)) => adopted = Some(existing),
                Ok(None) => {}
                Err(error) => {
                    tracing::warn!(task_key = %key, error = %error, "task key lookup failed, dispatching as new");
                }
            }
        }

        let current_run = adopted.as_ref().map_or(0, |t| t.current_run_count);
        let task_id = adopted
            .as_ref()
            .map_or_else(|| shared.ids.next_id(), |t| t.id);

        let (execution_time, recurring) = match schedule {
            RunSchedule::Immediate => (None, None),
            RunSchedule::After(delay) => {
                let delay = TimeDelta::from_std(delay).unwrap_or(TimeDelta::MAX);
                (Some(now + delay), None)
            }
            RunSchedule::At(at) => (Some(at), None),
            RunSchedule::Recurring(config) => {
                // The same instant goes in as both scheduled and reference
                // so millisecond drift cannot elide a run-now.
                let next = config
                    .next_valid_run(Some(now), current_run, now)
                    .ok_or(DispatchError::InvalidRecurring { task_id })?;
                (Some(next), Some(config))
            }
        };

        // Eager materialisation; the instance also supplies routing config.
        let handler = registration.materialize();
        let mut executor = TaskExecutor {
            persistence_id: task_id,
            request_json,
            request_type: request_type.to_string(),
            handler_type: registration.handler_type().to_string(),
            execution_time,
            recurring,
            queue_name: handler.queue_name(),
            handler: Some(handler),
            task_key,
            audit_level: shared.default_audit_level,
        };

        self.persist(&executor, adopted, now).await?;

        if self.should_resolve_lazily(&executor, now) {
            // The eager instance is abandoned, not disposed: its dispose
            // contract presumes an execution that never happened.
            executor.make_lazy();
        }

        let audit_level = executor.audit_level;
        let due_in_future = executor.execution_time.map_or(false, |t| t > now);
        if executor.recurring.is_some() || due_in_future {
            let next = executor.execution_time.unwrap_or(now);
            if let Err(error) = shared
                .store
                .set_status(task_id, TaskStatus::Pending, None, audit_level)
                .await
            {
                tracing::warn!(task_id = %task_id, error = %error, "failed to mark task pending");
            }
            shared.scheduler.schedule(executor, Some(next));
        } else {
            // Queued before the handoff: a full queue under `Drop` leaves
            // the row in Queued state for recovery to replay.
            if let Err(error) = shared.store.set_queued(task_id).await {
                tracing::warn!(task_id = %task_id, error = %error, "failed to mark task queued");
            }
            shared.queues.enqueue(executor).await?;
        }

        Ok(task_id)
    }

    /// Cooperatively cancel a scheduled or running task.
    ///
    /// Sets the persisted status, trips the per-task token and blacklists
    /// the id so a worker that has already dequeued the executor discards
    /// it before execution.
    pub async fn cancel(&self, task_id: Uuid) -> Result<(), DispatchError> {
        let shared = &self.shared;
        let row = match shared.store.get_by_id(task_id).await {
            Ok(Some(row)) => Some(row),
            Ok(None) => None,
            Err(error) => {
                tracing::warn!(task_id = %task_id, error = %error, "task lookup failed during cancel");
                None
            }
        };

        if let Err(error) = shared.store.set_cancelled_by_user(task_id).await {
            tracing::warn!(task_id = %task_id, error = %error, "failed to mark task cancelled");
        }
        shared.cancellations.cancel_token_for_task(task_id);
        shared.cancellations.add_to_blacklist(task_id);

        let (request_type, handler_type, request_json) = row
            .map(|r| (r.request_type, r.handler_type, r.request))
            .unwrap_or_else(|| (String::new(), String::new(), String::new()));
        shared.events.emit(TaskEventData::warning(
            task_id,
            request_type,
            handler_type,
            request_json,
            "task cancellation requested",
            None,
        ));
        Ok(())
    }

    async fn persist(
        &self,
        executor: &TaskExecutor,
        adopted: Option<QueuedTask>,
        now: DateTime<Utc>,
    ) -> Result<(), DispatchError> {
        let shared = &self.shared;
        let task_id = executor.persistence_id;

        let result = match adopted {
            Some(existing) => match executor.to_queued_task(existing.created_at_utc) {
                Ok(mut row) => {
                    row.status = existing.status;
                    row.current_run_count = existing.current_run_count;
                    row.last_execution_utc = existing.last_execution_utc;
                    shared.store.update_task(row).await
                }
                Err(error) => Err(error),
            },
            None => match executor.to_queued_task(now) {
                Ok(row) => shared.store.persist(row).await,
                Err(error) => Err(error),
            },
        };

        match result {
            Ok(()) => Ok(()),
            Err(source) if shared.throw_if_unable_to_persist => {
                Err(DispatchError::PersistenceFailed { task_id, source })
            }
            Err(source) => {
                tracing::warn!(task_id = %task_id, error = %source, "failed to persist task, continuing unpersisted");
                Ok(())
            }
        }
    }

    fn should_resolve_lazily(&self, executor: &TaskExecutor, now: DateTime<Utc>) -> bool {
        if !self.shared.use_lazy_handler_resolution {
            return false;
        }
        if let Some(recurring) = &executor.recurring {
            let threshold = TimeDelta::from_std(LAZY_MIN_RECURRING_INTERVAL)
                .unwrap_or(TimeDelta::MAX);
            return recurring.min_interval().map_or(false, |i| i >= threshold);
        }
        match executor.execution_time {
            Some(at) => {
                let threshold = TimeDelta::from_std(LAZY_MIN_DELAY).unwrap_or(TimeDelta::MAX);
                at - now >= threshold
            }
            // Immediate work is always eager.
            None => false,
        }
    }
}
