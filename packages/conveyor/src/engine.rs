//! Engine assembly: builder, startup wiring, graceful shutdown.
//!
//! ```ignore
//! let engine = TaskEngine::builder()
//!     .register(|| SendEmailHandler::new(mailer.clone()))
//!     .with_config(EngineConfig::default())
//!     .start()
//!     .await?;
//!
//! let task_id = engine.dispatch(SendEmail { to: "a@b.c".into() }).await?;
//! engine.shutdown().await;
//! ```
//!
//! `start` runs the recovery scan (with consumers and scheduler loops
//! already live, so replayed work flows immediately) and only then returns;
//! the host sees a ready engine.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cancellation::CancellationRegistry;
use crate::config::{EngineConfig, SchedulerVariant};
use crate::dispatcher::{Dispatcher, DispatcherShared, RunSchedule};
use crate::error::DispatchError;
use crate::events::{EventBus, TaskEventData};
use crate::handler::TaskHandler;
use crate::ids::{IdGenerator, TimeOrderedIdGenerator};
use crate::queue::QueueManager;
use crate::recovery;
use crate::recurring::RecurringTask;
use crate::registry::HandlerRegistry;
use crate::scheduler::{Scheduler, ShardedScheduler, TimerScheduler};
use crate::storage::{InMemoryTaskStore, TaskStore};
use crate::worker::WorkerContext;

/// Bounded wait for background loops on shutdown.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(10);

/// Builder for a [`TaskEngine`].
pub struct TaskEngineBuilder {
    config: EngineConfig,
    store: Option<Arc<dyn TaskStore>>,
    ids: Option<Arc<dyn IdGenerator>>,
    registry: Arc<HandlerRegistry>,
}

impl TaskEngineBuilder {
    pub fn new() -> Self {
        Self {
            config: EngineConfig::default(),
            store: None,
            ids: None,
            registry: Arc::new(HandlerRegistry::new()),
        }
    }

    pub fn with_config(mut self, config: EngineConfig) -> Self {
        self.config = config;
        self
    }

    /// Supply a storage backend; defaults to the in-memory store.
    pub fn with_store(mut self, store: Arc<dyn TaskStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Supply an id generator; defaults to UUID v7.
    pub fn with_id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Register a handler factory for its request type.
    pub fn register<H, F>(self, factory: F) -> Self
    where
        H: TaskHandler,
        F: Fn() -> H + Send + Sync + 'static,
    {
        self.registry.register(factory);
        self
    }

    /// Wire everything, run recovery, spawn the loops.
    pub async fn start(self) -> Result<TaskEngine> {
        let config = self.config;
        let store = self
            .store
            .unwrap_or_else(|| Arc::new(InMemoryTaskStore::new()));
        let ids = self
            .ids
            .unwrap_or_else(|| Arc::new(TimeOrderedIdGenerator));
        let host = CancellationToken::new();
        let events = EventBus::with_capacity(config.event_capacity.max(1));
        let cancellations = Arc::new(CancellationRegistry::new(host.clone()));
        let queues = Arc::new(QueueManager::new(config.queues.clone(), host.clone()));

        let scheduler: Arc<dyn Scheduler> = match config.scheduler {
            SchedulerVariant::SingleTimer => Arc::new(TimerScheduler::new(
                queues.clone(),
                store.clone(),
                events.clone(),
                host.clone(),
            )),
            SchedulerVariant::Sharded { shards } => Arc::new(ShardedScheduler::new(
                shards,
                queues.clone(),
                store.clone(),
                events.clone(),
                host.clone(),
            )),
        };

        let worker_ctx = Arc::new(WorkerContext {
            store: store.clone(),
            registry: self.registry.clone(),
            cancellations: cancellations.clone(),
            events: events.clone(),
            scheduler: scheduler.clone(),
            ids: ids.clone(),
            log_capture: config.log_capture.clone(),
        });

        let mut handles = scheduler.start();
        handles.extend(queues.start_consumers(worker_ctx));

        if config.recovery_enabled {
            recovery::run_recovery(
                &store,
                &self.registry,
                &scheduler,
                &queues,
                config.recovery_page_size,
            )
            .await?;
        }

        let dispatcher = Dispatcher::new(Arc::new(DispatcherShared {
            store: store.clone(),
            registry: self.registry.clone(),
            queues: queues.clone(),
            scheduler: scheduler.clone(),
            cancellations: cancellations.clone(),
            events: events.clone(),
            ids,
            host: host.clone(),
            throw_if_unable_to_persist: config.throw_if_unable_to_persist,
            use_lazy_handler_resolution: config.use_lazy_handler_resolution,
            default_audit_level: config.default_audit_level,
        }));

        tracing::info!(
            queues = queues.queue_names().len(),
            handlers = self.registry.registered_types().len(),
            "task engine started"
        );

        Ok(TaskEngine {
            dispatcher,
            events,
            host,
            queues,
            scheduler,
            store,
            handles: Mutex::new(handles),
        })
    }
}

impl Default for TaskEngineBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running engine. Dispatch through it; shut it down when the host stops.
pub struct TaskEngine {
    dispatcher: Dispatcher,
    events: EventBus,
    host: CancellationToken,
    queues: Arc<QueueManager>,
    scheduler: Arc<dyn Scheduler>,
    store: Arc<dyn TaskStore>,
    handles: Mutex<Vec<JoinHandle<()>>>,
}

impl TaskEngine {
    pub fn builder() -> TaskEngineBuilder {
        TaskEngineBuilder::new()
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Dispatch for immediate execution.
    pub async fn dispatch<R>(&self, request: R) -> Result<Uuid, DispatchError>
    where
        R: Serialize + Send + 'static,
    {
        self.dispatcher.dispatch(request).await
    }

    /// Dispatch after a relative delay.
    pub async fn dispatch_after<R>(
        &self,
        request: R,
        delay: Duration,
    ) -> Result<Uuid, DispatchError>
    where
        R: Serialize + Send + 'static,
    {
        self.dispatcher.dispatch_after(request, delay).await
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
        self.dispatcher.dispatch_at(request, at).await
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
        self.dispatcher.dispatch_recurring(request, recurring).await
    }

    /// Full dispatch with schedule and deduplication key.
    pub async fn dispatch_with<R>(
        &self,
        request: R,
        schedule: RunSchedule,
        task_key: Option<String>,
    ) -> Result<Uuid, DispatchError>
    where
        R: Serialize + Send + 'static,
    {
        self.dispatcher
            .dispatch_with(request, schedule, task_key)
            .await
    }

    /// Cooperatively cancel a scheduled or running task.
    pub async fn cancel(&self, task_id: Uuid) -> Result<(), DispatchError> {
        self.dispatcher.cancel(task_id).await
    }

    /// Subscribe to lifecycle events.
    pub fn subscribe(&self) -> tokio::sync::broadcast::Receiver<TaskEventData> {
        self.events.subscribe()
    }

    /// The storage backend, for host-side inspection.
    pub fn store(&self) -> Arc<dyn TaskStore> {
        self.store.clone()
    }

    /// Executors currently waiting in the scheduler.
    pub fn scheduled_count(&self) -> usize {
        self.scheduler.pending_count()
    }

    /// Executors currently buffered in a queue.
    pub fn queue_depth(&self, name: &str) -> usize {
        self.queues.depth(name)
    }

    /// Graceful shutdown: stop accepting work, cancel in-flight tokens,
    /// wait (bounded) for consumers and scheduler loops to exit. In-flight
    /// tasks transition to ServiceStopped and resume via recovery.
    pub async fn shutdown(&self) {
        tracing::info!("task engine shutting down");
        self.host.cancel();
        self.queues.close();

        let handles: Vec<JoinHandle<()>> = {
            let mut guard = self.handles.lock().unwrap_or_else(|e| e.into_inner());
            guard.drain(..).collect()
        };
        if tokio::time::timeout(SHUTDOWN_GRACE, futures::future::join_all(handles))
            .await
            .is_err()
        {
            tracing::warn!("background loops did not stop within the shutdown grace period");
        }
        tracing::info!("task engine stopped");
    }
}

impl std::fmt::Debug for TaskEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskEngine")
            .field("scheduled_count", &self.scheduled_count())
            .field("shutting_down", &self.host.is_cancelled())
            .finish()
    }
}
