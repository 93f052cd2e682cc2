//! Persistent in-process background task engine.
//!
//! Application code dispatches typed requests; the engine persists them,
//! schedules them (immediately, after a delay, at an instant, or on a
//! recurring cadence) and runs them on bounded per-queue worker pools with
//! retries, timeouts, cooperative cancellation, audit trails and a
//! lifecycle event bus. It is embedded in the host process, not run as a
//! separate service.
//!
//! # Architecture
//!
//! ```text
//! dispatch(request)
//!     │
//!     ├─► storage (QueuedTask row, task-key dedup)
//!     │
//!     ├─► scheduler ── due ──► queue manager ──► N consumers per queue
//!     │   (future / recurring)                       │
//!     └─► queue manager (due now) ───────────────────┤
//!                                                    ▼
//!                                            worker executor
//!                                   (retries, timeout, cancellation,
//!                                    audit rows, log capture)
//!                                                    │
//!                                     storage audits + event bus
//! ```
//!
//! # Example
//!
//! ```ignore
//! use conveyor::{RecurringTask, TaskContext, TaskEngine, TaskHandler};
//!
//! #[derive(serde::Serialize, serde::Deserialize)]
//! struct SendReport { recipient: String }
//!
//! struct SendReportHandler;
//!
//! #[async_trait::async_trait]
//! impl TaskHandler for SendReportHandler {
//!     type Request = SendReport;
//!
//!     async fn handle(&self, req: SendReport, ctx: &TaskContext) -> anyhow::Result<()> {
//!         ctx.logger().info(format!("sending report to {}", req.recipient));
//!         Ok(())
//!     }
//! }
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let engine = TaskEngine::builder()
//!     .register(|| SendReportHandler)
//!     .start()
//!     .await?;
//!
//! // Once, now.
//! engine.dispatch(SendReport { recipient: "ops".into() }).await?;
//!
//! // Every weekday morning, at most 100 times.
//! engine.dispatch_recurring(
//!     SendReport { recipient: "ops".into() },
//!     RecurringTask::cron("0 0 7 * * Mon-Fri")?.with_max_runs(100),
//! ).await?;
//! # Ok(()) }
//! ```
//!
//! Delivery is at-least-once: handlers should be idempotent. Ordering is
//! FIFO within a queue; a recurring task's run N+1 never starts before run
//! N completes.

mod cancellation;
mod config;
mod dispatcher;
mod engine;
mod error;
mod events;
mod executor;
mod handler;
mod ids;
mod logs;
mod queue;
mod recovery;
pub mod recurring;
mod registry;
mod retry;
mod scheduler;
pub mod storage;
mod task;
mod worker;

pub use cancellation::CancellationRegistry;
pub use config::{well_known_queues, EngineConfig, SchedulerVariant};
pub use dispatcher::{Dispatcher, RunSchedule};
pub use engine::{TaskEngine, TaskEngineBuilder};
pub use error::{render_error_chain, DispatchError, ExecutionError};
pub use events::{EventBus, Severity, TaskEventData};
pub use executor::{
    TaskExecutor, BACKGROUND_QUEUE, DEFAULT_QUEUE, HIGH_PRIORITY_QUEUE, RECURRING_QUEUE,
};
pub use handler::{ErasedHandler, HandlerWrapper, TaskContext, TaskHandler};
pub use ids::{IdGenerator, TimeOrderedIdGenerator};
pub use logs::{LogCaptureConfig, TaskLogger};
pub use queue::{QueueConfig, QueueManager, WhenFull};
pub use recovery::RecoveryReport;
pub use recurring::RecurringTask;
pub use registry::{HandlerRegistration, HandlerRegistry};
pub use retry::{ExponentialRetryPolicy, LinearRetryPolicy, NoRetryPolicy, RetryPolicy};
pub use scheduler::{default_shard_count, Scheduler, ShardedScheduler, TimerScheduler};
pub use storage::{InMemoryTaskStore, InMemoryTaskStoreFactory, TaskStore, TaskStoreFactory};
pub use task::{
    AuditLevel, LogLevel, QueuedTask, RunsAudit, StatusAudit, TaskExecutionLog, TaskStatus,
};
