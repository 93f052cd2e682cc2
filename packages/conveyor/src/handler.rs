//! Handler contract and the type-erased wrapper the engine executes.
//!
//! A [`TaskHandler`] processes one request type. The engine never sees the
//! concrete type: at registration each handler is wrapped in an
//! [`ErasedHandler`] that deserialises the stored JSON payload and forwards
//! to the typed `handle`. Lifecycle hooks default to no-ops.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::logs::{LogCaptureConfig, TaskLogger};
use crate::retry::{LinearRetryPolicy, RetryPolicy};

/// Execution-scoped context handed to a handler.
///
/// Carries the task id, the per-task cancellation token and the injected
/// [`TaskLogger`]. Handlers should check the token at their own suspension
/// points and log through the logger so lines are captured.
#[derive(Clone)]
pub struct TaskContext {
    task_id: Uuid,
    cancellation: CancellationToken,
    logger: Arc<TaskLogger>,
}

impl TaskContext {
    pub fn new(task_id: Uuid, cancellation: CancellationToken, logger: Arc<TaskLogger>) -> Self {
        Self {
            task_id,
            cancellation,
            logger,
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn cancellation(&self) -> &CancellationToken {
        &self.cancellation
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancellation.is_cancelled()
    }

    pub fn logger(&self) -> &TaskLogger {
        &self.logger
    }
}

/// User-provided processing logic for one request type.
#[async_trait]
pub trait TaskHandler: Send + Sync + 'static {
    /// The request payload this handler processes.
    type Request: Serialize + DeserializeOwned + Send + Sync + 'static;

    /// Queue this handler's tasks route to. `None` means the well-known
    /// default (`"default"`, or `"recurring"` for recurring tasks).
    fn queue_name(&self) -> Option<&str> {
        None
    }

    /// Retry policy for failed attempts.
    fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        Arc::new(LinearRetryPolicy::default())
    }

    /// Per-attempt timeout. An expired attempt counts as a failed attempt.
    fn timeout(&self) -> Option<Duration> {
        None
    }

    /// Hint that this handler is CPU-bound rather than IO-bound.
    fn cpu_bound(&self) -> bool {
        false
    }

    /// Per-handler log capture override; `None` inherits the engine config.
    fn log_capture(&self) -> Option<LogCaptureConfig> {
        None
    }

    /// Process one request. Honour `ctx.cancellation()` at suspension points.
    async fn handle(&self, request: Self::Request, ctx: &TaskContext) -> anyhow::Result<()>;

    async fn on_started(&self, _task_id: Uuid) {}

    async fn on_completed(&self, _task_id: Uuid) {}

    async fn on_error(&self, _task_id: Uuid, _error: &anyhow::Error, _message: &str) {}

    async fn on_retry(
        &self,
        _task_id: Uuid,
        _attempt: u32,
        _error: &anyhow::Error,
        _delay: Duration,
    ) {
    }

    /// Called once the last lifecycle callback for an execution has run.
    async fn dispose(&self) {}
}

/// Object-safe view of a handler, with the request type erased.
#[async_trait]
pub trait ErasedHandler: Send + Sync {
    fn request_type(&self) -> &'static str;

    fn handler_type(&self) -> &'static str;

    fn queue_name(&self) -> Option<String>;

    fn retry_policy(&self) -> Arc<dyn RetryPolicy>;

    fn timeout(&self) -> Option<Duration>;

    fn cpu_bound(&self) -> bool;

    fn log_capture(&self) -> Option<LogCaptureConfig>;

    /// Deserialise the stored payload and run the typed handler.
    async fn handle_raw(&self, request_json: &str, ctx: &TaskContext) -> anyhow::Result<()>;

    async fn on_started(&self, task_id: Uuid);

    async fn on_completed(&self, task_id: Uuid);

    async fn on_error(&self, task_id: Uuid, error: &anyhow::Error, message: &str);

    async fn on_retry(&self, task_id: Uuid, attempt: u32, error: &anyhow::Error, delay: Duration);

    async fn dispose(&self);
}

/// Wrapper binding a typed handler into the erased execution path.
pub struct HandlerWrapper<H: TaskHandler> {
    inner: H,
}

impl<H: TaskHandler> HandlerWrapper<H> {
    pub fn new(inner: H) -> Self {
        Self { inner }
    }
}

#[async_trait]
impl<H: TaskHandler> ErasedHandler for HandlerWrapper<H> {
    fn request_type(&self) -> &'static str {
        std::any::type_name::<H::Request>()
    }

    fn handler_type(&self) -> &'static str {
        std::any::type_name::<H>()
    }

    fn queue_name(&self) -> Option<String> {
        self.inner.queue_name().map(str::to_string)
    }

    fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
        self.inner.retry_policy()
    }

    fn timeout(&self) -> Option<Duration> {
        self.inner.timeout()
    }

    fn cpu_bound(&self) -> bool {
        self.inner.cpu_bound()
    }

    fn log_capture(&self) -> Option<LogCaptureConfig> {
        self.inner.log_capture()
    }

    async fn handle_raw(&self, request_json: &str, ctx: &TaskContext) -> anyhow::Result<()> {
        let request: H::Request = serde_json::from_str(request_json).map_err(|e| {
            anyhow::anyhow!(
                "failed to deserialize request of type {}: {e}",
                std::any::type_name::<H::Request>()
            )
        })?;
        self.inner.handle(request, ctx).await
    }

    async fn on_started(&self, task_id: Uuid) {
        self.inner.on_started(task_id).await;
    }

    async fn on_completed(&self, task_id: Uuid) {
        self.inner.on_completed(task_id).await;
    }

    async fn on_error(&self, task_id: Uuid, error: &anyhow::Error, message: &str) {
        self.inner.on_error(task_id, error, message).await;
    }

    async fn on_retry(&self, task_id: Uuid, attempt: u32, error: &anyhow::Error, delay: Duration) {
        self.inner.on_retry(task_id, attempt, error, delay).await;
    }

    async fn dispose(&self) {
        self.inner.dispose().await;
    }
}
