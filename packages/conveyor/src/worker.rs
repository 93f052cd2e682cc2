//! Worker execution of a single dequeued task.
//!
//! ```text
//! consumer ─► run_executor
//!     ├─► blacklist check (cancel vs dequeue race)
//!     ├─► resolve handler (lazy mode) + per-task token
//!     ├─► InProgress + Started event + on_started
//!     ├─► attempts under the retry policy (timeout = failed attempt)
//!     ├─► Completed / Pending(next run) / Failed / Cancelled / ServiceStopped
//!     ├─► run audit + lifecycle callback + event
//!     └─► dispose + batched execution-log flush
//! ```
//!
//! Errors are handled and logged here; nothing propagates out of
//! [`run_executor`], so a consumer loop can never be killed by one bad task.

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

use crate::cancellation::CancellationRegistry;
use crate::error::{render_error_chain, ExecutionError};
use crate::events::{EventBus, TaskEventData};
use crate::executor::TaskExecutor;
use crate::handler::{ErasedHandler, TaskContext};
use crate::ids::IdGenerator;
use crate::logs::{LogCaptureConfig, TaskLogger};
use crate::registry::HandlerRegistry;
use crate::retry::RetryPolicy;
use crate::scheduler::Scheduler;
use crate::storage::TaskStore;
use crate::task::{RunsAudit, TaskStatus};

/// Everything a consumer needs to run tasks.
pub struct WorkerContext {
    pub(crate) store: Arc<dyn TaskStore>,
    pub(crate) registry: Arc<HandlerRegistry>,
    pub(crate) cancellations: Arc<CancellationRegistry>,
    pub(crate) events: EventBus,
    pub(crate) scheduler: Arc<dyn Scheduler>,
    pub(crate) ids: Arc<dyn IdGenerator>,
    pub(crate) log_capture: LogCaptureConfig,
}

/// Run one executor to a final (or parked) state.
pub async fn run_executor(ctx: &WorkerContext, executor: TaskExecutor) {
    let task_id = executor.persistence_id;

    // Cancelled between persist and dequeue: the row is already Cancelled,
    // the executor is simply discarded.
    if ctx.cancellations.take_blacklisted(task_id) {
        tracing::debug!(task_id = %task_id, "discarding task cancelled before execution");
        ctx.cancellations.remove(task_id);
        return;
    }

    let was_lazy = executor.is_lazy();
    let handler = match executor.handler.clone() {
        Some(handler) => handler,
        None => match ctx.registry.materialize(&executor.request_type) {
            Some(handler) => handler,
            None => {
                let message = format!(
                    "no handler registered for request type {}",
                    executor.request_type
                );
                tracing::error!(task_id = %task_id, request_type = %executor.request_type, "{message}");
                if let Err(error) = ctx
                    .store
                    .set_status(
                        task_id,
                        TaskStatus::Failed,
                        Some(message.clone()),
                        executor.audit_level,
                    )
                    .await
                {
                    tracing::warn!(task_id = %task_id, error = %error, "failed to mark task failed");
                }
                ctx.events.emit(TaskEventData::error(
                    task_id,
                    executor.request_type.clone(),
                    executor.handler_type.clone(),
                    executor.request_json.clone(),
                    message,
                    None,
                ));
                return;
            }
        },
    };

    let token = ctx.cancellations.create_token(task_id);
    let capture = handler
        .log_capture()
        .unwrap_or_else(|| ctx.log_capture.clone());
    let logger = Arc::new(TaskLogger::new(task_id, capture, ctx.ids.clone()));
    let task_ctx = TaskContext::new(task_id, token.clone(), logger.clone());

    if let Err(error) = ctx.store.set_in_progress(task_id).await {
        tracing::warn!(task_id = %task_id, error = %error, "failed to mark task in progress");
    }
    ctx.events.emit(TaskEventData::info(
        task_id,
        executor.request_type.clone(),
        executor.handler_type.clone(),
        executor.request_json.clone(),
        "task started",
    ));
    handler.on_started(task_id).await;

    let policy = handler.retry_policy();
    let timeout = handler.timeout();
    let started = std::time::Instant::now();
    let outcome = run_attempts(
        handler.as_ref(),
        &executor.request_json,
        &task_ctx,
        policy.as_ref(),
        timeout,
        &token,
        ctx.cancellations.host_token(),
        task_id,
    )
    .await;
    let elapsed_ms = started.elapsed().as_millis() as u64;
    let executed_at = Utc::now();

    let mut continuing = false;
    match outcome {
        Ok(()) => {
            let run = RunsAudit {
                id: ctx.ids.next_id(),
                queued_task_id: task_id,
                executed_at,
                status: TaskStatus::Completed,
                exception: None,
                execution_time_ms: elapsed_ms,
            };
            if let Err(error) = ctx.store.record_run(task_id, run, executor.audit_level).await {
                tracing::warn!(task_id = %task_id, error = %error, "failed to record run audit");
            }

            if let Some(recurring) = &executor.recurring {
                let completed_runs = ctx
                    .store
                    .get_current_run_count(task_id)
                    .await
                    .unwrap_or(0)
                    + 1;
                let now = Utc::now();
                match recurring.next_valid_run(executor.execution_time, completed_runs, now) {
                    Some(next_run) => {
                        if let Err(error) = ctx
                            .store
                            .update_current_run(task_id, Some(next_run), executor.audit_level)
                            .await
                        {
                            tracing::warn!(task_id = %task_id, error = %error, "failed to update run count");
                        }
                        if let Err(error) = ctx
                            .store
                            .set_status(task_id, TaskStatus::Pending, None, executor.audit_level)
                            .await
                        {
                            tracing::warn!(task_id = %task_id, error = %error, "failed to park recurring task");
                        }
                        continuing = true;

                        let mut next_executor = executor.clone();
                        next_executor.execution_time = Some(next_run);
                        // Lazy recurring tasks re-resolve their handler on
                        // every run; eager ones keep the same instance.
                        if was_lazy {
                            next_executor.handler = None;
                        } else {
                            next_executor.handler = Some(handler.clone());
                        }
                        ctx.scheduler.schedule(next_executor, Some(next_run));
                        tracing::debug!(
                            task_id = %task_id,
                            next_run = %next_run,
                            run = completed_runs,
                            "recurring task parked until next run"
                        );
                    }
                    None => {
                        finalize_run_count(ctx, task_id, executor.audit_level).await;
                        if let Err(error) = ctx.store.set_completed(task_id).await {
                            tracing::warn!(task_id = %task_id, error = %error, "failed to mark task completed");
                        }
                    }
                }
            } else {
                finalize_run_count(ctx, task_id, executor.audit_level).await;
                if let Err(error) = ctx.store.set_completed(task_id).await {
                    tracing::warn!(task_id = %task_id, error = %error, "failed to mark task completed");
                }
            }

            let logs = logger.drain();
            let mut event = TaskEventData::info(
                task_id,
                executor.request_type.clone(),
                executor.handler_type.clone(),
                executor.request_json.clone(),
                "task completed",
            );
            if !logs.is_empty() {
                event = event.with_execution_logs(logs.clone());
                if let Err(error) = ctx.store.save_execution_logs(task_id, logs).await {
                    tracing::warn!(task_id = %task_id, error = %error, "failed to flush execution logs");
                }
            }
            ctx.events.emit(event);
            handler.on_completed(task_id).await;
        }
        Err(ExecutionError::UserCancelled) => {
            if let Err(error) = ctx.store.set_cancelled_by_user(task_id).await {
                tracing::warn!(task_id = %task_id, error = %error, "failed to mark task cancelled");
            }
            let run = RunsAudit {
                id: ctx.ids.next_id(),
                queued_task_id: task_id,
                executed_at,
                status: TaskStatus::Cancelled,
                exception: None,
                execution_time_ms: elapsed_ms,
            };
            if let Err(error) = ctx.store.record_run(task_id, run, executor.audit_level).await {
                tracing::warn!(task_id = %task_id, error = %error, "failed to record run audit");
            }
            flush_logs(ctx, task_id, &logger).await;
            ctx.events.emit(TaskEventData::warning(
                task_id,
                executor.request_type.clone(),
                executor.handler_type.clone(),
                executor.request_json.clone(),
                "task cancelled by user",
                None,
            ));
        }
        Err(ExecutionError::ServiceStopping) => {
            // Recovery resumes this task after restart; no OnError.
            if let Err(error) = ctx
                .store
                .set_cancelled_by_service(task_id, "service stopped while task was in flight".into())
                .await
            {
                tracing::warn!(task_id = %task_id, error = %error, "failed to mark task service-stopped");
            }
            flush_logs(ctx, task_id, &logger).await;
            ctx.events.emit(TaskEventData::warning(
                task_id,
                executor.request_type.clone(),
                executor.handler_type.clone(),
                executor.request_json.clone(),
                "service stopped while task was in flight",
                None,
            ));
        }
        Err(failure) => {
            // HandlerFailed, including timeouts on the final attempt.
            let (attempts, source) = match failure {
                ExecutionError::HandlerFailed { attempts, source } => (attempts, source),
                other => (1, anyhow::Error::new(other)),
            };
            let rendered = render_error_chain(&source);
            let message = format!("handler failed after {attempts} attempt(s)");
            tracing::warn!(task_id = %task_id, attempts, error = %source, "task failed");

            if let Err(store_error) = ctx
                .store
                .set_status(
                    task_id,
                    TaskStatus::Failed,
                    Some(rendered.clone()),
                    executor.audit_level,
                )
                .await
            {
                tracing::warn!(task_id = %task_id, error = %store_error, "failed to mark task failed");
            }
            let run = RunsAudit {
                id: ctx.ids.next_id(),
                queued_task_id: task_id,
                executed_at,
                status: TaskStatus::Failed,
                exception: Some(rendered.clone()),
                execution_time_ms: elapsed_ms,
            };
            if let Err(store_error) = ctx.store.record_run(task_id, run, executor.audit_level).await
            {
                tracing::warn!(task_id = %task_id, error = %store_error, "failed to record run audit");
            }

            let logs = logger.drain();
            let mut event = TaskEventData::error(
                task_id,
                executor.request_type.clone(),
                executor.handler_type.clone(),
                executor.request_json.clone(),
                message.clone(),
                Some(rendered),
            );
            if !logs.is_empty() {
                event = event.with_execution_logs(logs.clone());
                if let Err(store_error) = ctx.store.save_execution_logs(task_id, logs).await {
                    tracing::warn!(task_id = %task_id, error = %store_error, "failed to flush execution logs");
                }
            }
            ctx.events.emit(event);
            handler.on_error(task_id, &source, &message).await;
        }
    }

    // Lazy recurring handlers are rebuilt every run, so dispose after each
    // execution; a continuing eager handler survives to the next run.
    if !continuing || was_lazy {
        handler.dispose().await;
    }
    ctx.cancellations.remove(task_id);
}

async fn finalize_run_count(
    ctx: &WorkerContext,
    task_id: Uuid,
    audit_level: crate::task::AuditLevel,
) {
    if let Err(error) = ctx
        .store
        .update_current_run(task_id, None, audit_level)
        .await
    {
        tracing::warn!(task_id = %task_id, error = %error, "failed to update run count");
    }
}

async fn flush_logs(ctx: &WorkerContext, task_id: Uuid, logger: &TaskLogger) {
    let logs = logger.drain();
    if logs.is_empty() {
        return;
    }
    if let Err(error) = ctx.store.save_execution_logs(task_id, logs).await {
        tracing::warn!(task_id = %task_id, error = %error, "failed to flush execution logs");
    }
}

/// Run attempts under the retry policy until success, exhaustion or
/// cancellation. A timed-out attempt counts as a failed attempt. The
/// back-off sleep is interruptible, so cancellation propagates without
/// waiting out the delay.
#[allow(clippy::too_many_arguments)]
async fn run_attempts(
    handler: &dyn ErasedHandler,
    request_json: &str,
    task_ctx: &TaskContext,
    policy: &dyn RetryPolicy,
    timeout: Option<Duration>,
    token: &CancellationToken,
    host: &CancellationToken,
    task_id: Uuid,
) -> Result<(), ExecutionError> {
    let classify_cancel = || {
        if host.is_cancelled() {
            ExecutionError::ServiceStopping
        } else {
            ExecutionError::UserCancelled
        }
    };

    let mut attempt: u32 = 0;
    loop {
        attempt += 1;
        if token.is_cancelled() {
            return Err(classify_cancel());
        }

        let attempt_future = AssertUnwindSafe(handler.handle_raw(request_json, task_ctx)).catch_unwind();
        let attempt_result = match timeout {
            Some(limit) => match tokio::time::timeout(limit, attempt_future).await {
                Ok(result) => result,
                Err(_) => Ok(Err(anyhow::Error::new(ExecutionError::Timeout {
                    attempt,
                    timeout: limit,
                }))),
            },
            None => attempt_future.await,
        };

        let attempt_error = match attempt_result {
            Ok(Ok(())) => return Ok(()),
            Ok(Err(error)) => error,
            Err(panic) => anyhow::anyhow!("handler panicked: {}", panic_message(panic)),
        };

        if token.is_cancelled() {
            return Err(classify_cancel());
        }

        match policy.next_delay(attempt) {
            Some(delay) => {
                tracing::debug!(
                    task_id = %task_id,
                    attempt,
                    delay_ms = delay.as_millis() as u64,
                    error = %attempt_error,
                    "attempt failed, retrying"
                );
                handler
                    .on_retry(task_id, attempt, &attempt_error, delay)
                    .await;
                tokio::select! {
                    _ = token.cancelled() => return Err(classify_cancel()),
                    _ = tokio::time::sleep(delay) => {}
                }
            }
            None => {
                return Err(ExecutionError::HandlerFailed {
                    attempts: attempt,
                    source: attempt_error,
                })
            }
        }
    }
}

fn panic_message(payload: Box<dyn std::any::Any + Send>) -> String {
    if let Some(message) = payload.downcast_ref::<&str>() {
        (*message).to_string()
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.clone()
    } else {
        "opaque panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handler::TaskHandler;
    use crate::ids::TimeOrderedIdGenerator;
    use crate::retry::LinearRetryPolicy;
    use crate::storage::InMemoryTaskStore;
    use crate::task::AuditLevel;
    use async_trait::async_trait;
    use chrono::DateTime;
    use serde::{Deserialize, Serialize};
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tokio::task::JoinHandle;

    struct NoopScheduler;

    impl Scheduler for NoopScheduler {
        fn schedule(&self, _executor: TaskExecutor, _override_next_run: Option<DateTime<Utc>>) {}
        fn start(&self) -> Vec<JoinHandle<()>> {
            Vec::new()
        }
        fn pending_count(&self) -> usize {
            0
        }
    }

    #[derive(Debug, Clone, Serialize, Deserialize)]
    struct Probe {
        name: String,
    }

    #[derive(Default)]
    struct ProbeHandler {
        fail_first: u32,
        calls: Arc<AtomicU32>,
        retries: Arc<Mutex<Vec<u32>>>,
        errors: Arc<AtomicU32>,
        completions: Arc<AtomicU32>,
        disposals: Arc<AtomicU32>,
    }

    #[async_trait]
    impl TaskHandler for ProbeHandler {
        type Request = Probe;

        fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
            Arc::new(LinearRetryPolicy::new(3, Duration::from_millis(5)))
        }

        async fn handle(&self, _request: Probe, _ctx: &TaskContext) -> anyhow::Result<()> {
            let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
            anyhow::ensure!(call > self.fail_first, "induced failure on call {call}");
            Ok(())
        }

        async fn on_completed(&self, _task_id: Uuid) {
            self.completions.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_error(&self, _task_id: Uuid, _error: &anyhow::Error, _message: &str) {
            self.errors.fetch_add(1, Ordering::SeqCst);
        }

        async fn on_retry(
            &self,
            _task_id: Uuid,
            attempt: u32,
            _error: &anyhow::Error,
            _delay: Duration,
        ) {
            self.retries
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .push(attempt);
        }

        async fn dispose(&self) {
            self.disposals.fetch_add(1, Ordering::SeqCst);
        }
    }

    fn context(store: Arc<InMemoryTaskStore>) -> WorkerContext {
        let host = CancellationToken::new();
        WorkerContext {
            store,
            registry: Arc::new(HandlerRegistry::new()),
            cancellations: Arc::new(CancellationRegistry::new(host)),
            events: EventBus::new(),
            scheduler: Arc::new(NoopScheduler),
            ids: Arc::new(TimeOrderedIdGenerator),
            log_capture: LogCaptureConfig::default(),
        }
    }

    async fn persisted_executor(
        store: &InMemoryTaskStore,
        handler: ProbeHandler,
    ) -> TaskExecutor {
        let executor = TaskExecutor {
            persistence_id: Uuid::now_v7(),
            request_json: r#"{"name":"probe"}"#.into(),
            request_type: std::any::type_name::<Probe>().into(),
            handler_type: std::any::type_name::<ProbeHandler>().into(),
            execution_time: None,
            recurring: None,
            queue_name: None,
            handler: Some(Arc::new(crate::handler::HandlerWrapper::new(handler))),
            task_key: None,
            audit_level: AuditLevel::Full,
        };
        store
            .persist(executor.to_queued_task(Utc::now()).unwrap())
            .await
            .unwrap();
        executor
    }

    #[tokio::test]
    async fn success_marks_completed_with_run_audit() {
        let store = Arc::new(InMemoryTaskStore::new());
        let ctx = context(store.clone());
        let completions = Arc::new(AtomicU32::new(0));
        let disposals = Arc::new(AtomicU32::new(0));
        let handler = ProbeHandler {
            completions: completions.clone(),
            disposals: disposals.clone(),
            ..Default::default()
        };
        let executor = persisted_executor(&store, handler).await;
        let task_id = executor.persistence_id;

        run_executor(&ctx, executor).await;

        let row = store.get_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Completed);
        assert_eq!(row.current_run_count, 1);
        assert!(row.next_run_utc.is_none());
        assert!(row.last_execution_utc.is_some());
        assert_eq!(store.runs_audits_for(task_id).len(), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 1);
        assert_eq!(disposals.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retries_then_succeeds() {
        let store = Arc::new(InMemoryTaskStore::new());
        let ctx = context(store.clone());
        let retries = Arc::new(Mutex::new(Vec::new()));
        let errors = Arc::new(AtomicU32::new(0));
        let handler = ProbeHandler {
            fail_first: 2,
            retries: retries.clone(),
            errors: errors.clone(),
            ..Default::default()
        };
        let executor = persisted_executor(&store, handler).await;
        let task_id = executor.persistence_id;

        run_executor(&ctx, executor).await;

        let row = store.get_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Completed);
        assert_eq!(
            *retries.lock().unwrap_or_else(|e| e.into_inner()),
            vec![1, 2]
        );
        assert_eq!(errors.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn exhausted_retries_mark_failed() {
        let store = Arc::new(InMemoryTaskStore::new());
        let ctx = context(store.clone());
        let errors = Arc::new(AtomicU32::new(0));
        let completions = Arc::new(AtomicU32::new(0));
        let handler = ProbeHandler {
            fail_first: u32::MAX,
            errors: errors.clone(),
            completions: completions.clone(),
            ..Default::default()
        };
        let executor = persisted_executor(&store, handler).await;
        let task_id = executor.persistence_id;

        run_executor(&ctx, executor).await;

        let row = store.get_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Failed);
        assert!(row.exception.as_deref().unwrap().contains("induced failure"));
        assert_eq!(errors.load(Ordering::SeqCst), 1);
        assert_eq!(completions.load(Ordering::SeqCst), 0);
        let runs = store.runs_audits_for(task_id);
        assert_eq!(runs.len(), 1);
        assert_eq!(runs[0].status, TaskStatus::Failed);
    }

    #[tokio::test]
    async fn blacklisted_task_is_discarded() {
        let store = Arc::new(InMemoryTaskStore::new());
        let ctx = context(store.clone());
        let calls = Arc::new(AtomicU32::new(0));
        let handler = ProbeHandler {
            calls: calls.clone(),
            ..Default::default()
        };
        let executor = persisted_executor(&store, handler).await;
        let task_id = executor.persistence_id;
        ctx.cancellations.add_to_blacklist(task_id);

        run_executor(&ctx, executor).await;

        assert_eq!(calls.load(Ordering::SeqCst), 0);
        // The dispatch-side cancel path owns the status write; the row is
        // untouched here.
        let row = store.get_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::WaitingQueue);
    }

    #[tokio::test]
    async fn missing_handler_marks_failed() {
        let store = Arc::new(InMemoryTaskStore::new());
        let ctx = context(store.clone());
        let handler = ProbeHandler::default();
        let mut executor = persisted_executor(&store, handler).await;
        executor.handler = None; // lazy, and nothing registered
        let task_id = executor.persistence_id;

        run_executor(&ctx, executor).await;

        let row = store.get_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Failed);
        assert!(row
            .exception
            .as_deref()
            .unwrap()
            .contains("no handler registered"));
    }

    struct TimeoutHandler;

    #[async_trait]
    impl TaskHandler for TimeoutHandler {
        type Request = Probe;

        fn timeout(&self) -> Option<Duration> {
            Some(Duration::from_millis(20))
        }

        fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
            Arc::new(LinearRetryPolicy::new(2, Duration::from_millis(5)))
        }

        async fn handle(&self, _request: Probe, _ctx: &TaskContext) -> anyhow::Result<()> {
            tokio::time::sleep(Duration::from_secs(10)).await;
            Ok(())
        }
    }

    #[tokio::test]
    async fn timeout_counts_as_failed_attempt() {
        let store = Arc::new(InMemoryTaskStore::new());
        let ctx = context(store.clone());
        let executor = TaskExecutor {
            persistence_id: Uuid::now_v7(),
            request_json: r#"{"name":"slow"}"#.into(),
            request_type: std::any::type_name::<Probe>().into(),
            handler_type: std::any::type_name::<TimeoutHandler>().into(),
            execution_time: None,
            recurring: None,
            queue_name: None,
            handler: Some(Arc::new(crate::handler::HandlerWrapper::new(TimeoutHandler))),
            task_key: None,
            audit_level: AuditLevel::Full,
        };
        store
            .persist(executor.to_queued_task(Utc::now()).unwrap())
            .await
            .unwrap();
        let task_id = executor.persistence_id;

        run_executor(&ctx, executor).await;

        let row = store.get_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Failed);
        assert!(row.exception.as_deref().unwrap().contains("timed out"));
    }

    struct PanickyHandler;

    #[async_trait]
    impl TaskHandler for PanickyHandler {
        type Request = Probe;

        fn retry_policy(&self) -> Arc<dyn RetryPolicy> {
            Arc::new(crate::retry::NoRetryPolicy)
        }

        async fn handle(&self, _request: Probe, _ctx: &TaskContext) -> anyhow::Result<()> {
            panic!("handler exploded");
        }
    }

    #[tokio::test]
    async fn handler_panic_becomes_a_failure() {
        let store = Arc::new(InMemoryTaskStore::new());
        let ctx = context(store.clone());
        let executor = TaskExecutor {
            persistence_id: Uuid::now_v7(),
            request_json: r#"{"name":"boom"}"#.into(),
            request_type: std::any::type_name::<Probe>().into(),
            handler_type: std::any::type_name::<PanickyHandler>().into(),
            execution_time: None,
            recurring: None,
            queue_name: None,
            handler: Some(Arc::new(crate::handler::HandlerWrapper::new(PanickyHandler))),
            task_key: None,
            audit_level: AuditLevel::Full,
        };
        store
            .persist(executor.to_queued_task(Utc::now()).unwrap())
            .await
            .unwrap();
        let task_id = executor.persistence_id;

        run_executor(&ctx, executor).await;

        let row = store.get_by_id(task_id).await.unwrap().unwrap();
        assert_eq!(row.status, TaskStatus::Failed);
        assert!(row.exception.as_deref().unwrap().contains("handler exploded"));
    }
}
