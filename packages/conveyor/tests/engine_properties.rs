//! Cross-cutting engine properties: concurrency bounds, events, log capture.

mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use common::{wait_until, Journal};
use conveyor::{
    EngineConfig, InMemoryTaskStore, LogCaptureConfig, LogLevel, QueueConfig, RunSchedule,
    Severity, TaskContext, TaskEngine, TaskHandler, TaskStatus, TaskStore,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Busy {
    index: u32,
}

struct BusyHandler {
    journal: Arc<Journal>,
    running: Arc<AtomicU32>,
    peak: Arc<AtomicU32>,
}

#[async_trait]
impl TaskHandler for BusyHandler {
    type Request = Busy;

    fn queue_name(&self) -> Option<&str> {
        Some("narrow")
    }

    async fn handle(&self, request: Busy, _ctx: &TaskContext) -> anyhow::Result<()> {
        let now_running = self.running.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now_running, Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(100)).await;
        self.running.fetch_sub(1, Ordering::SeqCst);
        self.journal.record(format!("done:{}", request.index));
        Ok(())
    }
}

#[tokio::test]
async fn queue_parallelism_bounds_concurrent_executions() {
    let journal = Journal::new();
    let running = Arc::new(AtomicU32::new(0));
    let peak = Arc::new(AtomicU32::new(0));

    let mut config = EngineConfig::default();
    config.queues.push(
        QueueConfig::builder()
            .name("narrow")
            .capacity(50)
            .max_parallelism(2)
            .build(),
    );

    let engine = {
        let journal = journal.clone();
        let running = running.clone();
        let peak = peak.clone();
        TaskEngine::builder()
            .with_config(config)
            .register(move || BusyHandler {
                journal: journal.clone(),
                running: running.clone(),
                peak: peak.clone(),
            })
            .start()
            .await
            .unwrap()
    };

    for index in 0..6 {
        engine.dispatch(Busy { index }).await.unwrap();
    }

    assert!(
        wait_until(Duration::from_secs(3), || journal.count_of("done:") == 6).await,
        "not all tasks finished"
    );
    assert!(
        peak.load(Ordering::SeqCst) <= 2,
        "more executors in progress than the queue's parallelism"
    );

    engine.shutdown().await;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Noisy {
    lines: u32,
}

struct NoisyHandler;

#[async_trait]
impl TaskHandler for NoisyHandler {
    type Request = Noisy;

    async fn handle(&self, request: Noisy, ctx: &TaskContext) -> anyhow::Result<()> {
        for line in 0..request.lines {
            ctx.logger().info(format!("line {line}"));
        }
        ctx.logger().debug("below the capture threshold");
        Ok(())
    }
}

#[tokio::test]
async fn execution_logs_are_captured_in_order() {
    let store = Arc::new(InMemoryTaskStore::new());
    let mut config = EngineConfig::default();
    config.log_capture = LogCaptureConfig {
        enabled: true,
        max_logs_per_task: 100,
        min_level: LogLevel::Info,
    };

    let engine = TaskEngine::builder()
        .with_store(store.clone())
        .with_config(config)
        .register(|| NoisyHandler)
        .start()
        .await
        .unwrap();

    let mut events = engine.subscribe();
    let task_id = engine.dispatch(Noisy { lines: 3 }).await.unwrap();

    let mut captured = Vec::new();
    for _ in 0..200 {
        let logs = store.get_execution_logs(task_id, 0, 100, None).await.unwrap();
        if !logs.is_empty() {
            captured = logs;
            break;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }

    assert_eq!(captured.len(), 3, "debug line must not be captured");
    let sequences: Vec<u32> = captured.iter().map(|l| l.sequence_number).collect();
    assert_eq!(sequences, vec![0, 1, 2]);
    assert!(captured.iter().all(|l| l.level == LogLevel::Info));

    // The completion event carries the same captured logs.
    let mut completed_logs = None;
    while let Ok(event) = tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
        let event = event.unwrap();
        if event.message == "task completed" {
            completed_logs = event.execution_logs;
            break;
        }
    }
    assert_eq!(completed_logs.map(|l| l.len()), Some(3));

    engine.shutdown().await;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Flaky {
    label: String,
}

struct FlakyHandler;

#[async_trait]
impl TaskHandler for FlakyHandler {
    type Request = Flaky;

    fn retry_policy(&self) -> Arc<dyn conveyor::RetryPolicy> {
        Arc::new(conveyor::NoRetryPolicy)
    }

    async fn handle(&self, _request: Flaky, _ctx: &TaskContext) -> anyhow::Result<()> {
        anyhow::bail!("always broken")
    }
}

#[tokio::test]
async fn lifecycle_events_flow_on_the_bus() {
    let engine = TaskEngine::builder()
        .register(|| FlakyHandler)
        .start()
        .await
        .unwrap();

    let mut events = engine.subscribe();
    let task_id = engine
        .dispatch(Flaky { label: "x".into() })
        .await
        .unwrap();

    let mut severities = Vec::new();
    while let Ok(event) = tokio::time::timeout(Duration::from_secs(1), events.recv()).await {
        let event = event.unwrap();
        assert_eq!(event.task_id, task_id);
        severities.push(event.severity);
        if event.severity == Severity::Error {
            assert!(event.exception.as_deref().unwrap().contains("always broken"));
            break;
        }
    }
    assert_eq!(severities, vec![Severity::Information, Severity::Error]);

    engine.shutdown().await;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Keyed {
    label: String,
}

struct KeyedHandler {
    journal: Arc<Journal>,
}

#[async_trait]
impl TaskHandler for KeyedHandler {
    type Request = Keyed;

    async fn handle(&self, request: Keyed, _ctx: &TaskContext) -> anyhow::Result<()> {
        self.journal.record(format!("ran:{}", request.label));
        Ok(())
    }
}

#[tokio::test]
async fn finished_task_under_a_key_is_replaced() {
    let journal = Journal::new();
    let store = Arc::new(InMemoryTaskStore::new());
    let engine = {
        let journal = journal.clone();
        TaskEngine::builder()
            .with_store(store.clone())
            .register(move || KeyedHandler {
                journal: journal.clone(),
            })
            .start()
            .await
            .unwrap()
    };

    let first = engine
        .dispatch_with(
            Keyed { label: "one".into() },
            RunSchedule::Immediate,
            Some("job".into()),
        )
        .await
        .unwrap();
    assert!(wait_until(Duration::from_secs(1), || journal.count_of("ran:one") == 1).await);
    assert!(
        wait_until(Duration::from_secs(1), || {
            store.status_audits_for(first).last().map(|a| a.new_status)
                == Some(TaskStatus::Completed)
        })
        .await
    );

    let second = engine
        .dispatch_with(
            Keyed { label: "two".into() },
            RunSchedule::Immediate,
            Some("job".into()),
        )
        .await
        .unwrap();

    assert_ne!(first, second, "a finished task must be replaced, not reused");
    assert!(wait_until(Duration::from_secs(1), || journal.count_of("ran:two") == 1).await);
    // The finished row was deleted; only the replacement remains.
    assert!(store.get_by_id(first).await.unwrap().is_none());
    assert!(store.get_by_id(second).await.unwrap().is_some());

    engine.shutdown().await;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Parked {
    label: String,
}

struct ParkedHandler;

#[async_trait]
impl TaskHandler for ParkedHandler {
    type Request = Parked;

    async fn handle(&self, _request: Parked, _ctx: &TaskContext) -> anyhow::Result<()> {
        Ok(())
    }
}

#[tokio::test]
async fn in_progress_task_under_a_key_wins() {
    // Simulate the in-progress state directly in storage; the dispatcher
    // must hand back the existing id without touching the row.
    let store = Arc::new(InMemoryTaskStore::new());
    let engine = TaskEngine::builder()
        .with_store(store.clone())
        .register(|| ParkedHandler)
        .start()
        .await
        .unwrap();

    let existing_id = Uuid::now_v7();
    store
        .persist(conveyor::QueuedTask {
            id: existing_id,
            request_type: std::any::type_name::<Parked>().into(),
            handler_type: std::any::type_name::<ParkedHandler>().into(),
            status: TaskStatus::InProgress,
            created_at_utc: chrono::Utc::now(),
            last_execution_utc: None,
            scheduled_execution_utc: None,
            next_run_utc: None,
            request: r#"{"label":"running"}"#.into(),
            exception: None,
            is_recurring: false,
            recurring_task: None,
            recurring_info: None,
            current_run_count: 0,
            max_runs: None,
            run_until: None,
            queue_name: None,
            task_key: Some("busy".into()),
            audit_level: conveyor::AuditLevel::Full,
        })
        .await
        .unwrap();

    let returned = engine
        .dispatch_with(
            Parked { label: "duplicate".into() },
            RunSchedule::Immediate,
            Some("busy".into()),
        )
        .await
        .unwrap();

    assert_eq!(returned, existing_id);
    assert_eq!(store.get_all().await.unwrap().len(), 1);
    let row = store.get_by_id(existing_id).await.unwrap().unwrap();
    assert_eq!(row.request, r#"{"label":"running"}"#);

    engine.shutdown().await;
}
