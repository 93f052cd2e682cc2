//! Timer scheduler for future work.
//!
//! Future executors sit in a min-heap keyed by their absolute due instant.
//! One background loop sleeps until the smallest key (never longer than a
//! bounded maximum, to cap clock-skew exposure), then drains everything due
//! and hands it to the queue manager. Inserting a new minimum wakes the
//! timer. A negative delay fires immediately; the loop never sleeps below
//! zero.

mod sharded;

pub use sharded::{default_shard_count, ShardedScheduler};

use std::cmp::Ordering;
use std::collections::BinaryHeap;
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use crate::error::DispatchError;
use crate::events::{EventBus, TaskEventData};
use crate::executor::TaskExecutor;
use crate::queue::QueueManager;
use crate::storage::TaskStore;
use crate::task::TaskStatus;

/// Upper bound on one timer sleep; the loop re-evaluates on every wake.
const MAX_TIMER_SLEEP: Duration = Duration::from_secs(90 * 60);

/// Holds future executors until due.
pub trait Scheduler: Send + Sync {
    /// Insert an executor keyed by `override_next_run`, falling back to its
    /// own `execution_time`, falling back to now.
    fn schedule(&self, executor: TaskExecutor, override_next_run: Option<DateTime<Utc>>);

    /// Spawn the background loop(s). Called once at engine start.
    fn start(&self) -> Vec<JoinHandle<()>>;

    /// Number of executors currently held.
    fn pending_count(&self) -> usize;
}

struct ScheduledEntry {
    due: DateTime<Utc>,
    /// Insertion order; ties on `due` fire FIFO.
    seq: u64,
    executor: TaskExecutor,
}

impl PartialEq for ScheduledEntry {
    fn eq(&self, other: &Self) -> bool {
        self.due == other.due && self.seq == other.seq
    }
}

impl Eq for ScheduledEntry {}

impl PartialOrd for ScheduledEntry {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for ScheduledEntry {
    fn cmp(&self, other: &Self) -> Ordering {
        // Reversed: BinaryHeap is a max-heap, we want the earliest due first.
        (other.due, other.seq).cmp(&(self.due, self.seq))
    }
}

struct SchedulerShared {
    heap: Mutex<BinaryHeap<ScheduledEntry>>,
    notify: Notify,
    seq: AtomicU64,
    queues: Arc<QueueManager>,
    store: Arc<dyn TaskStore>,
    events: EventBus,
    host: CancellationToken,
}

/// Single-timer scheduler: one heap, one background loop.
#[derive(Clone)]
pub struct TimerScheduler {
    shared: Arc<SchedulerShared>,
}

impl TimerScheduler {
    pub fn new(
        queues: Arc<QueueManager>,
        store: Arc<dyn TaskStore>,
        events: EventBus,
        host: CancellationToken,
    ) -> Self {
        Self {
            shared: Arc::new(SchedulerShared {
                heap: Mutex::new(BinaryHeap::new()),
                notify: Notify::new(),
                seq: AtomicU64::new(0),
                queues,
                store,
                events,
                host,
            }),
        }
    }

    async fn run_loop(shared: Arc<SchedulerShared>) {
        tracing::debug!("scheduler loop starting");
        loop {
            if shared.host.is_cancelled() {
                break;
            }

            let now = Utc::now();
            let due = {
                let mut heap = shared.heap.lock().unwrap_or_else(|e| e.into_inner());
                let mut due = Vec::new();
                while heap.peek().is_some_and(|top| top.due <= now) {
                    if let Some(entry) = heap.pop() {
                        due.push(entry);
                    }
                }
                due
            };

            for entry in due {
                Self::dispatch_due(&shared, entry.executor).await;
            }

            let sleep_for = {
                let heap = shared.heap.lock().unwrap_or_else(|e| e.into_inner());
                match heap.peek() {
                    Some(top) => (top.due - Utc::now())
                        .to_std()
                        .unwrap_or(Duration::ZERO)
                        .min(MAX_TIMER_SLEEP),
                    None => MAX_TIMER_SLEEP,
                }
            };

            tokio::select! {
                _ = shared.host.cancelled() => break,
                _ = shared.notify.notified() => {}
                _ = tokio::time::sleep(sleep_for) => {}
            }
        }
        tracing::debug!("scheduler loop stopped");
    }

    /// Hand a due executor to its queue; a failed handoff marks the task
    /// Failed and emits an error event.
    async fn dispatch_due(shared: &Arc<SchedulerShared>, executor: TaskExecutor) {
        let task_id = executor.persistence_id;

        // A task-key update or cancel may have superseded this entry while
        // it sat in the heap; the persisted row is the source of truth.
        match shared.store.get_by_id(task_id).await {
            Ok(Some(row)) => {
                if row.status.is_terminal() {
                    tracing::debug!(task_id = %task_id, status = ?row.status, "dropping schedule entry for finished task");
                    return;
                }
                if let (Some(stored_next), Some(due)) = (row.next_run_utc, executor.execution_time)
                {
                    if (stored_next - due).num_milliseconds().abs() > 1_000 {
                        tracing::debug!(task_id = %task_id, "dropping superseded schedule entry");
                        return;
                    }
                }
            }
            // Unpersisted (suppressed write) or degraded storage: run anyway.
            Ok(None) => {}
            Err(error) => {
                tracing::warn!(task_id = %task_id, error = %error, "task lookup failed before queue handoff");
            }
        }

        match shared.queues.enqueue(executor.clone()).await {
            Ok(()) => {
                if let Err(error) = shared.store.set_queued(task_id).await {
                    tracing::warn!(task_id = %task_id, error = %error, "failed to mark scheduled task queued");
                }
            }
            Err(DispatchError::ServiceStopping) => {
                // Shutdown race; the task stays Pending and recovery replays it.
                tracing::debug!(task_id = %task_id, "queue handoff aborted by shutdown");
            }
            Err(error) => {
                tracing::error!(task_id = %task_id, error = %error, "failed to dispatch scheduled task to queue");
                let rendered = error.to_string();
                if let Err(store_error) = shared
                    .store
                    .set_status(
                        task_id,
                        TaskStatus::Failed,
                        Some(rendered.clone()),
                        executor.audit_level,
                    )
                    .await
                {
                    tracing::error!(task_id = %task_id, error = %store_error, "failed to mark task failed");
                }
                shared.events.emit(TaskEventData::error(
                    task_id,
                    executor.request_type.clone(),
                    executor.handler_type.clone(),
                    executor.request_json.clone(),
                    "scheduled task could not be handed to its queue",
                    Some(rendered),
                ));
            }
        }
    }
}

impl Scheduler for TimerScheduler {
    fn schedule(&self, mut executor: TaskExecutor, override_next_run: Option<DateTime<Utc>>) {
        let due = override_next_run
            .or(executor.execution_time)
            .unwrap_or_else(Utc::now);
        executor.execution_time = Some(due);
        let seq = self.shared.seq.fetch_add(1, AtomicOrdering::Relaxed);

        let became_minimum = {
            let mut heap = self.shared.heap.lock().unwrap_or_else(|e| e.into_inner());
            let became_minimum = heap.peek().map_or(true, |top| due < top.due);
            heap.push(ScheduledEntry { due, seq, executor });
            became_minimum
        };
        if became_minimum {
            self.shared.notify.notify_one();
        }
    }

    fn start(&self) -> Vec<JoinHandle<()>> {
        vec![tokio::spawn(Self::run_loop(self.shared.clone()))]
    }

    fn pending_count(&self) -> usize {
        self.shared
            .heap
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .len()
    }
}
