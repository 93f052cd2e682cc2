//! Task model for background execution.
//!
//! A [`QueuedTask`] is the persisted record of one dispatched request. It
//! mirrors everything the engine needs to resume the task after a restart:
//! the serialized request, the handler identity, scheduling state and the
//! recurring configuration. Audit rows ([`StatusAudit`], [`RunsAudit`]) and
//! execution log rows ([`TaskExecutionLog`]) are owned by their task and
//! removed with it.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

// ============================================================================
// Enums
// ============================================================================

/// Lifecycle status of a queued task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created and handed to the engine, not yet inside a queue.
    #[default]
    WaitingQueue,
    /// Sitting in a named queue, waiting for a consumer.
    Queued,
    /// Scheduled for a future instant (delayed or between recurring runs).
    Pending,
    /// A worker is currently executing the handler.
    InProgress,
    Completed,
    Failed,
    Cancelled,
    /// The host shut down while the task was still in flight.
    ServiceStopped,
}

impl TaskStatus {
    /// Terminal statuses never transition again.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed
                | TaskStatus::Failed
                | TaskStatus::Cancelled
                | TaskStatus::ServiceStopped
        )
    }

    /// Whether `next` is a legal successor of `self` in the status machine.
    pub fn can_transition_to(&self, next: TaskStatus) -> bool {
        use TaskStatus::*;
        if self.is_terminal() {
            return false;
        }
        // Graceful shutdown may interrupt any non-terminal state.
        if next == ServiceStopped {
            return true;
        }
        match (self, next) {
            (WaitingQueue, Queued) => true,
            (Pending, Queued) => true,
            (Queued, InProgress) => true,
            (InProgress, Completed | Failed | Cancelled) => true,
            // Recurring tasks park between runs.
            (InProgress, Pending) => true,
            // Cancellation can land before the worker picks the task up.
            (WaitingQueue | Queued | Pending, Cancelled) => true,
            // Dispatch failures surface before the task ever runs.
            (WaitingQueue | Queued | Pending, Failed) => true,
            _ => false,
        }
    }
}

/// How much historical detail is persisted per task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum AuditLevel {
    /// Every status change and every run creates an audit row.
    #[default]
    Full,
    /// Only error status changes create a status audit; every run is recorded.
    Minimal,
    /// Both audit tables receive rows only on failure.
    ErrorsOnly,
    /// No audit rows; only the task columns are updated.
    None,
}

impl AuditLevel {
    /// Whether a transition to `status` produces a [`StatusAudit`] row.
    pub fn records_status(&self, status: TaskStatus) -> bool {
        match self {
            AuditLevel::Full => true,
            AuditLevel::Minimal | AuditLevel::ErrorsOnly => matches!(status, TaskStatus::Failed),
            AuditLevel::None => false,
        }
    }

    /// Whether a finished run produces a [`RunsAudit`] row.
    pub fn records_run(&self, succeeded: bool) -> bool {
        match self {
            AuditLevel::Full | AuditLevel::Minimal => true,
            AuditLevel::ErrorsOnly => !succeeded,
            AuditLevel::None => false,
        }
    }
}

/// Log level for captured execution logs.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "snake_case")]
pub enum LogLevel {
    Trace,
    Debug,
    #[default]
    Info,
    Warn,
    Error,
}

// ============================================================================
// Task record
// ============================================================================

/// Persisted record of a dispatched task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueuedTask {
    pub id: Uuid,

    /// Fully-qualified request type, used to look the handler up again
    /// after a restart.
    pub request_type: String,
    /// Fully-qualified handler type, informational.
    pub handler_type: String,

    pub status: TaskStatus,

    pub created_at_utc: DateTime<Utc>,
    pub last_execution_utc: Option<DateTime<Utc>>,
    pub scheduled_execution_utc: Option<DateTime<Utc>>,
    pub next_run_utc: Option<DateTime<Utc>>,

    /// The request payload, serialized as JSON.
    pub request: String,
    /// Rendered error chain of the last failure, if any.
    pub exception: Option<String>,

    pub is_recurring: bool,
    /// Serialized recurring configuration (JSON), when recurring.
    pub recurring_task: Option<String>,
    /// Human-readable description of the cadence, for dashboards.
    pub recurring_info: Option<String>,
    pub current_run_count: u32,
    pub max_runs: Option<u32>,
    pub run_until: Option<DateTime<Utc>>,

    pub queue_name: Option<String>,
    /// User-supplied deduplication key; at most one non-terminal task per key.
    pub task_key: Option<String>,
    pub audit_level: AuditLevel,
}

impl QueuedTask {
    /// Whether the run bounds still allow another execution at `now`.
    pub fn within_run_bounds(&self, now: DateTime<Utc>) -> bool {
        if let Some(max) = self.max_runs {
            if self.current_run_count > max {
                return false;
            }
        }
        if let Some(until) = self.run_until {
            if until < now {
                return false;
            }
        }
        true
    }
}

// ============================================================================
// Audit and log rows
// ============================================================================

/// Append-only record of a status transition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StatusAudit {
    pub id: Uuid,
    pub queued_task_id: Uuid,
    pub updated_at_utc: DateTime<Utc>,
    pub new_status: TaskStatus,
    pub exception: Option<String>,
}

/// Append-only record of one finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunsAudit {
    pub id: Uuid,
    pub queued_task_id: Uuid,
    pub executed_at: DateTime<Utc>,
    pub status: TaskStatus,
    pub exception: Option<String>,
    pub execution_time_ms: u64,
}

/// One captured log line emitted by a handler during execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskExecutionLog {
    pub id: Uuid,
    pub task_id: Uuid,
    pub timestamp_utc: DateTime<Utc>,
    pub level: LogLevel,
    pub message: String,
    pub exception_details: Option<String>,
    /// Contiguous per task, starting at 0.
    pub sequence_number: u32,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn terminal_statuses_never_transition() {
        for terminal in [
            TaskStatus::Completed,
            TaskStatus::Failed,
            TaskStatus::Cancelled,
            TaskStatus::ServiceStopped,
        ] {
            assert!(terminal.is_terminal());
            for next in [
                TaskStatus::Queued,
                TaskStatus::InProgress,
                TaskStatus::Pending,
                TaskStatus::ServiceStopped,
            ] {
                assert!(!terminal.can_transition_to(next));
            }
        }
    }

    #[test]
    fn happy_path_is_valid() {
        assert!(TaskStatus::WaitingQueue.can_transition_to(TaskStatus::Queued));
        assert!(TaskStatus::Queued.can_transition_to(TaskStatus::InProgress));
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Completed));
    }

    #[test]
    fn recurring_parks_between_runs() {
        assert!(TaskStatus::InProgress.can_transition_to(TaskStatus::Pending));
        assert!(TaskStatus::Pending.can_transition_to(TaskStatus::Queued));
    }

    #[test]
    fn shutdown_interrupts_any_non_terminal() {
        for status in [
            TaskStatus::WaitingQueue,
            TaskStatus::Queued,
            TaskStatus::Pending,
            TaskStatus::InProgress,
        ] {
            assert!(status.can_transition_to(TaskStatus::ServiceStopped));
        }
    }

    #[test]
    fn full_audit_records_everything() {
        assert!(AuditLevel::Full.records_status(TaskStatus::Queued));
        assert!(AuditLevel::Full.records_run(true));
        assert!(AuditLevel::Full.records_run(false));
    }

    #[test]
    fn minimal_audit_records_errors_and_runs() {
        assert!(!AuditLevel::Minimal.records_status(TaskStatus::Completed));
        assert!(AuditLevel::Minimal.records_status(TaskStatus::Failed));
        assert!(AuditLevel::Minimal.records_run(true));
    }

    #[test]
    fn errors_only_audit_skips_successes() {
        assert!(!AuditLevel::ErrorsOnly.records_status(TaskStatus::Completed));
        assert!(AuditLevel::ErrorsOnly.records_status(TaskStatus::Failed));
        assert!(!AuditLevel::ErrorsOnly.records_run(true));
        assert!(AuditLevel::ErrorsOnly.records_run(false));
    }

    #[test]
    fn none_audit_records_nothing() {
        assert!(!AuditLevel::None.records_status(TaskStatus::Failed));
        assert!(!AuditLevel::None.records_run(false));
    }

    #[test]
    fn log_levels_are_ordered() {
        assert!(LogLevel::Trace < LogLevel::Debug);
        assert!(LogLevel::Debug < LogLevel::Info);
        assert!(LogLevel::Info < LogLevel::Warn);
        assert!(LogLevel::Warn < LogLevel::Error);
    }

    #[test]
    fn run_bounds_respect_max_runs() {
        let mut task = sample_task();
        task.max_runs = Some(3);
        task.current_run_count = 3;
        assert!(task.within_run_bounds(Utc::now()));
        task.current_run_count = 4;
        assert!(!task.within_run_bounds(Utc::now()));
    }

    #[test]
    fn queued_task_serde_round_trips_all_fields() {
        let mut task = sample_task();
        task.status = TaskStatus::Pending;
        task.next_run_utc = Some(Utc::now() + chrono::Duration::minutes(5));
        task.is_recurring = true;
        task.recurring_task = Some(r#"{"run_now":true}"#.into());
        task.recurring_info = Some("every 5 minute(s)".into());
        task.current_run_count = 2;
        task.max_runs = Some(10);
        task.run_until = Some(Utc::now() + chrono::Duration::days(30));
        task.task_key = Some("report".into());
        task.exception = Some("boom\n  caused by [0]: io".into());
        task.audit_level = AuditLevel::Minimal;

        let json = serde_json::to_string(&task).unwrap();
        let back: QueuedTask = serde_json::from_str(&json).unwrap();

        assert_eq!(back.id, task.id);
        assert_eq!(back.status, task.status);
        assert_eq!(back.next_run_utc, task.next_run_utc);
        assert_eq!(back.recurring_task, task.recurring_task);
        assert_eq!(back.current_run_count, task.current_run_count);
        assert_eq!(back.max_runs, task.max_runs);
        assert_eq!(back.run_until, task.run_until);
        assert_eq!(back.task_key, task.task_key);
        assert_eq!(back.exception, task.exception);
        assert_eq!(back.audit_level, task.audit_level);
    }

    #[test]
    fn run_bounds_respect_run_until() {
        let mut task = sample_task();
        task.run_until = Some(Utc::now() - chrono::Duration::seconds(1));
        assert!(!task.within_run_bounds(Utc::now()));
    }

    fn sample_task() -> QueuedTask {
        QueuedTask {
            id: Uuid::now_v7(),
            request_type: "test::Request".into(),
            handler_type: "test::Handler".into(),
            status: TaskStatus::WaitingQueue,
            created_at_utc: Utc::now(),
            last_execution_utc: None,
            scheduled_execution_utc: None,
            next_run_utc: None,
            request: "{}".into(),
            exception: None,
            is_recurring: false,
            recurring_task: None,
            recurring_info: None,
            current_run_count: 0,
            max_runs: None,
            run_until: None,
            queue_name: None,
            task_key: None,
            audit_level: AuditLevel::Full,
        }
    }
}
