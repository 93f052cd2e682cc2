//! Lifecycle event bus.
//!
//! # Guarantees
//!
//! - **At-most-once delivery**: slow receivers may miss events
//! - **In-memory only**: events are not persisted
//! - **No replay**: lagged receivers get `RecvError::Lagged`
//!
//! Monitoring surfaces subscribe here; the engine's own correctness never
//! depends on a subscriber being present. Durable history lives in the
//! audit tables, not on the bus.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use crate::task::TaskExecutionLog;

/// Default channel capacity for the event bus.
const DEFAULT_CAPACITY: usize = 1024;

/// Severity of a lifecycle event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Severity {
    Information,
    Warning,
    Error,
}

/// One lifecycle event emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskEventData {
    pub task_id: Uuid,
    pub event_at_utc: DateTime<Utc>,
    pub severity: Severity,
    pub request_type: String,
    pub handler_type: String,
    pub request_json: String,
    pub message: String,
    pub exception: Option<String>,
    /// Captured execution logs, attached to completion events when log
    /// capture is enabled.
    pub execution_logs: Option<Vec<TaskExecutionLog>>,
}

impl TaskEventData {
    pub fn info(
        task_id: Uuid,
        request_type: impl Into<String>,
        handler_type: impl Into<String>,
        request_json: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self::build(
            task_id,
            Severity::Information,
            request_type,
            handler_type,
            request_json,
            message,
            None,
        )
    }

    pub fn warning(
        task_id: Uuid,
        request_type: impl Into<String>,
        handler_type: impl Into<String>,
        request_json: impl Into<String>,
        message: impl Into<String>,
        exception: Option<String>,
    ) -> Self {
        Self::build(
            task_id,
            Severity::Warning,
            request_type,
            handler_type,
            request_json,
            message,
            exception,
        )
    }

    pub fn error(
        task_id: Uuid,
        request_type: impl Into<String>,
        handler_type: impl Into<String>,
        request_json: impl Into<String>,
        message: impl Into<String>,
        exception: Option<String>,
    ) -> Self {
        Self::build(
            task_id,
            Severity::Error,
            request_type,
            handler_type,
            request_json,
            message,
            exception,
        )
    }

    #[allow(clippy::too_many_arguments)]
    fn build(
        task_id: Uuid,
        severity: Severity,
        request_type: impl Into<String>,
        handler_type: impl Into<String>,
        request_json: impl Into<String>,
        message: impl Into<String>,
        exception: Option<String>,
    ) -> Self {
        Self {
            task_id,
            event_at_utc: Utc::now(),
            severity,
            request_type: request_type.into(),
            handler_type: handler_type.into(),
            request_json: request_json.into(),
            message: message.into(),
            exception,
            execution_logs: None,
        }
    }

    pub fn with_execution_logs(mut self, logs: Vec<TaskExecutionLog>) -> Self {
        self.execution_logs = Some(logs);
        self
    }
}

/// Broadcast bus for [`TaskEventData`].
#[derive(Clone)]
pub struct EventBus {
    sender: broadcast::Sender<TaskEventData>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CAPACITY)
    }

    /// Capacity bounds how many events a slow receiver can lag behind.
    pub fn with_capacity(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity);
        Self { sender }
    }

    /// Emit an event to all subscribers (fire-and-forget).
    ///
    /// Returns the number of receivers that got the event.
    pub fn emit(&self, event: TaskEventData) -> usize {
        self.sender.send(event).unwrap_or(0)
    }

    /// Subscribe to events emitted after this call.
    pub fn subscribe(&self) -> broadcast::Receiver<TaskEventData> {
        self.sender.subscribe()
    }

    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("subscriber_count", &self.subscriber_count())
            .finish()
    }
}
