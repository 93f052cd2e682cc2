//! Per-task execution log capture.
//!
//! Handlers log through a [`TaskLogger`] that fans every line out to the
//! host's `tracing` subscriber and, when capture is enabled, into a bounded
//! in-memory buffer. The buffer is drained into storage in one batched
//! write when the task finishes. Entries beyond the cap are dropped from
//! the buffer silently; the host logger still sees them.

use std::sync::Arc;
use std::sync::Mutex;

use chrono::Utc;
use uuid::Uuid;

use crate::error::render_error_chain;
use crate::ids::IdGenerator;
use crate::task::{LogLevel, TaskExecutionLog};

/// Capture settings, per engine or per handler.
#[derive(Debug, Clone)]
pub struct LogCaptureConfig {
    pub enabled: bool,
    /// Buffer cap; overflow is dropped from the buffer only.
    pub max_logs_per_task: usize,
    /// Lines below this level never enter the buffer.
    pub min_level: LogLevel,
}

impl Default for LogCaptureConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            max_logs_per_task: 1000,
            min_level: LogLevel::Info,
        }
    }
}

struct LoggerInner {
    entries: Vec<TaskExecutionLog>,
    next_sequence: u32,
    dropped: u64,
}

/// Logger handed to a handler for the duration of one execution.
///
/// Concurrent calls (e.g. from sub-tasks a handler spawns) serialise
/// through a small lock around the buffer.
pub struct TaskLogger {
    task_id: Uuid,
    config: LogCaptureConfig,
    ids: Arc<dyn IdGenerator>,
    inner: Mutex<LoggerInner>,
}

impl TaskLogger {
    pub fn new(task_id: Uuid, config: LogCaptureConfig, ids: Arc<dyn IdGenerator>) -> Self {
        Self {
            task_id,
            config,
            ids,
            inner: Mutex::new(LoggerInner {
                entries: Vec::new(),
                next_sequence: 0,
                dropped: 0,
            }),
        }
    }

    pub fn task_id(&self) -> Uuid {
        self.task_id
    }

    pub fn trace(&self, message: impl Into<String>) {
        self.log(LogLevel::Trace, message.into(), None);
    }

    pub fn debug(&self, message: impl Into<String>) {
        self.log(LogLevel::Debug, message.into(), None);
    }

    pub fn info(&self, message: impl Into<String>) {
        self.log(LogLevel::Info, message.into(), None);
    }

    pub fn warn(&self, message: impl Into<String>) {
        self.log(LogLevel::Warn, message.into(), None);
    }

    pub fn error(&self, message: impl Into<String>) {
        self.log(LogLevel::Error, message.into(), None);
    }

    /// Log an error together with its rendered cause chain.
    pub fn error_with(&self, message: impl Into<String>, error: &anyhow::Error) {
        self.log(
            LogLevel::Error,
            message.into(),
            Some(render_error_chain(error)),
        );
    }

    /// Fan a line out to the host logger and, when captured, the buffer.
    pub fn log(&self, level: LogLevel, message: String, exception_details: Option<String>) {
        match level {
            LogLevel::Trace => tracing::trace!(task_id = %self.task_id, "{message}"),
            LogLevel::Debug => tracing::debug!(task_id = %self.task_id, "{message}"),
            LogLevel::Info => tracing::info!(task_id = %self.task_id, "{message}"),
            LogLevel::Warn => tracing::warn!(task_id = %self.task_id, "{message}"),
            LogLevel::Error => tracing::error!(task_id = %self.task_id, "{message}"),
        }

        if !self.config.enabled || level < self.config.min_level {
            return;
        }

        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        if inner.entries.len() >= self.config.max_logs_per_task {
            inner.dropped += 1;
            return;
        }
        let sequence_number = inner.next_sequence;
        inner.next_sequence += 1;
        inner.entries.push(TaskExecutionLog {
            id: self.ids.next_id(),
            task_id: self.task_id,
            timestamp_utc: Utc::now(),
            level,
            message,
            exception_details,
            sequence_number,
        });
    }

    /// Number of lines dropped because the buffer was full.
    pub fn dropped(&self) -> u64 {
        self.inner.lock().unwrap_or_else(|e| e.into_inner()).dropped
    }

    /// Drain the captured entries for the batched storage write.
    pub fn drain(&self) -> Vec<TaskExecutionLog> {
        let mut inner = self.inner.lock().unwrap_or_else(|e| e.into_inner());
        std::mem::take(&mut inner.entries)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::TimeOrderedIdGenerator;

    fn capturing_logger(max: usize, min_level: LogLevel) -> TaskLogger {
        TaskLogger::new(
            Uuid::now_v7(),
            LogCaptureConfig {
                enabled: true,
                max_logs_per_task: max,
                min_level,
            },
            Arc::new(TimeOrderedIdGenerator),
        )
    }

    #[test]
    fn sequence_numbers_are_contiguous_from_zero() {
        let logger = capturing_logger(100, LogLevel::Trace);
        logger.info("one");
        logger.warn("two");
        logger.error("three");

        let entries = logger.drain();
        let sequences: Vec<u32> = entries.iter().map(|e| e.sequence_number).collect();
        assert_eq!(sequences, vec![0, 1, 2]);
    }

    #[test]
    fn entries_below_min_level_are_not_buffered() {
        let logger = capturing_logger(100, LogLevel::Warn);
        logger.info("invisible");
        logger.warn("visible");

        let entries = logger.drain();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].message, "visible");
        assert_eq!(entries[0].sequence_number, 0);
    }

    #[test]
    fn overflow_is_dropped_silently() {
        let logger = capturing_logger(2, LogLevel::Trace);
        logger.info("kept 1");
        logger.info("kept 2");
        logger.info("dropped");

        let entries = logger.drain();
        assert_eq!(entries.len(), 2);
        assert_eq!(logger.dropped(), 1);
    }

    #[test]
    fn disabled_capture_buffers_nothing() {
        let logger = TaskLogger::new(
            Uuid::now_v7(),
            LogCaptureConfig::default(),
            Arc::new(TimeOrderedIdGenerator),
        );
        logger.error("not captured");
        assert!(logger.drain().is_empty());
    }

    #[test]
    fn error_with_renders_the_cause_chain() {
        let logger = capturing_logger(10, LogLevel::Trace);
        let error = anyhow::anyhow!("root cause").context("outer");
        logger.error_with("operation failed", &error);

        let entries = logger.drain();
        let details = entries[0].exception_details.as_ref().unwrap();
        assert!(details.contains("outer"));
        assert!(details.contains("root cause"));
    }

    #[test]
    fn drain_resets_the_buffer_but_not_the_sequence() {
        let logger = capturing_logger(10, LogLevel::Trace);
        logger.info("a");
        assert_eq!(logger.drain().len(), 1);
        logger.info("b");
        let entries = logger.drain();
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].sequence_number, 1);
    }
}
