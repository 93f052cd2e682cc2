//! Startup recovery of persisted, unfinished work.
//!
//! Runs once at engine start, before new dispatches are accepted: scans
//! tasks left in {Queued, Pending, ServiceStopped, InProgress} within their
//! run bounds, via keyset pagination to bound memory, and puts each back
//! where it belongs: the scheduler when its next run is still ahead, its
//! queue otherwise.

use std::sync::Arc;

use anyhow::Result;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::executor::TaskExecutor;
use crate::queue::QueueManager;
use crate::registry::HandlerRegistry;
use crate::scheduler::Scheduler;
use crate::storage::TaskStore;
use crate::task::TaskStatus;

/// What the scan found and did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecoveryReport {
    pub scanned: usize,
    pub requeued: usize,
    pub rescheduled: usize,
    pub skipped: usize,
}

pub async fn run_recovery(
    store: &Arc<dyn TaskStore>,
    registry: &HandlerRegistry,
    scheduler: &Arc<dyn Scheduler>,
    queues: &QueueManager,
    page_size: usize,
) -> Result<RecoveryReport> {
    let mut report = RecoveryReport::default();
    let mut cursor: Option<(DateTime<Utc>, Uuid)> = None;

    loop {
        let page = store
            .retrieve_pending(
                cursor.map(|c| c.0),
                cursor.map(|c| c.1),
                page_size.max(1),
            )
            .await?;
        if page.is_empty() {
            break;
        }
        cursor = page.last().map(|t| (t.created_at_utc, t.id));

        for task in page {
            report.scanned += 1;
            let task_id = task.id;

            if !registry.is_registered(&task.request_type) {
                tracing::warn!(
                    task_id = %task_id,
                    request_type = %task.request_type,
                    "skipping recovery of task with unregistered request type"
                );
                report.skipped += 1;
                continue;
            }

            let executor = match TaskExecutor::from_queued_task(&task) {
                Ok(executor) => executor,
                Err(error) => {
                    tracing::warn!(task_id = %task_id, error = %error, "skipping unrecoverable task");
                    report.skipped += 1;
                    continue;
                }
            };

            match task.next_run_utc {
                Some(next) if next > Utc::now() => {
                    if let Err(error) = store
                        .set_status(task_id, TaskStatus::Pending, None, task.audit_level)
                        .await
                    {
                        tracing::warn!(task_id = %task_id, error = %error, "failed to mark recovered task pending");
                    }
                    scheduler.schedule(executor, Some(next));
                    report.rescheduled += 1;
                }
                _ => {
                    if let Err(error) = store.set_queued(task_id).await {
                        tracing::warn!(task_id = %task_id, error = %error, "failed to mark recovered task queued");
                    }
                    match queues.enqueue(executor).await {
                        Ok(()) => report.requeued += 1,
                        Err(error) => {
                            tracing::warn!(task_id = %task_id, error = %error, "failed to requeue recovered task");
                            report.skipped += 1;
                        }
                    }
                }
            }
        }
    }

    tracing::info!(
        scanned = report.scanned,
        requeued = report.requeued,
        rescheduled = report.rescheduled,
        skipped = report.skipped,
        "recovery scan complete"
    );
    Ok(report)
}
