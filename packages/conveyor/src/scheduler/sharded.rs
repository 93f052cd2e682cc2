//! Sharded scheduler: M independent heaps and timer loops.
//!
//! Executors route to a shard by hashing the task id, so one shard's
//! failure or contention never touches the others. Worth reaching for past
//! roughly 10k schedules/s or 100k in-flight scheduled items; the single
//! timer is the default below that.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::{Scheduler, TimerScheduler};
use crate::events::EventBus;
use crate::executor::TaskExecutor;
use crate::queue::QueueManager;
use crate::storage::TaskStore;
use uuid::Uuid;

/// Default shard count: `max(4, available_parallelism)`.
pub fn default_shard_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        .max(4)
}

pub struct ShardedScheduler {
    shards: Vec<TimerScheduler>,
}

impl ShardedScheduler {
    pub fn new(
        shard_count: usize,
        queues: Arc<QueueManager>,
        store: Arc<dyn TaskStore>,
        events: EventBus,
        host: CancellationToken,
    ) -> Self {
        let shard_count = shard_count.max(1);
        let shards = (0..shard_count)
            .map(|_| {
                TimerScheduler::new(queues.clone(), store.clone(), events.clone(), host.clone())
            })
            .collect();
        Self { shards }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    /// Fold the 128-bit id to 64 bits; the modulo operates on an unsigned
    /// value, so the index can never go negative.
    fn shard_index(&self, task_id: Uuid) -> usize {
        let bits = task_id.as_u128();
        let folded = ((bits >> 64) ^ (bits & u128::from(u64::MAX))) as u64;
        (folded % self.shards.len() as u64) as usize
    }
}

impl Scheduler for ShardedScheduler {
    fn schedule(&self, executor: TaskExecutor, override_next_run: Option<DateTime<Utc>>) {
        let shard = self.shard_index(executor.persistence_id);
        self.shards[shard].schedule(executor, override_next_run);
    }

    fn start(&self) -> Vec<JoinHandle<()>> {
        self.shards.iter().flat_map(|s| s.start()).collect()
    }

    fn pending_count(&self) -> usize {
        self.shards.iter().map(|s| s.pending_count()).sum()
    }
}
