//! Per-task cancellation registry.
//!
//! Maps task ids to cancellation tokens, each a child of the host token so
//! shutdown reaches every running task. Also carries the cancel blacklist:
//! ids cancelled between persist and dequeue, checked by the worker loop
//! before execution so the cancel cannot race the queue.

use dashmap::{DashMap, DashSet};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

pub struct CancellationRegistry {
    host: CancellationToken,
    tokens: DashMap<Uuid, CancellationToken>,
    blacklist: DashSet<Uuid>,
}

impl CancellationRegistry {
    pub fn new(host: CancellationToken) -> Self {
        Self {
            host,
            tokens: DashMap::new(),
            blacklist: DashSet::new(),
        }
    }

    /// The host token all task tokens descend from.
    pub fn host_token(&self) -> &CancellationToken {
        &self.host
    }

    /// Create (or return the existing) token for a task.
    pub fn create_token(&self, task_id: Uuid) -> CancellationToken {
        self.tokens
            .entry(task_id)
            .or_insert_with(|| self.host.child_token())
            .clone()
    }

    /// Trip the task's token, if one exists. Idempotent.
    pub fn cancel_token_for_task(&self, task_id: Uuid) {
        if let Some(token) = self.tokens.get(&task_id) {
            token.cancel();
        }
    }

    /// Drop the task's token. Idempotent.
    pub fn remove(&self, task_id: Uuid) {
        self.tokens.remove(&task_id);
    }

    /// Mark an id so the worker loop discards it before execution.
    pub fn add_to_blacklist(&self, task_id: Uuid) {
        self.blacklist.insert(task_id);
    }

    /// Check-and-clear the blacklist mark for an id.
    pub fn take_blacklisted(&self, task_id: Uuid) -> bool {
        self.blacklist.remove(&task_id).is_some()
    }

    pub fn active_tokens(&self) -> usize {
        self.tokens.len()
    }
}
