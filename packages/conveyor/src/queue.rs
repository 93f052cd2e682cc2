//! Named bounded queues and their consumer pools.
//!
//! Each queue is a bounded MPMC channel with a fixed pool of N long-lived
//! consumers competing on it. A dequeued executor is processed synchronously
//! within the consumer (no per-item task spawn), so a queue with
//! parallelism N never has more than N tasks in progress.
//!
//! ```text
//! dispatcher ─► enqueue ─► [named channel, capacity K] ─► consumer 0..N
//!                                                             └─► worker::run_executor
//! ```

use std::sync::Arc;

use dashmap::DashMap;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::error::DispatchError;
use crate::executor::{TaskExecutor, DEFAULT_QUEUE};
use crate::worker::{self, WorkerContext};

/// Behaviour when a queue is at capacity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum WhenFull {
    /// Block the producer until capacity frees up or the host shuts down.
    #[default]
    Wait,
    /// Try the default queue; if that is also full, wait on it.
    FallbackToDefault,
    /// Fail the enqueue with `QueueFull`; the persisted row stays `Queued`
    /// and recovery replays it.
    Drop,
}

/// Configuration of one named queue.
#[derive(Debug, Clone, TypedBuilder)]
pub struct QueueConfig {
    #[builder(setter(into))]
    pub name: String,
    #[builder(default = 500)]
    pub capacity: usize,
    /// Number of competing consumers; the queue's degree of parallelism.
    #[builder(default = 4)]
    pub max_parallelism: usize,
    #[builder(default)]
    pub when_full: WhenFull,
}

pub(crate) struct TaskQueue {
    pub(crate) config: QueueConfig,
    pub(crate) sender: async_channel::Sender<TaskExecutor>,
    pub(crate) receiver: async_channel::Receiver<TaskExecutor>,
}

impl TaskQueue {
    fn new(config: QueueConfig) -> Self {
        let (sender, receiver) = async_channel::bounded(config.capacity.max(1));
        Self {
            config,
            sender,
            receiver,
        }
    }
}

/// Registry of named queues plus their consumer pools.
pub struct QueueManager {
    queues: DashMap<String, Arc<TaskQueue>>,
    host: CancellationToken,
}

impl QueueManager {
    /// Build the manager. A `default` queue is always present.
    pub fn new(configs: Vec<QueueConfig>, host: CancellationToken) -> Self {
        let queues = DashMap::new();
        for config in configs {
            queues.insert(config.name.clone(), Arc::new(TaskQueue::new(config)));
        }
        if !queues.contains_key(DEFAULT_QUEUE) {
            queues.insert(
                DEFAULT_QUEUE.to_string(),
                Arc::new(TaskQueue::new(
                    QueueConfig::builder().name(DEFAULT_QUEUE).build(),
                )),
            );
        }
        Self { queues, host }
    }

    pub(crate) fn queue(&self, name: &str) -> Option<Arc<TaskQueue>> {
        self.queues.get(name).map(|q| q.clone())
    }

    fn default_queue(&self) -> Arc<TaskQueue> {
        // Present by construction.
        self.queues
            .get(DEFAULT_QUEUE)
            .map(|q| q.clone())
            .expect("default queue always exists")
    }

    /// Number of executors currently buffered in a queue.
    pub fn depth(&self, name: &str) -> usize {
        self.queue(name).map(|q| q.sender.len()).unwrap_or(0)
    }

    pub fn queue_names(&self) -> Vec<String> {
        self.queues.iter().map(|e| e.key().clone()).collect()
    }

    /// Route an executor into its queue, applying the full-queue policy.
    pub async fn enqueue(&self, executor: TaskExecutor) -> Result<(), DispatchError> {
        let name = executor.resolved_queue_name().to_string();
        let queue = match self.queue(&name) {
            Some(queue) => queue,
            None => {
                tracing::warn!(queue = %name, "unknown queue, routing to default");
                self.default_queue()
            }
        };

        match queue.config.when_full {
            WhenFull::Wait => self.send_waiting(&queue, executor).await,
            WhenFull::Drop => match queue.sender.try_send(executor) {
                Ok(()) => Ok(()),
                Err(async_channel::TrySendError::Full(_)) => Err(DispatchError::QueueFull {
                    queue: queue.config.name.clone(),
                }),
                Err(async_channel::TrySendError::Closed(_)) => Err(DispatchError::ServiceStopping),
            },
            WhenFull::FallbackToDefault => match queue.sender.try_send(executor) {
                Ok(()) => Ok(()),
                Err(async_channel::TrySendError::Full(executor)) => {
                    let default = self.default_queue();
                    match default.sender.try_send(executor) {
                        Ok(()) => Ok(()),
                        Err(async_channel::TrySendError::Full(executor)) => {
                            self.send_waiting(&default, executor).await
                        }
                        Err(async_channel::TrySendError::Closed(_)) => {
                            Err(DispatchError::ServiceStopping)
                        }
                    }
                }
                Err(async_channel::TrySendError::Closed(_)) => Err(DispatchError::ServiceStopping),
            },
        }
    }

    async fn send_waiting(
        &self,
        queue: &TaskQueue,
        executor: TaskExecutor,
    ) -> Result<(), DispatchError> {
        tokio::select! {
            _ = self.host.cancelled() => Err(DispatchError::ServiceStopping),
            sent = queue.sender.send(executor) => {
                sent.map_err(|_| DispatchError::ServiceStopping)
            }
        }
    }

    /// Spawn every queue's consumer pool. Called once at engine start.
    pub(crate) fn start_consumers(&self, ctx: Arc<WorkerContext>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();
        for entry in self.queues.iter() {
            let queue = entry.value().clone();
            let parallelism = queue.config.max_parallelism.max(1);
            for consumer_index in 0..parallelism {
                let receiver = queue.receiver.clone();
                let queue_name = queue.config.name.clone();
                let host = self.host.clone();
                let ctx = ctx.clone();
                handles.push(tokio::spawn(async move {
                    tracing::debug!(queue = %queue_name, consumer = consumer_index, "consumer starting");
                    loop {
                        tokio::select! {
                            _ = host.cancelled() => break,
                            received = receiver.recv() => match received {
                                Ok(executor) => {
                                    // Errors inside are logged by the worker;
                                    // nothing here may kill the loop.
                                    worker::run_executor(&ctx, executor).await;
                                }
                                // Channel closed and drained.
                                Err(_) => break,
                            }
                        }
                    }
                    tracing::debug!(queue = %queue_name, consumer = consumer_index, "consumer stopped");
                }));
            }
        }
        handles
    }

    /// Close every queue's writer so consumers drain and exit.
    pub fn close(&self) {
        for entry in self.queues.iter() {
            entry.value().sender.close();
        }
    }
}
