//! Engine configuration.
//!
//! Hosts configure queues, audit defaults, recovery, persistence-failure
//! policy and the scheduler variant here. Everything has a sensible default;
//! an `EngineConfig::default()` engine runs with the four well-known queues
//! and the single-timer scheduler.

use crate::executor::{BACKGROUND_QUEUE, DEFAULT_QUEUE, HIGH_PRIORITY_QUEUE, RECURRING_QUEUE};
use crate::logs::LogCaptureConfig;
use crate::queue::QueueConfig;
use crate::scheduler::default_shard_count;
use crate::task::AuditLevel;

/// Which scheduler backs the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SchedulerVariant {
    /// One heap, one timer loop. The default.
    #[default]
    SingleTimer,
    /// M independent heaps and loops, routed by task-id hash. Worth it past
    /// roughly 10k schedules/s or 100k in-flight scheduled items.
    Sharded { shards: usize },
}

impl SchedulerVariant {
    /// Sharded with `max(4, available_parallelism)` shards.
    pub fn sharded() -> Self {
        SchedulerVariant::Sharded {
            shards: default_shard_count(),
        }
    }
}

/// Host-facing engine configuration.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Queue definitions; a `default` queue is added if absent.
    pub queues: Vec<QueueConfig>,
    pub default_audit_level: AuditLevel,
    /// Propagate storage write failures to the dispatch caller instead of
    /// logging and continuing.
    pub throw_if_unable_to_persist: bool,
    /// Global kill-switch for lazy handler resolution.
    pub use_lazy_handler_resolution: bool,
    pub recovery_enabled: bool,
    /// Page size for the recovery keyset scan.
    pub recovery_page_size: usize,
    pub scheduler: SchedulerVariant,
    pub log_capture: LogCaptureConfig,
    /// Event bus buffer; slow subscribers past this lag lose events.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            queues: well_known_queues(),
            default_audit_level: AuditLevel::Full,
            throw_if_unable_to_persist: true,
            use_lazy_handler_resolution: true,
            recovery_enabled: true,
            recovery_page_size: 100,
            scheduler: SchedulerVariant::SingleTimer,
            log_capture: LogCaptureConfig::default(),
            event_capacity: 1024,
        }
    }
}

/// The pre-configured queues every engine starts with. Hosts override any
/// of them by supplying a queue with the same name.
pub fn well_known_queues() -> Vec<QueueConfig> {
    vec![
        QueueConfig::builder()
            .name(DEFAULT_QUEUE)
            .capacity(500)
            .max_parallelism(4)
            .build(),
        QueueConfig::builder()
            .name(HIGH_PRIORITY_QUEUE)
            .capacity(200)
            .max_parallelism(8)
            .build(),
        QueueConfig::builder()
            .name(BACKGROUND_QUEUE)
            .capacity(1000)
            .max_parallelism(2)
            .build(),
        QueueConfig::builder()
            .name(RECURRING_QUEUE)
            .capacity(500)
            .max_parallelism(4)
            .build(),
    ]
}
