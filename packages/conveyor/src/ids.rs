//! Time-ordered id generation.
//!
//! Persistence ids are UUID v7: time-ordered, so keyset pagination over
//! `(created_at_utc, id)` stays cheap and index-friendly. The trait exists
//! so hosts with their own id scheme can plug it in.

use uuid::Uuid;

/// Supplies ids for persisted rows.
pub trait IdGenerator: Send + Sync {
    fn next_id(&self) -> Uuid;
}

/// Default generator producing UUID v7 ids.
#[derive(Debug, Clone, Copy, Default)]
pub struct TimeOrderedIdGenerator;

impl IdGenerator for TimeOrderedIdGenerator {
    fn next_id(&self) -> Uuid {
        Uuid::now_v7()
    }
}
