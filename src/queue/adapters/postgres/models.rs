//! Diesel row models for stage queue persistence.

use super::schema::queue_items;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for queue items.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = queue_items)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct QueueItemRow {
    /// Item identifier.
    pub id: uuid::Uuid,
    /// Owning task.
    pub task_id: uuid::Uuid,
    /// Stage whose queue holds the item.
    pub stage: String,
    /// Scheduling priority.
    pub priority: i16,
    /// Label explaining the latest priority value.
    pub priority_reason: String,
    /// Queue status.
    pub status: String,
    /// Pipeline context snapshot.
    pub context: Value,
    /// Re-enqueue counter.
    pub retry_count: i32,
    /// Error recorded on failure.
    pub error_message: Option<String>,
    /// When the item entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// When a worker claimed the item.
    pub started_at: Option<DateTime<Utc>>,
    /// When the item reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}

/// Insert model for queue items.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = queue_items)]
pub struct NewQueueItemRow {
    /// Item identifier.
    pub id: uuid::Uuid,
    /// Owning task.
    pub task_id: uuid::Uuid,
    /// Stage whose queue holds the item.
    pub stage: String,
    /// Scheduling priority.
    pub priority: i16,
    /// Label explaining the latest priority value.
    pub priority_reason: String,
    /// Queue status.
    pub status: String,
    /// Pipeline context snapshot.
    pub context: Value,
    /// Re-enqueue counter.
    pub retry_count: i32,
    /// Error recorded on failure.
    pub error_message: Option<String>,
    /// When the item entered the queue.
    pub enqueued_at: DateTime<Utc>,
    /// When a worker claimed the item.
    pub started_at: Option<DateTime<Utc>>,
    /// When the item reached a terminal status.
    pub completed_at: Option<DateTime<Utc>>,
}
