//! Diesel row models for task persistence.

use super::schema::tasks;
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for task records.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = tasks)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct TaskRow {
    /// Task identifier.
    pub id: uuid::Uuid,
    /// Lifecycle status.
    pub status: String,
    /// Current-stage pointer.
    pub current_stage: Option<String>,
    /// Enabled-stage plan JSON payload.
    pub plan: Value,
    /// Per-stage configuration JSON payload.
    pub config: Value,
    /// Accumulated context JSON payload.
    pub context: Value,
    /// Usage totals JSON payload.
    pub usage: Value,
    /// Retained error message.
    pub error_message: Option<String>,
    /// Rework counter.
    pub retry_count: i32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}

/// Insert model for task records.
#[derive(Debug, Clone, Insertable, AsChangeset)]
#[diesel(table_name = tasks)]
pub struct NewTaskRow {
    /// Task identifier.
    pub id: uuid::Uuid,
    /// Lifecycle status.
    pub status: String,
    /// Current-stage pointer.
    pub current_stage: Option<String>,
    /// Enabled-stage plan JSON payload.
    pub plan: Value,
    /// Per-stage configuration JSON payload.
    pub config: Value,
    /// Accumulated context JSON payload.
    pub context: Value,
    /// Usage totals JSON payload.
    pub usage: Value,
    /// Retained error message.
    pub error_message: Option<String>,
    /// Rework counter.
    pub retry_count: i32,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last update timestamp.
    pub updated_at: DateTime<Utc>,
}
