//! Diesel row models for approval persistence.

use super::schema::{approval_actions, approval_requests};
use chrono::{DateTime, Utc};
use diesel::prelude::*;
use serde_json::Value;

/// Query result row for approval requests.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = approval_requests)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ApprovalRequestRow {
    /// Request identifier.
    pub id: uuid::Uuid,
    /// Owning task.
    pub task_id: uuid::Uuid,
    /// Stage output under review.
    pub checkpoint: String,
    /// Resolution status.
    pub status: String,
    /// Artifact references attached for review.
    pub artifact_refs: Value,
    /// Brief summary for quick review.
    pub summary: Option<String>,
    /// Structured review context.
    pub details: Option<Value>,
    /// Dashboard ordering priority.
    pub priority: i16,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// When the request expires unattended.
    pub timeout_at: Option<DateTime<Utc>>,
    /// When the request was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Whether an unattended timeout approves.
    pub auto_approve_on_timeout: bool,
}

/// Insert model for approval requests.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = approval_requests)]
pub struct NewApprovalRequestRow {
    /// Request identifier.
    pub id: uuid::Uuid,
    /// Owning task.
    pub task_id: uuid::Uuid,
    /// Stage output under review.
    pub checkpoint: String,
    /// Resolution status.
    pub status: String,
    /// Artifact references attached for review.
    pub artifact_refs: Value,
    /// Brief summary for quick review.
    pub summary: Option<String>,
    /// Structured review context.
    pub details: Option<Value>,
    /// Dashboard ordering priority.
    pub priority: i16,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// When the request expires unattended.
    pub timeout_at: Option<DateTime<Utc>>,
    /// When the request was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Whether an unattended timeout approves.
    pub auto_approve_on_timeout: bool,
}

/// Query result row for approval actions.
#[derive(Debug, Clone, Queryable, Selectable)]
#[diesel(table_name = approval_actions)]
#[diesel(check_for_backend(diesel::pg::Pg))]
pub struct ApprovalActionRow {
    /// Action identifier.
    pub id: uuid::Uuid,
    /// The request acted on.
    pub request_id: uuid::Uuid,
    /// The decision taken.
    pub action: String,
    /// Who took the decision.
    pub actor: String,
    /// Free-text comment.
    pub comment: Option<String>,
    /// Structured feedback for the stage re-run.
    pub feedback: Option<Value>,
    /// When the action was recorded.
    pub created_at: DateTime<Utc>,
}

/// Insert model for approval actions.
#[derive(Debug, Clone, Insertable)]
#[diesel(table_name = approval_actions)]
pub struct NewApprovalActionRow {
    /// Action identifier.
    pub id: uuid::Uuid,
    /// The request acted on.
    pub request_id: uuid::Uuid,
    /// The decision taken.
    pub action: String,
    /// Who took the decision.
    pub actor: String,
    /// Free-text comment.
    pub comment: Option<String>,
    /// Structured feedback for the stage re-run.
    pub feedback: Option<Value>,
    /// When the action was recorded.
    pub created_at: DateTime<Utc>,
}
