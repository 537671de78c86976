//! Approval request aggregate: a checkpoint suspension point.

use super::ParseApprovalStatusError;
use crate::pipeline::domain::{Checkpoint, TaskId};
use chrono::{DateTime, Duration, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an approval request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalRequestId(Uuid);

impl ApprovalRequestId {
    /// Creates a new random request identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates a request identifier from an existing UUID.
    #[must_use]
    pub const fn from_uuid(uuid: Uuid) -> Self {
        Self(uuid)
    }

    /// Returns the wrapped UUID.
    #[must_use]
    pub const fn into_inner(self) -> Uuid {
        self.0
    }
}

impl Default for ApprovalRequestId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApprovalRequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Approval request status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ApprovalStatus {
    /// Awaiting a decision.
    Pending,
    /// Approved by a reviewer or by timeout auto-approval.
    Approved,
    /// Rejected by a reviewer; the stage will re-run with feedback.
    Rejected,
    /// Expired unattended without auto-approval; fatal to the task.
    Timeout,
}

impl ApprovalStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Approved => "approved",
            Self::Rejected => "rejected",
            Self::Timeout => "timeout",
        }
    }

    /// Returns whether this status is a resolution (terminal).
    #[must_use]
    pub const fn is_resolved(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

impl fmt::Display for ApprovalStatus {
    fn fmt(&self, formatter: &mut fmt::Formatter<'_>) -> fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for ApprovalStatus {
    type Error = ParseApprovalStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "pending" => Ok(Self::Pending),
            "approved" => Ok(Self::Approved),
            "rejected" => Ok(Self::Rejected),
            "timeout" => Ok(Self::Timeout),
            _ => Err(ParseApprovalStatusError(value.to_owned())),
        }
    }
}

/// A checkpoint suspension point awaiting a human (or timeout) decision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalRequest {
    /// Request identifier.
    pub id: ApprovalRequestId,
    /// Owning task.
    pub task_id: TaskId,
    /// Which stage output is under review.
    pub checkpoint: Checkpoint,
    /// Resolution status.
    pub status: ApprovalStatus,
    /// Artifact references attached for review.
    pub artifact_refs: Vec<String>,
    /// Brief summary for quick review.
    pub summary: Option<String>,
    /// Structured review context (diff stats, verdicts).
    pub details: Option<Value>,
    /// Dashboard ordering priority derived from the checkpoint.
    pub priority: i16,
    /// When the request was created.
    pub created_at: DateTime<Utc>,
    /// When the request expires unattended, if a timeout was set.
    pub timeout_at: Option<DateTime<Utc>>,
    /// When the request was resolved.
    pub resolved_at: Option<DateTime<Utc>>,
    /// Whether an unattended timeout approves instead of failing the task.
    pub auto_approve_on_timeout: bool,
}

impl ApprovalRequest {
    /// Creates a pending request for a checkpoint.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        checkpoint: Checkpoint,
        artifact_refs: Vec<String>,
        summary: Option<String>,
        details: Option<Value>,
        timeout_minutes: Option<i64>,
        auto_approve_on_timeout: bool,
        clock: &impl Clock,
    ) -> Self {
        let created_at = clock.utc();
        Self {
            id: ApprovalRequestId::new(),
            task_id,
            checkpoint,
            status: ApprovalStatus::Pending,
            artifact_refs,
            summary,
            details,
            priority: checkpoint.review_priority(),
            created_at,
            timeout_at: timeout_minutes.map(|minutes| created_at + Duration::minutes(minutes)),
            resolved_at: None,
            auto_approve_on_timeout,
        }
    }

    /// Returns whether the request is still awaiting a decision.
    #[must_use]
    pub const fn is_pending(&self) -> bool {
        matches!(self.status, ApprovalStatus::Pending)
    }

    /// Returns whether the request is pending and past its timeout.
    #[must_use]
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.is_pending() && self.timeout_at.is_some_and(|deadline| deadline <= now)
    }
}
