//! Audit-trail record of a decision taken on an approval request.

use super::{ApprovalRequestId, ApprovalStatus};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use uuid::Uuid;

/// Unique identifier for an approval action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ApprovalActionId(Uuid);

impl ApprovalActionId {
    /// Creates a new random action identifier.
    #[must_use]
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    /// Creates an action identifier from an existing UUID.
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

impl Default for ApprovalActionId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for ApprovalActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Actor name recorded for decisions taken by the system itself.
pub const SYSTEM_ACTOR: &str = "system";

/// One decision recorded against an approval request.
///
/// Actions are append-only; a request resolved by timeout still carries a
/// record naming the system as the actor.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalAction {
    /// Action identifier.
    pub id: ApprovalActionId,
    /// The request this action was taken on.
    pub request_id: ApprovalRequestId,
    /// The decision taken.
    pub action: ApprovalStatus,
    /// Who took the decision.
    pub actor: String,
    /// Free-text comment; mandatory for rejections.
    pub comment: Option<String>,
    /// Structured feedback handed back to the stage on rejection.
    pub feedback: Option<Value>,
    /// When the action was recorded.
    pub created_at: DateTime<Utc>,
}

impl ApprovalAction {
    /// Records a decision against a request.
    #[must_use]
    pub fn new(
        request_id: ApprovalRequestId,
        action: ApprovalStatus,
        actor: impl Into<String>,
        comment: Option<String>,
        feedback: Option<Value>,
        clock: &impl Clock,
    ) -> Self {
        Self {
            id: ApprovalActionId::new(),
            request_id,
            action,
            actor: actor.into(),
            comment,
            feedback,
            created_at: clock.utc(),
        }
    }
}
