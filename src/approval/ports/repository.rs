//! Persistence port for approval requests and their action history.

use crate::approval::domain::{
    ApprovalAction, ApprovalRequest, ApprovalRequestId, ApprovalStatus,
};
use crate::pipeline::domain::{Checkpoint, TaskId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Errors raised by approval repositories.
#[derive(Debug, Clone, Error)]
pub enum ApprovalRepositoryError {
    /// The task already has a pending request; at most one may exist.
    #[error("task {task_id} already has a pending approval request (refused {checkpoint})")]
    PendingRequestExists {
        /// The task with the conflicting request.
        task_id: TaskId,
        /// The checkpoint of the refused request.
        checkpoint: Checkpoint,
    },
    /// No request exists with the given identifier.
    #[error("approval request not found")]
    NotFound,
    /// The request was already resolved when a resolution was attempted.
    #[error("approval request {id} is {status}, not pending")]
    RequestNotPending {
        /// The request that was not pending.
        id: ApprovalRequestId,
        /// Its actual status.
        status: ApprovalStatus,
    },
    /// The underlying store failed.
    #[error("approval persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl ApprovalRepositoryError {
    /// Wraps a backend failure in the persistence variant.
    pub fn persistence(error: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(error))
    }
}

/// Result alias for approval repository operations.
pub type ApprovalRepositoryResult<T> = Result<T, ApprovalRepositoryError>;

/// Persistence operations for approval requests.
///
/// `resolve` is the linchpin: it transitions a request out of `Pending`
/// only if it is still pending, so concurrent reviewers and the timeout
/// sweep cannot both win.
#[async_trait]
pub trait ApprovalRepository: Send + Sync {
    /// Inserts a new pending request.
    ///
    /// Fails with [`ApprovalRepositoryError::PendingRequestExists`] when the
    /// task already has a pending request at any checkpoint; a task is
    /// suspended behind at most one checkpoint at a time.
    async fn insert(&self, request: ApprovalRequest) -> ApprovalRepositoryResult<()>;

    /// Fetches a request by identifier.
    async fn find_by_id(
        &self,
        id: ApprovalRequestId,
    ) -> ApprovalRepositoryResult<ApprovalRequest>;

    /// Resolves a pending request to a terminal status.
    ///
    /// Returns the updated request. Fails with
    /// [`ApprovalRepositoryError::RequestNotPending`] if another resolution
    /// won the race.
    async fn resolve(
        &self,
        id: ApprovalRequestId,
        status: ApprovalStatus,
        resolved_at: DateTime<Utc>,
    ) -> ApprovalRepositoryResult<ApprovalRequest>;

    /// Appends an action to a request's audit trail.
    async fn record_action(&self, action: ApprovalAction) -> ApprovalRepositoryResult<()>;

    /// Lists the audit trail for a request, oldest first.
    async fn actions_for(
        &self,
        id: ApprovalRequestId,
    ) -> ApprovalRepositoryResult<Vec<ApprovalAction>>;

    /// Lists pending requests, highest priority first then oldest first.
    async fn list_pending(
        &self,
        task_id: Option<TaskId>,
        checkpoint: Option<Checkpoint>,
    ) -> ApprovalRepositoryResult<Vec<ApprovalRequest>>;

    /// Finds the single pending request for a task, if any.
    async fn pending_for_task(
        &self,
        task_id: TaskId,
    ) -> ApprovalRepositoryResult<Option<ApprovalRequest>>;

    /// Lists pending requests whose timeout deadline has passed.
    async fn pending_expired(
        &self,
        now: DateTime<Utc>,
    ) -> ApprovalRepositoryResult<Vec<ApprovalRequest>>;

    /// Counts requests grouped by status.
    async fn status_counts(&self)
        -> ApprovalRepositoryResult<Vec<(ApprovalStatus, u64)>>;
}
