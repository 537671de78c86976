//! Checkpoint approval controller.
//!
//! Owns the suspend/decide/resume cycle: it raises requests when a stage
//! completes behind a checkpoint, applies reviewer decisions exactly once
//! via the repository's compare-and-swap resolution, and sweeps expired
//! requests on behalf of the timeout policy.

use crate::approval::{
    domain::{ApprovalAction, ApprovalRequest, ApprovalRequestId, ApprovalStatus, SYSTEM_ACTOR},
    ports::{ApprovalRepository, ApprovalRepositoryError},
};
use crate::pipeline::{
    domain::{Checkpoint, PipelineDomainError, PipelineStage, Task, TaskId, TaskStatus},
    ports::{PipelineNotifier, TaskRepository, TaskRepositoryError, TaskUpdate},
};
use crate::queue::{
    domain::Priority,
    ports::QueueRepository,
    services::{QueueScheduler, QueueSchedulerError},
};
use mockable::Clock;
use serde_json::{Value, json};
use std::sync::Arc;
use thiserror::Error;

/// Priority bump applied when a rejected stage is re-enqueued, so the fix
/// run is served ahead of fresh work at the default priority.
const REVIEW_BUMP: u8 = 2;

/// Service-level errors for approval operations.
#[derive(Debug, Error)]
pub enum ApprovalControllerError {
    /// Approval repository operation failed.
    #[error(transparent)]
    Repository(#[from] ApprovalRepositoryError),
    /// Task repository operation failed.
    #[error(transparent)]
    Task(#[from] TaskRepositoryError),
    /// Queue scheduling failed.
    #[error(transparent)]
    Queue(#[from] QueueSchedulerError),
    /// A domain rule was violated.
    #[error(transparent)]
    Domain(#[from] PipelineDomainError),
    /// The request references a task that no longer exists.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
    /// A request was raised for a task with no stage in progress.
    #[error("task {0} has no stage in progress")]
    NoStageInProgress(TaskId),
}

/// Result type for approval controller operations.
pub type ApprovalControllerResult<T> = Result<T, ApprovalControllerError>;

/// Coordinates checkpoint approvals across the task store, the stage
/// queues, and external observers.
pub struct ApprovalController<A, T, Q, N, C>
where
    A: ApprovalRepository,
    T: TaskRepository,
    Q: QueueRepository,
    N: PipelineNotifier,
    C: Clock + Send + Sync,
{
    approvals: Arc<A>,
    tasks: Arc<T>,
    scheduler: QueueScheduler<Q, C>,
    notifier: Arc<N>,
    clock: Arc<C>,
}

impl<A, T, Q, N, C> Clone for ApprovalController<A, T, Q, N, C>
where
    A: ApprovalRepository,
    T: TaskRepository,
    Q: QueueRepository,
    N: PipelineNotifier,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            approvals: Arc::clone(&self.approvals),
            tasks: Arc::clone(&self.tasks),
            scheduler: self.scheduler.clone(),
            notifier: Arc::clone(&self.notifier),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<A, T, Q, N, C> ApprovalController<A, T, Q, N, C>
where
    A: ApprovalRepository,
    T: TaskRepository,
    Q: QueueRepository,
    N: PipelineNotifier,
    C: Clock + Send + Sync,
{
    /// Creates a new controller.
    #[must_use]
    pub const fn new(
        approvals: Arc<A>,
        tasks: Arc<T>,
        scheduler: QueueScheduler<Q, C>,
        notifier: Arc<N>,
        clock: Arc<C>,
    ) -> Self {
        Self {
            approvals,
            tasks,
            scheduler,
            notifier,
            clock,
        }
    }

    /// Raises a checkpoint request for the task's current stage and suspends
    /// the task until it is resolved.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalRepositoryError::PendingRequestExists`] when a
    /// pending request already exists for the task, and
    /// [`ApprovalControllerError::NoStageInProgress`] when the task has no
    /// current stage.
    pub async fn create_request(
        &self,
        task_id: TaskId,
        artifact_refs: Vec<String>,
        summary: Option<String>,
        details: Option<Value>,
    ) -> ApprovalControllerResult<ApprovalRequest> {
        let mut task = self.load_task(task_id).await?;
        let stage = task
            .current_stage()
            .ok_or(ApprovalControllerError::NoStageInProgress(task_id))?;
        let checkpoint = stage.checkpoint();
        let stage_config = task.config().stage(stage);

        // Validate the suspension before anything is persisted; a refused
        // transition must not leave an orphan pending request behind.
        task.suspend_on(checkpoint, &*self.clock)?;

        let request = ApprovalRequest::new(
            task_id,
            checkpoint,
            artifact_refs,
            summary,
            details,
            Some(stage_config.timeout_minutes),
            stage_config.auto_approve_on_timeout,
            &*self.clock,
        );
        self.approvals.insert(request.clone()).await?;
        self.tasks.update(&task).await?;
        self.notify(&task, format!("awaiting approval at {checkpoint}"))
            .await;
        tracing::info!(
            task_id = %task_id,
            checkpoint = %checkpoint,
            request_id = %request.id,
            timeout_at = ?request.timeout_at,
            "approval request created"
        );
        Ok(request)
    }

    /// Approves a pending request and resumes the pipeline.
    ///
    /// The owning task moves back to processing; the next enabled stage is
    /// enqueued, or the task completes when the approved stage was the last.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalRepositoryError::RequestNotPending`] when another
    /// decision already resolved the request.
    pub async fn approve(
        &self,
        id: ApprovalRequestId,
        actor: &str,
        comment: Option<String>,
        feedback: Option<Value>,
    ) -> ApprovalControllerResult<ApprovalRequest> {
        let request = self
            .approvals
            .resolve(id, ApprovalStatus::Approved, self.clock.utc())
            .await?;
        let action = ApprovalAction::new(
            id,
            ApprovalStatus::Approved,
            actor,
            comment,
            feedback,
            &*self.clock,
        );
        self.approvals.record_action(action).await?;
        self.resume_after_approval(&request).await?;
        tracing::info!(
            request_id = %id,
            task_id = %request.task_id,
            checkpoint = %request.checkpoint,
            actor,
            "approval granted"
        );
        Ok(request)
    }

    /// Rejects a pending request, routing the reviewer's critique back into
    /// the stage and re-enqueueing it at a bumped priority.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::MissingRejectionComment`] when the
    /// comment is empty, and
    /// [`ApprovalRepositoryError::RequestNotPending`] when another decision
    /// already resolved the request.
    pub async fn reject(
        &self,
        id: ApprovalRequestId,
        actor: &str,
        comment: &str,
        feedback: Option<Value>,
    ) -> ApprovalControllerResult<ApprovalRequest> {
        if comment.trim().is_empty() {
            return Err(PipelineDomainError::MissingRejectionComment.into());
        }
        let request = self
            .approvals
            .resolve(id, ApprovalStatus::Rejected, self.clock.utc())
            .await?;
        let stage_feedback = feedback
            .clone()
            .unwrap_or_else(|| json!({ "comment": comment }));
        let action = ApprovalAction::new(
            id,
            ApprovalStatus::Rejected,
            actor,
            Some(comment.to_owned()),
            feedback,
            &*self.clock,
        );
        self.approvals.record_action(action).await?;

        let mut task = self.load_task(request.task_id).await?;
        let stage = request.checkpoint.stage();
        task.transition_to(TaskStatus::Processing, &*self.clock)?;
        task.apply_stage_feedback(stage, stage_feedback, &*self.clock);
        self.tasks.update(&task).await?;
        self.enqueue_stage(
            &task,
            stage,
            Priority::DEFAULT.boosted_by(REVIEW_BUMP),
            "review_bump",
        )
        .await?;
        self.notify(&task, format!("rejected at {}, re-running {stage}", request.checkpoint))
            .await;
        tracing::info!(
            request_id = %id,
            task_id = %request.task_id,
            checkpoint = %request.checkpoint,
            actor,
            "approval rejected"
        );
        Ok(request)
    }

    /// Sweeps expired pending requests, applying each stage's timeout
    /// policy. Returns the number of requests resolved by this sweep.
    ///
    /// Idempotent: requests resolved by a concurrent decision or an earlier
    /// sweep are skipped via the compare-and-swap resolution.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalControllerError::Repository`] when persistence
    /// fails while listing expired requests.
    pub async fn check_timeouts(&self) -> ApprovalControllerResult<usize> {
        let now = self.clock.utc();
        let expired = self.approvals.pending_expired(now).await?;
        let mut resolved = 0usize;
        for request in expired {
            match self.expire_request(&request).await {
                Ok(()) => resolved = resolved.saturating_add(1),
                Err(ApprovalControllerError::Repository(
                    ApprovalRepositoryError::RequestNotPending { .. },
                )) => {
                    // Lost the race to a reviewer or a concurrent sweep.
                }
                Err(err) => {
                    tracing::warn!(
                        request_id = %request.id,
                        task_id = %request.task_id,
                        error = %err,
                        "failed to expire approval request"
                    );
                }
            }
        }
        Ok(resolved)
    }

    /// Lists pending requests, highest priority first then oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalControllerError::Repository`] when persistence
    /// fails.
    pub async fn pending(
        &self,
        task_id: Option<TaskId>,
        checkpoint: Option<Checkpoint>,
    ) -> ApprovalControllerResult<Vec<ApprovalRequest>> {
        Ok(self.approvals.list_pending(task_id, checkpoint).await?)
    }

    /// Fetches a request together with its audit trail, oldest action first.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalRepositoryError::NotFound`] when the request does
    /// not exist.
    pub async fn request_with_actions(
        &self,
        id: ApprovalRequestId,
    ) -> ApprovalControllerResult<(ApprovalRequest, Vec<ApprovalAction>)> {
        let request = self.approvals.find_by_id(id).await?;
        let actions = self.approvals.actions_for(id).await?;
        Ok((request, actions))
    }

    /// Counts requests grouped by status.
    ///
    /// # Errors
    ///
    /// Returns [`ApprovalControllerError::Repository`] when persistence
    /// fails.
    pub async fn status_counts(
        &self,
    ) -> ApprovalControllerResult<Vec<(ApprovalStatus, u64)>> {
        Ok(self.approvals.status_counts().await?)
    }

    async fn expire_request(&self, request: &ApprovalRequest) -> ApprovalControllerResult<()> {
        if request.auto_approve_on_timeout {
            let resolved = self
                .approvals
                .resolve(request.id, ApprovalStatus::Approved, self.clock.utc())
                .await?;
            // The audit trail records the timeout even though the outcome
            // is an approval.
            let action = ApprovalAction::new(
                request.id,
                ApprovalStatus::Timeout,
                SYSTEM_ACTOR,
                Some("auto-approved on timeout".to_owned()),
                None,
                &*self.clock,
            );
            self.approvals.record_action(action).await?;
            self.resume_after_approval(&resolved).await?;
            tracing::info!(
                request_id = %request.id,
                task_id = %request.task_id,
                checkpoint = %request.checkpoint,
                "approval auto-approved on timeout"
            );
            return Ok(());
        }

        self.approvals
            .resolve(request.id, ApprovalStatus::Timeout, self.clock.utc())
            .await?;
        let action = ApprovalAction::new(
            request.id,
            ApprovalStatus::Timeout,
            SYSTEM_ACTOR,
            None,
            None,
            &*self.clock,
        );
        self.approvals.record_action(action).await?;

        let mut task = self.load_task(request.task_id).await?;
        task.fail(
            format!("approval timeout at {}", request.checkpoint),
            &*self.clock,
        )?;
        self.tasks.update(&task).await?;
        self.notify(&task, format!("approval timeout at {}", request.checkpoint))
            .await;
        tracing::warn!(
            request_id = %request.id,
            task_id = %request.task_id,
            checkpoint = %request.checkpoint,
            "approval request timed out"
        );
        Ok(())
    }

    /// Moves the task past an approved checkpoint: on to the next enabled
    /// stage, or to completion when the approved stage was the last.
    async fn resume_after_approval(
        &self,
        request: &ApprovalRequest,
    ) -> ApprovalControllerResult<()> {
        let mut task = self.load_task(request.task_id).await?;
        let approved_stage = request.checkpoint.stage();
        task.transition_to(TaskStatus::Processing, &*self.clock)?;

        if let Some(next) = task.plan().next_after(approved_stage) {
            self.tasks.update(&task).await?;
            self.enqueue_stage(&task, next, Priority::DEFAULT, "approved").await?;
            self.notify(&task, format!("approved, continuing to {next}")).await;
        } else {
            task.transition_to(TaskStatus::Completed, &*self.clock)?;
            self.tasks.update(&task).await?;
            self.notify(&task, "approved, all stages complete").await;
        }
        Ok(())
    }

    async fn enqueue_stage(
        &self,
        task: &Task,
        stage: PipelineStage,
        priority: Priority,
        reason: &str,
    ) -> ApprovalControllerResult<()> {
        self.scheduler
            .enqueue(
                task.id(),
                stage,
                Value::Object(task.context().clone()),
                priority,
                reason,
            )
            .await?;
        Ok(())
    }

    async fn load_task(&self, task_id: TaskId) -> ApprovalControllerResult<Task> {
        self.tasks
            .find_by_id(task_id)
            .await?
            .ok_or(ApprovalControllerError::TaskNotFound(task_id))
    }

    async fn notify(&self, task: &Task, message: impl Into<String>) {
        self.notifier
            .task_update(TaskUpdate::new(
                task.id(),
                task.status(),
                task.current_stage(),
                message,
            ))
            .await;
    }
}
