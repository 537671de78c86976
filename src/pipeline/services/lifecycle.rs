//! Task lifecycle service: creation, lookup, and cancellation.

use crate::approval::{
    domain::{ApprovalAction, ApprovalStatus, SYSTEM_ACTOR},
    ports::{ApprovalRepository, ApprovalRepositoryError},
};
use crate::pipeline::{
    domain::{PipelineConfig, PipelineDomainError, Task, TaskId, TaskStatus},
    ports::{PipelineNotifier, TaskRepository, TaskRepositoryError, TaskUpdate},
};
use crate::queue::{
    domain::Priority,
    ports::QueueRepository,
    services::{QueueScheduler, QueueSchedulerError},
};
use mockable::Clock;
use serde_json::{Map, Value};
use std::sync::Arc;
use thiserror::Error;

/// Service-level errors for task lifecycle operations.
#[derive(Debug, Error)]
pub enum TaskLifecycleError {
    /// Task repository operation failed.
    #[error(transparent)]
    Repository(#[from] TaskRepositoryError),
    /// Queue scheduling failed.
    #[error(transparent)]
    Queue(#[from] QueueSchedulerError),
    /// Approval persistence failed during a cancellation cascade.
    #[error(transparent)]
    Approval(#[from] ApprovalRepositoryError),
    /// A domain rule was violated.
    #[error(transparent)]
    Domain(#[from] PipelineDomainError),
    /// The task was not found.
    #[error("task not found: {0}")]
    TaskNotFound(TaskId),
}

/// Result type for task lifecycle operations.
pub type TaskLifecycleResult<T> = Result<T, TaskLifecycleError>;

/// Parameters for creating a task.
#[derive(Debug, Clone, Default)]
pub struct CreateTaskRequest {
    config: PipelineConfig,
    initial_context: Map<String, Value>,
    priority: Option<Priority>,
}

impl CreateTaskRequest {
    /// Starts a request with the given stage configuration.
    #[must_use]
    pub fn new(config: PipelineConfig) -> Self {
        Self {
            config,
            initial_context: Map::new(),
            priority: None,
        }
    }

    /// Seeds the task's cross-stage context.
    #[must_use]
    pub fn with_context(mut self, context: Map<String, Value>) -> Self {
        self.initial_context = context;
        self
    }

    /// Sets the priority for the first stage's queue item.
    #[must_use]
    pub const fn with_priority(mut self, priority: Priority) -> Self {
        self.priority = Some(priority);
        self
    }
}

/// Creates, looks up, and cancels tasks.
pub struct TaskLifecycleService<T, Q, A, N, C>
where
    T: TaskRepository,
    Q: QueueRepository,
    A: ApprovalRepository,
    N: PipelineNotifier,
    C: Clock + Send + Sync,
{
    tasks: Arc<T>,
    scheduler: QueueScheduler<Q, C>,
    approvals: Arc<A>,
    notifier: Arc<N>,
    clock: Arc<C>,
}

impl<T, Q, A, N, C> Clone for TaskLifecycleService<T, Q, A, N, C>
where
    T: TaskRepository,
    Q: QueueRepository,
    A: ApprovalRepository,
    N: PipelineNotifier,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            tasks: Arc::clone(&self.tasks),
            scheduler: self.scheduler.clone(),
            approvals: Arc::clone(&self.approvals),
            notifier: Arc::clone(&self.notifier),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<T, Q, A, N, C> TaskLifecycleService<T, Q, A, N, C>
where
    T: TaskRepository,
    Q: QueueRepository,
    A: ApprovalRepository,
    N: PipelineNotifier,
    C: Clock + Send + Sync,
{
    /// Creates a new lifecycle service.
    #[must_use]
    pub const fn new(
        tasks: Arc<T>,
        scheduler: QueueScheduler<Q, C>,
        approvals: Arc<A>,
        notifier: Arc<N>,
        clock: Arc<C>,
    ) -> Self {
        Self {
            tasks,
            scheduler,
            approvals,
            notifier,
            clock,
        }
    }

    /// Validates and stores a new task, then enqueues its first stage.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::EmptyStagePlan`] or
    /// [`PipelineDomainError::StagePlanGap`] when the configuration does not
    /// yield a valid plan, and repository or queue errors when persistence
    /// fails.
    pub async fn create_task(
        &self,
        request: CreateTaskRequest,
    ) -> TaskLifecycleResult<Task> {
        let task = Task::new(request.config, request.initial_context, &*self.clock)?;
        // Validation guarantees a non-empty plan.
        let first = task
            .plan()
            .first()
            .ok_or(PipelineDomainError::EmptyStagePlan)?;
        self.tasks.store(&task).await?;
        self.scheduler
            .enqueue(
                task.id(),
                first,
                Value::Object(task.context().clone()),
                request.priority.unwrap_or(Priority::DEFAULT),
                "created",
            )
            .await?;
        self.notifier
            .task_update(TaskUpdate::new(
                task.id(),
                task.status(),
                None,
                format!("task created, queued for {first}"),
            ))
            .await;
        tracing::info!(
            task_id = %task.id(),
            first_stage = %first,
            stages = task.plan().stages().len(),
            "task created"
        );
        Ok(task)
    }

    /// Finds a task by identifier.
    ///
    /// # Errors
    ///
    /// Returns [`TaskLifecycleError::TaskNotFound`] when no task exists with
    /// the identifier.
    pub async fn find(&self, id: TaskId) -> TaskLifecycleResult<Task> {
        self.tasks
            .find_by_id(id)
            .await?
            .ok_or(TaskLifecycleError::TaskNotFound(id))
    }

    /// Lists tasks, optionally filtered by status, newest first.
    ///
    /// # Errors
    ///
    /// Returns [`TaskLifecycleError::Repository`] when persistence fails.
    pub async fn list(&self, status: Option<TaskStatus>) -> TaskLifecycleResult<Vec<Task>> {
        Ok(self.tasks.list(status).await?)
    }

    /// Cancels a task and cascades: active queue items are retracted and any
    /// pending approval request is resolved with a system rejection.
    ///
    /// Workers that already claimed an item for the task notice the
    /// cancelled status when they next load the task and discard the item.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::InvalidStatusTransition`] when the task
    /// already reached a terminal status.
    pub async fn cancel(&self, id: TaskId) -> TaskLifecycleResult<Task> {
        let mut task = self.find(id).await?;
        task.cancel(&*self.clock)?;
        self.tasks.update(&task).await?;

        for item in self.scheduler.active_for_task(id).await? {
            // Items claimed mid-cancel are reconciled lazily by the worker.
            if let Err(err) = self
                .scheduler
                .mark_failed(item.id, Some("task cancelled"))
                .await
            {
                tracing::debug!(item_id = %item.id, error = %err, "queue item already settled");
            }
        }

        if let Some(request) = self.approvals.pending_for_task(id).await? {
            match self
                .approvals
                .resolve(request.id, ApprovalStatus::Rejected, self.clock.utc())
                .await
            {
                Ok(_) => {
                    let action = ApprovalAction::new(
                        request.id,
                        ApprovalStatus::Rejected,
                        SYSTEM_ACTOR,
                        Some("task cancelled".to_owned()),
                        None,
                        &*self.clock,
                    );
                    self.approvals.record_action(action).await?;
                }
                Err(ApprovalRepositoryError::RequestNotPending { .. }) => {}
                Err(err) => return Err(err.into()),
            }
        }

        self.notifier
            .task_update(TaskUpdate::new(
                id,
                task.status(),
                task.current_stage(),
                "task cancelled",
            ))
            .await;
        tracing::info!(task_id = %id, "task cancelled");
        Ok(task)
    }
}
