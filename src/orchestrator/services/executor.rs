//! Stage executor: drives a claimed queue item through the task's plan.
//!
//! One claimed item carries the task from its stage through every following
//! stage until the plan ends, a checkpoint suspends it, a `fix_needed`
//! outcome re-enqueues a stage, or a collaborator fails. Stages whose output
//! is already in the task context are skipped, so a resumed task never
//! re-runs completed work.

use crate::approval::{
    ports::ApprovalRepository,
    services::{ApprovalController, ApprovalControllerError},
};
use crate::orchestrator::ports::{StageOutcome, StageRunner};
use crate::pipeline::{
    domain::{Checkpoint, PipelineDomainError, PipelineStage, Task, TaskId, TaskStatus},
    ports::{PipelineNotifier, TaskRepository, TaskRepositoryError, TaskUpdate},
};
use crate::queue::{
    domain::QueueItem,
    ports::QueueRepository,
    services::{QueueScheduler, QueueSchedulerError},
};
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Priority bump applied when a `fix_needed` outcome re-enqueues a stage.
const FIX_BUMP: u8 = 1;

/// Service-level errors for stage execution.
#[derive(Debug, Error)]
pub enum StageExecutorError {
    /// Task repository operation failed.
    #[error(transparent)]
    Repository(#[from] TaskRepositoryError),
    /// Queue scheduling failed.
    #[error(transparent)]
    Queue(#[from] QueueSchedulerError),
    /// Raising a checkpoint failed.
    #[error(transparent)]
    Approval(#[from] ApprovalControllerError),
    /// A domain rule was violated.
    #[error(transparent)]
    Domain(#[from] PipelineDomainError),
}

/// Result type for stage execution.
pub type StageExecutorResult<T> = Result<T, StageExecutorError>;

/// How the execution of one claimed item ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionOutcome {
    /// Every enabled stage completed; the task is done.
    Completed,
    /// A checkpoint suspended the task; it resumes on approval.
    Suspended(Checkpoint),
    /// A stage asked for rework and was re-enqueued.
    FixRequested(PipelineStage),
    /// A collaborator failed; the task is failed with the message.
    Failed(String),
    /// The task was gone or no longer runnable; the item was discarded.
    Stale,
}

/// Executes claimed queue items against the stage collaborator.
pub struct StageExecutor<R, A, T, Q, N, C>
where
    R: StageRunner,
    A: ApprovalRepository,
    T: TaskRepository,
    Q: QueueRepository,
    N: PipelineNotifier,
    C: Clock + Send + Sync,
{
    runner: Arc<R>,
    tasks: Arc<T>,
    scheduler: QueueScheduler<Q, C>,
    approvals: ApprovalController<A, T, Q, N, C>,
    notifier: Arc<N>,
    clock: Arc<C>,
}

impl<R, A, T, Q, N, C> Clone for StageExecutor<R, A, T, Q, N, C>
where
    R: StageRunner,
    A: ApprovalRepository,
    T: TaskRepository,
    Q: QueueRepository,
    N: PipelineNotifier,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            runner: Arc::clone(&self.runner),
            tasks: Arc::clone(&self.tasks),
            scheduler: self.scheduler.clone(),
            approvals: self.approvals.clone(),
            notifier: Arc::clone(&self.notifier),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<R, A, T, Q, N, C> StageExecutor<R, A, T, Q, N, C>
where
    R: StageRunner,
    A: ApprovalRepository,
    T: TaskRepository,
    Q: QueueRepository,
    N: PipelineNotifier,
    C: Clock + Send + Sync,
{
    /// Creates a new executor.
    #[must_use]
    pub const fn new(
        runner: Arc<R>,
        tasks: Arc<T>,
        scheduler: QueueScheduler<Q, C>,
        approvals: ApprovalController<A, T, Q, N, C>,
        notifier: Arc<N>,
        clock: Arc<C>,
    ) -> Self {
        Self {
            runner,
            tasks,
            scheduler,
            approvals,
            notifier,
            clock,
        }
    }

    /// Executes one claimed queue item to a single outcome.
    ///
    /// # Errors
    ///
    /// Returns [`StageExecutorError`] when persistence fails mid-run;
    /// collaborator failures are not errors here, they resolve to
    /// [`ExecutionOutcome::Failed`].
    pub async fn execute(&self, item: &QueueItem) -> StageExecutorResult<ExecutionOutcome> {
        let Some(mut task) = self.tasks.find_by_id(item.task_id).await? else {
            return self.discard_stale(item, "task not found").await;
        };
        if !task.is_runnable() {
            // Cancelled or otherwise settled after the item was enqueued.
            let reason = format!("task is {}", task.status());
            return self.discard_stale(item, &reason).await;
        }
        if task.status() == TaskStatus::Pending {
            task.transition_to(TaskStatus::Processing, &*self.clock)?;
            self.tasks.update(&task).await?;
        }

        let stages: Vec<PipelineStage> = task
            .plan()
            .stages()
            .iter()
            .copied()
            .skip_while(|stage| *stage != item.stage)
            .collect();
        if stages.is_empty() {
            return Err(PipelineDomainError::StageNotEnabled(item.stage).into());
        }

        for stage in stages {
            if task.is_stage_complete(stage) {
                continue;
            }
            task.begin_stage(stage, &*self.clock)?;
            self.tasks.update(&task).await?;
            self.notify(&task, format!("running {stage}")).await;

            match self.runner.run_stage(&task, stage).await {
                Ok(StageOutcome::Completed {
                    output,
                    artifact_refs,
                    usage,
                }) => {
                    task.record_stage_success(stage, output, usage, &*self.clock);
                    self.tasks.update(&task).await?;
                    tracing::info!(
                        task_id = %task.id(),
                        stage = %stage,
                        tokens = usage.tokens,
                        "stage completed"
                    );
                    if task.config().stage(stage).approval_required {
                        self.scheduler.mark_done(item.id).await?;
                        let request = self
                            .approvals
                            .create_request(
                                task.id(),
                                artifact_refs,
                                Some(format!("{stage} output ready for review")),
                                None,
                            )
                            .await?;
                        return Ok(ExecutionOutcome::Suspended(request.checkpoint));
                    }
                }
                Ok(StageOutcome::FixNeeded { feedback }) => {
                    return self.request_fix(item, &mut task, stage, feedback).await;
                }
                Err(err) => {
                    return self.fail_task(item, &mut task, err.message).await;
                }
            }
        }

        task.transition_to(TaskStatus::Completed, &*self.clock)?;
        self.tasks.update(&task).await?;
        self.scheduler.mark_done(item.id).await?;
        self.notify(&task, "all stages complete").await;
        tracing::info!(task_id = %task.id(), "task completed");
        Ok(ExecutionOutcome::Completed)
    }

    /// Looks up a task for a claimed item without executing it.
    ///
    /// # Errors
    ///
    /// Returns [`StageExecutorError::Repository`] when persistence fails.
    pub async fn task_for(&self, id: TaskId) -> StageExecutorResult<Option<Task>> {
        Ok(self.tasks.find_by_id(id).await?)
    }

    async fn request_fix(
        &self,
        item: &QueueItem,
        task: &mut Task,
        stage: PipelineStage,
        feedback: Value,
    ) -> StageExecutorResult<ExecutionOutcome> {
        task.apply_stage_feedback(stage, feedback, &*self.clock);
        self.tasks.update(task).await?;
        self.scheduler.mark_done(item.id).await?;
        self.scheduler
            .enqueue(
                task.id(),
                stage,
                Value::Object(task.context().clone()),
                item.priority.boosted_by(FIX_BUMP),
                "fix_needed",
            )
            .await?;
        self.notify(task, format!("rework requested for {stage}")).await;
        tracing::info!(task_id = %task.id(), stage = %stage, "stage requested rework");
        Ok(ExecutionOutcome::FixRequested(stage))
    }

    async fn fail_task(
        &self,
        item: &QueueItem,
        task: &mut Task,
        message: String,
    ) -> StageExecutorResult<ExecutionOutcome> {
        task.fail(message.clone(), &*self.clock)?;
        self.tasks.update(task).await?;
        self.scheduler.mark_failed(item.id, Some(&message)).await?;
        self.notify(task, message.clone()).await;
        tracing::error!(task_id = %task.id(), error = %message, "task failed");
        Ok(ExecutionOutcome::Failed(message))
    }

    async fn discard_stale(
        &self,
        item: &QueueItem,
        reason: &str,
    ) -> StageExecutorResult<ExecutionOutcome> {
        if let Err(err) = self.scheduler.mark_failed(item.id, Some(reason)).await {
            tracing::debug!(item_id = %item.id, error = %err, "stale item already settled");
        }
        tracing::info!(item_id = %item.id, task_id = %item.task_id, reason, "discarded stale item");
        Ok(ExecutionOutcome::Stale)
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
