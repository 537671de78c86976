//! Task aggregate root and the task status state machine.

use super::{
    Checkpoint, ParseTaskStatusError, PipelineConfig, PipelineDomainError, PipelineStage,
    StagePlan, TaskId,
};
use chrono::{DateTime, Utc};
use mockable::Clock;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;

/// Task lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Task is created and queued but no stage has started.
    Pending,
    /// A stage is actively executing or scheduled to execute.
    Processing,
    /// Task is suspended on a checkpoint awaiting a review decision.
    AwaitingReview,
    /// Task is suspended on the release checkpoint.
    AwaitingRelease,
    /// Every enabled stage completed.
    Completed,
    /// A stage or checkpoint failed; the error message is retained.
    Failed,
    /// Task was cancelled before reaching a terminal outcome.
    Cancelled,
}

impl TaskStatus {
    /// Returns the canonical storage representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Processing => "processing",
            Self::AwaitingReview => "awaiting_review",
            Self::AwaitingRelease => "awaiting_release",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Returns whether this status admits no further transitions.
    #[must_use]
    pub const fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }

    /// Returns whether transition to `target` is allowed.
    #[must_use]
    pub const fn can_transition_to(self, target: Self) -> bool {
        matches!(
            (self, target),
            (Self::Pending, Self::Processing | Self::Cancelled)
                | (
                    Self::Processing,
                    Self::AwaitingReview
                        | Self::AwaitingRelease
                        | Self::Completed
                        | Self::Failed
                        | Self::Cancelled
                )
                | (
                    Self::AwaitingReview | Self::AwaitingRelease,
                    Self::Processing | Self::Failed | Self::Cancelled
                )
        )
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, formatter: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        formatter.write_str(self.as_str())
    }
}

impl TryFrom<&str> for TaskStatus {
    type Error = ParseTaskStatusError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "pending" => Ok(Self::Pending),
            "processing" => Ok(Self::Processing),
            "awaiting_review" => Ok(Self::AwaitingReview),
            "awaiting_release" => Ok(Self::AwaitingRelease),
            "completed" => Ok(Self::Completed),
            "failed" => Ok(Self::Failed),
            "cancelled" => Ok(Self::Cancelled),
            _ => Err(ParseTaskStatusError(value.to_owned())),
        }
    }
}

/// Token and cost consumption for one stage run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct StageUsage {
    /// Tokens consumed by the stage collaborator.
    pub tokens: u64,
    /// Cost in integer micro-USD, kept exact.
    pub cost_microusd: u64,
    /// Wall-clock duration of the stage run in milliseconds.
    pub duration_ms: u64,
}

/// Accumulated consumption metrics across a task's stage runs.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct UsageTotals {
    /// Total tokens across all stage runs.
    pub total_tokens: u64,
    /// Total cost in integer micro-USD across all stage runs.
    pub total_cost_microusd: u64,
    /// Latest usage per stage.
    pub by_stage: BTreeMap<PipelineStage, StageUsage>,
}

impl UsageTotals {
    /// Folds one stage run's usage into the totals.
    pub fn record(&mut self, stage: PipelineStage, usage: StageUsage) {
        self.total_tokens = self.total_tokens.saturating_add(usage.tokens);
        self.total_cost_microusd = self.total_cost_microusd.saturating_add(usage.cost_microusd);
        self.by_stage.insert(stage, usage);
    }
}

/// Task aggregate root: one unit of work flowing through the pipeline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Task {
    id: TaskId,
    status: TaskStatus,
    current_stage: Option<PipelineStage>,
    plan: StagePlan,
    config: PipelineConfig,
    context: Map<String, Value>,
    usage: UsageTotals,
    error_message: Option<String>,
    retry_count: u32,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// Parameter object for reconstructing a persisted task aggregate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PersistedTaskData {
    /// Persisted task identifier.
    pub id: TaskId,
    /// Persisted lifecycle status.
    pub status: TaskStatus,
    /// Persisted current-stage pointer.
    pub current_stage: Option<PipelineStage>,
    /// Persisted enabled-stage plan.
    pub plan: StagePlan,
    /// Persisted per-stage configuration.
    pub config: PipelineConfig,
    /// Persisted accumulated context.
    pub context: Map<String, Value>,
    /// Persisted usage totals.
    pub usage: UsageTotals,
    /// Persisted error message, if any.
    pub error_message: Option<String>,
    /// Persisted retry counter.
    pub retry_count: u32,
    /// Persisted creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Persisted latest lifecycle timestamp.
    pub updated_at: DateTime<Utc>,
}

impl Task {
    /// Creates a new pending task from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::EmptyStagePlan`] or
    /// [`PipelineDomainError::StagePlanGap`] when stage enablement is not a
    /// contiguous non-empty prefix of the registry order.
    pub fn new(
        config: PipelineConfig,
        initial_context: Map<String, Value>,
        clock: &impl Clock,
    ) -> Result<Self, PipelineDomainError> {
        let plan = config.stage_plan()?;
        let timestamp = clock.utc();
        Ok(Self {
            id: TaskId::new(),
            status: TaskStatus::Pending,
            current_stage: None,
            plan,
            config,
            context: initial_context,
            usage: UsageTotals::default(),
            error_message: None,
            retry_count: 0,
            created_at: timestamp,
            updated_at: timestamp,
        })
    }

    /// Reconstructs a task from persisted storage.
    #[must_use]
    pub fn from_persisted(data: PersistedTaskData) -> Self {
        Self {
            id: data.id,
            status: data.status,
            current_stage: data.current_stage,
            plan: data.plan,
            config: data.config,
            context: data.context,
            usage: data.usage,
            error_message: data.error_message,
            retry_count: data.retry_count,
            created_at: data.created_at,
            updated_at: data.updated_at,
        }
    }

    /// Returns the task identifier.
    #[must_use]
    pub const fn id(&self) -> TaskId {
        self.id
    }

    /// Returns the task lifecycle status.
    #[must_use]
    pub const fn status(&self) -> TaskStatus {
        self.status
    }

    /// Returns the stage the task is currently at, if any has started.
    #[must_use]
    pub const fn current_stage(&self) -> Option<PipelineStage> {
        self.current_stage
    }

    /// Returns the enabled-stage plan.
    #[must_use]
    pub const fn plan(&self) -> &StagePlan {
        &self.plan
    }

    /// Returns the per-stage configuration.
    #[must_use]
    pub const fn config(&self) -> &PipelineConfig {
        &self.config
    }

    /// Returns the accumulated cross-stage context.
    #[must_use]
    pub const fn context(&self) -> &Map<String, Value> {
        &self.context
    }

    /// Returns the accumulated usage totals.
    #[must_use]
    pub const fn usage(&self) -> &UsageTotals {
        &self.usage
    }

    /// Returns the retained error message, if the task failed.
    #[must_use]
    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }

    /// Returns how many times work for this task has been re-enqueued after
    /// a rejection or `fix_needed` outcome.
    #[must_use]
    pub const fn retry_count(&self) -> u32 {
        self.retry_count
    }

    /// Returns the creation timestamp.
    #[must_use]
    pub const fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    /// Returns the latest lifecycle timestamp.
    #[must_use]
    pub const fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Returns whether the task can still be claimed and advanced.
    #[must_use]
    pub const fn is_runnable(&self) -> bool {
        matches!(self.status, TaskStatus::Pending | TaskStatus::Processing)
    }

    /// Returns whether `stage` has recorded output in the context.
    #[must_use]
    pub fn is_stage_complete(&self, stage: PipelineStage) -> bool {
        self.context.contains_key(&stage.output_key())
    }

    /// Moves the task to `target`, enforcing the status state machine.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::InvalidStatusTransition`] when the
    /// state machine forbids the move.
    pub fn transition_to(
        &mut self,
        target: TaskStatus,
        clock: &impl Clock,
    ) -> Result<(), PipelineDomainError> {
        if !self.status.can_transition_to(target) {
            return Err(PipelineDomainError::InvalidStatusTransition {
                from: self.status.as_str().to_owned(),
                to: target.as_str().to_owned(),
            });
        }
        self.status = target;
        self.touch(clock);
        Ok(())
    }

    /// Sets the current-stage pointer ahead of executing `stage`.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::StageNotEnabled`] when the stage is not
    /// part of the task's plan.
    pub fn begin_stage(
        &mut self,
        stage: PipelineStage,
        clock: &impl Clock,
    ) -> Result<(), PipelineDomainError> {
        if !self.plan.contains(stage) {
            return Err(PipelineDomainError::StageNotEnabled(stage));
        }
        self.current_stage = Some(stage);
        self.touch(clock);
        Ok(())
    }

    /// Records a successful stage run: output, usage, and consumed feedback.
    pub fn record_stage_success(
        &mut self,
        stage: PipelineStage,
        output: Value,
        usage: StageUsage,
        clock: &impl Clock,
    ) {
        self.context.insert(stage.output_key(), output);
        self.usage.record(stage, usage);
        self.config.clear_rejection_feedback(stage);
        self.touch(clock);
    }

    /// Routes critique back into `stage` and invalidates its prior output so
    /// the executor re-runs it.
    pub fn apply_stage_feedback(
        &mut self,
        stage: PipelineStage,
        feedback: Value,
        clock: &impl Clock,
    ) {
        self.config.set_rejection_feedback(stage, feedback);
        self.context.remove(&stage.output_key());
        self.retry_count = self.retry_count.saturating_add(1);
        self.touch(clock);
    }

    /// Suspends the task on `checkpoint`.
    ///
    /// The release checkpoint suspends to [`TaskStatus::AwaitingRelease`];
    /// every other checkpoint suspends to [`TaskStatus::AwaitingReview`].
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::InvalidStatusTransition`] when the task
    /// is not processing.
    pub fn suspend_on(
        &mut self,
        checkpoint: Checkpoint,
        clock: &impl Clock,
    ) -> Result<(), PipelineDomainError> {
        let target = match checkpoint {
            Checkpoint::ReleaseNotes => TaskStatus::AwaitingRelease,
            _ => TaskStatus::AwaitingReview,
        };
        self.transition_to(target, clock)
    }

    /// Marks the task failed, retaining the triggering error verbatim.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::InvalidStatusTransition`] when the
    /// current status cannot fail (already terminal, or never started).
    pub fn fail(
        &mut self,
        error: impl Into<String>,
        clock: &impl Clock,
    ) -> Result<(), PipelineDomainError> {
        self.transition_to(TaskStatus::Failed, clock)?;
        self.error_message = Some(error.into());
        Ok(())
    }

    /// Cancels the task from any non-terminal status.
    ///
    /// # Errors
    ///
    /// Returns [`PipelineDomainError::InvalidStatusTransition`] when the task
    /// already reached a terminal status.
    pub fn cancel(&mut self, clock: &impl Clock) -> Result<(), PipelineDomainError> {
        self.transition_to(TaskStatus::Cancelled, clock)
    }

    /// Updates the `updated_at` timestamp to the current clock time.
    fn touch(&mut self, clock: &impl Clock) {
        self.updated_at = clock.utc();
    }
}
