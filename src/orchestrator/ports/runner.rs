//! Port through which the executor drives stage collaborators.

use crate::pipeline::domain::{PipelineStage, StageUsage, Task};
use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

/// Failure reported by a stage collaborator.
///
/// The message is retained verbatim on the task when the failure is fatal.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{message}")]
pub struct StageRunnerError {
    /// What went wrong, as reported by the collaborator.
    pub message: String,
}

impl StageRunnerError {
    /// Creates a runner error from a message.
    #[must_use]
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// The result of running one stage to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StageOutcome {
    /// The stage produced its output.
    Completed {
        /// Stage output, recorded into the task context.
        output: Value,
        /// Artifact references attached to any checkpoint raised for the
        /// stage.
        artifact_refs: Vec<String>,
        /// Consumption metrics for the run.
        usage: StageUsage,
    },
    /// The stage determined that earlier output needs rework; the stage is
    /// re-enqueued with the critique routed into its next run.
    FixNeeded {
        /// Structured critique for the re-run.
        feedback: Value,
    },
}

/// Executes a single stage of a task.
///
/// Implementations wrap whatever collaborator performs the stage's work
/// (an agent call, a build, a script). They see the full task so they can
/// read prior stage outputs and the stage's options and rejection feedback
/// from its configuration.
#[async_trait]
pub trait StageRunner: Send + Sync {
    /// Runs `stage` for `task` to a single outcome.
    ///
    /// # Errors
    ///
    /// Returns [`StageRunnerError`] when the collaborator fails; the task is
    /// failed with the message verbatim.
    async fn run_stage(
        &self,
        task: &Task,
        stage: PipelineStage,
    ) -> Result<StageOutcome, StageRunnerError>;
}
