//! Error types for pipeline domain validation and parsing.

use super::PipelineStage;
use thiserror::Error;

/// Errors returned while constructing or mutating pipeline domain values.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum PipelineDomainError {
    /// No stage was enabled in the requested configuration.
    #[error("at least one pipeline stage must be enabled")]
    EmptyStagePlan,

    /// An enabled stage follows a disabled one in the registry order.
    #[error("cannot enable {0}: stages must be enabled sequentially without gaps")]
    StagePlanGap(PipelineStage),

    /// The requested status change violates the task state machine.
    #[error("invalid task status transition from {from} to {to}")]
    InvalidStatusTransition {
        /// Status the task currently holds.
        from: String,
        /// Status the caller attempted to reach.
        to: String,
    },

    /// The stage is not part of the task's enabled stage plan.
    #[error("stage {0} is not enabled for this task")]
    StageNotEnabled(PipelineStage),

    /// A rejection comment was required but missing or blank.
    #[error("a rejection comment is required")]
    MissingRejectionComment,
}

/// Error returned while parsing task statuses from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown task status: {0}")]
pub struct ParseTaskStatusError(pub String);

/// Error returned while parsing pipeline stages from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown pipeline stage: {0}")]
pub struct ParsePipelineStageError(pub String);

/// Error returned while parsing checkpoints from persistence.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
#[error("unknown checkpoint: {0}")]
pub struct ParseCheckpointError(pub String);
