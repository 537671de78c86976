//! Domain model for pipeline tasks.
//!
//! Covers the static stage registry, validated stage plans, typed per-stage
//! configuration, and the task aggregate with its status state machine. All
//! infrastructure concerns stay outside the domain boundary.

mod config;
mod error;
mod ids;
mod stage;
mod task;

pub use config::{DEFAULT_APPROVAL_TIMEOUT_MINUTES, PipelineConfig, StageConfig};
pub use error::{
    ParseCheckpointError, ParsePipelineStageError, ParseTaskStatusError, PipelineDomainError,
};
pub use ids::TaskId;
pub use stage::{Checkpoint, PipelineStage, StagePlan};
pub use task::{PersistedTaskData, StageUsage, Task, TaskStatus, UsageTotals};
