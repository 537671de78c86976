//! Notification port for task status transitions.
//!
//! Every suspend/resume/complete/fail transition emits an event for external
//! observers (dashboards, chat). Delivery is best-effort and never load
//! bearing: implementations must not fail the calling operation.

use crate::pipeline::domain::{PipelineStage, TaskId, TaskStatus};
use async_trait::async_trait;

/// One task status-transition event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TaskUpdate {
    /// Task the event concerns.
    pub task_id: TaskId,
    /// Status the task moved to.
    pub status: TaskStatus,
    /// Stage the task is at, if any has started.
    pub stage: Option<PipelineStage>,
    /// Human-readable description of the transition.
    pub message: String,
}

impl TaskUpdate {
    /// Creates an update event.
    #[must_use]
    pub fn new(
        task_id: TaskId,
        status: TaskStatus,
        stage: Option<PipelineStage>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            task_id,
            status,
            stage,
            message: message.into(),
        }
    }
}

/// Best-effort observer of task status transitions.
#[async_trait]
pub trait PipelineNotifier: Send + Sync {
    /// Publishes a status-transition event.
    async fn task_update(&self, update: TaskUpdate);
}
