//! Repository port for stage queue persistence and atomic claiming.

use crate::pipeline::domain::{PipelineStage, TaskId};
use crate::queue::domain::{Priority, QueueItem, QueueItemId, QueueItemStatus};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use thiserror::Error;

/// Result type for queue repository operations.
pub type QueueRepositoryResult<T> = Result<T, QueueRepositoryError>;

/// Queued/processing counts for one stage's queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StageQueueCounts {
    /// Items waiting to be claimed.
    pub queued: u64,
    /// Items claimed and executing.
    pub processing: u64,
}

/// Stage queue persistence contract.
///
/// `claim_next` is the one correctness-critical concurrency primitive in the
/// system: implementations must guarantee that exactly one of N racing
/// callers claims a given item, via an atomic conditional status update
/// rather than a read-then-write sequence.
#[async_trait]
pub trait QueueRepository: Send + Sync {
    /// Inserts a queued item.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::DuplicateActiveItem`] when an item for
    /// the same (task, stage) is already queued or processing.
    async fn insert(&self, item: &QueueItem) -> QueueRepositoryResult<()>;

    /// Atomically claims the highest-priority queued item for `stage`,
    /// breaking ties by earliest enqueue time, moving it to processing and
    /// stamping `started_at` with `now`.
    ///
    /// Returns `None` when no queued item exists.
    async fn claim_next(
        &self,
        stage: PipelineStage,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<Option<QueueItem>>;

    /// Finds an item by identifier.
    ///
    /// Returns `None` when the item does not exist.
    async fn find_by_id(&self, id: QueueItemId) -> QueueRepositoryResult<Option<QueueItem>>;

    /// Sets the priority of a queued item to an absolute value.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::NotFound`] when the item does not
    /// exist, or [`QueueRepositoryError::ItemNotQueued`] when it is no longer
    /// queued (in-flight and finished priorities are immutable).
    async fn set_priority(
        &self,
        id: QueueItemId,
        priority: Priority,
        reason: &str,
    ) -> QueueRepositoryResult<QueueItem>;

    /// Raises a queued item's priority to at least `floor`, never lowering
    /// it. Returns whether the priority changed.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::NotFound`] when the item does not
    /// exist, or [`QueueRepositoryError::ItemNotQueued`] when it is no longer
    /// queued.
    async fn raise_priority_floor(
        &self,
        id: QueueItemId,
        floor: Priority,
        reason: &str,
    ) -> QueueRepositoryResult<bool>;

    /// Raises a queued item's priority by `delta`, clamped to the maximum.
    ///
    /// The bump must be atomic with respect to concurrent priority writes:
    /// implementations apply the delta to the stored value in one
    /// conditional update, not a read-then-write sequence.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::NotFound`] when the item does not
    /// exist, or [`QueueRepositoryError::ItemNotQueued`] when it is no longer
    /// queued.
    async fn boost_priority(
        &self,
        id: QueueItemId,
        delta: u8,
        reason: &str,
    ) -> QueueRepositoryResult<QueueItem>;

    /// Returns every processing item claimed at or before `cutoff` to the
    /// queued state, clearing `started_at` and bumping `retry_count`.
    ///
    /// Backs at-least-once redelivery: an item stranded by a crashed worker
    /// becomes claimable again once its lease expires. Returns the released
    /// items.
    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
    ) -> QueueRepositoryResult<Vec<QueueItem>>;

    /// Marks a processing item done, stamping `completed_at`.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::NotFound`] when the item does not
    /// exist, or [`QueueRepositoryError::ItemNotProcessing`] when it is not
    /// in flight.
    async fn mark_done(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<QueueItem>;

    /// Marks a queued or processing item failed with an optional error,
    /// stamping `completed_at`. Queued items may be failed directly so
    /// cancellation can retract not-yet-claimed work.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::NotFound`] when the item does not
    /// exist, or [`QueueRepositoryError::ItemNotActive`] when it already
    /// reached a terminal status.
    async fn mark_failed(
        &self,
        id: QueueItemId,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<QueueItem>;

    /// Lists a stage's items ordered by priority (descending) then enqueue
    /// time (ascending), optionally including in-flight items.
    async fn list_stage(
        &self,
        stage: PipelineStage,
        include_processing: bool,
    ) -> QueueRepositoryResult<Vec<QueueItem>>;

    /// Returns queued items enqueued at or before `threshold`, optionally
    /// scoped to one stage. Used by the aging sweep.
    async fn queued_waiting_since(
        &self,
        stage: Option<PipelineStage>,
        threshold: DateTime<Utc>,
    ) -> QueueRepositoryResult<Vec<QueueItem>>;

    /// Returns all queued or processing items belonging to `task_id`.
    async fn active_for_task(&self, task_id: TaskId) -> QueueRepositoryResult<Vec<QueueItem>>;

    /// Returns queued/processing counts per stage, in registry order.
    async fn summary(
        &self,
    ) -> QueueRepositoryResult<Vec<(PipelineStage, StageQueueCounts)>>;
}

/// Errors returned by queue repository implementations.
#[derive(Debug, Clone, Error)]
pub enum QueueRepositoryError {
    /// An active item already exists for the (task, stage) pair.
    #[error("an active queue item already exists for task {task_id} at stage {stage}")]
    DuplicateActiveItem {
        /// Owning task.
        task_id: TaskId,
        /// Target stage.
        stage: PipelineStage,
    },

    /// The item was not found.
    #[error("queue item not found: {0}")]
    NotFound(QueueItemId),

    /// The item is not queued, so its priority is immutable.
    #[error("queue item {id} is not queued (status: {status})")]
    ItemNotQueued {
        /// Item identifier.
        id: QueueItemId,
        /// Status the item actually holds.
        status: QueueItemStatus,
    },

    /// The item is not in flight, so it cannot be completed.
    #[error("queue item {id} is not processing (status: {status})")]
    ItemNotProcessing {
        /// Item identifier.
        id: QueueItemId,
        /// Status the item actually holds.
        status: QueueItemStatus,
    },

    /// The item already reached a terminal status.
    #[error("queue item {id} is no longer active (status: {status})")]
    ItemNotActive {
        /// Item identifier.
        id: QueueItemId,
        /// Status the item actually holds.
        status: QueueItemStatus,
    },

    /// Persistence-layer failure.
    #[error("persistence error: {0}")]
    Persistence(Arc<dyn std::error::Error + Send + Sync>),
}

impl QueueRepositoryError {
    /// Wraps a persistence error.
    pub fn persistence(err: impl std::error::Error + Send + Sync + 'static) -> Self {
        Self::Persistence(Arc::new(err))
    }
}
