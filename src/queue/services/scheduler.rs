//! Scheduling service over the per-stage priority queues.
//!
//! Wraps the queue repository with priority clamping, the aging sweep, and
//! structured logging. Fairness model: items are served in descending
//! priority then FIFO within a band, and every waiting item's priority rises
//! by one per aging interval, which bounds the worst-case wait of any item.

use crate::pipeline::domain::{PipelineStage, TaskId};
use crate::queue::{
    domain::{AGING_INTERVAL_MINUTES, Priority, QueueItem, QueueItemId},
    ports::{QueueRepository, QueueRepositoryError, StageQueueCounts},
};
use chrono::{DateTime, Duration, Utc};
use mockable::Clock;
use serde_json::Value;
use std::sync::Arc;
use thiserror::Error;

/// Service-level errors for queue scheduling operations.
#[derive(Debug, Error)]
pub enum QueueSchedulerError {
    /// Repository operation failed.
    #[error(transparent)]
    Repository(#[from] QueueRepositoryError),
}

/// Result type for queue scheduler operations.
pub type QueueSchedulerResult<T> = Result<T, QueueSchedulerError>;

/// Per-stage priority queue scheduler.
pub struct QueueScheduler<Q, C>
where
    Q: QueueRepository,
    C: Clock + Send + Sync,
{
    repository: Arc<Q>,
    clock: Arc<C>,
}

impl<Q, C> Clone for QueueScheduler<Q, C>
where
    Q: QueueRepository,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            repository: Arc::clone(&self.repository),
            clock: Arc::clone(&self.clock),
        }
    }
}

impl<Q, C> QueueScheduler<Q, C>
where
    Q: QueueRepository,
    C: Clock + Send + Sync,
{
    /// Creates a new scheduler.
    #[must_use]
    pub const fn new(repository: Arc<Q>, clock: Arc<C>) -> Self {
        Self { repository, clock }
    }

    /// Adds a task to a stage's queue with a clamped priority.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::DuplicateActiveItem`] when an active
    /// item already exists for the (task, stage) pair.
    pub async fn enqueue(
        &self,
        task_id: TaskId,
        stage: PipelineStage,
        context: Value,
        priority: Priority,
        reason: impl Into<String> + Send,
    ) -> QueueSchedulerResult<QueueItem> {
        let item = QueueItem::new(task_id, stage, context, priority, reason, &*self.clock);
        self.repository.insert(&item).await?;
        tracing::info!(
            task_id = %task_id,
            stage = %stage,
            priority = %item.priority,
            reason = %item.priority_reason,
            "enqueued task"
        );
        Ok(item)
    }

    /// Ages the stage's waiting items, then atomically claims the
    /// highest-priority queued item. Returns `None` when the queue is empty.
    ///
    /// # Errors
    ///
    /// Returns [`QueueSchedulerError::Repository`] when persistence fails.
    pub async fn claim_next(
        &self,
        stage: PipelineStage,
    ) -> QueueSchedulerResult<Option<QueueItem>> {
        let now = self.clock.utc();
        self.age_items(Some(stage), now).await?;
        let claimed = self.repository.claim_next(stage, now).await?;
        if let Some(item) = &claimed {
            tracing::info!(
                item_id = %item.id,
                task_id = %item.task_id,
                stage = %stage,
                priority = %item.priority,
                "claimed queue item"
            );
        }
        Ok(claimed)
    }

    /// Sets a queued item's priority to an absolute clamped value.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::NotFound`] or
    /// [`QueueRepositoryError::ItemNotQueued`] per the port contract.
    pub async fn set_priority(
        &self,
        id: QueueItemId,
        value: i64,
        reason: &str,
    ) -> QueueSchedulerResult<QueueItem> {
        let item = self
            .repository
            .set_priority(id, Priority::clamped(value), reason)
            .await?;
        tracing::info!(item_id = %id, priority = %item.priority, reason, "set item priority");
        Ok(item)
    }

    /// Raises a queued item's priority by `delta`, clamped to the maximum.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::NotFound`] or
    /// [`QueueRepositoryError::ItemNotQueued`] per the port contract.
    pub async fn boost_priority(
        &self,
        id: QueueItemId,
        delta: u8,
        reason: &str,
    ) -> QueueSchedulerResult<QueueItem> {
        let item = self
            .repository
            .boost_priority(id, delta.max(1), reason)
            .await?;
        tracing::info!(
            item_id = %id,
            priority = %item.priority,
            reason,
            "boosted item priority"
        );
        Ok(item)
    }

    /// Promotes a queued item to the maximum priority so it is served next.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::NotFound`] or
    /// [`QueueRepositoryError::ItemNotQueued`] per the port contract.
    pub async fn promote_to_max(&self, id: QueueItemId) -> QueueSchedulerResult<QueueItem> {
        let item = self
            .repository
            .set_priority(id, Priority::MAX, "promote")
            .await?;
        tracing::info!(item_id = %id, "promoted item to maximum priority");
        Ok(item)
    }

    /// Sweeps all stages, raising the priority of every item that has waited
    /// at least one aging interval to `min(MAX, MIN + intervals)`. Returns
    /// the number of items raised. Never lowers a priority.
    ///
    /// # Errors
    ///
    /// Returns [`QueueSchedulerError::Repository`] when persistence fails.
    pub async fn apply_aging(&self) -> QueueSchedulerResult<usize> {
        let now = self.clock.utc();
        let raised = self.age_items(None, now).await?;
        if raised > 0 {
            tracing::info!(raised, "aging pass raised queue items");
        }
        Ok(raised)
    }

    /// Returns processing items claimed more than `lease_minutes` ago to
    /// their queues so another worker can pick them up.
    ///
    /// Redelivery is at-least-once: a stage may run twice when a worker is
    /// merely slow, so the lease must exceed the longest expected stage run.
    /// Returns the number of items released.
    ///
    /// # Errors
    ///
    /// Returns [`QueueSchedulerError::Repository`] when persistence fails.
    pub async fn release_stale_claims(
        &self,
        lease_minutes: i64,
    ) -> QueueSchedulerResult<usize> {
        let cutoff = self.clock.utc() - Duration::minutes(lease_minutes);
        let released = self.repository.release_stale(cutoff).await?;
        for item in &released {
            tracing::warn!(
                item_id = %item.id,
                task_id = %item.task_id,
                stage = %item.stage,
                retry_count = item.retry_count,
                "released stale claim for redelivery"
            );
        }
        Ok(released.len())
    }

    /// Marks a claimed item done.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::ItemNotProcessing`] when the item is
    /// not in flight.
    pub async fn mark_done(&self, id: QueueItemId) -> QueueSchedulerResult<QueueItem> {
        Ok(self.repository.mark_done(id, self.clock.utc()).await?)
    }

    /// Marks an active item failed with an optional error message.
    ///
    /// # Errors
    ///
    /// Returns [`QueueRepositoryError::ItemNotActive`] when the item already
    /// reached a terminal status.
    pub async fn mark_failed(
        &self,
        id: QueueItemId,
        error: Option<&str>,
    ) -> QueueSchedulerResult<QueueItem> {
        Ok(self.repository.mark_failed(id, error, self.clock.utc()).await?)
    }

    /// Lists a stage's queue in service order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueSchedulerError::Repository`] when persistence fails.
    pub async fn stage_queue(
        &self,
        stage: PipelineStage,
        include_processing: bool,
    ) -> QueueSchedulerResult<Vec<QueueItem>> {
        Ok(self.repository.list_stage(stage, include_processing).await?)
    }

    /// Lists a task's queued and processing items across all stages.
    ///
    /// # Errors
    ///
    /// Returns [`QueueSchedulerError::Repository`] when persistence fails.
    pub async fn active_for_task(
        &self,
        task_id: TaskId,
    ) -> QueueSchedulerResult<Vec<QueueItem>> {
        Ok(self.repository.active_for_task(task_id).await?)
    }

    /// Returns queued/processing counts per stage in registry order.
    ///
    /// # Errors
    ///
    /// Returns [`QueueSchedulerError::Repository`] when persistence fails.
    pub async fn summary(
        &self,
    ) -> QueueSchedulerResult<Vec<(PipelineStage, StageQueueCounts)>> {
        Ok(self.repository.summary().await?)
    }

    async fn age_items(
        &self,
        stage: Option<PipelineStage>,
        now: DateTime<Utc>,
    ) -> QueueSchedulerResult<usize> {
        let threshold = now - Duration::minutes(AGING_INTERVAL_MINUTES);
        let waiting = self.repository.queued_waiting_since(stage, threshold).await?;
        let mut raised = 0usize;
        for item in waiting {
            let Some(target) = item.aged_target(now) else {
                continue;
            };
            // A concurrent claim can retire the item mid-sweep; those races
            // are skipped, but store failures still surface.
            match self
                .repository
                .raise_priority_floor(item.id, target, "aging")
                .await
            {
                Ok(true) => raised = raised.saturating_add(1),
                Ok(false)
                | Err(
                    QueueRepositoryError::NotFound(_)
                    | QueueRepositoryError::ItemNotQueued { .. },
                ) => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(raised)
    }
}
