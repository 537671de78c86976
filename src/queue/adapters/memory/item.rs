//! In-memory stage queue for tests and single-process use.
//!
//! Every mutation runs under one write lock, so the claim is naturally the
//! atomic conditional update the port contract requires.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::pipeline::domain::{PipelineStage, TaskId};
use crate::queue::{
    domain::{Priority, QueueItem, QueueItemId, QueueItemStatus},
    ports::{QueueRepository, QueueRepositoryError, QueueRepositoryResult, StageQueueCounts},
};

/// Thread-safe in-memory queue repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryQueueRepository {
    state: Arc<RwLock<HashMap<QueueItemId, QueueItem>>>,
}

impl InMemoryQueueRepository {
    /// Creates an empty in-memory queue repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(err: impl std::fmt::Display) -> QueueRepositoryError {
    QueueRepositoryError::persistence(std::io::Error::other(err.to_string()))
}

/// Ordering used everywhere a stage queue is listed or claimed: priority
/// descending, then enqueue time ascending.
fn queue_order(a: &QueueItem, b: &QueueItem) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.enqueued_at.cmp(&b.enqueued_at))
}

#[async_trait]
impl QueueRepository for InMemoryQueueRepository {
    async fn insert(&self, item: &QueueItem) -> QueueRepositoryResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        let duplicate = state.values().any(|existing| {
            existing.task_id == item.task_id
                && existing.stage == item.stage
                && existing.status.is_active()
        });
        if duplicate {
            return Err(QueueRepositoryError::DuplicateActiveItem {
                task_id: item.task_id,
                stage: item.stage,
            });
        }
        state.insert(item.id, item.clone());
        Ok(())
    }

    async fn claim_next(
        &self,
        stage: PipelineStage,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<Option<QueueItem>> {
        let mut state = self.state.write().map_err(lock_error)?;
        let best = state
            .values()
            .filter(|item| item.stage == stage && item.status == QueueItemStatus::Queued)
            .min_by(|a, b| queue_order(a, b))
            .map(|item| item.id);
        let Some(id) = best else {
            return Ok(None);
        };
        let Some(item) = state.get_mut(&id) else {
            return Ok(None);
        };
        item.status = QueueItemStatus::Processing;
        item.started_at = Some(now);
        Ok(Some(item.clone()))
    }

    async fn find_by_id(&self, id: QueueItemId) -> QueueRepositoryResult<Option<QueueItem>> {
        let state = self.state.read().map_err(lock_error)?;
        Ok(state.get(&id).cloned())
    }

    async fn set_priority(
        &self,
        id: QueueItemId,
        priority: Priority,
        reason: &str,
    ) -> QueueRepositoryResult<QueueItem> {
        let mut state = self.state.write().map_err(lock_error)?;
        let item = state
            .get_mut(&id)
            .ok_or(QueueRepositoryError::NotFound(id))?;
        if item.status != QueueItemStatus::Queued {
            return Err(QueueRepositoryError::ItemNotQueued {
                id,
                status: item.status,
            });
        }
        item.priority = priority;
        item.priority_reason = reason.to_owned();
        Ok(item.clone())
    }

    async fn raise_priority_floor(
        &self,
        id: QueueItemId,
        floor: Priority,
        reason: &str,
    ) -> QueueRepositoryResult<bool> {
        let mut state = self.state.write().map_err(lock_error)?;
        let item = state
            .get_mut(&id)
            .ok_or(QueueRepositoryError::NotFound(id))?;
        if item.status != QueueItemStatus::Queued {
            return Err(QueueRepositoryError::ItemNotQueued {
                id,
                status: item.status,
            });
        }
        if floor <= item.priority {
            return Ok(false);
        }
        item.priority = floor;
        item.priority_reason = reason.to_owned();
        Ok(true)
    }

    async fn boost_priority(
        &self,
        id: QueueItemId,
        delta: u8,
        reason: &str,
    ) -> QueueRepositoryResult<QueueItem> {
        let mut state = self.state.write().map_err(lock_error)?;
        let item = state
            .get_mut(&id)
            .ok_or(QueueRepositoryError::NotFound(id))?;
        if item.status != QueueItemStatus::Queued {
            return Err(QueueRepositoryError::ItemNotQueued {
                id,
                status: item.status,
            });
        }
        item.priority = item.priority.boosted_by(delta);
        item.priority_reason = reason.to_owned();
        Ok(item.clone())
    }

    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
    ) -> QueueRepositoryResult<Vec<QueueItem>> {
        let mut state = self.state.write().map_err(lock_error)?;
        let mut released = Vec::new();
        for item in state.values_mut() {
            let stale = item.status == QueueItemStatus::Processing
                && item.started_at.is_some_and(|started| started <= cutoff);
            if !stale {
                continue;
            }
            item.status = QueueItemStatus::Queued;
            item.started_at = None;
            item.retry_count = item.retry_count.saturating_add(1);
            released.push(item.clone());
        }
        Ok(released)
    }

    async fn mark_done(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<QueueItem> {
        let mut state = self.state.write().map_err(lock_error)?;
        let item = state
            .get_mut(&id)
            .ok_or(QueueRepositoryError::NotFound(id))?;
        if item.status != QueueItemStatus::Processing {
            return Err(QueueRepositoryError::ItemNotProcessing {
                id,
                status: item.status,
            });
        }
        item.status = QueueItemStatus::Done;
        item.completed_at = Some(now);
        Ok(item.clone())
    }

    async fn mark_failed(
        &self,
        id: QueueItemId,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<QueueItem> {
        let mut state = self.state.write().map_err(lock_error)?;
        let item = state
            .get_mut(&id)
            .ok_or(QueueRepositoryError::NotFound(id))?;
        if !item.status.is_active() {
            return Err(QueueRepositoryError::ItemNotActive {
                id,
                status: item.status,
            });
        }
        item.status = QueueItemStatus::Failed;
        item.error_message = error.map(str::to_owned);
        item.completed_at = Some(now);
        Ok(item.clone())
    }

    async fn list_stage(
        &self,
        stage: PipelineStage,
        include_processing: bool,
    ) -> QueueRepositoryResult<Vec<QueueItem>> {
        let state = self.state.read().map_err(lock_error)?;
        let mut items: Vec<QueueItem> = state
            .values()
            .filter(|item| {
                item.stage == stage
                    && (item.status == QueueItemStatus::Queued
                        || (include_processing && item.status == QueueItemStatus::Processing))
            })
            .cloned()
            .collect();
        items.sort_by(queue_order);
        Ok(items)
    }

    async fn queued_waiting_since(
        &self,
        stage: Option<PipelineStage>,
        threshold: DateTime<Utc>,
    ) -> QueueRepositoryResult<Vec<QueueItem>> {
        let state = self.state.read().map_err(lock_error)?;
        let mut items: Vec<QueueItem> = state
            .values()
            .filter(|item| {
                item.status == QueueItemStatus::Queued
                    && item.enqueued_at <= threshold
                    && stage.is_none_or(|wanted| item.stage == wanted)
            })
            .cloned()
            .collect();
        items.sort_by(|a, b| a.enqueued_at.cmp(&b.enqueued_at));
        Ok(items)
    }

    async fn active_for_task(&self, task_id: TaskId) -> QueueRepositoryResult<Vec<QueueItem>> {
        let state = self.state.read().map_err(lock_error)?;
        Ok(state
            .values()
            .filter(|item| item.task_id == task_id && item.status.is_active())
            .cloned()
            .collect())
    }

    async fn summary(
        &self,
    ) -> QueueRepositoryResult<Vec<(PipelineStage, StageQueueCounts)>> {
        let state = self.state.read().map_err(lock_error)?;
        let mut counts: HashMap<PipelineStage, StageQueueCounts> = HashMap::new();
        for item in state.values() {
            let entry = counts.entry(item.stage).or_default();
            match item.status {
                QueueItemStatus::Queued => entry.queued = entry.queued.saturating_add(1),
                QueueItemStatus::Processing => {
                    entry.processing = entry.processing.saturating_add(1);
                }
                QueueItemStatus::Done | QueueItemStatus::Failed => {}
            }
        }
        Ok(PipelineStage::ORDER
            .into_iter()
            .map(|stage| (stage, counts.get(&stage).copied().unwrap_or_default()))
            .collect())
    }
}
