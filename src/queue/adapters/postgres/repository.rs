//! `PostgreSQL` repository implementation for stage queues.
//!
//! The claim is a compare-and-swap: a candidate row is selected, then moved
//! to processing with an `UPDATE … WHERE id = … AND status = 'queued'`.
//! When another worker wins the race the row count is zero and selection
//! retries with the next candidate.

use super::{
    models::{NewQueueItemRow, QueueItemRow},
    schema::queue_items,
};
use crate::pipeline::domain::{PipelineStage, TaskId};
use crate::queue::{
    domain::{Priority, QueueItem, QueueItemId, QueueItemStatus},
    ports::{QueueRepository, QueueRepositoryError, QueueRepositoryResult, StageQueueCounts},
};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::collections::HashMap;

/// `PostgreSQL` connection pool type shared by the queue adapters.
pub type QueuePgPool = Pool<ConnectionManager<PgConnection>>;

const QUEUED: &str = "queued";
const PROCESSING: &str = "processing";

/// `PostgreSQL`-backed queue repository.
#[derive(Debug, Clone)]
pub struct PostgresQueueRepository {
    pool: QueuePgPool,
}

impl PostgresQueueRepository {
    /// Creates a new repository from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: QueuePgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> QueueRepositoryResult<T>
    where
        F: FnOnce(&mut PgConnection) -> QueueRepositoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(QueueRepositoryError::persistence)?;
            f(&mut connection)
        })
        .await
        .map_err(QueueRepositoryError::persistence)?
    }
}

#[async_trait]
impl QueueRepository for PostgresQueueRepository {
    async fn insert(&self, item: &QueueItem) -> QueueRepositoryResult<()> {
        let new_row = to_row(item);
        let task_id = item.task_id;
        let stage = item.stage;

        self.run_blocking(move |connection| {
            // The partial unique index still enforces the invariant inside
            // the TOCTOU window; this pre-check improves error reporting.
            let active: i64 = queue_items::table
                .filter(queue_items::task_id.eq(task_id.into_inner()))
                .filter(queue_items::stage.eq(stage.as_str()))
                .filter(queue_items::status.eq_any([QUEUED, PROCESSING]))
                .count()
                .get_result(connection)
                .map_err(QueueRepositoryError::persistence)?;
            if active > 0 {
                return Err(QueueRepositoryError::DuplicateActiveItem { task_id, stage });
            }

            diesel::insert_into(queue_items::table)
                .values(&new_row)
                .execute(connection)
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        QueueRepositoryError::DuplicateActiveItem { task_id, stage }
                    }
                    _ => QueueRepositoryError::persistence(err),
                })?;
            Ok(())
        })
        .await
    }

    async fn claim_next(
        &self,
        stage: PipelineStage,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<Option<QueueItem>> {
        self.run_blocking(move |connection| {
            loop {
                let candidate: Option<uuid::Uuid> = queue_items::table
                    .filter(queue_items::stage.eq(stage.as_str()))
                    .filter(queue_items::status.eq(QUEUED))
                    .order((queue_items::priority.desc(), queue_items::enqueued_at.asc()))
                    .select(queue_items::id)
                    .first(connection)
                    .optional()
                    .map_err(QueueRepositoryError::persistence)?;
                let Some(id) = candidate else {
                    return Ok(None);
                };

                let claimed = diesel::update(
                    queue_items::table
                        .filter(queue_items::id.eq(id))
                        .filter(queue_items::status.eq(QUEUED)),
                )
                .set((
                    queue_items::status.eq(PROCESSING),
                    queue_items::started_at.eq(Some(now)),
                ))
                .execute(connection)
                .map_err(QueueRepositoryError::persistence)?;

                if claimed == 1 {
                    let row = queue_items::table
                        .filter(queue_items::id.eq(id))
                        .select(QueueItemRow::as_select())
                        .first::<QueueItemRow>(connection)
                        .map_err(QueueRepositoryError::persistence)?;
                    return row_to_item(row).map(Some);
                }
                // Lost the race for this candidate; try the next one.
            }
        })
        .await
    }

    async fn find_by_id(&self, id: QueueItemId) -> QueueRepositoryResult<Option<QueueItem>> {
        self.run_blocking(move |connection| {
            let row = queue_items::table
                .filter(queue_items::id.eq(id.into_inner()))
                .select(QueueItemRow::as_select())
                .first::<QueueItemRow>(connection)
                .optional()
                .map_err(QueueRepositoryError::persistence)?;
            row.map(row_to_item).transpose()
        })
        .await
    }

    async fn set_priority(
        &self,
        id: QueueItemId,
        priority: Priority,
        reason: &str,
    ) -> QueueRepositoryResult<QueueItem> {
        let reason_owned = reason.to_owned();
        self.run_blocking(move |connection| {
            let updated = diesel::update(
                queue_items::table
                    .filter(queue_items::id.eq(id.into_inner()))
                    .filter(queue_items::status.eq(QUEUED)),
            )
            .set((
                queue_items::priority.eq(i16::from(priority.value())),
                queue_items::priority_reason.eq(&reason_owned),
            ))
            .execute(connection)
            .map_err(QueueRepositoryError::persistence)?;
            if updated == 0 {
                let status = current_status(connection, id)?;
                return Err(QueueRepositoryError::ItemNotQueued { id, status });
            }
            fetch_item(connection, id)
        })
        .await
    }

    async fn raise_priority_floor(
        &self,
        id: QueueItemId,
        floor: Priority,
        reason: &str,
    ) -> QueueRepositoryResult<bool> {
        let reason_owned = reason.to_owned();
        self.run_blocking(move |connection| {
            let raised = diesel::update(
                queue_items::table
                    .filter(queue_items::id.eq(id.into_inner()))
                    .filter(queue_items::status.eq(QUEUED))
                    .filter(queue_items::priority.lt(i16::from(floor.value()))),
            )
            .set((
                queue_items::priority.eq(i16::from(floor.value())),
                queue_items::priority_reason.eq(&reason_owned),
            ))
            .execute(connection)
            .map_err(QueueRepositoryError::persistence)?;
            if raised > 0 {
                return Ok(true);
            }
            // Nothing raised: either the floor is not above the current
            // priority (fine) or the item is missing/not queued (error).
            let status = current_status(connection, id)?;
            if status == QueueItemStatus::Queued {
                return Ok(false);
            }
            Err(QueueRepositoryError::ItemNotQueued { id, status })
        })
        .await
    }

    async fn boost_priority(
        &self,
        id: QueueItemId,
        delta: u8,
        reason: &str,
    ) -> QueueRepositoryResult<QueueItem> {
        let reason_owned = reason.to_owned();
        self.run_blocking(move |connection| {
            // Compare-and-swap on the stored priority so a concurrent write
            // between the read and the update restarts the bump instead of
            // being overwritten.
            loop {
                let current: Option<i16> = queue_items::table
                    .filter(queue_items::id.eq(id.into_inner()))
                    .filter(queue_items::status.eq(QUEUED))
                    .select(queue_items::priority)
                    .first(connection)
                    .optional()
                    .map_err(QueueRepositoryError::persistence)?;
                let Some(current) = current else {
                    let status = current_status(connection, id)?;
                    return Err(QueueRepositoryError::ItemNotQueued { id, status });
                };

                let boosted = Priority::clamped(i64::from(current)).boosted_by(delta);
                let updated = diesel::update(
                    queue_items::table
                        .filter(queue_items::id.eq(id.into_inner()))
                        .filter(queue_items::status.eq(QUEUED))
                        .filter(queue_items::priority.eq(current)),
                )
                .set((
                    queue_items::priority.eq(i16::from(boosted.value())),
                    queue_items::priority_reason.eq(&reason_owned),
                ))
                .execute(connection)
                .map_err(QueueRepositoryError::persistence)?;
                if updated == 1 {
                    return fetch_item(connection, id);
                }
                // Lost the race; re-read and retry against the new value.
            }
        })
        .await
    }

    async fn release_stale(
        &self,
        cutoff: DateTime<Utc>,
    ) -> QueueRepositoryResult<Vec<QueueItem>> {
        self.run_blocking(move |connection| {
            let rows: Vec<QueueItemRow> = diesel::update(
                queue_items::table
                    .filter(queue_items::status.eq(PROCESSING))
                    .filter(queue_items::started_at.le(Some(cutoff))),
            )
            .set((
                queue_items::status.eq(QUEUED),
                queue_items::started_at.eq(None::<DateTime<Utc>>),
                queue_items::retry_count.eq(queue_items::retry_count + 1),
            ))
            .returning(QueueItemRow::as_returning())
            .get_results(connection)
            .map_err(QueueRepositoryError::persistence)?;
            rows.into_iter().map(row_to_item).collect()
        })
        .await
    }

    async fn mark_done(
        &self,
        id: QueueItemId,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<QueueItem> {
        self.run_blocking(move |connection| {
            let updated = diesel::update(
                queue_items::table
                    .filter(queue_items::id.eq(id.into_inner()))
                    .filter(queue_items::status.eq(PROCESSING)),
            )
            .set((
                queue_items::status.eq("done"),
                queue_items::completed_at.eq(Some(now)),
            ))
            .execute(connection)
            .map_err(QueueRepositoryError::persistence)?;
            if updated == 0 {
                let status = current_status(connection, id)?;
                return Err(QueueRepositoryError::ItemNotProcessing { id, status });
            }
            fetch_item(connection, id)
        })
        .await
    }

    async fn mark_failed(
        &self,
        id: QueueItemId,
        error: Option<&str>,
        now: DateTime<Utc>,
    ) -> QueueRepositoryResult<QueueItem> {
        let error_owned = error.map(str::to_owned);
        self.run_blocking(move |connection| {
            let updated = diesel::update(
                queue_items::table
                    .filter(queue_items::id.eq(id.into_inner()))
                    .filter(queue_items::status.eq_any([QUEUED, PROCESSING])),
            )
            .set((
                queue_items::status.eq("failed"),
                queue_items::error_message.eq(error_owned),
                queue_items::completed_at.eq(Some(now)),
            ))
            .execute(connection)
            .map_err(QueueRepositoryError::persistence)?;
            if updated == 0 {
                let status = current_status(connection, id)?;
                return Err(QueueRepositoryError::ItemNotActive { id, status });
            }
            fetch_item(connection, id)
        })
        .await
    }

    async fn list_stage(
        &self,
        stage: PipelineStage,
        include_processing: bool,
    ) -> QueueRepositoryResult<Vec<QueueItem>> {
        self.run_blocking(move |connection| {
            let statuses: Vec<&str> = if include_processing {
                vec![QUEUED, PROCESSING]
            } else {
                vec![QUEUED]
            };
            let rows = queue_items::table
                .filter(queue_items::stage.eq(stage.as_str()))
                .filter(queue_items::status.eq_any(statuses))
                .order((queue_items::priority.desc(), queue_items::enqueued_at.asc()))
                .select(QueueItemRow::as_select())
                .load::<QueueItemRow>(connection)
                .map_err(QueueRepositoryError::persistence)?;
            rows.into_iter().map(row_to_item).collect()
        })
        .await
    }

    async fn queued_waiting_since(
        &self,
        stage: Option<PipelineStage>,
        threshold: DateTime<Utc>,
    ) -> QueueRepositoryResult<Vec<QueueItem>> {
        self.run_blocking(move |connection| {
            let mut query = queue_items::table
                .filter(queue_items::status.eq(QUEUED))
                .filter(queue_items::enqueued_at.le(threshold))
                .into_boxed();
            if let Some(wanted) = stage {
                query = query.filter(queue_items::stage.eq(wanted.as_str()));
            }
            let rows = query
                .order(queue_items::enqueued_at.asc())
                .select(QueueItemRow::as_select())
                .load::<QueueItemRow>(connection)
                .map_err(QueueRepositoryError::persistence)?;
            rows.into_iter().map(row_to_item).collect()
        })
        .await
    }

    async fn active_for_task(&self, task_id: TaskId) -> QueueRepositoryResult<Vec<QueueItem>> {
        self.run_blocking(move |connection| {
            let rows = queue_items::table
                .filter(queue_items::task_id.eq(task_id.into_inner()))
                .filter(queue_items::status.eq_any([QUEUED, PROCESSING]))
                .select(QueueItemRow::as_select())
                .load::<QueueItemRow>(connection)
                .map_err(QueueRepositoryError::persistence)?;
            rows.into_iter().map(row_to_item).collect()
        })
        .await
    }

    async fn summary(
        &self,
    ) -> QueueRepositoryResult<Vec<(PipelineStage, StageQueueCounts)>> {
        self.run_blocking(move |connection| {
            let rows: Vec<(String, String)> = queue_items::table
                .filter(queue_items::status.eq_any([QUEUED, PROCESSING]))
                .select((queue_items::stage, queue_items::status))
                .load(connection)
                .map_err(QueueRepositoryError::persistence)?;

            let mut counts: HashMap<PipelineStage, StageQueueCounts> = HashMap::new();
            for (stage_raw, status_raw) in rows {
                let stage = PipelineStage::try_from(stage_raw.as_str())
                    .map_err(QueueRepositoryError::persistence)?;
                let entry = counts.entry(stage).or_default();
                if status_raw == PROCESSING {
                    entry.processing = entry.processing.saturating_add(1);
                } else {
                    entry.queued = entry.queued.saturating_add(1);
                }
            }
            Ok(PipelineStage::ORDER
                .into_iter()
                .map(|stage| (stage, counts.get(&stage).copied().unwrap_or_default()))
                .collect())
        })
        .await
    }
}

fn fetch_item(
    connection: &mut PgConnection,
    id: QueueItemId,
) -> QueueRepositoryResult<QueueItem> {
    let row = queue_items::table
        .filter(queue_items::id.eq(id.into_inner()))
        .select(QueueItemRow::as_select())
        .first::<QueueItemRow>(connection)
        .map_err(QueueRepositoryError::persistence)?;
    row_to_item(row)
}

fn current_status(
    connection: &mut PgConnection,
    id: QueueItemId,
) -> QueueRepositoryResult<QueueItemStatus> {
    let status: Option<String> = queue_items::table
        .filter(queue_items::id.eq(id.into_inner()))
        .select(queue_items::status)
        .first(connection)
        .optional()
        .map_err(QueueRepositoryError::persistence)?;
    let raw = status.ok_or(QueueRepositoryError::NotFound(id))?;
    QueueItemStatus::try_from(raw.as_str()).map_err(QueueRepositoryError::persistence)
}

fn to_row(item: &QueueItem) -> NewQueueItemRow {
    NewQueueItemRow {
        id: item.id.into_inner(),
        task_id: item.task_id.into_inner(),
        stage: item.stage.as_str().to_owned(),
        priority: i16::from(item.priority.value()),
        priority_reason: item.priority_reason.clone(),
        status: item.status.as_str().to_owned(),
        context: item.context.clone(),
        retry_count: i32::try_from(item.retry_count).unwrap_or(i32::MAX),
        error_message: item.error_message.clone(),
        enqueued_at: item.enqueued_at,
        started_at: item.started_at,
        completed_at: item.completed_at,
    }
}

fn row_to_item(row: QueueItemRow) -> QueueRepositoryResult<QueueItem> {
    let stage =
        PipelineStage::try_from(row.stage.as_str()).map_err(QueueRepositoryError::persistence)?;
    let status = QueueItemStatus::try_from(row.status.as_str())
        .map_err(QueueRepositoryError::persistence)?;
    Ok(QueueItem {
        id: QueueItemId::from_uuid(row.id),
        task_id: TaskId::from_uuid(row.task_id),
        stage,
        priority: Priority::clamped(i64::from(row.priority)),
        priority_reason: row.priority_reason,
        status,
        context: row.context,
        retry_count: u32::try_from(row.retry_count).unwrap_or_default(),
        error_message: row.error_message,
        enqueued_at: row.enqueued_at,
        started_at: row.started_at,
        completed_at: row.completed_at,
    })
}
