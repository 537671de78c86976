//! `PostgreSQL` repository implementation for approval persistence.
//!
//! Resolution is a compare-and-swap: `UPDATE … WHERE id = … AND status =
//! 'pending'`. A zero row count means another resolution won, and the
//! caller receives the status that beat it.

use super::{
    models::{ApprovalActionRow, ApprovalRequestRow, NewApprovalActionRow, NewApprovalRequestRow},
    schema::{approval_actions, approval_requests},
};
use crate::approval::{
    domain::{ApprovalAction, ApprovalActionId, ApprovalRequest, ApprovalRequestId, ApprovalStatus},
    ports::{ApprovalRepository, ApprovalRepositoryError, ApprovalRepositoryResult},
};
use crate::pipeline::domain::{Checkpoint, TaskId};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use diesel::pg::PgConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, Pool};
use diesel::result::{DatabaseErrorKind, Error as DieselError};
use std::collections::HashMap;

/// `PostgreSQL` connection pool type shared by the approval adapters.
pub type ApprovalPgPool = Pool<ConnectionManager<PgConnection>>;

const PENDING: &str = "pending";

/// `PostgreSQL`-backed approval repository.
#[derive(Debug, Clone)]
pub struct PostgresApprovalRepository {
    pool: ApprovalPgPool,
}

impl PostgresApprovalRepository {
    /// Creates a new repository from a `PostgreSQL` connection pool.
    #[must_use]
    pub const fn new(pool: ApprovalPgPool) -> Self {
        Self { pool }
    }

    async fn run_blocking<F, T>(&self, f: F) -> ApprovalRepositoryResult<T>
    where
        F: FnOnce(&mut PgConnection) -> ApprovalRepositoryResult<T> + Send + 'static,
        T: Send + 'static,
    {
        let pool = self.pool.clone();
        tokio::task::spawn_blocking(move || {
            let mut connection = pool.get().map_err(ApprovalRepositoryError::persistence)?;
            f(&mut connection)
        })
        .await
        .map_err(ApprovalRepositoryError::persistence)?
    }
}

#[async_trait]
impl ApprovalRepository for PostgresApprovalRepository {
    async fn insert(&self, request: ApprovalRequest) -> ApprovalRepositoryResult<()> {
        let task_id = request.task_id;
        let checkpoint = request.checkpoint;
        let new_row = to_request_row(&request)?;

        self.run_blocking(move |connection| {
            // The partial unique index still enforces the invariant inside
            // the TOCTOU window; this pre-check improves error reporting.
            let pending: i64 = approval_requests::table
                .filter(approval_requests::task_id.eq(task_id.into_inner()))
                .filter(approval_requests::status.eq(PENDING))
                .count()
                .get_result(connection)
                .map_err(ApprovalRepositoryError::persistence)?;
            if pending > 0 {
                return Err(ApprovalRepositoryError::PendingRequestExists {
                    task_id,
                    checkpoint,
                });
            }

            diesel::insert_into(approval_requests::table)
                .values(&new_row)
                .execute(connection)
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::UniqueViolation, _) => {
                        ApprovalRepositoryError::PendingRequestExists { task_id, checkpoint }
                    }
                    _ => ApprovalRepositoryError::persistence(err),
                })?;
            Ok(())
        })
        .await
    }

    async fn find_by_id(
        &self,
        id: ApprovalRequestId,
    ) -> ApprovalRepositoryResult<ApprovalRequest> {
        self.run_blocking(move |connection| fetch_request(connection, id)).await
    }

    async fn resolve(
        &self,
        id: ApprovalRequestId,
        status: ApprovalStatus,
        resolved_at: DateTime<Utc>,
    ) -> ApprovalRepositoryResult<ApprovalRequest> {
        self.run_blocking(move |connection| {
            let resolved = diesel::update(
                approval_requests::table
                    .filter(approval_requests::id.eq(id.into_inner()))
                    .filter(approval_requests::status.eq(PENDING)),
            )
            .set((
                approval_requests::status.eq(status.as_str()),
                approval_requests::resolved_at.eq(Some(resolved_at)),
            ))
            .execute(connection)
            .map_err(ApprovalRepositoryError::persistence)?;
            if resolved == 0 {
                let current = current_status(connection, id)?;
                return Err(ApprovalRepositoryError::RequestNotPending {
                    id,
                    status: current,
                });
            }
            fetch_request(connection, id)
        })
        .await
    }

    async fn record_action(&self, action: ApprovalAction) -> ApprovalRepositoryResult<()> {
        let new_row = NewApprovalActionRow {
            id: action.id.into_inner(),
            request_id: action.request_id.into_inner(),
            action: action.action.as_str().to_owned(),
            actor: action.actor,
            comment: action.comment,
            feedback: action.feedback,
            created_at: action.created_at,
        };
        self.run_blocking(move |connection| {
            diesel::insert_into(approval_actions::table)
                .values(&new_row)
                .execute(connection)
                .map_err(|err| match err {
                    DieselError::DatabaseError(DatabaseErrorKind::ForeignKeyViolation, _) => {
                        ApprovalRepositoryError::NotFound
                    }
                    _ => ApprovalRepositoryError::persistence(err),
                })?;
            Ok(())
        })
        .await
    }

    async fn actions_for(
        &self,
        id: ApprovalRequestId,
    ) -> ApprovalRepositoryResult<Vec<ApprovalAction>> {
        self.run_blocking(move |connection| {
            let rows = approval_actions::table
                .filter(approval_actions::request_id.eq(id.into_inner()))
                .order(approval_actions::created_at.asc())
                .select(ApprovalActionRow::as_select())
                .load::<ApprovalActionRow>(connection)
                .map_err(ApprovalRepositoryError::persistence)?;
            rows.into_iter().map(row_to_action).collect()
        })
        .await
    }

    async fn list_pending(
        &self,
        task_id: Option<TaskId>,
        checkpoint: Option<Checkpoint>,
    ) -> ApprovalRepositoryResult<Vec<ApprovalRequest>> {
        self.run_blocking(move |connection| {
            let mut query = approval_requests::table
                .filter(approval_requests::status.eq(PENDING))
                .into_boxed();
            if let Some(wanted) = task_id {
                query = query.filter(approval_requests::task_id.eq(wanted.into_inner()));
            }
            if let Some(wanted) = checkpoint {
                query = query.filter(approval_requests::checkpoint.eq(wanted.as_str()));
            }
            let rows = query
                .order((
                    approval_requests::priority.desc(),
                    approval_requests::created_at.asc(),
                ))
                .select(ApprovalRequestRow::as_select())
                .load::<ApprovalRequestRow>(connection)
                .map_err(ApprovalRepositoryError::persistence)?;
            rows.into_iter().map(row_to_request).collect()
        })
        .await
    }

    async fn pending_for_task(
        &self,
        task_id: TaskId,
    ) -> ApprovalRepositoryResult<Option<ApprovalRequest>> {
        self.run_blocking(move |connection| {
            let row = approval_requests::table
                .filter(approval_requests::task_id.eq(task_id.into_inner()))
                .filter(approval_requests::status.eq(PENDING))
                .select(ApprovalRequestRow::as_select())
                .first::<ApprovalRequestRow>(connection)
                .optional()
                .map_err(ApprovalRepositoryError::persistence)?;
            row.map(row_to_request).transpose()
        })
        .await
    }

    async fn pending_expired(
        &self,
        now: DateTime<Utc>,
    ) -> ApprovalRepositoryResult<Vec<ApprovalRequest>> {
        self.run_blocking(move |connection| {
            let rows = approval_requests::table
                .filter(approval_requests::status.eq(PENDING))
                .filter(approval_requests::timeout_at.le(now))
                .order(approval_requests::created_at.asc())
                .select(ApprovalRequestRow::as_select())
                .load::<ApprovalRequestRow>(connection)
                .map_err(ApprovalRepositoryError::persistence)?;
            rows.into_iter().map(row_to_request).collect()
        })
        .await
    }

    async fn status_counts(
        &self,
    ) -> ApprovalRepositoryResult<Vec<(ApprovalStatus, u64)>> {
        self.run_blocking(move |connection| {
            let rows: Vec<String> = approval_requests::table
                .select(approval_requests::status)
                .load(connection)
                .map_err(ApprovalRepositoryError::persistence)?;
            let mut counts: HashMap<ApprovalStatus, u64> = HashMap::new();
            for raw in rows {
                let status = ApprovalStatus::try_from(raw.as_str())
                    .map_err(ApprovalRepositoryError::persistence)?;
                let entry = counts.entry(status).or_default();
                *entry = entry.saturating_add(1);
            }
            let mut counts: Vec<(ApprovalStatus, u64)> = counts.into_iter().collect();
            counts.sort_by_key(|(status, _)| *status);
            Ok(counts)
        })
        .await
    }
}

fn fetch_request(
    connection: &mut PgConnection,
    id: ApprovalRequestId,
) -> ApprovalRepositoryResult<ApprovalRequest> {
    let row = approval_requests::table
        .filter(approval_requests::id.eq(id.into_inner()))
        .select(ApprovalRequestRow::as_select())
        .first::<ApprovalRequestRow>(connection)
        .optional()
        .map_err(ApprovalRepositoryError::persistence)?;
    row.map(row_to_request)
        .transpose()?
        .ok_or(ApprovalRepositoryError::NotFound)
}

fn current_status(
    connection: &mut PgConnection,
    id: ApprovalRequestId,
) -> ApprovalRepositoryResult<ApprovalStatus> {
    let status: Option<String> = approval_requests::table
        .filter(approval_requests::id.eq(id.into_inner()))
        .select(approval_requests::status)
        .first(connection)
        .optional()
        .map_err(ApprovalRepositoryError::persistence)?;
    let raw = status.ok_or(ApprovalRepositoryError::NotFound)?;
    ApprovalStatus::try_from(raw.as_str()).map_err(ApprovalRepositoryError::persistence)
}

fn to_request_row(
    request: &ApprovalRequest,
) -> ApprovalRepositoryResult<NewApprovalRequestRow> {
    let artifact_refs = serde_json::to_value(&request.artifact_refs)
        .map_err(ApprovalRepositoryError::persistence)?;
    Ok(NewApprovalRequestRow {
        id: request.id.into_inner(),
        task_id: request.task_id.into_inner(),
        checkpoint: request.checkpoint.as_str().to_owned(),
        status: request.status.as_str().to_owned(),
        artifact_refs,
        summary: request.summary.clone(),
        details: request.details.clone(),
        priority: request.priority,
        created_at: request.created_at,
        timeout_at: request.timeout_at,
        resolved_at: request.resolved_at,
        auto_approve_on_timeout: request.auto_approve_on_timeout,
    })
}

fn row_to_request(row: ApprovalRequestRow) -> ApprovalRepositoryResult<ApprovalRequest> {
    let checkpoint = Checkpoint::try_from(row.checkpoint.as_str())
        .map_err(ApprovalRepositoryError::persistence)?;
    let status = ApprovalStatus::try_from(row.status.as_str())
        .map_err(ApprovalRepositoryError::persistence)?;
    let artifact_refs: Vec<String> = serde_json::from_value(row.artifact_refs)
        .map_err(ApprovalRepositoryError::persistence)?;
    Ok(ApprovalRequest {
        id: ApprovalRequestId::from_uuid(row.id),
        task_id: TaskId::from_uuid(row.task_id),
        checkpoint,
        status,
        artifact_refs,
        summary: row.summary,
        details: row.details,
        priority: row.priority,
        created_at: row.created_at,
        timeout_at: row.timeout_at,
        resolved_at: row.resolved_at,
        auto_approve_on_timeout: row.auto_approve_on_timeout,
    })
}

fn row_to_action(row: ApprovalActionRow) -> ApprovalRepositoryResult<ApprovalAction> {
    let action =
        ApprovalStatus::try_from(row.action.as_str()).map_err(ApprovalRepositoryError::persistence)?;
    Ok(ApprovalAction {
        id: ApprovalActionId::from_uuid(row.id),
        request_id: ApprovalRequestId::from_uuid(row.request_id),
        action,
        actor: row.actor,
        comment: row.comment,
        feedback: row.feedback,
        created_at: row.created_at,
    })
}
