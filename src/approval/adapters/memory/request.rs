//! In-memory approval store for tests and single-process use.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use crate::approval::{
    domain::{ApprovalAction, ApprovalRequest, ApprovalRequestId, ApprovalStatus},
    ports::{ApprovalRepository, ApprovalRepositoryError, ApprovalRepositoryResult},
};
use crate::pipeline::domain::{Checkpoint, TaskId};

#[derive(Debug, Default)]
struct State {
    requests: HashMap<ApprovalRequestId, ApprovalRequest>,
    actions: Vec<ApprovalAction>,
}

/// Thread-safe in-memory approval repository.
#[derive(Debug, Clone, Default)]
pub struct InMemoryApprovalRepository {
    state: Arc<RwLock<State>>,
}

impl InMemoryApprovalRepository {
    /// Creates an empty in-memory approval repository.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }
}

fn lock_error(err: impl std::fmt::Display) -> ApprovalRepositoryError {
    ApprovalRepositoryError::persistence(std::io::Error::other(err.to_string()))
}

/// Pending requests are listed highest priority first, then oldest first.
fn pending_order(a: &ApprovalRequest, b: &ApprovalRequest) -> std::cmp::Ordering {
    b.priority
        .cmp(&a.priority)
        .then(a.created_at.cmp(&b.created_at))
}

#[async_trait]
impl ApprovalRepository for InMemoryApprovalRepository {
    async fn insert(&self, request: ApprovalRequest) -> ApprovalRepositoryResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        let conflict = state
            .requests
            .values()
            .any(|existing| existing.task_id == request.task_id && existing.is_pending());
        if conflict {
            return Err(ApprovalRepositoryError::PendingRequestExists {
                task_id: request.task_id,
                checkpoint: request.checkpoint,
            });
        }
        state.requests.insert(request.id, request);
        Ok(())
    }

    async fn find_by_id(
        &self,
        id: ApprovalRequestId,
    ) -> ApprovalRepositoryResult<ApprovalRequest> {
        let state = self.state.read().map_err(lock_error)?;
        state
            .requests
            .get(&id)
            .cloned()
            .ok_or(ApprovalRepositoryError::NotFound)
    }

    async fn resolve(
        &self,
        id: ApprovalRequestId,
        status: ApprovalStatus,
        resolved_at: DateTime<Utc>,
    ) -> ApprovalRepositoryResult<ApprovalRequest> {
        let mut state = self.state.write().map_err(lock_error)?;
        let request = state
            .requests
            .get_mut(&id)
            .ok_or(ApprovalRepositoryError::NotFound)?;
        if !request.is_pending() {
            return Err(ApprovalRepositoryError::RequestNotPending {
                id,
                status: request.status,
            });
        }
        request.status = status;
        request.resolved_at = Some(resolved_at);
        Ok(request.clone())
    }

    async fn record_action(&self, action: ApprovalAction) -> ApprovalRepositoryResult<()> {
        let mut state = self.state.write().map_err(lock_error)?;
        if !state.requests.contains_key(&action.request_id) {
            return Err(ApprovalRepositoryError::NotFound);
        }
        state.actions.push(action);
        Ok(())
    }

    async fn actions_for(
        &self,
        id: ApprovalRequestId,
    ) -> ApprovalRepositoryResult<Vec<ApprovalAction>> {
        let state = self.state.read().map_err(lock_error)?;
        let mut actions: Vec<ApprovalAction> = state
            .actions
            .iter()
            .filter(|action| action.request_id == id)
            .cloned()
            .collect();
        actions.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(actions)
    }

    async fn list_pending(
        &self,
        task_id: Option<TaskId>,
        checkpoint: Option<Checkpoint>,
    ) -> ApprovalRepositoryResult<Vec<ApprovalRequest>> {
        let state = self.state.read().map_err(lock_error)?;
        let mut requests: Vec<ApprovalRequest> = state
            .requests
            .values()
            .filter(|request| {
                request.is_pending()
                    && task_id.is_none_or(|wanted| request.task_id == wanted)
                    && checkpoint.is_none_or(|wanted| request.checkpoint == wanted)
            })
            .cloned()
            .collect();
        requests.sort_by(pending_order);
        Ok(requests)
    }

    async fn pending_for_task(
        &self,
        task_id: TaskId,
    ) -> ApprovalRepositoryResult<Option<ApprovalRequest>> {
        let state = self.state.read().map_err(lock_error)?;
        Ok(state
            .requests
            .values()
            .find(|request| request.is_pending() && request.task_id == task_id)
            .cloned())
    }

    async fn pending_expired(
        &self,
        now: DateTime<Utc>,
    ) -> ApprovalRepositoryResult<Vec<ApprovalRequest>> {
        let state = self.state.read().map_err(lock_error)?;
        let mut requests: Vec<ApprovalRequest> = state
            .requests
            .values()
            .filter(|request| request.is_expired(now))
            .cloned()
            .collect();
        requests.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(requests)
    }

    async fn status_counts(
        &self,
    ) -> ApprovalRepositoryResult<Vec<(ApprovalStatus, u64)>> {
        let state = self.state.read().map_err(lock_error)?;
        let mut counts: HashMap<ApprovalStatus, u64> = HashMap::new();
        for request in state.requests.values() {
            let entry = counts.entry(request.status).or_default();
            *entry = entry.saturating_add(1);
        }
        let mut counts: Vec<(ApprovalStatus, u64)> = counts.into_iter().collect();
        counts.sort_by_key(|(status, _)| *status);
        Ok(counts)
    }
}
