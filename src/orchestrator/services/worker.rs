//! Polling worker loop over the per-stage queues.
//!
//! Each tick claims at most one item per served stage, executes it, sweeps
//! expired approvals, and ages waiting queue items. Workers are stateless
//! between ticks; every fact they act on is reloaded from the stores, so
//! any number of workers can serve the same stages concurrently. Delivery
//! is at-least-once: an item whose claim outlives its lease is returned to
//! the queue, so a crashed worker's work is picked up by a surviving one.

use crate::approval::{ports::ApprovalRepository, services::ApprovalController};
use crate::orchestrator::{
    ports::StageRunner,
    services::executor::{StageExecutor, StageExecutorError},
};
use crate::pipeline::{
    domain::PipelineStage,
    ports::{PipelineNotifier, TaskRepository},
};
use crate::queue::{ports::QueueRepository, services::QueueScheduler};
use mockable::Clock;
use std::time::Duration;
use tokio::sync::watch;

/// Worker tuning knobs.
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Stages this worker serves, in claim order.
    pub stages: Vec<PipelineStage>,
    /// How long to sleep between polling ticks.
    pub poll_interval: Duration,
    /// Minutes a claim may stay in processing before it is released for
    /// redelivery. Must exceed the longest expected stage run.
    pub claim_lease_minutes: i64,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            stages: PipelineStage::ORDER.to_vec(),
            poll_interval: Duration::from_secs(2),
            claim_lease_minutes: 15,
        }
    }
}

/// Claims and executes queue items until told to shut down.
pub struct Worker<R, A, T, Q, N, C>
where
    R: StageRunner,
    A: ApprovalRepository,
    T: TaskRepository,
    Q: QueueRepository,
    N: PipelineNotifier,
    C: Clock + Send + Sync,
{
    executor: StageExecutor<R, A, T, Q, N, C>,
    scheduler: QueueScheduler<Q, C>,
    approvals: ApprovalController<A, T, Q, N, C>,
    config: OrchestratorConfig,
}

impl<R, A, T, Q, N, C> Clone for Worker<R, A, T, Q, N, C>
where
    R: StageRunner,
    A: ApprovalRepository,
    T: TaskRepository,
    Q: QueueRepository,
    N: PipelineNotifier,
    C: Clock + Send + Sync,
{
    fn clone(&self) -> Self {
        Self {
            executor: self.executor.clone(),
            scheduler: self.scheduler.clone(),
            approvals: self.approvals.clone(),
            config: self.config.clone(),
        }
    }
}

impl<R, A, T, Q, N, C> Worker<R, A, T, Q, N, C>
where
    R: StageRunner,
    A: ApprovalRepository,
    T: TaskRepository,
    Q: QueueRepository,
    N: PipelineNotifier,
    C: Clock + Send + Sync,
{
    /// Creates a new worker.
    #[must_use]
    pub const fn new(
        executor: StageExecutor<R, A, T, Q, N, C>,
        scheduler: QueueScheduler<Q, C>,
        approvals: ApprovalController<A, T, Q, N, C>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            executor,
            scheduler,
            approvals,
            config,
        }
    }

    /// Runs one polling tick: expires approvals, releases stale claims, then
    /// claims and executes at most one item per served stage. Returns how
    /// many items were executed.
    ///
    /// # Errors
    ///
    /// Returns [`StageExecutorError`] when execution hits a persistence
    /// failure; per-item collaborator failures are absorbed into the task.
    pub async fn run_once(&self) -> Result<usize, StageExecutorError> {
        match self.approvals.check_timeouts().await {
            Ok(expired) if expired > 0 => {
                tracing::info!(expired, "expired approval requests");
            }
            Ok(_) => {}
            Err(err) => tracing::warn!(error = %err, "approval timeout sweep failed"),
        }
        if let Err(err) = self
            .scheduler
            .release_stale_claims(self.config.claim_lease_minutes)
            .await
        {
            tracing::warn!(error = %err, "stale claim sweep failed");
        }

        let mut executed = 0usize;
        for stage in &self.config.stages {
            let Some(item) = self.scheduler.claim_next(*stage).await? else {
                continue;
            };
            if let Err(err) = self.executor.execute(&item).await {
                // The claim must not stay stranded in processing until the
                // lease expires; settle it with the failure before bailing.
                let message = err.to_string();
                if let Err(mark_err) =
                    self.scheduler.mark_failed(item.id, Some(&message)).await
                {
                    tracing::warn!(
                        item_id = %item.id,
                        error = %mark_err,
                        "failed to settle item after execution error"
                    );
                }
                return Err(err);
            }
            executed = executed.saturating_add(1);
        }
        Ok(executed)
    }

    /// Polls until the shutdown signal flips to `true`.
    ///
    /// Ticks that fail are logged and the loop continues; a worker only
    /// stops when asked to.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        tracing::info!(stages = ?self.config.stages, "worker started");
        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                }
                () = tokio::time::sleep(self.config.poll_interval) => {
                    if let Err(err) = self.run_once().await {
                        tracing::error!(error = %err, "worker tick failed");
                    }
                }
            }
        }
        tracing::info!("worker stopped");
    }
}
