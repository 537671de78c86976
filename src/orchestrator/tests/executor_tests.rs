//! Service tests for driving claimed items through the stage plan.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};

use crate::approval::{
    adapters::memory::InMemoryApprovalRepository, ports::ApprovalRepository,
    services::ApprovalController,
};
use crate::orchestrator::{
    ports::{StageOutcome, StageRunner, StageRunnerError},
    services::{ExecutionOutcome, StageExecutor},
};
use crate::pipeline::{
    adapters::{RecordingNotifier, memory::InMemoryTaskRepository},
    domain::{
        Checkpoint, PipelineConfig, PipelineStage, StageConfig, StageUsage, Task, TaskStatus,
    },
    ports::TaskRepository,
};
use crate::queue::{
    adapters::memory::InMemoryQueueRepository,
    domain::{Priority, QueueItem, QueueItemStatus},
    ports::QueueRepository,
    services::QueueScheduler,
};
use crate::testing::{FixedClock, all_stages_config};
use async_trait::async_trait;
use rstest::{fixture, rstest};
use serde_json::{Map, json};

/// Stage runner double: scripted outcomes per stage, success by default.
#[derive(Default)]
pub(super) struct ScriptedRunner {
    scripts: Mutex<HashMap<PipelineStage, VecDeque<Result<StageOutcome, StageRunnerError>>>>,
    calls: Mutex<Vec<PipelineStage>>,
}

impl ScriptedRunner {
    pub(super) fn script(
        &self,
        stage: PipelineStage,
        outcome: Result<StageOutcome, StageRunnerError>,
    ) {
        self.scripts
            .lock()
            .expect("script lock")
            .entry(stage)
            .or_default()
            .push_back(outcome);
    }

    pub(super) fn calls(&self) -> Vec<PipelineStage> {
        self.calls.lock().expect("calls lock").clone()
    }
}

pub(super) fn default_usage() -> StageUsage {
    StageUsage {
        tokens: 100,
        cost_microusd: 2_500,
        duration_ms: 1_000,
    }
}

#[async_trait]
impl StageRunner for ScriptedRunner {
    async fn run_stage(
        &self,
        _task: &Task,
        stage: PipelineStage,
    ) -> Result<StageOutcome, StageRunnerError> {
        self.calls.lock().expect("calls lock").push(stage);
        if let Some(scripted) = self
            .scripts
            .lock()
            .expect("script lock")
            .get_mut(&stage)
            .and_then(VecDeque::pop_front)
        {
            return scripted;
        }
        Ok(StageOutcome::Completed {
            output: json!({ "stage": stage.as_str() }),
            artifact_refs: Vec::new(),
            usage: default_usage(),
        })
    }
}

type TestExecutor = StageExecutor<
    ScriptedRunner,
    InMemoryApprovalRepository,
    InMemoryTaskRepository,
    InMemoryQueueRepository,
    RecordingNotifier,
    FixedClock,
>;

pub(super) struct Harness {
    pub runner: Arc<ScriptedRunner>,
    pub tasks: Arc<InMemoryTaskRepository>,
    pub queue: Arc<InMemoryQueueRepository>,
    pub approvals: Arc<InMemoryApprovalRepository>,
    pub clock: Arc<FixedClock>,
    pub executor: TestExecutor,
}

impl Harness {
    pub(super) fn scheduler(&self) -> QueueScheduler<InMemoryQueueRepository, FixedClock> {
        QueueScheduler::new(Arc::clone(&self.queue), Arc::clone(&self.clock))
    }

    pub(super) fn controller(
        &self,
    ) -> ApprovalController<
        InMemoryApprovalRepository,
        InMemoryTaskRepository,
        InMemoryQueueRepository,
        RecordingNotifier,
        FixedClock,
    > {
        ApprovalController::new(
            Arc::clone(&self.approvals),
            Arc::clone(&self.tasks),
            self.scheduler(),
            Arc::new(RecordingNotifier::new()),
            Arc::clone(&self.clock),
        )
    }

    /// Stores a pending task and claims its first-stage queue item.
    pub(super) async fn seed_and_claim(&self, config: PipelineConfig) -> (Task, QueueItem) {
        let task = Task::new(config, Map::new(), &*self.clock).expect("valid configuration");
        self.tasks.store(&task).await.expect("store should succeed");
        let first = task.plan().first().expect("plan is non-empty");
        self.scheduler()
            .enqueue(task.id(), first, json!({}), Priority::DEFAULT, "created")
            .await
            .expect("enqueue should succeed");
        let item = self
            .scheduler()
            .claim_next(first)
            .await
            .expect("claim should succeed")
            .expect("item available");
        (task, item)
    }

    pub(super) async fn reload(&self, task: &Task) -> Task {
        self.tasks
            .find_by_id(task.id())
            .await
            .expect("lookup should succeed")
            .expect("task exists")
    }
}

#[fixture]
pub(super) fn harness() -> Harness {
    let runner = Arc::new(ScriptedRunner::default());
    let tasks = Arc::new(InMemoryTaskRepository::new());
    let queue = Arc::new(InMemoryQueueRepository::new());
    let approvals = Arc::new(InMemoryApprovalRepository::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(FixedClock::epoch());
    let scheduler = QueueScheduler::new(Arc::clone(&queue), Arc::clone(&clock));
    let controller = ApprovalController::new(
        Arc::clone(&approvals),
        Arc::clone(&tasks),
        scheduler.clone(),
        Arc::clone(&notifier),
        Arc::clone(&clock),
    );
    let executor = StageExecutor::new(
        Arc::clone(&runner),
        Arc::clone(&tasks),
        scheduler,
        controller,
        notifier,
        Arc::clone(&clock),
    );
    Harness {
        runner,
        tasks,
        queue,
        approvals,
        clock,
        executor,
    }
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn one_item_drives_an_unattended_task_to_completion(harness: Harness) {
    let (task, item) = harness.seed_and_claim(all_stages_config()).await;

    let outcome = harness
        .executor
        .execute(&item)
        .await
        .expect("execution should succeed");
    assert_eq!(outcome, ExecutionOutcome::Completed);

    let completed = harness.reload(&task).await;
    assert_eq!(completed.status(), TaskStatus::Completed);
    for stage in PipelineStage::ORDER {
        assert!(completed.is_stage_complete(stage), "{stage} output recorded");
    }
    assert_eq!(completed.usage().total_tokens, 500);
    assert_eq!(harness.runner.calls(), PipelineStage::ORDER.to_vec());

    let settled = harness
        .queue
        .find_by_id(item.id)
        .await
        .expect("lookup should succeed")
        .expect("item exists");
    assert_eq!(settled.status, QueueItemStatus::Done);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn execution_suspends_at_an_approval_checkpoint(harness: Harness) {
    let config = all_stages_config().with_stage(
        PipelineStage::Plan,
        StageConfig::enabled().with_approval(60, false),
    );
    let (task, item) = harness.seed_and_claim(config).await;

    let outcome = harness
        .executor
        .execute(&item)
        .await
        .expect("execution should succeed");
    assert_eq!(
        outcome,
        ExecutionOutcome::Suspended(Checkpoint::ImplementationPlan)
    );

    let suspended = harness.reload(&task).await;
    assert_eq!(suspended.status(), TaskStatus::AwaitingReview);
    assert!(suspended.is_stage_complete(PipelineStage::Plan));
    assert!(!suspended.is_stage_complete(PipelineStage::Implement));
    assert_eq!(
        harness.runner.calls(),
        vec![PipelineStage::Brief, PipelineStage::Plan]
    );

    let pending = harness
        .approvals
        .pending_for_task(task.id())
        .await
        .expect("lookup should succeed");
    assert!(pending.is_some_and(|request| request.checkpoint == Checkpoint::ImplementationPlan));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn resumed_execution_skips_completed_stages(harness: Harness) {
    let config = all_stages_config().with_stage(
        PipelineStage::Plan,
        StageConfig::enabled().with_approval(60, false),
    );
    let (task, item) = harness.seed_and_claim(config).await;
    harness
        .executor
        .execute(&item)
        .await
        .expect("execution should succeed");
    let request = harness
        .approvals
        .pending_for_task(task.id())
        .await
        .expect("lookup should succeed")
        .expect("request pending");
    harness
        .controller()
        .approve(request.id, "alice", None, None)
        .await
        .expect("approval should succeed");

    let resumed_item = harness
        .scheduler()
        .claim_next(PipelineStage::Implement)
        .await
        .expect("claim should succeed")
        .expect("approved stage is queued");
    let outcome = harness
        .executor
        .execute(&resumed_item)
        .await
        .expect("execution should succeed");

    assert_eq!(outcome, ExecutionOutcome::Completed);
    assert_eq!(
        harness.runner.calls(),
        vec![
            PipelineStage::Brief,
            PipelineStage::Plan,
            PipelineStage::Implement,
            PipelineStage::Review,
            PipelineStage::Release,
        ]
    );
    let completed = harness.reload(&task).await;
    assert_eq!(completed.status(), TaskStatus::Completed);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn fix_needed_re_enqueues_the_same_stage_with_feedback(harness: Harness) {
    harness.runner.script(
        PipelineStage::Review,
        Ok(StageOutcome::FixNeeded {
            feedback: json!({"fix": "tighten error handling"}),
        }),
    );
    let (task, item) = harness.seed_and_claim(all_stages_config()).await;

    let outcome = harness
        .executor
        .execute(&item)
        .await
        .expect("execution should succeed");
    assert_eq!(outcome, ExecutionOutcome::FixRequested(PipelineStage::Review));

    let reworking = harness.reload(&task).await;
    assert_eq!(reworking.status(), TaskStatus::Processing);
    assert_eq!(reworking.current_stage(), Some(PipelineStage::Review));
    assert_eq!(reworking.retry_count(), 1);
    assert_eq!(
        reworking.config().stage(PipelineStage::Review).rejection_feedback,
        Some(json!({"fix": "tighten error handling"}))
    );

    let review_queue = harness
        .scheduler()
        .stage_queue(PipelineStage::Review, false)
        .await
        .expect("listing should succeed");
    assert_eq!(review_queue.len(), 1);
    assert_eq!(review_queue[0].priority, Priority::DEFAULT.boosted_by(1));
    assert_eq!(review_queue[0].priority_reason, "fix_needed");

    // The re-claimed item finishes the plan.
    let retry = harness
        .scheduler()
        .claim_next(PipelineStage::Review)
        .await
        .expect("claim should succeed")
        .expect("item available");
    let outcome = harness
        .executor
        .execute(&retry)
        .await
        .expect("execution should succeed");
    assert_eq!(outcome, ExecutionOutcome::Completed);
    let completed = harness.reload(&task).await;
    assert_eq!(completed.config().stage(PipelineStage::Review).rejection_feedback, None);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn collaborator_failure_fails_the_task_verbatim(harness: Harness) {
    harness.runner.script(
        PipelineStage::Implement,
        Err(StageRunnerError::new("sandbox exited with status 137")),
    );
    let (task, item) = harness.seed_and_claim(all_stages_config()).await;

    let outcome = harness
        .executor
        .execute(&item)
        .await
        .expect("execution should succeed");
    assert_eq!(
        outcome,
        ExecutionOutcome::Failed("sandbox exited with status 137".to_owned())
    );

    let failed = harness.reload(&task).await;
    assert_eq!(failed.status(), TaskStatus::Failed);
    assert_eq!(failed.error_message(), Some("sandbox exited with status 137"));
    assert!(failed.is_stage_complete(PipelineStage::Brief));
    assert!(!failed.is_stage_complete(PipelineStage::Implement));

    let settled = harness
        .queue
        .find_by_id(item.id)
        .await
        .expect("lookup should succeed")
        .expect("item exists");
    assert_eq!(settled.status, QueueItemStatus::Failed);
    assert_eq!(
        settled.error_message.as_deref(),
        Some("sandbox exited with status 137")
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn items_for_a_cancelled_task_are_discarded(harness: Harness) {
    let (task, item) = harness.seed_and_claim(all_stages_config()).await;
    let mut cancelled = harness.reload(&task).await;
    cancelled.cancel(&*harness.clock).expect("pending can cancel");
    harness.tasks.update(&cancelled).await.expect("update should succeed");

    let outcome = harness
        .executor
        .execute(&item)
        .await
        .expect("execution should succeed");

    assert_eq!(outcome, ExecutionOutcome::Stale);
    assert!(harness.runner.calls().is_empty());
    let settled = harness
        .queue
        .find_by_id(item.id)
        .await
        .expect("lookup should succeed")
        .expect("item exists");
    assert_eq!(settled.status, QueueItemStatus::Failed);
}
