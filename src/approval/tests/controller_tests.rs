//! Service tests for checkpoint creation, approval, and rejection.

use std::sync::Arc;

use crate::approval::{
    adapters::memory::InMemoryApprovalRepository,
    domain::{ApprovalRequest, ApprovalStatus},
    ports::{ApprovalRepository, ApprovalRepositoryError},
    services::{ApprovalController, ApprovalControllerError},
};
use crate::pipeline::{
    adapters::{RecordingNotifier, memory::InMemoryTaskRepository},
    domain::{
        Checkpoint, PipelineConfig, PipelineDomainError, PipelineStage, StageConfig, Task,
        TaskId, TaskStatus,
    },
    ports::TaskRepository,
};
use crate::queue::{
    adapters::memory::InMemoryQueueRepository, domain::Priority, services::QueueScheduler,
};
use crate::testing::FixedClock;
use chrono::Duration;
use rstest::{fixture, rstest};
use serde_json::{Map, json};

type TestController = ApprovalController<
    InMemoryApprovalRepository,
    InMemoryTaskRepository,
    InMemoryQueueRepository,
    RecordingNotifier,
    FixedClock,
>;

pub(super) struct Harness {
    pub approvals: Arc<InMemoryApprovalRepository>,
    pub tasks: Arc<InMemoryTaskRepository>,
    pub queue: Arc<InMemoryQueueRepository>,
    pub notifier: Arc<RecordingNotifier>,
    pub clock: Arc<FixedClock>,
    pub controller: TestController,
}

impl Harness {
    pub(super) fn scheduler(&self) -> QueueScheduler<InMemoryQueueRepository, FixedClock> {
        QueueScheduler::new(Arc::clone(&self.queue), Arc::clone(&self.clock))
    }

    /// Stores a processing task positioned at `stage`.
    pub(super) async fn seed_task(&self, config: PipelineConfig, stage: PipelineStage) -> Task {
        let mut task =
            Task::new(config, Map::new(), &*self.clock).expect("valid configuration");
        task.transition_to(TaskStatus::Processing, &*self.clock)
            .expect("pending moves to processing");
        task.begin_stage(stage, &*self.clock).expect("stage is in the plan");
        self.tasks.store(&task).await.expect("store should succeed");
        task
    }
}

#[fixture]
pub(super) fn harness() -> Harness {
    let approvals = Arc::new(InMemoryApprovalRepository::new());
    let tasks = Arc::new(InMemoryTaskRepository::new());
    let queue = Arc::new(InMemoryQueueRepository::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(FixedClock::epoch());
    let scheduler = QueueScheduler::new(Arc::clone(&queue), Arc::clone(&clock));
    let controller = ApprovalController::new(
        Arc::clone(&approvals),
        Arc::clone(&tasks),
        scheduler,
        Arc::clone(&notifier),
        Arc::clone(&clock),
    );
    Harness {
        approvals,
        tasks,
        queue,
        notifier,
        clock,
        controller,
    }
}

/// Every stage enabled, with approval required on `stage`.
pub(super) fn config_with_approval(
    stage: PipelineStage,
    timeout_minutes: i64,
    auto_approve: bool,
) -> PipelineConfig {
    PipelineStage::ORDER
        .into_iter()
        .fold(PipelineConfig::new(), |config, candidate| {
            let stage_config = if candidate == stage {
                StageConfig::enabled().with_approval(timeout_minutes, auto_approve)
            } else {
                StageConfig::enabled()
            };
            config.with_stage(candidate, stage_config)
        })
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn create_request_suspends_the_task_until_reviewed(harness: Harness) {
    let config = config_with_approval(PipelineStage::Implement, 45, false);
    let task = harness.seed_task(config, PipelineStage::Implement).await;

    let request = harness
        .controller
        .create_request(task.id(), vec!["pr/7".to_owned()], Some("diff ready".to_owned()), None)
        .await
        .expect("request creation should succeed");

    assert_eq!(request.checkpoint, Checkpoint::CodeChanges);
    assert_eq!(request.status, ApprovalStatus::Pending);
    assert_eq!(request.priority, Checkpoint::CodeChanges.review_priority());
    assert_eq!(
        request.timeout_at,
        Some(request.created_at + Duration::minutes(45))
    );

    let suspended = harness
        .tasks
        .find_by_id(task.id())
        .await
        .expect("lookup should succeed")
        .expect("task exists");
    assert_eq!(suspended.status(), TaskStatus::AwaitingReview);

    let updates = harness.notifier.updates();
    assert_eq!(updates.len(), 1);
    assert_eq!(updates[0].status, TaskStatus::AwaitingReview);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn release_checkpoint_suspends_to_awaiting_release(harness: Harness) {
    let config = config_with_approval(PipelineStage::Release, 60, false);
    let task = harness.seed_task(config, PipelineStage::Release).await;

    let request = harness
        .controller
        .create_request(task.id(), Vec::new(), None, None)
        .await
        .expect("request creation should succeed");

    assert_eq!(request.checkpoint, Checkpoint::ReleaseNotes);
    let suspended = harness
        .tasks
        .find_by_id(task.id())
        .await
        .expect("lookup should succeed")
        .expect("task exists");
    assert_eq!(suspended.status(), TaskStatus::AwaitingRelease);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn second_pending_request_for_the_checkpoint_conflicts(harness: Harness) {
    let config = config_with_approval(PipelineStage::Plan, 60, false);
    let task = harness.seed_task(config, PipelineStage::Plan).await;
    harness
        .controller
        .create_request(task.id(), Vec::new(), None, None)
        .await
        .expect("first request should succeed");

    // Put the task back into processing so only the uniqueness rule can
    // object.
    let mut resumed = harness
        .tasks
        .find_by_id(task.id())
        .await
        .expect("lookup should succeed")
        .expect("task exists");
    resumed
        .transition_to(TaskStatus::Processing, &*harness.clock)
        .expect("awaiting review resumes");
    harness.tasks.update(&resumed).await.expect("update should succeed");

    let result = harness
        .controller
        .create_request(task.id(), Vec::new(), None, None)
        .await;

    assert!(matches!(
        result,
        Err(ApprovalControllerError::Repository(
            ApprovalRepositoryError::PendingRequestExists { .. }
        ))
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn second_pending_request_for_the_task_conflicts_across_checkpoints(harness: Harness) {
    let config = config_with_approval(PipelineStage::Plan, 60, false);
    let task = harness.seed_task(config, PipelineStage::Plan).await;
    harness
        .controller
        .create_request(task.id(), Vec::new(), None, None)
        .await
        .expect("first request should succeed");

    // Move the task onto a later stage so the second request targets a
    // different checkpoint; it must still be refused.
    let mut resumed = harness
        .tasks
        .find_by_id(task.id())
        .await
        .expect("lookup should succeed")
        .expect("task exists");
    resumed
        .transition_to(TaskStatus::Processing, &*harness.clock)
        .expect("awaiting review resumes");
    resumed
        .begin_stage(PipelineStage::Implement, &*harness.clock)
        .expect("stage is in the plan");
    harness.tasks.update(&resumed).await.expect("update should succeed");

    let result = harness
        .controller
        .create_request(task.id(), Vec::new(), None, None)
        .await;

    assert!(matches!(
        result,
        Err(ApprovalControllerError::Repository(
            ApprovalRepositoryError::PendingRequestExists { .. }
        ))
    ));
    let still_pending = harness
        .approvals
        .pending_for_task(task.id())
        .await
        .expect("lookup should succeed")
        .expect("first request remains");
    assert_eq!(still_pending.checkpoint, Checkpoint::ImplementationPlan);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn store_allows_at_most_one_pending_request_per_task(harness: Harness) {
    let task_id = TaskId::new();
    let first = ApprovalRequest::new(
        task_id,
        Checkpoint::BriefDocument,
        Vec::new(),
        None,
        None,
        Some(60),
        false,
        &*harness.clock,
    );
    harness
        .approvals
        .insert(first)
        .await
        .expect("first insert should succeed");

    let second = ApprovalRequest::new(
        task_id,
        Checkpoint::CodeChanges,
        Vec::new(),
        None,
        None,
        Some(60),
        false,
        &*harness.clock,
    );
    let result = harness.approvals.insert(second).await;

    assert!(matches!(
        result,
        Err(ApprovalRepositoryError::PendingRequestExists { task_id: conflicting, .. })
            if conflicting == task_id
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn approval_resumes_into_the_next_stage(harness: Harness) {
    let config = config_with_approval(PipelineStage::Implement, 60, false);
    let task = harness.seed_task(config, PipelineStage::Implement).await;
    let request = harness
        .controller
        .create_request(task.id(), Vec::new(), None, None)
        .await
        .expect("request creation should succeed");

    let approved = harness
        .controller
        .approve(request.id, "alice", Some("looks good".to_owned()), None)
        .await
        .expect("approval should succeed");
    assert_eq!(approved.status, ApprovalStatus::Approved);

    let resumed = harness
        .tasks
        .find_by_id(task.id())
        .await
        .expect("lookup should succeed")
        .expect("task exists");
    assert_eq!(resumed.status(), TaskStatus::Processing);

    let review_queue = harness
        .scheduler()
        .stage_queue(PipelineStage::Review, false)
        .await
        .expect("listing should succeed");
    assert_eq!(review_queue.len(), 1);
    assert_eq!(review_queue[0].task_id, task.id());
    assert_eq!(review_queue[0].priority_reason, "approved");

    let actions = harness
        .approvals
        .actions_for(request.id)
        .await
        .expect("action listing should succeed");
    assert_eq!(actions.len(), 1);
    assert_eq!(actions[0].action, ApprovalStatus::Approved);
    assert_eq!(actions[0].actor, "alice");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn approval_at_the_last_enabled_stage_completes_the_task(harness: Harness) {
    let config = PipelineConfig::new()
        .with_stage(PipelineStage::Brief, StageConfig::enabled())
        .with_stage(
            PipelineStage::Plan,
            StageConfig::enabled().with_approval(60, false),
        );
    let task = harness.seed_task(config, PipelineStage::Plan).await;
    let request = harness
        .controller
        .create_request(task.id(), Vec::new(), None, None)
        .await
        .expect("request creation should succeed");

    harness
        .controller
        .approve(request.id, "alice", None, None)
        .await
        .expect("approval should succeed");

    let completed = harness
        .tasks
        .find_by_id(task.id())
        .await
        .expect("lookup should succeed")
        .expect("task exists");
    assert_eq!(completed.status(), TaskStatus::Completed);

    let summary = harness.scheduler().summary().await.expect("summary should succeed");
    assert!(summary.iter().all(|(_, counts)| counts.queued == 0));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn rejection_requires_a_comment(harness: Harness) {
    let config = config_with_approval(PipelineStage::Review, 60, false);
    let task = harness.seed_task(config, PipelineStage::Review).await;
    let request = harness
        .controller
        .create_request(task.id(), Vec::new(), None, None)
        .await
        .expect("request creation should succeed");

    let result = harness.controller.reject(request.id, "bob", "   ", None).await;

    assert!(matches!(
        result,
        Err(ApprovalControllerError::Domain(
            PipelineDomainError::MissingRejectionComment
        ))
    ));
    let untouched = harness
        .approvals
        .find_by_id(request.id)
        .await
        .expect("lookup should succeed");
    assert_eq!(untouched.status, ApprovalStatus::Pending);
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn rejection_routes_feedback_and_re_enqueues_the_stage(harness: Harness) {
    let config = config_with_approval(PipelineStage::Implement, 60, false);
    let mut task = harness.seed_task(config, PipelineStage::Implement).await;
    task.record_stage_success(
        PipelineStage::Implement,
        json!({"diff": "…"}),
        crate::pipeline::domain::StageUsage::default(),
        &*harness.clock,
    );
    harness.tasks.update(&task).await.expect("update should succeed");
    let request = harness
        .controller
        .create_request(task.id(), Vec::new(), None, None)
        .await
        .expect("request creation should succeed");

    let rejected = harness
        .controller
        .reject(request.id, "bob", "missing tests", None)
        .await
        .expect("rejection should succeed");
    assert_eq!(rejected.status, ApprovalStatus::Rejected);

    let reworked = harness
        .tasks
        .find_by_id(task.id())
        .await
        .expect("lookup should succeed")
        .expect("task exists");
    assert_eq!(reworked.status(), TaskStatus::Processing);
    assert!(!reworked.is_stage_complete(PipelineStage::Implement));
    assert_eq!(reworked.retry_count(), 1);
    assert_eq!(
        reworked.config().stage(PipelineStage::Implement).rejection_feedback,
        Some(json!({"comment": "missing tests"}))
    );

    let implement_queue = harness
        .scheduler()
        .stage_queue(PipelineStage::Implement, false)
        .await
        .expect("listing should succeed");
    assert_eq!(implement_queue.len(), 1);
    assert_eq!(implement_queue[0].priority, Priority::DEFAULT.boosted_by(2));
    assert_eq!(implement_queue[0].priority_reason, "review_bump");
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn structured_feedback_takes_precedence_over_the_comment(harness: Harness) {
    let config = config_with_approval(PipelineStage::Plan, 60, false);
    let task = harness.seed_task(config, PipelineStage::Plan).await;
    let request = harness
        .controller
        .create_request(task.id(), Vec::new(), None, None)
        .await
        .expect("request creation should succeed");

    harness
        .controller
        .reject(
            request.id,
            "bob",
            "split the migration",
            Some(json!({"sections": ["migration"], "severity": "major"})),
        )
        .await
        .expect("rejection should succeed");

    let reworked = harness
        .tasks
        .find_by_id(task.id())
        .await
        .expect("lookup should succeed")
        .expect("task exists");
    assert_eq!(
        reworked.config().stage(PipelineStage::Plan).rejection_feedback,
        Some(json!({"sections": ["migration"], "severity": "major"}))
    );
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn a_resolved_request_rejects_further_decisions(harness: Harness) {
    let config = config_with_approval(PipelineStage::Brief, 60, false);
    let task = harness.seed_task(config, PipelineStage::Brief).await;
    let request = harness
        .controller
        .create_request(task.id(), Vec::new(), None, None)
        .await
        .expect("request creation should succeed");
    harness
        .controller
        .approve(request.id, "alice", None, None)
        .await
        .expect("approval should succeed");

    let result = harness
        .controller
        .reject(request.id, "bob", "too late", None)
        .await;

    assert!(matches!(
        result,
        Err(ApprovalControllerError::Repository(
            ApprovalRepositoryError::RequestNotPending {
                status: ApprovalStatus::Approved,
                ..
            }
        ))
    ));
}

#[rstest]
#[tokio::test(flavor = "multi_thread")]
async fn pending_requests_list_highest_priority_first(harness: Harness) {
    let brief_task = harness
        .seed_task(
            config_with_approval(PipelineStage::Brief, 60, false),
            PipelineStage::Brief,
        )
        .await;
    harness
        .controller
        .create_request(brief_task.id(), Vec::new(), None, None)
        .await
        .expect("brief request should succeed");
    let release_task = harness
        .seed_task(
            config_with_approval(PipelineStage::Release, 60, false),
            PipelineStage::Release,
        )
        .await;
    harness
        .controller
        .create_request(release_task.id(), Vec::new(), None, None)
        .await
        .expect("release request should succeed");

    let pending = harness
        .controller
        .pending(None, None)
        .await
        .expect("listing should succeed");

    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].checkpoint, Checkpoint::ReleaseNotes);
    assert_eq!(pending[1].checkpoint, Checkpoint::BriefDocument);

    let counts = harness
        .controller
        .status_counts()
        .await
        .expect("counts should succeed");
    assert_eq!(counts, vec![(ApprovalStatus::Pending, 2)]);
}
