//! End-to-end pipeline flows over the in-memory adapters.
//!
//! These tests wire the lifecycle service, queue scheduler, approval
//! controller, and worker together the way a deployment would, and drive
//! whole tasks from creation to a terminal status.

#![expect(
    clippy::expect_used,
    reason = "Test code uses expect for assertion clarity"
)]
#![expect(
    clippy::indexing_slicing,
    reason = "Test code uses indexing after length checks"
)]
#![expect(
    clippy::cognitive_complexity,
    reason = "Test functions may have higher complexity for full scenario coverage"
)]

use std::sync::Arc;

use async_trait::async_trait;
use brunel::approval::{
    adapters::memory::InMemoryApprovalRepository,
    domain::ApprovalStatus,
    ports::ApprovalRepository,
    services::ApprovalController,
};
use brunel::orchestrator::services::{OrchestratorConfig, StageExecutor, Worker};
use brunel::orchestrator::ports::{StageOutcome, StageRunner, StageRunnerError};
use brunel::pipeline::{
    adapters::{RecordingNotifier, memory::InMemoryTaskRepository},
    domain::{PipelineConfig, PipelineStage, StageConfig, StageUsage, Task, TaskStatus},
    services::{CreateTaskRequest, TaskLifecycleService},
};
use brunel::queue::{
    adapters::memory::InMemoryQueueRepository, services::QueueScheduler,
};
use mockable::DefaultClock;
use serde_json::json;

/// Stage runner that succeeds every stage with a canned output.
struct CannedRunner;

#[async_trait]
impl StageRunner for CannedRunner {
    async fn run_stage(
        &self,
        _task: &Task,
        stage: PipelineStage,
    ) -> Result<StageOutcome, StageRunnerError> {
        Ok(StageOutcome::Completed {
            output: json!({ "stage": stage.as_str(), "ok": true }),
            artifact_refs: vec![format!("artifact/{stage}")],
            usage: StageUsage {
                tokens: 250,
                cost_microusd: 1_250,
                duration_ms: 500,
            },
        })
    }
}

struct System {
    tasks: Arc<InMemoryTaskRepository>,
    approvals: Arc<InMemoryApprovalRepository>,
    notifier: Arc<RecordingNotifier>,
    lifecycle: TaskLifecycleService<
        InMemoryTaskRepository,
        InMemoryQueueRepository,
        InMemoryApprovalRepository,
        RecordingNotifier,
        DefaultClock,
    >,
    controller: ApprovalController<
        InMemoryApprovalRepository,
        InMemoryTaskRepository,
        InMemoryQueueRepository,
        RecordingNotifier,
        DefaultClock,
    >,
    worker: Worker<
        CannedRunner,
        InMemoryApprovalRepository,
        InMemoryTaskRepository,
        InMemoryQueueRepository,
        RecordingNotifier,
        DefaultClock,
    >,
}

fn system() -> System {
    let tasks = Arc::new(InMemoryTaskRepository::new());
    let queue = Arc::new(InMemoryQueueRepository::new());
    let approvals = Arc::new(InMemoryApprovalRepository::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let clock = Arc::new(DefaultClock);
    let scheduler = QueueScheduler::new(Arc::clone(&queue), Arc::clone(&clock));
    let controller = ApprovalController::new(
        Arc::clone(&approvals),
        Arc::clone(&tasks),
        scheduler.clone(),
        Arc::clone(&notifier),
        Arc::clone(&clock),
    );
    let lifecycle = TaskLifecycleService::new(
        Arc::clone(&tasks),
        scheduler.clone(),
        Arc::clone(&approvals),
        Arc::clone(&notifier),
        Arc::clone(&clock),
    );
    let executor = StageExecutor::new(
        Arc::new(CannedRunner),
        Arc::clone(&tasks),
        scheduler.clone(),
        controller.clone(),
        Arc::clone(&notifier),
        Arc::clone(&clock),
    );
    let worker = Worker::new(
        executor,
        scheduler,
        controller.clone(),
        OrchestratorConfig::default(),
    );
    System {
        tasks,
        approvals,
        notifier,
        lifecycle,
        controller,
        worker,
    }
}

fn gated_config(stage: PipelineStage) -> PipelineConfig {
    PipelineStage::ORDER
        .into_iter()
        .fold(PipelineConfig::new(), |config, candidate| {
            let stage_config = if candidate == stage {
                StageConfig::enabled().with_approval(60, false)
            } else {
                StageConfig::enabled()
            };
            config.with_stage(candidate, stage_config)
        })
}

async fn reload(system: &System, task: &Task) -> Task {
    use brunel::pipeline::ports::TaskRepository;
    system
        .tasks
        .find_by_id(task.id())
        .await
        .expect("lookup should succeed")
        .expect("task exists")
}

#[tokio::test(flavor = "multi_thread")]
async fn unattended_task_runs_to_completion() {
    let system = system();
    let all_enabled = PipelineStage::ORDER
        .into_iter()
        .fold(PipelineConfig::new(), |config, stage| {
            config.with_stage(stage, StageConfig::enabled())
        });

    let task = system
        .lifecycle
        .create_task(CreateTaskRequest::new(all_enabled))
        .await
        .expect("task creation should succeed");
    let executed = system.worker.run_once().await.expect("tick should succeed");

    assert_eq!(executed, 1);
    let completed = reload(&system, &task).await;
    assert_eq!(completed.status(), TaskStatus::Completed);
    for stage in PipelineStage::ORDER {
        assert!(completed.is_stage_complete(stage));
    }
    assert_eq!(completed.usage().total_tokens, 1_250);

    // Every suspend/resume/complete transition was published.
    let updates = system.notifier.updates();
    assert!(
        updates
            .iter()
            .any(|update| update.status == TaskStatus::Completed)
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn gated_task_suspends_resumes_and_completes() {
    let system = system();
    let task = system
        .lifecycle
        .create_task(CreateTaskRequest::new(gated_config(PipelineStage::Implement)))
        .await
        .expect("task creation should succeed");

    system.worker.run_once().await.expect("tick should succeed");
    let suspended = reload(&system, &task).await;
    assert_eq!(suspended.status(), TaskStatus::AwaitingReview);

    let pending = system
        .approvals
        .pending_for_task(task.id())
        .await
        .expect("lookup should succeed")
        .expect("request pending");
    assert_eq!(pending.artifact_refs, vec!["artifact/implement".to_owned()]);

    system
        .controller
        .approve(pending.id, "reviewer", Some("ship it".to_owned()), None)
        .await
        .expect("approval should succeed");
    system.worker.run_once().await.expect("tick should succeed");

    let completed = reload(&system, &task).await;
    assert_eq!(completed.status(), TaskStatus::Completed);

    let counts = system
        .controller
        .status_counts()
        .await
        .expect("counts should succeed");
    assert_eq!(counts, vec![(ApprovalStatus::Approved, 1)]);
}

#[tokio::test(flavor = "multi_thread")]
async fn rejection_reruns_the_stage_before_completion() {
    let system = system();
    let task = system
        .lifecycle
        .create_task(CreateTaskRequest::new(gated_config(PipelineStage::Plan)))
        .await
        .expect("task creation should succeed");

    system.worker.run_once().await.expect("tick should succeed");
    let first_request = system
        .approvals
        .pending_for_task(task.id())
        .await
        .expect("lookup should succeed")
        .expect("request pending");
    system
        .controller
        .reject(first_request.id, "reviewer", "plan is too coarse", None)
        .await
        .expect("rejection should succeed");

    // The re-run completes the stage again and raises a fresh checkpoint.
    system.worker.run_once().await.expect("tick should succeed");
    let second_request = system
        .approvals
        .pending_for_task(task.id())
        .await
        .expect("lookup should succeed")
        .expect("request pending again");
    assert_ne!(second_request.id, first_request.id);

    system
        .controller
        .approve(second_request.id, "reviewer", None, None)
        .await
        .expect("approval should succeed");
    system.worker.run_once().await.expect("tick should succeed");

    let completed = reload(&system, &task).await;
    assert_eq!(completed.status(), TaskStatus::Completed);
    assert_eq!(completed.retry_count(), 1);
}

#[tokio::test(flavor = "multi_thread")]
async fn cancellation_retracts_queued_work() {
    let system = system();
    let task = system
        .lifecycle
        .create_task(CreateTaskRequest::new(gated_config(PipelineStage::Brief)))
        .await
        .expect("task creation should succeed");

    let cancelled = system
        .lifecycle
        .cancel(task.id())
        .await
        .expect("cancellation should succeed");
    assert_eq!(cancelled.status(), TaskStatus::Cancelled);

    // Nothing left for the worker to do.
    let executed = system.worker.run_once().await.expect("tick should succeed");
    assert_eq!(executed, 0);
    assert_eq!(reload(&system, &task).await.status(), TaskStatus::Cancelled);
}
