//! End-to-end tests: orchestrator, evaluation worker and schedulers running
//! against the in-memory store, with the test reporting node-side states.

mod test_harness;

use std::collections::HashSet;
use std::time::Duration;

use orch_lite::models::{
    EvalTrigger, ExecutionDesiredStateType, ExecutionState, ExecutionStateType, Job,
    JobStateType, JobType, NodeState, ReschedulingPolicy,
};
use orch_lite::store::JobStore;
use test_harness::{assert_eventually, OrchestratorFixture};

const SETTLE: Duration = Duration::from_secs(3);

#[tokio::test]
async fn test_batch_job_runs_to_completion() {
    let mut fixture = OrchestratorFixture::start(3).await;
    let job_id = fixture
        .orchestrator
        .submit_job(Job::new("batch", JobType::Batch, 2))
        .await
        .unwrap();

    assert_eventually(
        || async { fixture.executions(&job_id).await.len() == 2 },
        SETTLE,
        "two executions should be placed",
    )
    .await;
    let executions = fixture.executions(&job_id).await;
    let nodes: HashSet<&str> = executions.iter().map(|e| e.node_id.as_str()).collect();
    assert_eq!(nodes.len(), 2, "executions must land on distinct nodes");

    for exec in &executions {
        fixture
            .report(&exec.id, ExecutionState::new(ExecutionStateType::AskForBidAccepted))
            .await;
    }
    assert_eventually(
        || async {
            fixture
                .executions(&job_id)
                .await
                .iter()
                .all(|e| e.desired_state.state_type == ExecutionDesiredStateType::Running)
        },
        SETTLE,
        "accepted bids should be approved",
    )
    .await;

    for exec in &executions {
        fixture
            .report(&exec.id, ExecutionState::new(ExecutionStateType::BidAccepted))
            .await;
    }
    assert_eventually(
        || async { fixture.job_state(&job_id).await == Some(JobStateType::Running) },
        SETTLE,
        "job should be running",
    )
    .await;

    for exec in &executions {
        fixture
            .report(&exec.id, ExecutionState::new(ExecutionStateType::Completed))
            .await;
    }
    assert_eventually(
        || async { fixture.job_state(&job_id).await == Some(JobStateType::Completed) },
        SETTLE,
        "job should complete once every execution completed",
    )
    .await;
    assert_eq!(fixture.executions(&job_id).await.len(), 2, "no extra executions");

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_failed_execution_is_replaced() {
    let mut fixture = OrchestratorFixture::start(1).await;
    let job_id = fixture
        .orchestrator
        .submit_job(Job::new("doomed", JobType::Batch, 1))
        .await
        .unwrap();

    assert_eventually(
        || async { fixture.executions(&job_id).await.len() == 1 },
        SETTLE,
        "one execution should be placed",
    )
    .await;
    let exec = fixture.executions(&job_id).await.remove(0);
    fixture
        .report(&exec.id, ExecutionState::new(ExecutionStateType::AskForBidAccepted))
        .await;
    fixture
        .report(&exec.id, ExecutionState::new(ExecutionStateType::BidAccepted))
        .await;
    fixture
        .report(
            &exec.id,
            ExecutionState::new(ExecutionStateType::Failed).with_message("exit status 3"),
        )
        .await;

    assert_eventually(
        || async { fixture.executions(&job_id).await.len() == 2 },
        SETTLE,
        "failed execution should be replaced while retries are allowed",
    )
    .await;
    assert_ne!(fixture.job_state(&job_id).await, Some(JobStateType::Failed));
    fixture.shutdown().await;
}

#[tokio::test]
async fn test_disconnected_node_execution_is_replaced() {
    let mut fixture = OrchestratorFixture::start(2).await;
    let job_id = fixture
        .orchestrator
        .submit_job(Job::new("service", JobType::Service, 1))
        .await
        .unwrap();

    assert_eventually(
        || async { fixture.executions(&job_id).await.len() == 1 },
        SETTLE,
        "one execution should be placed",
    )
    .await;
    let original = fixture.executions(&job_id).await.remove(0);
    fixture
        .report(&original.id, ExecutionState::new(ExecutionStateType::AskForBidAccepted))
        .await;
    fixture
        .report(&original.id, ExecutionState::new(ExecutionStateType::BidAccepted))
        .await;
    assert_eventually(
        || async { fixture.job_state(&job_id).await == Some(JobStateType::Running) },
        SETTLE,
        "service should be running",
    )
    .await;

    let queued = fixture
        .orchestrator
        .update_node_state(&original.node_id, NodeState::Disconnected)
        .await
        .unwrap();
    assert_eq!(queued, 1);

    assert_eventually(
        || async {
            let executions = fixture.executions(&job_id).await;
            let lost_stopped = executions.iter().any(|e| {
                e.id == original.id
                    && e.desired_state.state_type == ExecutionDesiredStateType::Stopped
                    && e.compute_state.state_type == ExecutionStateType::Cancelled
            });
            let replaced = executions
                .iter()
                .any(|e| !e.is_terminal() && e.node_id != original.node_id);
            lost_stopped && replaced
        },
        SETTLE,
        "lost execution should be stopped and replaced on the healthy node",
    )
    .await;
    assert_eq!(fixture.job_state(&job_id).await, Some(JobStateType::Running));

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_bid_rejection_retries_after_backoff() {
    let mut fixture = OrchestratorFixture::start(2).await;
    let job = Job::new("picky", JobType::Batch, 1).with_rescheduling_policy(ReschedulingPolicy {
        base_retry_delay_secs: 1,
        maximum_retry_delay_secs: 1,
        ..Default::default()
    });
    let job_id = fixture.orchestrator.submit_job(job).await.unwrap();

    assert_eventually(
        || async { fixture.executions(&job_id).await.len() == 1 },
        SETTLE,
        "one execution should be placed",
    )
    .await;
    let rejected = fixture.executions(&job_id).await.remove(0);
    fixture
        .orchestrator
        .inventory
        .record_bid_rejection(&rejected.node_id)
        .await;
    fixture
        .report(
            &rejected.id,
            ExecutionState::new(ExecutionStateType::AskForBidRejected).with_message("busy"),
        )
        .await;

    assert_eventually(
        || async {
            fixture
                .orchestrator
                .store
                .get_job_history(&job_id)
                .await
                .unwrap_or_default()
                .iter()
                .any(|h| h.comment.contains("scheduling deferred until"))
        },
        SETTLE,
        "deferral should be recorded in the job history",
    )
    .await;
    assert_eq!(fixture.executions(&job_id).await.len(), 1, "no placement before the backoff");

    assert_eventually(
        || async {
            fixture
                .executions(&job_id)
                .await
                .iter()
                .any(|e| !e.is_terminal())
        },
        Duration::from_secs(5),
        "a new execution should be placed after the backoff",
    )
    .await;
    assert_eq!(fixture.job_state(&job_id).await, Some(JobStateType::Pending));

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_stop_job_cancels_executions() {
    let mut fixture = OrchestratorFixture::start(3).await;
    let job_id = fixture
        .orchestrator
        .submit_job(Job::new("stoppable", JobType::Service, 2))
        .await
        .unwrap();

    assert_eventually(
        || async { fixture.executions(&job_id).await.len() == 2 },
        SETTLE,
        "two executions should be placed",
    )
    .await;

    fixture
        .orchestrator
        .stop_job(&job_id, "user request")
        .await
        .unwrap();
    assert_eventually(
        || async {
            fixture.executions(&job_id).await.iter().all(|e| {
                e.compute_state.state_type == ExecutionStateType::Cancelled
                    && e.desired_state.state_type == ExecutionDesiredStateType::Stopped
            })
        },
        SETTLE,
        "executions of a stopped job should be cancelled",
    )
    .await;
    assert_eq!(fixture.job_state(&job_id).await, Some(JobStateType::Stopped));

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_ops_job_runs_on_every_node() {
    let mut fixture = OrchestratorFixture::start(4).await;
    let job_id = fixture
        .orchestrator
        .submit_job(Job::new("ops", JobType::Ops, 1))
        .await
        .unwrap();

    assert_eventually(
        || async { fixture.executions(&job_id).await.len() == 4 },
        SETTLE,
        "ops job should place one execution per node",
    )
    .await;
    let nodes: HashSet<String> = fixture
        .executions(&job_id)
        .await
        .into_iter()
        .map(|e| e.node_id)
        .collect();
    assert_eq!(nodes.len(), 4);

    fixture.shutdown().await;
}

#[tokio::test]
async fn test_repeated_evaluations_do_not_over_place() {
    let mut fixture = OrchestratorFixture::start(5).await;
    let mut job_ids = Vec::new();
    for i in 0..10 {
        let id = fixture
            .orchestrator
            .submit_job(Job::new(format!("job-{i}"), JobType::Batch, 2))
            .await
            .unwrap();
        job_ids.push(id);
    }
    for _ in 0..3 {
        for id in &job_ids {
            fixture
                .orchestrator
                .evaluate(id, EvalTrigger::Manual)
                .await
                .unwrap();
        }
    }

    assert_eventually(
        || async {
            for id in &job_ids {
                if fixture.executions(id).await.len() != 2 {
                    return false;
                }
            }
            true
        },
        SETTLE,
        "every job should have exactly its two executions",
    )
    .await;
    tokio::time::sleep(Duration::from_millis(200)).await;
    for id in &job_ids {
        assert_eq!(fixture.executions(id).await.len(), 2, "job {id} over-placed");
    }

    fixture.shutdown().await;
}
