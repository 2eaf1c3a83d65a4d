//! Step submission scenarios: retries, polling and output resolution.

use std::sync::Arc;
use std::time::Duration;

use phantom_core::{StepState, Task, TaskExecutor, TaskKind};
use phantom_emr::*;
use uuid::Uuid;

use crate::fakes::{manager, step, FakeClusters, FakeObjects, FakeStack};

async fn submitter(clusters: &FakeClusters, objects: &FakeObjects, retry: RetryPolicy) -> StepSubmitter {
    let stack = FakeStack::default();
    let cache = ClusterCache::new();
    cache
        .set(ClusterHandle::observed("j-1", ClusterState::Waiting))
        .await;
    let clusters = clusters.clone().with_state("j-1", &[ClusterState::Waiting]);

    StepSubmitter::new(
        Arc::new(clusters.clone()),
        Arc::new(objects.clone()),
        Arc::new(manager(&clusters, &stack, cache)),
        OutputLayout::new("bucket", "data-phantom"),
        retry,
        PollSettings {
            interval: Duration::from_secs(30),
            max_attempts: 10,
        },
    )
}

fn task(kind: TaskKind) -> Task {
    Task::new(Uuid::new_v4(), "t", kind, "select 1")
}

#[tokio::test(start_paused = true)]
async fn max_retries_three_means_four_attempts() {
    let clusters = FakeClusters::default().with_step_outcomes(vec![step(
        StepState::Failed,
        Some("Table not found"),
    )]);
    let objects = FakeObjects::default();
    let sub = submitter(&clusters, &objects, RetryPolicy::default()).await;

    let result = sub.submit(&task(TaskKind::Hive)).await;

    assert_eq!(result.state, StepState::Failed);
    assert_eq!(result.attempts, 4);
    assert_eq!(clusters.calls().2, 4, "one add_step per attempt");
    assert_eq!(
        result.message,
        "Failed after 4 attempts. Last failure: Table not found"
    );
    assert_eq!(result.step_id.as_deref(), Some("s-4"));
    assert!(result.log_path.is_some());
    assert!(result.output_path.is_none());
}

#[tokio::test(start_paused = true)]
async fn succeeds_after_transient_failure() {
    let clusters = FakeClusters::default().with_step_outcomes(vec![
        step(StepState::Failed, Some("throttled")),
        step(StepState::Running, None),
        step(StepState::Completed, None),
    ]);
    let objects = FakeObjects::default();
    let sub = submitter(&clusters, &objects, RetryPolicy::default()).await;
    let t = task(TaskKind::Presto);

    let result = sub.execute(&t).await;

    assert!(result.is_success());
    assert_eq!(result.attempts, 2);
    assert_eq!(result.step_id.as_deref(), Some("s-2"));
    assert_eq!(
        result.output_path.as_deref(),
        Some(format!("s3://bucket/data-phantom/{}/{}/{}.txt", chrono::Utc::now().format("%Y-%m-%d"), t.playground_id, t.id).as_str())
    );

    let submitted = clusters.submitted();
    assert_eq!(submitted.len(), 2);
    assert!(submitted.iter().all(|(cluster, s)| cluster == "j-1" && s.name.starts_with("PrestoQuery-")));
    assert_eq!(objects.keys().len(), 2, "script uploaded per attempt");
}

#[tokio::test(start_paused = true)]
async fn step_that_never_finishes_consumes_attempts() {
    let clusters = FakeClusters::default().with_step_outcomes(vec![step(StepState::Running, None)]);
    let objects = FakeObjects::default();
    let retry = RetryPolicy {
        max_retries: 1,
        ..RetryPolicy::default()
    };
    let sub = submitter(&clusters, &objects, retry).await;

    let result = sub.submit(&task(TaskKind::Hive)).await;

    assert_eq!(result.attempts, 2);
    assert!(result.message.contains("did not finish after 10 polls"));
    assert_eq!(clusters.calls().3, 20);
}

#[tokio::test(start_paused = true)]
async fn sql_tasks_are_rejected_without_retry() {
    let clusters = FakeClusters::default();
    let objects = FakeObjects::default();
    let sub = submitter(&clusters, &objects, RetryPolicy::default()).await;

    let result = sub.submit(&task(TaskKind::Sql)).await;

    assert_eq!(result.state, StepState::Failed);
    assert_eq!(result.attempts, 1);
    assert_eq!(clusters.control_plane_calls(), 0);
}

#[tokio::test(start_paused = true)]
async fn cancelled_step_keeps_its_state() {
    let clusters = FakeClusters::default()
        .with_step_outcomes(vec![step(StepState::Cancelled, Some("Cancelled by user"))]);
    let objects = FakeObjects::default();
    let retry = RetryPolicy {
        max_retries: 0,
        ..RetryPolicy::default()
    };
    let sub = submitter(&clusters, &objects, retry).await;

    let result = sub.submit(&task(TaskKind::Hive)).await;

    assert!(!result.is_success());
    assert_eq!(result.state, StepState::Cancelled);
    assert_eq!(result.attempts, 1);
    assert!(result.message.ends_with("Cancelled by user"));
}

#[tokio::test(start_paused = true)]
async fn errored_attempt_does_not_inherit_earlier_step() {
    let clusters = FakeClusters::default().with_step_outcomes(vec![
        step(StepState::Failed, Some("Table not found")),
        step(StepState::Running, None),
    ]);
    let objects = FakeObjects::default();
    let retry = RetryPolicy {
        max_retries: 1,
        ..RetryPolicy::default()
    };
    let sub = submitter(&clusters, &objects, retry).await;

    let result = sub.submit(&task(TaskKind::Hive)).await;

    assert_eq!(result.attempts, 2);
    assert_eq!(result.state, StepState::Failed);
    assert!(result.message.contains("did not finish after 10 polls"));
    assert!(result.step_id.is_none());
    assert!(result.log_path.is_none());
}

#[tokio::test(start_paused = true)]
async fn spark_sql_output_resolves_to_first_data_file() {
    let t = task(TaskKind::SparkSql);
    let date = chrono::Utc::now().format("%Y-%m-%d").to_string();
    let dir = format!(
        "data-phantom/sparksql-output/{}/{}/{}/{}/",
        date, t.playground_id, t.id, t.id
    );
    let objects = FakeObjects::default()
        .with_key("bucket", &format!("{}_SUCCESS", dir))
        .with_key("bucket", &format!("{}part-00000.csv", dir));
    let clusters = FakeClusters::default();
    let sub = submitter(&clusters, &objects, RetryPolicy::default()).await;

    let result = sub.submit(&t).await;

    assert!(result.is_success());
    assert_eq!(
        result.output_path.as_deref(),
        Some(format!("s3://bucket/{}part-00000.csv", dir).as_str())
    );
    assert!(result.log_path.is_none());
}
