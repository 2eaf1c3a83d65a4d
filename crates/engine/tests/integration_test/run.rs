//! Playground run scenarios: dependency order, failure propagation, limited
//! runs, cancellation and recovery.

use std::time::Duration;

use phantom_core::{ExecutionType, RunSelection, Status, TaskKind};
use phantom_engine::*;
use uuid::Uuid;

use crate::fakes::{harness, harness_with, ScriptedExecutor};

fn finished(outcome: Result<RunOutcome, EngineError>) -> phantom_core::RunSummary {
    match outcome.unwrap() {
        RunOutcome::Finished(summary) => summary,
        other => panic!("run did not finish: {:?}", other),
    }
}

#[tokio::test(start_paused = true)]
async fn failure_marks_descendants_upstream_failed() {
    let h = harness(ScriptedExecutor::default().fails("B"));
    let pg = h.playground(None);
    let a = h.task(&pg, "A", None);
    let b = h.task(&pg, "B", Some(a));
    let c = h.task(&pg, "C", Some(b));

    let summary = finished(h.runner.run(&pg, ExecutionType::AdHoc, None).await);

    assert_eq!(h.status_of(a), Some(Status::Success));
    assert_eq!(h.status_of(b), Some(Status::Failed));
    assert_eq!(h.status_of(c), Some(Status::UpstreamFailed));
    assert_eq!(h.cluster.started(), vec!["A", "B"]);
    assert_eq!(summary.status, Status::PartialSuccess);
    assert_eq!((summary.success_count, summary.failure_count, summary.skipped_count), (1, 2, 0));

    let stored = h.store.playground(pg.id).unwrap();
    assert_eq!(stored.current_status, Status::Idle);
    assert_eq!(stored.last_run_status, Some(Status::PartialSuccess));
    assert_eq!(stored.correlation_id, Some(summary.correlation_id));
    assert!(stored.last_executed_at.is_some());
    assert_eq!(h.store.history(), vec![summary]);
}

#[tokio::test(start_paused = true)]
async fn successful_run_records_outputs_and_correlation() {
    let h = harness(ScriptedExecutor::default());
    let pg = h.playground(None);
    let a = h.task(&pg, "A", None);
    let b = h.task(&pg, "B", Some(a));
    let c = h.task(&pg, "C", Some(a));

    let summary = finished(h.runner.run(&pg, ExecutionType::AdHoc, None).await);

    assert_eq!(summary.status, Status::Success);
    assert_eq!(summary.success_count, 3);
    for id in [a, b, c] {
        let task = h.store.task(id).unwrap();
        assert_eq!(task.status, Status::Idle);
        assert!(task.completed_in_run(summary.correlation_id));
        assert!(task.output_location.unwrap().starts_with("s3://bucket/out/"));
    }
}

#[tokio::test(start_paused = true)]
async fn failed_root_alone_fails_the_run() {
    let h = harness(ScriptedExecutor::default().fails("A"));
    let pg = h.playground(None);
    let a = h.task(&pg, "A", None);

    let summary = finished(h.runner.run(&pg, ExecutionType::Scheduled, None).await);

    assert_eq!(summary.status, Status::Failed);
    assert_eq!(summary.execution_type, ExecutionType::Scheduled);
    let task = h.store.task(a).unwrap();
    assert_eq!(task.log_location.as_deref(), Some("s3://bucket/logs/A.log"));
}

#[tokio::test(start_paused = true)]
async fn panicking_executor_counts_as_failure() {
    let h = harness(ScriptedExecutor::default().panics("A"));
    let pg = h.playground(None);
    let a = h.task(&pg, "A", None);
    let b = h.task(&pg, "B", Some(a));
    h.task(&pg, "C", None);

    let summary = finished(h.runner.run(&pg, ExecutionType::AdHoc, None).await);

    assert_eq!(h.status_of(a), Some(Status::Failed));
    assert_eq!(h.status_of(b), Some(Status::UpstreamFailed));
    assert_eq!(summary.status, Status::PartialSuccess);
}

#[tokio::test(start_paused = true)]
async fn limited_run_skips_unselected_tasks() {
    let h = harness(ScriptedExecutor::default());
    let pg = h.playground(None);
    let a = h.task(&pg, "A", None);
    let b = h.task(&pg, "B", Some(a));
    let selection = RunSelection::new([(a, true), (b, false)].into_iter().collect());

    let summary = finished(h.runner.run(&pg, ExecutionType::AdHoc, Some(selection.clone())).await);

    assert_eq!(h.cluster.started(), vec!["A"]);
    assert_eq!(h.status_of(a), Some(Status::Success));
    assert_eq!(h.status_of(b), Some(Status::Skipped));
    assert_eq!(summary.status, Status::Success);
    assert_eq!((summary.success_count, summary.skipped_count), (1, 1));
    assert_eq!(
        h.store.load_run_selection(summary.correlation_id).await.unwrap(),
        Some(selection)
    );
}

#[tokio::test(start_paused = true)]
async fn skipped_parent_still_releases_children() {
    let h = harness(ScriptedExecutor::default());
    let pg = h.playground(None);
    let a = h.task(&pg, "A", None);
    let b = h.task(&pg, "B", Some(a));

    let summary = finished(
        h.runner
            .run(&pg, ExecutionType::AdHoc, Some(RunSelection::only([b])))
            .await,
    );

    assert_eq!(h.cluster.started(), vec!["B"]);
    assert_eq!(h.status_of(a), Some(Status::Skipped));
    assert_eq!(h.status_of(b), Some(Status::Success));
    assert_eq!(summary.status, Status::Success);
}

#[tokio::test(start_paused = true)]
async fn sql_tasks_run_in_process() {
    let h = harness_with(ScriptedExecutor::default(), ScriptedExecutor::default());
    let pg = h.playground(None);
    let a = h.task_of_kind(&pg, "A", None, TaskKind::Sql);
    h.task_of_kind(&pg, "B", Some(a), TaskKind::SparkSql);

    finished(h.runner.run(&pg, ExecutionType::AdHoc, None).await);

    assert_eq!(h.sql.started(), vec!["A"]);
    assert_eq!(h.cluster.started(), vec!["B"]);
}

#[tokio::test(start_paused = true)]
async fn running_playground_is_left_alone() {
    let h = harness(ScriptedExecutor::default());
    let pg = h.playground(None);
    h.task(&pg, "A", None);
    h.store.update_playground(pg.id, |p| p.current_status = Status::Running);

    let outcome = h.runner.run(&pg, ExecutionType::Scheduled, None).await.unwrap();

    assert_eq!(outcome, RunOutcome::AlreadyRunning);
    assert!(h.cluster.started().is_empty());
    assert!(h.store.history().is_empty());
}

#[tokio::test(start_paused = true)]
async fn missing_playground_and_empty_playground_are_noops() {
    let h = harness(ScriptedExecutor::default());
    let ghost = phantom_core::Playground::new("ghost", None);
    assert_eq!(
        h.runner.run(&ghost, ExecutionType::AdHoc, None).await.unwrap(),
        RunOutcome::NotFound
    );

    let empty = h.playground(None);
    assert_eq!(
        h.runner.run(&empty, ExecutionType::AdHoc, None).await.unwrap(),
        RunOutcome::NoTasks
    );
    assert_eq!(h.store.playground(empty.id).unwrap().current_status, Status::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancellation_aborts_and_skips_the_rest() {
    let h = harness(ScriptedExecutor::default().hangs("A"));
    let pg = h.playground(None);
    let a = h.task(&pg, "A", None);
    let b = h.task(&pg, "B", Some(a));
    let c = h.task(&pg, "C", Some(b));
    let d = h.task(&pg, "D", None);

    let runner = h.runner.clone();
    let run_pg = pg.clone();
    let run = tokio::spawn(async move { runner.run(&run_pg, ExecutionType::AdHoc, None).await });

    tokio::time::sleep(Duration::from_secs(3)).await;
    assert!(h.store.playground(pg.id).unwrap().is_running());
    assert!(h.runner.cancellations().request(pg.id));

    let summary = finished(run.await.unwrap());

    assert_eq!(summary.status, Status::Cancelled);
    assert_eq!(h.status_of(a), Some(Status::Cancelled));
    assert_eq!(h.status_of(b), Some(Status::Skipped));
    assert_eq!(h.status_of(c), Some(Status::Skipped));
    assert_eq!(h.status_of(d), Some(Status::Success));
    assert_eq!(
        summary.success_count + summary.failure_count + summary.skipped_count,
        4
    );
    assert!(!h.runner.cancellations().is_requested(pg.id));
    assert_eq!(h.store.playground(pg.id).unwrap().current_status, Status::Idle);
}

#[tokio::test(start_paused = true)]
async fn cancellation_left_by_a_skipped_invocation_survives() {
    let h = harness(ScriptedExecutor::default());
    let pg = h.playground(None);
    h.task(&pg, "A", None);
    h.store.update_playground(pg.id, |p| p.current_status = Status::Running);
    h.runner.cancellations().request(pg.id);

    let outcome = h.runner.run(&pg, ExecutionType::AdHoc, None).await.unwrap();

    assert_eq!(outcome, RunOutcome::AlreadyRunning);
    assert!(h.runner.cancellations().is_requested(pg.id));
}

fn crashed_run(h: &crate::fakes::Harness, pg: &phantom_core::Playground) -> Uuid {
    let run_id = Uuid::new_v4();
    h.store.update_playground(pg.id, |p| {
        p.current_status = Status::Running;
        p.correlation_id = Some(run_id);
    });
    run_id
}

fn completed_in(h: &crate::fakes::Harness, task_id: Uuid, run_id: Uuid, status: Status) {
    let mut task = h.store.task(task_id).unwrap();
    task.correlation_id = Some(run_id);
    task.last_correlation_id = Some(run_id);
    task.last_run_status = Some(status);
    h.store.insert_task(task);
}

#[tokio::test(start_paused = true)]
async fn recovery_does_not_resubmit_completed_tasks() {
    let h = harness(ScriptedExecutor::default());
    let pg = h.playground(None);
    let a = h.task(&pg, "A", None);
    let b = h.task(&pg, "B", Some(a));
    h.task(&pg, "C", Some(b));
    let run_id = crashed_run(&h, &pg);
    completed_in(&h, a, run_id, Status::Success);

    let summary = finished(h.runner.run(&pg, ExecutionType::Recovery, None).await);

    assert_eq!(h.cluster.started(), vec!["B", "C"]);
    assert_eq!(summary.correlation_id, run_id);
    assert_eq!(summary.execution_type, ExecutionType::Recovery);
    assert_eq!(summary.success_count, 3);
    assert_eq!(summary.status, Status::Success);
    assert_eq!(h.store.playground(pg.id).unwrap().current_status, Status::Idle);
}

#[tokio::test(start_paused = true)]
async fn recovered_failure_keeps_subtree_blocked() {
    let h = harness(ScriptedExecutor::default());
    let pg = h.playground(None);
    let a = h.task(&pg, "A", None);
    let b = h.task(&pg, "B", Some(a));
    let run_id = crashed_run(&h, &pg);
    completed_in(&h, a, run_id, Status::Failed);

    let summary = finished(h.runner.run(&pg, ExecutionType::Recovery, None).await);

    assert!(h.cluster.started().is_empty());
    assert_eq!(h.status_of(b), Some(Status::UpstreamFailed));
    assert_eq!((summary.success_count, summary.failure_count), (0, 2));
    assert_eq!(summary.status, Status::Failed);
}

#[tokio::test(start_paused = true)]
async fn tasks_from_an_older_run_are_rerun_on_recovery() {
    let h = harness(ScriptedExecutor::default());
    let pg = h.playground(None);
    let a = h.task(&pg, "A", None);
    crashed_run(&h, &pg);
    completed_in(&h, a, Uuid::new_v4(), Status::Success);

    finished(h.runner.run(&pg, ExecutionType::Recovery, None).await);

    assert_eq!(h.cluster.started(), vec!["A"]);
}

#[tokio::test(start_paused = true)]
async fn children_start_only_after_parent_finishes() {
    let h = harness(ScriptedExecutor::default().with_delay(Duration::from_secs(5)));
    let pg = h.playground(None);
    let a = h.task(&pg, "A", None);
    let b = h.task(&pg, "B", Some(a));
    h.task(&pg, "C", Some(a));
    h.task(&pg, "D", Some(b));
    let e = h.task(&pg, "E", None);
    h.task(&pg, "F", Some(e));
    let parents = [("B", "A"), ("C", "A"), ("D", "B"), ("F", "E")];

    finished(h.runner.run(&pg, ExecutionType::AdHoc, None).await);

    let events = h.cluster.events();
    let pos = |event: String| events.iter().position(|e| *e == event).unwrap();
    for (child, parent) in parents {
        assert!(
            pos(format!("start:{}", child)) > pos(format!("end:{}", parent)),
            "{} started before {} finished: {:?}",
            child,
            parent,
            events
        );
    }
    // Independent roots overlap.
    assert!(pos("start:E".into()) < pos("end:A".into()));
}

#[tokio::test(start_paused = true)]
async fn every_task_is_counted_exactly_once() {
    let h = harness(ScriptedExecutor::default().fails("B").fails("F"));
    let pg = h.playground(None);
    let a = h.task(&pg, "A", None);
    let b = h.task(&pg, "B", Some(a));
    h.task(&pg, "C", Some(b));
    h.task(&pg, "D", Some(b));
    let e = h.task(&pg, "E", Some(a));
    let f = h.task(&pg, "F", None);
    h.task(&pg, "G", Some(f));
    h.task(&pg, "H", Some(e));
    let selection = RunSelection::new(
        h.store
            .find_tasks(pg.id)
            .await
            .unwrap()
            .into_iter()
            .map(|t| (t.id, t.name != "E"))
            .collect(),
    );

    let summary = finished(h.runner.run(&pg, ExecutionType::AdHoc, Some(selection)).await);

    assert_eq!(
        (summary.success_count, summary.failure_count, summary.skipped_count),
        (2, 5, 1)
    );
    assert_eq!(summary.status, Status::PartialSuccess);
}

struct FailingReconciler {
    calls: std::sync::Arc<std::sync::atomic::AtomicU32>,
}

#[async_trait::async_trait]
impl Reconciler for FailingReconciler {
    async fn reconcile(&self, playground_id: Uuid) -> Result<(), EngineError> {
        self.calls.fetch_add(1, std::sync::atomic::Ordering::SeqCst);
        Err(EngineError::Reconcile(format!("row counts differ for {}", playground_id)))
    }
}

#[tokio::test(start_paused = true)]
async fn failing_reconciliation_does_not_fail_the_run() {
    let h = harness(ScriptedExecutor::default());
    let calls = std::sync::Arc::new(std::sync::atomic::AtomicU32::new(0));
    let runner = PlaygroundRunner::new(
        std::sync::Arc::new(h.store.clone()),
        std::sync::Arc::new(h.cluster.clone()),
        std::sync::Arc::new(h.sql.clone()),
        std::sync::Arc::new(FailingReconciler { calls: calls.clone() }),
        CancellationRegistry::new(),
        Duration::from_secs(1),
    );
    let pg = h.playground(None);
    h.task(&pg, "A", None);

    let summary = finished(runner.run(&pg, ExecutionType::AdHoc, None).await);
    tokio::time::sleep(Duration::from_millis(10)).await;

    assert_eq!(summary.status, Status::Success);
    assert_eq!(calls.load(std::sync::atomic::Ordering::SeqCst), 1);
    assert_eq!(h.store.playground(pg.id).unwrap().current_status, Status::Idle);
}
