//! DAG Execution Engine: one playground run, from the RUNNING flip to the history row.
//!
//! Tasks become ready when their parent succeeds. Ready tasks are dispatched
//! onto spawned futures; a single coordinator loop collects results, checks
//! for cancellation on every tick and settles whole subtrees when a parent
//! fails or the run is cancelled.

use std::collections::{HashMap, HashSet, VecDeque};
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use futures::FutureExt;
use phantom_core::{
    ExecutionType, Playground, RunSelection, RunSummary, Status, StepResult, TaskExecutor,
};
use tokio::task::{AbortHandle, JoinSet};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cancel::CancellationRegistry;
use crate::error::EngineError;
use crate::graph::{build_task_graph, TaskGraph};
use crate::reconcile::Reconciler;
use crate::store::{PlaygroundStore, TaskOutcome};

/// How a call to [`PlaygroundRunner::run`] ended.
#[derive(Debug, Clone, PartialEq)]
pub enum RunOutcome {
    NotFound,
    /// Another run holds the playground.
    AlreadyRunning,
    NoTasks,
    Finished(RunSummary),
}

impl RunOutcome {
    pub fn summary(&self) -> Option<&RunSummary> {
        match self {
            RunOutcome::Finished(summary) => Some(summary),
            _ => None,
        }
    }
}

// ── Run state ────────────────────────────────────────────────────

#[derive(Debug, Default, Clone, Copy)]
struct Tally {
    success: u32,
    failure: u32,
    skipped: u32,
}

impl Tally {
    fn count(&mut self, status: Status) {
        match status {
            Status::Success => self.success += 1,
            Status::Skipped | Status::Cancelled => self.skipped += 1,
            _ => self.failure += 1,
        }
    }
}

struct Walk<'g> {
    graph: &'g TaskGraph,
    run_id: Uuid,
    playground_id: Uuid,
    execution_type: ExecutionType,
    selection: Option<&'g RunSelection>,
    ready: VecDeque<Uuid>,
    in_flight: HashMap<Uuid, AbortHandle>,
    settled: HashSet<Uuid>,
    tally: Tally,
    cancelled: bool,
}

impl<'g> Walk<'g> {
    fn new(
        graph: &'g TaskGraph,
        run_id: Uuid,
        playground_id: Uuid,
        execution_type: ExecutionType,
        selection: Option<&'g RunSelection>,
    ) -> Self {
        Self {
            graph,
            run_id,
            playground_id,
            execution_type,
            selection,
            ready: graph.roots().iter().copied().collect(),
            in_flight: HashMap::new(),
            settled: HashSet::new(),
            tally: Tally::default(),
            cancelled: false,
        }
    }

    /// Record the task's terminal status for counting. False if it was already settled.
    fn settle(&mut self, task_id: Uuid, status: Status) -> bool {
        if !self.settled.insert(task_id) {
            return false;
        }
        self.tally.count(status);
        true
    }

    fn enqueue_children(&mut self, task_id: Uuid) {
        let graph = self.graph;
        self.ready.extend(graph.children(task_id).iter().copied());
    }

    fn is_done(&self) -> bool {
        self.ready.is_empty() && self.in_flight.is_empty()
    }

    fn summary(&self, execution_type: ExecutionType, finished_at: DateTime<Utc>) -> RunSummary {
        let status = if self.cancelled {
            Status::Cancelled
        } else if self.tally.success == 0 {
            Status::Failed
        } else if self.tally.failure > 0 {
            Status::PartialSuccess
        } else {
            Status::Success
        };
        RunSummary {
            playground_id: self.playground_id,
            correlation_id: self.run_id,
            execution_type,
            status,
            success_count: self.tally.success,
            failure_count: self.tally.failure,
            skipped_count: self.tally.skipped,
            finished_at,
        }
    }
}

// ── Runner ───────────────────────────────────────────────────────

pub struct PlaygroundRunner {
    store: Arc<dyn PlaygroundStore>,
    cluster: Arc<dyn TaskExecutor>,
    in_process: Arc<dyn TaskExecutor>,
    reconciler: Arc<dyn Reconciler>,
    cancellations: CancellationRegistry,
    tick: Duration,
}

impl PlaygroundRunner {
    /// `cluster` runs Hive, Presto, PySpark and Spark SQL tasks; `in_process`
    /// runs SQL tasks.
    pub fn new(
        store: Arc<dyn PlaygroundStore>,
        cluster: Arc<dyn TaskExecutor>,
        in_process: Arc<dyn TaskExecutor>,
        reconciler: Arc<dyn Reconciler>,
        cancellations: CancellationRegistry,
        tick: Duration,
    ) -> Self {
        Self {
            store,
            cluster,
            in_process,
            reconciler,
            cancellations,
            tick,
        }
    }

    pub fn store(&self) -> &Arc<dyn PlaygroundStore> {
        &self.store
    }

    pub fn cancellations(&self) -> &CancellationRegistry {
        &self.cancellations
    }

    /// Execute one run of `playground`.
    ///
    /// The playground is re-read first; a concurrent run wins unless this is a
    /// recovery, which adopts the stored correlation id. Once the playground
    /// has been flipped to RUNNING the run always ends with `complete_run`,
    /// and store errors from that final write are returned afterwards.
    pub async fn run(
        &self,
        playground: &Playground,
        execution_type: ExecutionType,
        selection: Option<RunSelection>,
    ) -> Result<RunOutcome, EngineError> {
        let Some(current) = self.store.get_playground(playground.id).await? else {
            info!(playground_id = %playground.id, "Playground no longer exists");
            return Ok(RunOutcome::NotFound);
        };
        let recovery = execution_type == ExecutionType::Recovery;

        if current.is_running() && !recovery {
            info!(playground_id = %current.id, execution_type = %execution_type, "Playground already running, skipping");
            return Ok(RunOutcome::AlreadyRunning);
        }

        let tasks = self.store.find_tasks(current.id).await?;
        if tasks.is_empty() && !recovery {
            info!(playground_id = %current.id, "Playground has no tasks");
            return Ok(RunOutcome::NoTasks);
        }

        let run_id = match (recovery, current.correlation_id) {
            (true, Some(id)) => id,
            (true, None) => {
                warn!(playground_id = %current.id, "Recovered playground has no correlation id, starting fresh");
                Uuid::new_v4()
            }
            (false, _) => Uuid::new_v4(),
        };

        if !recovery {
            if !self.store.try_begin_run(current.id, run_id, Utc::now()).await? {
                info!(playground_id = %current.id, "Lost race to start run");
                return Ok(RunOutcome::AlreadyRunning);
            }
            if let Some(selection) = &selection {
                if let Err(e) = self.store.save_run_selection(run_id, selection).await {
                    warn!(correlation_id = %run_id, error = %e, "Failed to persist run selection");
                }
            }
        }

        info!(
            playground_id = %current.id,
            correlation_id = %run_id,
            execution_type = %execution_type,
            tasks = tasks.len(),
            limited = selection.is_some(),
            "Starting playground run"
        );

        let graph = build_task_graph(tasks);
        let mut walk = Walk::new(&graph, run_id, current.id, execution_type, selection.as_ref());
        self.drive(&mut walk).await;

        self.spawn_reconciliation(current.id);

        let summary = walk.summary(execution_type, Utc::now());
        let completed = self.store.complete_run(&summary).await;
        self.cancellations.clear(current.id);

        info!(
            playground_id = %current.id,
            correlation_id = %run_id,
            status = %summary.status,
            success = summary.success_count,
            failure = summary.failure_count,
            skipped = summary.skipped_count,
            "Playground run finished"
        );

        if let Err(e) = completed {
            error!(playground_id = %current.id, error = %e, "Failed to record run completion");
            return Err(e.into());
        }
        Ok(RunOutcome::Finished(summary))
    }

    /// Coordinator loop: dispatch, collect, repeat until nothing is ready or running.
    async fn drive(&self, walk: &mut Walk<'_>) {
        let mut running: JoinSet<(Uuid, StepResult)> = JoinSet::new();
        let mut ticker = tokio::time::interval(self.tick);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            if !walk.cancelled && self.cancellations.is_requested(walk.playground_id) {
                info!(playground_id = %walk.playground_id, correlation_id = %walk.run_id, "Cancellation requested");
                walk.cancelled = true;
            }
            if walk.cancelled {
                self.abort_in_flight(walk).await;
            }

            self.dispatch_ready(walk, &mut running).await;
            if walk.is_done() {
                break;
            }

            let joined = tokio::select! {
                joined = running.join_next(), if !running.is_empty() => joined,
                _ = ticker.tick() => None,
            };
            match joined {
                Some(Ok((task_id, result))) => self.finish(walk, task_id, result).await,
                Some(Err(e)) if e.is_cancelled() => {}
                Some(Err(e)) => error!(error = %e, "Task future failed"),
                None => {}
            }
        }

        running.shutdown().await;
    }

    async fn dispatch_ready(&self, walk: &mut Walk<'_>, running: &mut JoinSet<(Uuid, StepResult)>) {
        let graph = walk.graph;
        while let Some(task_id) = walk.ready.pop_front() {
            if walk.settled.contains(&task_id) || walk.in_flight.contains_key(&task_id) {
                continue;
            }
            let Some(task) = graph.task(task_id) else {
                continue;
            };

            if let Some(selection) = walk.selection {
                if !selection.includes(task_id) {
                    debug!(task_id = %task_id, "Task not selected, skipping");
                    walk.settle(task_id, Status::Skipped);
                    self.record(walk.run_id, task_id, Status::Skipped, None, None).await;
                    walk.enqueue_children(task_id);
                    continue;
                }
            }

            if walk.execution_type == ExecutionType::Recovery && task.completed_in_run(walk.run_id) {
                let status = task.last_run_status.unwrap_or(Status::Failed);
                debug!(task_id = %task_id, status = %status, "Task already finished in this run");
                walk.settle(task_id, status);
                if matches!(status, Status::Success | Status::Skipped) {
                    walk.enqueue_children(task_id);
                } else {
                    self.mark_subtree(walk, task_id, Status::UpstreamFailed).await;
                }
                continue;
            }

            if walk.cancelled {
                walk.settle(task_id, Status::Skipped);
                self.record(walk.run_id, task_id, Status::Skipped, None, None).await;
                self.mark_subtree(walk, task_id, Status::Skipped).await;
                continue;
            }

            if let Err(e) = self.store.mark_task_running(task_id, walk.run_id).await {
                warn!(task_id = %task_id, error = %e, "Failed to mark task running");
            }

            let executor = if task.kind.runs_in_process() {
                self.in_process.clone()
            } else {
                self.cluster.clone()
            };
            let owned = task.clone();
            let handle = running.spawn(async move {
                let result = AssertUnwindSafe(executor.execute(&owned))
                    .catch_unwind()
                    .await
                    .unwrap_or_else(|_| StepResult::failed(owned.id, None, "Executor panicked"));
                (owned.id, result)
            });
            walk.in_flight.insert(task_id, handle);
            info!(task_id = %task_id, name = %task.name, kind = %task.kind, "Task dispatched");
        }
    }

    async fn finish(&self, walk: &mut Walk<'_>, task_id: Uuid, result: StepResult) {
        if walk.in_flight.remove(&task_id).is_none() {
            debug!(task_id = %task_id, "Ignoring result of a settled task");
            return;
        }

        if result.is_success() {
            info!(task_id = %task_id, attempts = result.attempts, "Task succeeded");
            walk.settle(task_id, Status::Success);
            self.record(walk.run_id, task_id, Status::Success, result.output_path, result.log_path)
                .await;
            walk.enqueue_children(task_id);
        } else {
            warn!(task_id = %task_id, reason = %result.message, "Task failed");
            walk.settle(task_id, Status::Failed);
            self.record(walk.run_id, task_id, Status::Failed, result.output_path, result.log_path)
                .await;
            self.mark_subtree(walk, task_id, Status::UpstreamFailed).await;
        }
    }

    /// Abort unfinished tasks. A task that already finished keeps its real outcome.
    async fn abort_in_flight(&self, walk: &mut Walk<'_>) {
        let unfinished: Vec<Uuid> = walk
            .in_flight
            .iter()
            .filter(|(_, handle)| !handle.is_finished())
            .map(|(id, _)| *id)
            .collect();

        for task_id in unfinished {
            if let Some(handle) = walk.in_flight.remove(&task_id) {
                handle.abort();
            }
            warn!(task_id = %task_id, "Task cancelled");
            walk.settle(task_id, Status::Cancelled);
            self.record(walk.run_id, task_id, Status::Cancelled, None, None).await;
            walk.enqueue_children(task_id);
        }
    }

    async fn mark_subtree(&self, walk: &mut Walk<'_>, root: Uuid, status: Status) {
        for task_id in walk.graph.descendants(root) {
            if walk.settle(task_id, status) {
                self.record(walk.run_id, task_id, status, None, None).await;
            }
        }
    }

    async fn record(
        &self,
        run_id: Uuid,
        task_id: Uuid,
        status: Status,
        output: Option<String>,
        log: Option<String>,
    ) {
        let outcome = TaskOutcome::new(task_id, run_id, status).with_locations(output, log);
        if let Err(e) = self.store.record_task_outcome(&outcome).await {
            warn!(task_id = %task_id, status = %status, error = %e, "Failed to persist task outcome");
        }
    }

    fn spawn_reconciliation(&self, playground_id: Uuid) {
        let reconciler = self.reconciler.clone();
        tokio::spawn(async move {
            if let Err(e) = reconciler.reconcile(playground_id).await {
                warn!(playground_id = %playground_id, error = %e, "Reconciliation failed");
            }
        });
    }
}
