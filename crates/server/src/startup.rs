//! Wiring of stores, executors and the engine, plus the subcommand bodies.

use std::sync::Arc;

use anyhow::{bail, Context};
use chrono::{NaiveTime, Timelike, Utc};
use phantom_core::{RunSelection, RunSummary, TaskExecutor};
use phantom_emr::aws::AwsControlPlane;
use phantom_emr::{
    ClusterCache, ClusterControl, ClusterManager, LifecycleSettings, ObjectStore, OutputLayout,
    PollSettings, StackControl, StepSubmitter,
};
use phantom_engine::interval::millis_since_midnight;
use phantom_engine::{
    next_fire_offset_millis, recover_running, CancelOutcome, CancellationRegistry, CronScheduler,
    NoReconciliation, PlaygroundRunner, PlaygroundStore, RunDispatcher, RunOutcome,
    SchedulerSettings, SystemClock, INVALID_OFFSET, NO_MORE_TODAY,
};
use tokio::sync::watch;
use tracing::{info, warn};
use uuid::Uuid;

use crate::app_config::AppConfig;
use crate::db;
use crate::pg_store::PgStore;
use crate::sql_executor::PostgresSqlExecutor;

/// The pieces every run-producing command needs.
pub struct Engine {
    pub store: Arc<dyn PlaygroundStore>,
    pub dispatcher: Arc<RunDispatcher>,
}

pub async fn build_engine(config: &AppConfig) -> anyhow::Result<Engine> {
    let pool = db::init_pg_pool(&config.core.postgres).await?;
    let store: Arc<dyn PlaygroundStore> = Arc::new(PgStore::new(pool.clone()));

    if !config.emr.is_configured() {
        warn!("EMR_STACK_NAME or EMR_OUTPUT_BUCKET not set, cluster tasks will fail");
    }
    let aws = AwsControlPlane::connect(&config.emr).await;
    let clusters: Arc<dyn ClusterControl> = Arc::new(aws.clusters);
    let stack: Arc<dyn StackControl> = Arc::new(aws.stack);
    let objects: Arc<dyn ObjectStore> = Arc::new(aws.objects);
    let layout = OutputLayout::new(config.emr.output_bucket.clone(), config.emr.path_prefix.clone());

    let manager = Arc::new(ClusterManager::new(
        clusters.clone(),
        stack,
        LifecycleSettings::from(&config.emr),
        ClusterCache::new(),
    ));
    let cluster_executor: Arc<dyn TaskExecutor> = Arc::new(StepSubmitter::new(
        clusters,
        objects.clone(),
        manager,
        layout.clone(),
        config.emr.retry.clone(),
        PollSettings::from(&config.emr),
    ));

    let sql_pool = match &config.sql_target_url {
        Some(url) => db::connect_sql_target(url, config.core.postgres.max_connections).await?,
        None => pool,
    };
    let sql_executor: Arc<dyn TaskExecutor> = Arc::new(PostgresSqlExecutor::new(sql_pool, objects, layout));

    let runner = Arc::new(PlaygroundRunner::new(
        store.clone(),
        cluster_executor,
        sql_executor,
        Arc::new(NoReconciliation),
        CancellationRegistry::new(),
        config.core.concurrency.run_tick(),
    ));
    let dispatcher = Arc::new(RunDispatcher::from_config(runner, &config.core.concurrency));

    Ok(Engine { store, dispatcher })
}

// ── serve ────────────────────────────────────────────────────────

/// Recover, schedule until ctrl-c, then stop accepting runs.
///
/// Runs still in flight at exit stay RUNNING and are recovered on next start.
pub async fn serve(config: &AppConfig) -> anyhow::Result<()> {
    let engine = build_engine(config).await?;

    let recovered = recover_running(engine.store.as_ref(), &engine.dispatcher).await?;
    info!(count = recovered.len(), "Recovery runs dispatched");

    let scheduler = CronScheduler::new(
        engine.store.clone(),
        engine.dispatcher.clone(),
        Arc::new(SystemClock),
        SchedulerSettings::from(&config.core.concurrency),
    );
    let (stop, shutdown) = watch::channel(false);
    let scheduler_task = tokio::spawn(scheduler.run(shutdown));

    tokio::signal::ctrl_c().await.context("failed to listen for ctrl-c")?;
    info!("Shutdown requested");

    stop.send(true).ok();
    scheduler_task.await.context("scheduler task panicked")?;
    engine.dispatcher.close();
    Ok(())
}

// ── run ──────────────────────────────────────────────────────────

pub async fn run_once(config: &AppConfig, playground_id: Uuid, only: Vec<Uuid>) -> anyhow::Result<()> {
    let engine = build_engine(config).await?;
    let Some(playground) = engine.store.get_playground(playground_id).await? else {
        bail!("playground {} not found", playground_id);
    };

    let mut handle = if only.is_empty() {
        engine.dispatcher.submit_adhoc(playground)
    } else {
        engine.dispatcher.submit_limited(playground, RunSelection::only(only))
    };

    let joined = tokio::select! {
        joined = &mut handle => joined,
        signal = tokio::signal::ctrl_c() => {
            signal.context("failed to listen for ctrl-c")?;
            match engine.dispatcher.request_cancel(playground_id).await? {
                CancelOutcome::Requested => info!(playground_id = %playground_id, "Cancellation requested"),
                other => warn!(playground_id = %playground_id, outcome = ?other, "Cancellation not accepted"),
            }
            handle.await
        }
    };

    let outcome = joined.context("run task panicked")??;
    println!("{}", describe_outcome(playground_id, &outcome));
    Ok(())
}

fn describe_outcome(playground_id: Uuid, outcome: &RunOutcome) -> String {
    match outcome {
        RunOutcome::NotFound => format!("playground {} not found", playground_id),
        RunOutcome::AlreadyRunning => format!("playground {} is already running", playground_id),
        RunOutcome::NoTasks => format!("playground {} has no tasks", playground_id),
        RunOutcome::Finished(summary) => describe_summary(summary),
    }
}

// ── history ──────────────────────────────────────────────────────

pub async fn history(config: &AppConfig, playground_id: Uuid, limit: usize) -> anyhow::Result<()> {
    let pool = db::init_pg_pool(&config.core.postgres).await?;
    let store = PgStore::new(pool);

    let rows = store.run_history(playground_id, limit).await?;
    if rows.is_empty() {
        println!("no runs recorded for {}", playground_id);
    }
    for row in &rows {
        println!("{}", describe_summary(row));
    }
    Ok(())
}

fn describe_summary(summary: &RunSummary) -> String {
    format!(
        "{}  {:<9} {:<15} success={} failure={} skipped={}  run={}",
        summary.finished_at.format("%Y-%m-%d %H:%M:%S"),
        summary.execution_type.as_str(),
        summary.status.as_str(),
        summary.success_count,
        summary.failure_count,
        summary.skipped_count,
        summary.correlation_id,
    )
}

// ── next-fire ────────────────────────────────────────────────────

pub fn next_fire(cron: &str, at: Option<&str>) -> anyhow::Result<()> {
    let now_millis = match at {
        Some(at) => parse_time_of_day(at)?,
        None => millis_since_midnight(Utc::now()),
    };
    println!("{}", describe_offset(next_fire_offset_millis(cron, now_millis)));
    Ok(())
}

fn parse_time_of_day(raw: &str) -> anyhow::Result<i64> {
    let time = NaiveTime::parse_from_str(raw, "%H:%M")
        .with_context(|| format!("expected HH:MM, got {:?}", raw))?;
    Ok(i64::from(time.num_seconds_from_midnight()) * 1000)
}

fn describe_offset(offset: i64) -> String {
    match offset {
        INVALID_OFFSET => "invalid cron expression".to_string(),
        NO_MORE_TODAY => "no more fires today".to_string(),
        millis => {
            let secs = millis / 1000;
            format!(
                "{:02}:{:02}:{:02} UTC ({} ms after midnight)",
                secs / 3600,
                secs / 60 % 60,
                secs % 60,
                millis
            )
        }
    }
}
