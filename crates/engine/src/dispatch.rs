//! Run admission: two bounded pools, one for operator-triggered runs and one
//! for cron firings and recoveries, plus cancellation requests.

use std::sync::Arc;

use phantom_core::config::ConcurrencyConfig;
use phantom_core::{ExecutionType, Playground, RunSelection};
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};
use uuid::Uuid;

use crate::error::EngineError;
use crate::run::{PlaygroundRunner, RunOutcome};

pub type RunHandle = JoinHandle<Result<RunOutcome, EngineError>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pool {
    AdHoc,
    Scheduled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    Requested,
    NotRunning,
    NotFound,
}

pub struct RunDispatcher {
    runner: Arc<PlaygroundRunner>,
    adhoc: Arc<Semaphore>,
    scheduled: Arc<Semaphore>,
}

impl RunDispatcher {
    pub fn new(runner: Arc<PlaygroundRunner>, adhoc_slots: usize, scheduled_slots: usize) -> Self {
        Self {
            runner,
            adhoc: Arc::new(Semaphore::new(adhoc_slots.max(1))),
            scheduled: Arc::new(Semaphore::new(scheduled_slots.max(1))),
        }
    }

    pub fn from_config(runner: Arc<PlaygroundRunner>, config: &ConcurrencyConfig) -> Self {
        Self::new(runner, config.adhoc_pool_size, config.scheduled_pool_size)
    }

    pub fn runner(&self) -> &Arc<PlaygroundRunner> {
        &self.runner
    }

    pub fn submit_adhoc(&self, playground: Playground) -> RunHandle {
        self.spawn(Pool::AdHoc, playground, ExecutionType::AdHoc, None)
    }

    /// Ad-hoc run restricted to the selected tasks; the rest are SKIPPED.
    pub fn submit_limited(&self, playground: Playground, selection: RunSelection) -> RunHandle {
        self.spawn(Pool::AdHoc, playground, ExecutionType::AdHoc, Some(selection))
    }

    pub fn submit_scheduled(&self, playground: Playground) -> RunHandle {
        self.spawn(Pool::Scheduled, playground, ExecutionType::Scheduled, None)
    }

    pub fn submit_recovery(&self, playground: Playground, selection: Option<RunSelection>) -> RunHandle {
        self.spawn(Pool::Scheduled, playground, ExecutionType::Recovery, selection)
    }

    /// Ask the run currently holding `playground_id` to stop.
    pub async fn request_cancel(&self, playground_id: Uuid) -> Result<CancelOutcome, EngineError> {
        let Some(playground) = self.runner.store().get_playground(playground_id).await? else {
            return Ok(CancelOutcome::NotFound);
        };
        if !playground.is_running() {
            info!(playground_id = %playground_id, "Cancel ignored, playground is not running");
            return Ok(CancelOutcome::NotRunning);
        }
        self.runner.cancellations().request(playground_id);
        info!(playground_id = %playground_id, "Cancellation registered");
        Ok(CancelOutcome::Requested)
    }

    /// Stop admitting new runs. Runs already holding a slot finish normally.
    pub fn close(&self) {
        self.adhoc.close();
        self.scheduled.close();
    }

    pub fn available(&self, pool: Pool) -> usize {
        self.semaphore(pool).available_permits()
    }

    fn semaphore(&self, pool: Pool) -> &Arc<Semaphore> {
        match pool {
            Pool::AdHoc => &self.adhoc,
            Pool::Scheduled => &self.scheduled,
        }
    }

    fn spawn(
        &self,
        pool: Pool,
        playground: Playground,
        execution_type: ExecutionType,
        selection: Option<RunSelection>,
    ) -> RunHandle {
        let slots = self.semaphore(pool).clone();
        let runner = self.runner.clone();
        tokio::spawn(async move {
            let _permit = slots
                .acquire_owned()
                .await
                .map_err(|_| EngineError::ShuttingDown)?;
            let outcome = runner.run(&playground, execution_type, selection).await;
            if let Err(e) = &outcome {
                error!(
                    playground_id = %playground.id,
                    execution_type = %execution_type,
                    pool = ?pool,
                    error = %e,
                    "Playground run failed"
                );
            }
            outcome
        })
    }
}
