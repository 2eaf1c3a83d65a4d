//! Persistence seam for playgrounds, tasks, run selections and run history.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phantom_core::{Playground, RunSelection, RunSummary, Status, Task};
use uuid::Uuid;

use crate::error::StoreError;

/// Terminal bookkeeping for one task inside one run.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskOutcome {
    pub task_id: Uuid,
    pub correlation_id: Uuid,
    pub status: Status,
    pub output_location: Option<String>,
    pub log_location: Option<String>,
}

impl TaskOutcome {
    pub fn new(task_id: Uuid, correlation_id: Uuid, status: Status) -> Self {
        Self {
            task_id,
            correlation_id,
            status,
            output_location: None,
            log_location: None,
        }
    }

    pub fn with_locations(mut self, output: Option<String>, log: Option<String>) -> Self {
        self.output_location = output;
        self.log_location = log;
        self
    }
}

#[async_trait]
pub trait PlaygroundStore: Send + Sync {
    async fn get_playground(&self, id: Uuid) -> Result<Option<Playground>, StoreError>;

    /// Tasks of a playground, oldest first.
    async fn find_tasks(&self, playground_id: Uuid) -> Result<Vec<Task>, StoreError>;

    /// Playgrounds carrying a non-empty cron expression.
    async fn scheduleable_playgrounds(&self) -> Result<Vec<Playground>, StoreError>;

    /// Every playground created or modified strictly after `mark`.
    async fn playgrounds_touched_after(&self, mark: DateTime<Utc>) -> Result<Vec<Playground>, StoreError>;

    async fn running_playgrounds(&self) -> Result<Vec<Playground>, StoreError>;

    /// Flip a playground to RUNNING unless it already is. Returns whether this
    /// caller won the transition.
    async fn try_begin_run(
        &self,
        playground_id: Uuid,
        correlation_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    async fn mark_task_running(&self, task_id: Uuid, correlation_id: Uuid) -> Result<(), StoreError>;

    async fn record_task_outcome(&self, outcome: &TaskOutcome) -> Result<(), StoreError>;

    /// Return the playground to IDLE with the run's final counters and append
    /// the history row, as one unit.
    async fn complete_run(&self, summary: &RunSummary) -> Result<(), StoreError>;

    async fn save_run_selection(&self, correlation_id: Uuid, selection: &RunSelection) -> Result<(), StoreError>;

    async fn load_run_selection(&self, correlation_id: Uuid) -> Result<Option<RunSelection>, StoreError>;

    /// Most recent runs first.
    async fn run_history(&self, playground_id: Uuid, limit: usize) -> Result<Vec<RunSummary>, StoreError>;
}

// ── In-memory store ──────────────────────────────────────────────

#[derive(Default)]
struct Tables {
    playgrounds: HashMap<Uuid, Playground>,
    tasks: Vec<Task>,
    selections: HashMap<Uuid, RunSelection>,
    history: Vec<RunSummary>,
}

/// Process-local store. Backs tests and single-shot runs without a database.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<Mutex<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn tables(&self) -> MutexGuard<'_, Tables> {
        self.tables.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn insert_playground(&self, playground: Playground) {
        self.tables().playgrounds.insert(playground.id, playground);
    }

    /// Insert or replace a task.
    pub fn insert_task(&self, task: Task) {
        let mut tables = self.tables();
        match tables.tasks.iter_mut().find(|t| t.id == task.id) {
            Some(existing) => *existing = task,
            None => tables.tasks.push(task),
        }
    }

    pub fn playground(&self, id: Uuid) -> Option<Playground> {
        self.tables().playgrounds.get(&id).cloned()
    }

    pub fn task(&self, id: Uuid) -> Option<Task> {
        self.tables().tasks.iter().find(|t| t.id == id).cloned()
    }

    pub fn history(&self) -> Vec<RunSummary> {
        self.tables().history.clone()
    }

    /// Apply `edit` to a stored playground, as an operator edit would.
    pub fn update_playground(&self, id: Uuid, edit: impl FnOnce(&mut Playground)) -> bool {
        match self.tables().playgrounds.get_mut(&id) {
            Some(pg) => {
                edit(pg);
                true
            }
            None => false,
        }
    }
}

#[async_trait]
impl PlaygroundStore for MemoryStore {
    async fn get_playground(&self, id: Uuid) -> Result<Option<Playground>, StoreError> {
        Ok(self.playground(id))
    }

    async fn find_tasks(&self, playground_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let mut tasks: Vec<Task> = self
            .tables()
            .tasks
            .iter()
            .filter(|t| t.playground_id == playground_id)
            .cloned()
            .collect();
        tasks.sort_by_key(|t| t.created_at);
        Ok(tasks)
    }

    async fn scheduleable_playgrounds(&self) -> Result<Vec<Playground>, StoreError> {
        Ok(self
            .tables()
            .playgrounds
            .values()
            .filter(|pg| pg.is_scheduleable())
            .cloned()
            .collect())
    }

    async fn playgrounds_touched_after(&self, mark: DateTime<Utc>) -> Result<Vec<Playground>, StoreError> {
        Ok(self
            .tables()
            .playgrounds
            .values()
            .filter(|pg| pg.touched_at() > mark)
            .cloned()
            .collect())
    }

    async fn running_playgrounds(&self) -> Result<Vec<Playground>, StoreError> {
        Ok(self
            .tables()
            .playgrounds
            .values()
            .filter(|pg| pg.is_running())
            .cloned()
            .collect())
    }

    async fn try_begin_run(
        &self,
        playground_id: Uuid,
        correlation_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut tables = self.tables();
        let Some(pg) = tables.playgrounds.get_mut(&playground_id) else {
            return Ok(false);
        };
        if pg.is_running() {
            return Ok(false);
        }
        pg.current_status = Status::Running;
        pg.correlation_id = Some(correlation_id);
        pg.last_executed_at = Some(started_at);
        Ok(true)
    }

    async fn mark_task_running(&self, task_id: Uuid, correlation_id: Uuid) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if let Some(task) = tables.tasks.iter_mut().find(|t| t.id == task_id) {
            task.status = Status::Running;
            task.correlation_id = Some(correlation_id);
        }
        Ok(())
    }

    async fn record_task_outcome(&self, outcome: &TaskOutcome) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if let Some(task) = tables.tasks.iter_mut().find(|t| t.id == outcome.task_id) {
            task.status = Status::Idle;
            task.last_run_status = Some(outcome.status);
            task.correlation_id = Some(outcome.correlation_id);
            task.last_correlation_id = Some(outcome.correlation_id);
            task.output_location = outcome.output_location.clone();
            task.log_location = outcome.log_location.clone();
        }
        Ok(())
    }

    async fn complete_run(&self, summary: &RunSummary) -> Result<(), StoreError> {
        let mut tables = self.tables();
        if let Some(pg) = tables.playgrounds.get_mut(&summary.playground_id) {
            pg.current_status = Status::Idle;
            pg.last_run_status = Some(summary.status);
            pg.last_run_end_time = Some(summary.finished_at);
            pg.last_run_success_count = summary.success_count;
            pg.last_run_failure_count = summary.failure_count;
        }
        tables.history.push(summary.clone());
        Ok(())
    }

    async fn save_run_selection(&self, correlation_id: Uuid, selection: &RunSelection) -> Result<(), StoreError> {
        self.tables().selections.insert(correlation_id, selection.clone());
        Ok(())
    }

    async fn load_run_selection(&self, correlation_id: Uuid) -> Result<Option<RunSelection>, StoreError> {
        Ok(self.tables().selections.get(&correlation_id).cloned())
    }

    async fn run_history(&self, playground_id: Uuid, limit: usize) -> Result<Vec<RunSummary>, StoreError> {
        let mut rows: Vec<RunSummary> = self
            .tables()
            .history
            .iter()
            .filter(|h| h.playground_id == playground_id)
            .cloned()
            .collect();
        rows.sort_by(|a, b| b.finished_at.cmp(&a.finished_at));
        rows.truncate(limit);
        Ok(rows)
    }
}
