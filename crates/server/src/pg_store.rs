//! PostgreSQL-backed [`PlaygroundStore`].

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use phantom_core::{ExecutionType, Playground, RunSelection, RunSummary, Status, Task, TaskKind};
use phantom_engine::{PlaygroundStore, StoreError, TaskOutcome};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use uuid::Uuid;

const PLAYGROUND_COLUMNS: &str = "id, name, cron_expression, current_status, last_run_status, \
     last_executed_at, last_run_end_time, correlation_id, last_run_success_count, \
     last_run_failure_count, created_at, modified_at";

const TASK_COLUMNS: &str = "id, name, playground_id, parent_id, kind, query, status, last_run_status, \
     correlation_id, last_correlation_id, output_location, log_location, created_at, modified_at";

const HISTORY_COLUMNS: &str =
    "playground_id, correlation_id, execution_type, status, success_count, failure_count, skipped_count, finished_at";

fn db_err(e: sqlx::Error) -> StoreError {
    StoreError::Database(e.to_string())
}

fn col<'r, T>(row: &'r PgRow, name: &str) -> Result<T, StoreError>
where
    T: sqlx::Decode<'r, sqlx::Postgres> + sqlx::Type<sqlx::Postgres>,
{
    row.try_get(name).map_err(db_err)
}

fn parse_status(raw: &str) -> Result<Status, StoreError> {
    raw.parse().map_err(|e: phantom_core::PhantomError| StoreError::Corrupt(e.to_string()))
}

fn parse_optional_status(raw: Option<String>) -> Result<Option<Status>, StoreError> {
    raw.as_deref().map(parse_status).transpose()
}

/// Counters are INTEGER columns; negative values never come from this store.
fn count(value: i32) -> u32 {
    u32::try_from(value).unwrap_or(0)
}

fn playground_from_row(row: &PgRow) -> Result<Playground, StoreError> {
    Ok(Playground {
        id: col(row, "id")?,
        name: col(row, "name")?,
        cron_expression: col(row, "cron_expression")?,
        current_status: parse_status(&col::<String>(row, "current_status")?)?,
        last_run_status: parse_optional_status(col(row, "last_run_status")?)?,
        last_executed_at: col(row, "last_executed_at")?,
        last_run_end_time: col(row, "last_run_end_time")?,
        correlation_id: col(row, "correlation_id")?,
        last_run_success_count: count(col(row, "last_run_success_count")?),
        last_run_failure_count: count(col(row, "last_run_failure_count")?),
        created_at: col(row, "created_at")?,
        modified_at: col(row, "modified_at")?,
    })
}

fn task_from_row(row: &PgRow) -> Result<Task, StoreError> {
    let kind: String = col(row, "kind")?;
    Ok(Task {
        id: col(row, "id")?,
        name: col(row, "name")?,
        playground_id: col(row, "playground_id")?,
        parent_id: col(row, "parent_id")?,
        kind: kind
            .parse::<TaskKind>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        query: col(row, "query")?,
        status: parse_status(&col::<String>(row, "status")?)?,
        last_run_status: parse_optional_status(col(row, "last_run_status")?)?,
        correlation_id: col(row, "correlation_id")?,
        last_correlation_id: col(row, "last_correlation_id")?,
        output_location: col(row, "output_location")?,
        log_location: col(row, "log_location")?,
        created_at: col(row, "created_at")?,
        modified_at: col(row, "modified_at")?,
    })
}

fn summary_from_row(row: &PgRow) -> Result<RunSummary, StoreError> {
    let execution_type: String = col(row, "execution_type")?;
    Ok(RunSummary {
        playground_id: col(row, "playground_id")?,
        correlation_id: col(row, "correlation_id")?,
        execution_type: execution_type
            .parse::<ExecutionType>()
            .map_err(|e| StoreError::Corrupt(e.to_string()))?,
        status: parse_status(&col::<String>(row, "status")?)?,
        success_count: count(col(row, "success_count")?),
        failure_count: count(col(row, "failure_count")?),
        skipped_count: count(col(row, "skipped_count")?),
        finished_at: col(row, "finished_at")?,
    })
}

fn playgrounds_from_rows(rows: Vec<PgRow>) -> Result<Vec<Playground>, StoreError> {
    rows.iter().map(playground_from_row).collect()
}

pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    async fn playgrounds_where(&self, clause: &str) -> Result<Vec<Playground>, StoreError> {
        let rows = sqlx::query(&format!("SELECT {} FROM playgrounds WHERE {}", PLAYGROUND_COLUMNS, clause))
            .fetch_all(&self.pool)
            .await
            .map_err(db_err)?;
        playgrounds_from_rows(rows)
    }
}

#[async_trait]
impl PlaygroundStore for PgStore {
    async fn get_playground(&self, id: Uuid) -> Result<Option<Playground>, StoreError> {
        let row = sqlx::query(&format!("SELECT {} FROM playgrounds WHERE id = $1", PLAYGROUND_COLUMNS))
            .bind(id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        row.as_ref().map(playground_from_row).transpose()
    }

    async fn find_tasks(&self, playground_id: Uuid) -> Result<Vec<Task>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM tasks WHERE playground_id = $1 ORDER BY created_at, id",
            TASK_COLUMNS
        ))
        .bind(playground_id)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(task_from_row).collect()
    }

    async fn scheduleable_playgrounds(&self) -> Result<Vec<Playground>, StoreError> {
        self.playgrounds_where("cron_expression IS NOT NULL AND btrim(cron_expression) <> ''")
            .await
    }

    async fn playgrounds_touched_after(&self, mark: DateTime<Utc>) -> Result<Vec<Playground>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM playgrounds WHERE GREATEST(created_at, modified_at) > $1",
            PLAYGROUND_COLUMNS
        ))
        .bind(mark)
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        playgrounds_from_rows(rows)
    }

    async fn running_playgrounds(&self) -> Result<Vec<Playground>, StoreError> {
        self.playgrounds_where("current_status = 'RUNNING'").await
    }

    async fn try_begin_run(
        &self,
        playground_id: Uuid,
        correlation_id: Uuid,
        started_at: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let result = sqlx::query(
            "UPDATE playgrounds \
             SET current_status = 'RUNNING', correlation_id = $2, last_executed_at = $3 \
             WHERE id = $1 AND current_status <> 'RUNNING'",
        )
        .bind(playground_id)
        .bind(correlation_id)
        .bind(started_at)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(result.rows_affected() == 1)
    }

    async fn mark_task_running(&self, task_id: Uuid, correlation_id: Uuid) -> Result<(), StoreError> {
        sqlx::query("UPDATE tasks SET status = 'RUNNING', correlation_id = $2 WHERE id = $1")
            .bind(task_id)
            .bind(correlation_id)
            .execute(&self.pool)
            .await
            .map_err(db_err)?;
        Ok(())
    }

    async fn record_task_outcome(&self, outcome: &TaskOutcome) -> Result<(), StoreError> {
        sqlx::query(
            "UPDATE tasks \
             SET status = 'IDLE', last_run_status = $2, correlation_id = $3, last_correlation_id = $3, \
                 output_location = $4, log_location = $5 \
             WHERE id = $1",
        )
        .bind(outcome.task_id)
        .bind(outcome.status.as_str())
        .bind(outcome.correlation_id)
        .bind(&outcome.output_location)
        .bind(&outcome.log_location)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn complete_run(&self, summary: &RunSummary) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await.map_err(db_err)?;

        sqlx::query(
            "UPDATE playgrounds \
             SET current_status = 'IDLE', last_run_status = $2, last_run_end_time = $3, \
                 last_run_success_count = $4, last_run_failure_count = $5 \
             WHERE id = $1",
        )
        .bind(summary.playground_id)
        .bind(summary.status.as_str())
        .bind(summary.finished_at)
        .bind(summary.success_count as i32)
        .bind(summary.failure_count as i32)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        sqlx::query(&format!(
            "INSERT INTO run_history ({}) VALUES ($1, $2, $3, $4, $5, $6, $7, $8)",
            HISTORY_COLUMNS
        ))
        .bind(summary.playground_id)
        .bind(summary.correlation_id)
        .bind(summary.execution_type.as_str())
        .bind(summary.status.as_str())
        .bind(summary.success_count as i32)
        .bind(summary.failure_count as i32)
        .bind(summary.skipped_count as i32)
        .bind(summary.finished_at)
        .execute(&mut *tx)
        .await
        .map_err(db_err)?;

        tx.commit().await.map_err(db_err)
    }

    async fn save_run_selection(&self, correlation_id: Uuid, selection: &RunSelection) -> Result<(), StoreError> {
        let json = serde_json::to_string(selection)?;
        sqlx::query(
            "INSERT INTO run_selections (correlation_id, selection) VALUES ($1, $2::jsonb) \
             ON CONFLICT (correlation_id) DO UPDATE SET selection = EXCLUDED.selection",
        )
        .bind(correlation_id)
        .bind(json)
        .execute(&self.pool)
        .await
        .map_err(db_err)?;
        Ok(())
    }

    async fn load_run_selection(&self, correlation_id: Uuid) -> Result<Option<RunSelection>, StoreError> {
        let row = sqlx::query("SELECT selection::text AS selection FROM run_selections WHERE correlation_id = $1")
            .bind(correlation_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(db_err)?;
        match row {
            Some(row) => {
                let json: String = col(&row, "selection")?;
                Ok(Some(serde_json::from_str(&json)?))
            }
            None => Ok(None),
        }
    }

    async fn run_history(&self, playground_id: Uuid, limit: usize) -> Result<Vec<RunSummary>, StoreError> {
        let rows = sqlx::query(&format!(
            "SELECT {} FROM run_history WHERE playground_id = $1 ORDER BY finished_at DESC LIMIT $2",
            HISTORY_COLUMNS
        ))
        .bind(playground_id)
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await
        .map_err(db_err)?;
        rows.iter().map(summary_from_row).collect()
    }
}
