//! In-process executor for SQL tasks: query PostgreSQL, upload the rows as CSV.

use std::sync::Arc;

use anyhow::Context;
use async_trait::async_trait;
use chrono::Utc;
use phantom_core::{StepResult, Task, TaskExecutor};
use phantom_emr::{ObjectStore, OutputLayout};
use sqlx::postgres::PgRow;
use sqlx::{Column, PgPool, Row, TypeInfo};
use tracing::{error, info};
use uuid::Uuid;

const CSV_CONTENT_TYPE: &str = "text/csv";

/// Postgres types whose text form gets trailing fractional zeros stripped.
const DECIMAL_TYPES: &[&str] = &["NUMERIC", "FLOAT4", "FLOAT8"];

pub struct PostgresSqlExecutor {
    pool: PgPool,
    objects: Arc<dyn ObjectStore>,
    layout: OutputLayout,
}

impl PostgresSqlExecutor {
    pub fn new(pool: PgPool, objects: Arc<dyn ObjectStore>, layout: OutputLayout) -> Self {
        Self {
            pool,
            objects,
            layout,
        }
    }

    /// Run the query and upload its CSV; returns the output URI.
    async fn run(&self, task: &Task) -> anyhow::Result<String> {
        // Simple-query protocol: every value arrives in text form.
        let rows = sqlx::raw_sql(&task.query)
            .fetch_all(&self.pool)
            .await
            .context("query failed")?;
        let table = text_table(&rows)?;
        let body = render_csv(&table.columns, &table.rows);

        let date = Utc::now().format("%Y-%m-%d").to_string();
        let key = self.layout.csv_output_key(&date, task.playground_id, task.id);
        self.objects
            .put_object(&self.layout.bucket, &key, body.into_bytes(), CSV_CONTENT_TYPE)
            .await
            .context("upload failed")?;

        info!(task_id = %task.id, rows = table.rows.len(), key = %key, "SQL result uploaded");
        Ok(self.layout.uri(&key))
    }
}

#[async_trait]
impl TaskExecutor for PostgresSqlExecutor {
    async fn execute(&self, task: &Task) -> StepResult {
        let step_id = format!("sql-{}", Uuid::new_v4());
        match self.run(task).await {
            Ok(output) => StepResult::completed(task.id, step_id, "SQL task executed successfully")
                .with_output(Some(output)),
            Err(e) => {
                error!(task_id = %task.id, step_id = %step_id, error = %format!("{:#}", e), "SQL task failed");
                StepResult::failed(task.id, Some(step_id), format!("SQL task failed: {:#}", e))
            }
        }
    }
}

// ── CSV rendering ────────────────────────────────────────────────

struct TextTable {
    columns: Vec<String>,
    rows: Vec<Vec<Option<String>>>,
}

fn text_table(rows: &[PgRow]) -> anyhow::Result<TextTable> {
    let Some(first) = rows.first() else {
        return Ok(TextTable {
            columns: Vec::new(),
            rows: Vec::new(),
        });
    };

    let columns: Vec<String> = first.columns().iter().map(|c| c.name().to_string()).collect();
    let decimal: Vec<bool> = first
        .columns()
        .iter()
        .map(|c| DECIMAL_TYPES.contains(&c.type_info().name()))
        .collect();

    let mut out = Vec::with_capacity(rows.len());
    for row in rows {
        let mut values = Vec::with_capacity(columns.len());
        for (i, is_decimal) in decimal.iter().enumerate() {
            let value: Option<String> = row
                .try_get_unchecked(i)
                .with_context(|| format!("column {} is not readable as text", columns[i]))?;
            values.push(match value {
                Some(v) if *is_decimal => Some(normalize_decimal(&v)),
                other => other,
            });
        }
        out.push(values);
    }

    Ok(TextTable { columns, rows: out })
}

/// Drop trailing fractional zeros (`12.500` → `12.5`, `3.000` → `3`).
fn normalize_decimal(value: &str) -> String {
    if !value.contains('.') || value.contains(['e', 'E']) {
        return value.to_string();
    }
    value.trim_end_matches('0').trim_end_matches('.').to_string()
}

fn csv_field(value: &str) -> String {
    if value.contains([',', '"', '\n', '\r']) {
        format!("\"{}\"", value.replace('"', "\"\""))
    } else {
        value.to_string()
    }
}

/// Header line plus one line per row; NULL renders as an empty field.
/// A result without rows renders as an empty document.
fn render_csv(columns: &[String], rows: &[Vec<Option<String>>]) -> String {
    if columns.is_empty() {
        return String::new();
    }
    let mut out = String::new();
    let header: Vec<String> = columns.iter().map(|c| csv_field(c)).collect();
    out.push_str(&header.join(","));
    out.push('\n');
    for row in rows {
        let fields: Vec<String> = row
            .iter()
            .map(|v| v.as_deref().map(csv_field).unwrap_or_default())
            .collect();
        out.push_str(&fields.join(","));
        out.push('\n');
    }
    out
}
