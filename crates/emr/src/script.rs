//! Per-dialect step strategies: the script uploaded for a task and the step that runs it.

use phantom_core::{Task, TaskKind};
use uuid::Uuid;

use crate::control::StepSpec;
use crate::error::EmrError;
use crate::output::OutputLayout;

const COMMAND_RUNNER: &str = "command-runner.jar";

/// Per-submission values shared by every strategy.
#[derive(Debug, Clone)]
pub struct StepContext<'a> {
    pub layout: &'a OutputLayout,
    pub playground_id: Uuid,
    pub task_id: Uuid,
    /// `YYYY-MM-DD` partition for outputs, logs and scripts.
    pub date: String,
    pub timestamp_millis: i64,
    /// Disambiguates artifacts of repeated submissions of the same task.
    pub unique_id: String,
}

impl<'a> StepContext<'a> {
    pub fn new(layout: &'a OutputLayout, task: &Task, now: chrono::DateTime<chrono::Utc>) -> Self {
        Self {
            layout,
            playground_id: task.playground_id,
            task_id: task.id,
            date: now.format("%Y-%m-%d").to_string(),
            timestamp_millis: now.timestamp_millis(),
            unique_id: task.id.to_string(),
        }
    }

    fn step_name(&self, prefix: &str) -> String {
        format!(
            "{}-{}-{}-{}",
            prefix, self.timestamp_millis, self.playground_id, self.task_id
        )
    }

    fn script_file(&self, stem: &str, ext: &str) -> String {
        format!(
            "{}-script-{}-{}-{}.{}",
            stem, self.playground_id, self.task_id, self.unique_id, ext
        )
    }

    fn temp_file(&self) -> String {
        format!(
            "/tmp/hive-output-{}-{}-{}.txt",
            self.unique_id, self.playground_id, self.task_id
        )
    }
}

/// Everything needed to submit one task as a cluster step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PreparedStep {
    pub script: String,
    pub script_key: String,
    pub step: StepSpec,
    /// Where the result lands; a directory for SparkSQL.
    pub output_path: Option<String>,
    pub log_path: Option<String>,
}

/// Turns a task into a script plus the step that runs it.
pub trait StepStrategy: Send + Sync {
    fn kind(&self) -> TaskKind;

    fn prepare(&self, task: &Task, ctx: &StepContext<'_>) -> PreparedStep;
}

/// Strategy for a cluster dialect. SQL tasks never reach the cluster.
pub fn strategy_for(kind: TaskKind) -> Result<&'static dyn StepStrategy, EmrError> {
    match kind {
        TaskKind::Hive => Ok(&HiveStrategy),
        TaskKind::Presto => Ok(&PrestoStrategy),
        TaskKind::PySpark => Ok(&PySparkStrategy),
        TaskKind::SparkSql => Ok(&SparkSqlStrategy),
        TaskKind::Sql => Err(EmrError::UnsupportedKind(kind)),
    }
}

/// Escape a query for use inside a double-quoted shell or Python string.
pub fn escape_double_quoted(query: &str) -> String {
    query.replace('\\', "\\\\").replace('"', "\\\"")
}

fn strip_trailing_semicolon(query: &str) -> &str {
    let trimmed = query.trim();
    trimmed.strip_suffix(';').map(str::trim_end).unwrap_or(trimmed)
}

fn bash_step(name: String, script_uri: &str) -> StepSpec {
    StepSpec {
        name,
        jar: COMMAND_RUNNER.to_string(),
        args: vec![
            "bash".to_string(),
            "-c".to_string(),
            format!(
                "aws s3 cp {} /tmp/script.sh && chmod +x /tmp/script.sh && /tmp/script.sh",
                script_uri
            ),
        ],
    }
}

fn spark_submit_step(name: String, script_uri: &str) -> StepSpec {
    let args = [
        "spark-submit",
        "--deploy-mode",
        "cluster",
        "--conf",
        "spark.hadoop.hive.enforce.bucketing=true",
        "--conf",
        "spark.hadoop.hive.enforce.sorting=true",
        script_uri,
    ];
    StepSpec {
        name,
        jar: COMMAND_RUNNER.to_string(),
        args: args.iter().map(|s| s.to_string()).collect(),
    }
}

// ── Shell dialects ───────────────────────────────────────────────

/// Shared skeleton of the Hive and Presto scripts: run, check output, upload result and log.
fn shell_script(engine: &str, command: &str, ctx: &StepContext<'_>, output_path: &str, log_path: &str) -> String {
    let temp = ctx.temp_file();
    let lines = [
        "#!/bin/bash".to_string(),
        format!("# {} query for task {}", engine, ctx.task_id),
        "set -o pipefail".to_string(),
        format!("LOG_FILE=\"/tmp/{}-execution-{}.log\"", engine, ctx.unique_id),
        format!("LOG_S3_PATH=\"{}\"", log_path),
        String::new(),
        format!("{} > {} 2>> ${{LOG_FILE}}", command, temp),
        "exit_code=$?".to_string(),
        format!("if [ ! -s {} ]; then", temp),
        "    exit_code=1".to_string(),
        "fi".to_string(),
        "if [[ $exit_code == 0 ]]; then".to_string(),
        format!("    aws s3 cp {} {} || exit_code=1", temp, output_path),
        "fi".to_string(),
        String::new(),
        "aws s3 cp ${LOG_FILE} ${LOG_S3_PATH}".to_string(),
        "exit $exit_code".to_string(),
    ];
    lines.join("\n")
}

pub struct HiveStrategy;

impl StepStrategy for HiveStrategy {
    fn kind(&self) -> TaskKind {
        TaskKind::Hive
    }

    fn prepare(&self, task: &Task, ctx: &StepContext<'_>) -> PreparedStep {
        let output = ctx.layout.text_output(&ctx.date, ctx.playground_id, ctx.task_id);
        let log = ctx
            .layout
            .log_path(&ctx.date, self.kind().as_str(), ctx.playground_id, ctx.task_id, &ctx.unique_id);
        let command = format!(
            "hive -e \"SET hive.cli.print.header=true; {}\"",
            escape_double_quoted(&task.query)
        );
        let script_key = ctx.layout.script_key(&ctx.date, &ctx.script_file("HIVE", "sh"));

        PreparedStep {
            script: shell_script("hive", &command, ctx, &output, &log),
            step: bash_step(ctx.step_name("HiveQuery"), &ctx.layout.uri(&script_key)),
            script_key,
            output_path: Some(output),
            log_path: Some(log),
        }
    }
}

pub struct PrestoStrategy;

impl StepStrategy for PrestoStrategy {
    fn kind(&self) -> TaskKind {
        TaskKind::Presto
    }

    fn prepare(&self, task: &Task, ctx: &StepContext<'_>) -> PreparedStep {
        let output = ctx.layout.text_output(&ctx.date, ctx.playground_id, ctx.task_id);
        let log = ctx
            .layout
            .log_path(&ctx.date, self.kind().as_str(), ctx.playground_id, ctx.task_id, &ctx.unique_id);
        let command = format!(
            "presto-cli --catalog hive --output-format CSV_HEADER --execute \"{}\"",
            escape_double_quoted(strip_trailing_semicolon(&task.query))
        );
        let script_key = ctx.layout.script_key(&ctx.date, &ctx.script_file("PRESTO", "sh"));

        PreparedStep {
            script: shell_script("presto", &command, ctx, &output, &log),
            step: bash_step(ctx.step_name("PrestoQuery"), &ctx.layout.uri(&script_key)),
            script_key,
            output_path: Some(output),
            log_path: Some(log),
        }
    }
}

// ── Spark dialects ───────────────────────────────────────────────

/// The task body is a complete PySpark program; it has no managed output or log.
pub struct PySparkStrategy;

impl StepStrategy for PySparkStrategy {
    fn kind(&self) -> TaskKind {
        TaskKind::PySpark
    }

    fn prepare(&self, task: &Task, ctx: &StepContext<'_>) -> PreparedStep {
        let script_key = ctx.layout.script_key(&ctx.date, &ctx.script_file("spark", "py"));
        PreparedStep {
            script: task.query.clone(),
            step: spark_submit_step(ctx.step_name("SparkQuery"), &ctx.layout.uri(&script_key)),
            script_key,
            output_path: None,
            log_path: None,
        }
    }
}

pub struct SparkSqlStrategy;

impl StepStrategy for SparkSqlStrategy {
    fn kind(&self) -> TaskKind {
        TaskKind::SparkSql
    }

    fn prepare(&self, task: &Task, ctx: &StepContext<'_>) -> PreparedStep {
        let output_dir =
            ctx.layout
                .spark_sql_output_dir(&ctx.date, ctx.playground_id, ctx.task_id, &ctx.unique_id);
        let query = escape_double_quoted(strip_trailing_semicolon(&task.query));
        let script = format!(
            r#"#!/usr/bin/env python3
import sys
import traceback
from pyspark.sql import SparkSession

spark = (
    SparkSession.builder.appName("DataPhantomSparkSQL")
    .enableHiveSupport()
    .config("spark.hadoop.hive.enforce.bucketing", "true")
    .config("spark.hadoop.hive.enforce.sorting", "true")
    .getOrCreate()
)
try:
    df = spark.sql("{query}")
    df.coalesce(1).write.mode("overwrite").option("header", "true").option("sep", "\t").csv("{output_dir}")
except Exception:
    traceback.print_exc()
    sys.exit(1)
finally:
    spark.stop()
"#
        );
        let script_key = ctx.layout.script_key(&ctx.date, &ctx.script_file("sparksql", "py"));

        PreparedStep {
            script,
            step: spark_submit_step(ctx.step_name("SparkSQLQuery"), &ctx.layout.uri(&script_key)),
            script_key,
            output_path: Some(output_dir),
            log_path: None,
        }
    }
}
