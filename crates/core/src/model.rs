//! Playground and task domain types shared by every crate in the workspace.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::PhantomError;

// ── Status ────────────────────────────────────────────────────

/// Lifecycle status shared by tasks and playgrounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Status {
    Pending,
    Running,
    Success,
    Failed,
    Cancelled,
    Idle,
    PartialSuccess,
    Unknown,
    Skipped,
    UpstreamFailed,
}

impl Status {
    /// Whether a task in this status has finished for the purpose of a run.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            Status::Success
                | Status::Failed
                | Status::Cancelled
                | Status::Skipped
                | Status::UpstreamFailed
        )
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Status::Pending => "PENDING",
            Status::Running => "RUNNING",
            Status::Success => "SUCCESS",
            Status::Failed => "FAILED",
            Status::Cancelled => "CANCELLED",
            Status::Idle => "IDLE",
            Status::PartialSuccess => "PARTIAL_SUCCESS",
            Status::Unknown => "UNKNOWN",
            Status::Skipped => "SKIPPED",
            Status::UpstreamFailed => "UPSTREAM_FAILED",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = PhantomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s.trim().to_ascii_uppercase().as_str() {
            "PENDING" => Status::Pending,
            "RUNNING" => Status::Running,
            "SUCCESS" => Status::Success,
            "FAILED" => Status::Failed,
            "CANCELLED" => Status::Cancelled,
            "IDLE" => Status::Idle,
            "PARTIAL_SUCCESS" => Status::PartialSuccess,
            "UNKNOWN" => Status::Unknown,
            "SKIPPED" => Status::Skipped,
            "UPSTREAM_FAILED" => Status::UpstreamFailed,
            other => return Err(PhantomError::Parse(format!("unknown status '{}'", other))),
        })
    }
}

// ── Task kind ─────────────────────────────────────────────────

/// Query dialect of a task. Decides which executor runs it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskKind {
    /// Executed in-process against the relational connector.
    Sql,
    Hive,
    Presto,
    /// A full PySpark program submitted as-is.
    PySpark,
    SparkSql,
}

impl TaskKind {
    pub const ALL: [TaskKind; 5] = [
        TaskKind::Sql,
        TaskKind::Hive,
        TaskKind::Presto,
        TaskKind::PySpark,
        TaskKind::SparkSql,
    ];

    /// `true` for dialects handled by the SQL executor rather than the cluster.
    pub fn runs_in_process(self) -> bool {
        matches!(self, TaskKind::Sql)
    }

    /// `true` for dialects whose output is a directory of part files.
    pub fn writes_directory(self) -> bool {
        matches!(self, TaskKind::SparkSql)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            TaskKind::Sql => "SQL",
            TaskKind::Hive => "HIVE",
            TaskKind::Presto => "PRESTO",
            TaskKind::PySpark => "PY_SPARK",
            TaskKind::SparkSql => "SPARK_SQL",
        }
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskKind {
    type Err = PhantomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TaskKind::ALL
            .into_iter()
            .find(|k| k.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PhantomError::Parse(format!("unsupported task type '{}'", s)))
    }
}

// ── Execution type ────────────────────────────────────────────

/// What triggered a playground run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionType {
    Scheduled,
    AdHoc,
    /// Resumes a run found RUNNING at process start, reusing its correlation id.
    Recovery,
}

impl ExecutionType {
    pub fn as_str(self) -> &'static str {
        match self {
            ExecutionType::Scheduled => "SCHEDULED",
            ExecutionType::AdHoc => "AD_HOC",
            ExecutionType::Recovery => "RECOVERY",
        }
    }
}

impl fmt::Display for ExecutionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ExecutionType {
    type Err = PhantomError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        [ExecutionType::Scheduled, ExecutionType::AdHoc, ExecutionType::Recovery]
            .into_iter()
            .find(|t| t.as_str().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| PhantomError::Parse(format!("unknown execution type '{}'", s)))
    }
}

// ── Task ──────────────────────────────────────────────────────

/// One query step of a playground. Tasks form a forest through `parent_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    pub name: String,
    pub playground_id: Uuid,
    pub parent_id: Option<Uuid>,
    pub kind: TaskKind,
    pub query: String,
    pub status: Status,
    pub last_run_status: Option<Status>,
    /// Correlation id of the run that last dispatched this task.
    pub correlation_id: Option<Uuid>,
    /// Correlation id of the run that last completed this task.
    pub last_correlation_id: Option<Uuid>,
    pub output_location: Option<String>,
    pub log_location: Option<String>,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Task {
    pub fn new(playground_id: Uuid, name: impl Into<String>, kind: TaskKind, query: impl Into<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            playground_id,
            parent_id: None,
            kind,
            query: query.into(),
            status: Status::Idle,
            last_run_status: None,
            correlation_id: None,
            last_correlation_id: None,
            output_location: None,
            log_location: None,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn with_parent(mut self, parent_id: Uuid) -> Self {
        self.parent_id = Some(parent_id);
        self
    }

    pub fn is_root(&self) -> bool {
        self.parent_id.is_none()
    }

    /// Whether this task already completed inside the run identified by `run_id`.
    pub fn completed_in_run(&self, run_id: Uuid) -> bool {
        match (self.last_correlation_id, self.correlation_id) {
            (Some(last), Some(current)) => last == current && current == run_id,
            _ => false,
        }
    }
}

// ── Playground ────────────────────────────────────────────────

/// A named, optionally scheduled DAG of tasks.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Playground {
    pub id: Uuid,
    pub name: String,
    /// `None` keeps the playground out of the cron scheduler.
    pub cron_expression: Option<String>,
    pub current_status: Status,
    pub last_run_status: Option<Status>,
    pub last_executed_at: Option<DateTime<Utc>>,
    pub last_run_end_time: Option<DateTime<Utc>>,
    pub correlation_id: Option<Uuid>,
    pub last_run_success_count: u32,
    pub last_run_failure_count: u32,
    pub created_at: DateTime<Utc>,
    pub modified_at: DateTime<Utc>,
}

impl Playground {
    pub fn new(name: impl Into<String>, cron_expression: Option<String>) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            cron_expression,
            current_status: Status::Idle,
            last_run_status: None,
            last_executed_at: None,
            last_run_end_time: None,
            correlation_id: None,
            last_run_success_count: 0,
            last_run_failure_count: 0,
            created_at: now,
            modified_at: now,
        }
    }

    pub fn is_scheduleable(&self) -> bool {
        self.cron_expression
            .as_deref()
            .map(|c| !c.trim().is_empty())
            .unwrap_or(false)
    }

    pub fn is_running(&self) -> bool {
        self.current_status == Status::Running
    }

    /// Latest of creation and modification time; drives the scheduler's re-sync mark.
    pub fn touched_at(&self) -> DateTime<Utc> {
        self.created_at.max(self.modified_at)
    }
}

// ── Limited-run selection ─────────────────────────────────────

/// Task-id → include flag for a limited run. Absent ids are excluded.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunSelection {
    pub tasks: HashMap<Uuid, bool>,
}

impl RunSelection {
    pub fn new(tasks: HashMap<Uuid, bool>) -> Self {
        Self { tasks }
    }

    /// Selection containing exactly the given ids.
    pub fn only(ids: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            tasks: ids.into_iter().map(|id| (id, true)).collect(),
        }
    }

    pub fn includes(&self, task_id: Uuid) -> bool {
        self.tasks.get(&task_id).copied().unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        !self.tasks.values().any(|included| *included)
    }
}

/// Final bookkeeping of one finished run, persisted with its history row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunSummary {
    pub playground_id: Uuid,
    pub correlation_id: Uuid,
    pub execution_type: ExecutionType,
    pub status: Status,
    pub success_count: u32,
    pub failure_count: u32,
    pub skipped_count: u32,
    pub finished_at: DateTime<Utc>,
}
