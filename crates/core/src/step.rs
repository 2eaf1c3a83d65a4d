//! Outcome of executing one task, whatever executor ran it.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::model::Task;

/// State of a unit of work on an executor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StepState {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl StepState {
    pub fn is_terminal(self) -> bool {
        matches!(self, StepState::Completed | StepState::Failed | StepState::Cancelled)
    }
}

impl fmt::Display for StepState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StepState::Pending => "PENDING",
            StepState::Running => "RUNNING",
            StepState::Completed => "COMPLETED",
            StepState::Failed => "FAILED",
            StepState::Cancelled => "CANCELLED",
        };
        f.write_str(s)
    }
}

/// Terminal result handed back to the execution engine for one task.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StepResult {
    pub task_id: Uuid,
    /// Executor-side identifier (cluster step id, SQL run id), if one was assigned.
    pub step_id: Option<String>,
    pub state: StepState,
    pub message: String,
    pub output_path: Option<String>,
    pub log_path: Option<String>,
    /// Number of submit attempts consumed to reach this result.
    pub attempts: u32,
}

impl StepResult {
    pub fn completed(task_id: Uuid, step_id: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            task_id,
            step_id: Some(step_id.into()),
            state: StepState::Completed,
            message: message.into(),
            output_path: None,
            log_path: None,
            attempts: 1,
        }
    }

    pub fn failed(task_id: Uuid, step_id: Option<String>, message: impl Into<String>) -> Self {
        Self {
            task_id,
            step_id,
            state: StepState::Failed,
            message: message.into(),
            output_path: None,
            log_path: None,
            attempts: 1,
        }
    }

    pub fn with_output(mut self, output_path: Option<String>) -> Self {
        self.output_path = output_path;
        self
    }

    pub fn with_log(mut self, log_path: Option<String>) -> Self {
        self.log_path = log_path;
        self
    }

    pub fn with_attempts(mut self, attempts: u32) -> Self {
        self.attempts = attempts;
        self
    }

    pub fn is_success(&self) -> bool {
        self.state == StepState::Completed
    }
}

// ── Executor capability ───────────────────────────────────────

/// Anything that can run a single task to a terminal result.
///
/// Implementations fold their own failures into a FAILED [`StepResult`];
/// the execution engine never sees an error from this call.
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn execute(&self, task: &Task) -> StepResult;
}
