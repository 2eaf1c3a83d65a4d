//! Step Submission & Polling: one task becomes one cluster step, retried as a whole.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use phantom_core::{StepResult, StepState, Task, TaskExecutor};
use tracing::{debug, error, info, warn};

use crate::cluster::ClusterManager;
use crate::config::{EmrConfig, RetryPolicy};
use crate::control::{ClusterControl, ObjectStore, StepStatus};
use crate::error::EmrError;
use crate::output::{first_data_file, OutputLayout};
use crate::script::{strategy_for, StepContext};

/// Step polling bounds.
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_attempts: u32,
}

impl From<&EmrConfig> for PollSettings {
    fn from(config: &EmrConfig) -> Self {
        Self {
            interval: config.step_poll_interval(),
            max_attempts: config.step_poll_max_attempts,
        }
    }
}

pub struct StepSubmitter {
    clusters: Arc<dyn ClusterControl>,
    objects: Arc<dyn ObjectStore>,
    manager: Arc<ClusterManager>,
    layout: OutputLayout,
    retry: RetryPolicy,
    poll: PollSettings,
}

impl StepSubmitter {
    pub fn new(
        clusters: Arc<dyn ClusterControl>,
        objects: Arc<dyn ObjectStore>,
        manager: Arc<ClusterManager>,
        layout: OutputLayout,
        retry: RetryPolicy,
        poll: PollSettings,
    ) -> Self {
        Self {
            clusters,
            objects,
            manager,
            layout,
            retry,
            poll,
        }
    }

    /// Run `task` on the cluster until it reaches a terminal result.
    ///
    /// Each attempt covers cluster readiness, upload, submission and polling.
    /// A failed step or an error consumes one attempt; errors that retrying
    /// cannot fix end the loop early.
    pub async fn submit(&self, task: &Task) -> StepResult {
        let total = self.retry.total_attempts();
        let mut last_failure: Option<String> = None;
        let mut last_step_id: Option<String> = None;
        let mut last_log: Option<String> = None;
        let mut last_state = StepState::Failed;
        let mut attempts = 0;

        info!(task_id = %task.id, kind = %task.kind, attempts = total, "Submitting task");

        for attempt in 0..total {
            if attempt > 0 {
                let delay = self.retry.delay_for(attempt - 1);
                debug!(task_id = %task.id, delay_ms = delay.as_millis() as u64, "Backing off before retry");
                tokio::time::sleep(delay).await;
            }
            attempts = attempt + 1;

            match self.attempt(task).await {
                Ok(result) if result.is_success() => {
                    info!(task_id = %task.id, attempt = attempts, "Task succeeded");
                    return result.with_attempts(attempts);
                }
                Ok(result) => {
                    warn!(
                        task_id = %task.id,
                        attempt = attempts,
                        state = %result.state,
                        reason = %result.message,
                        "Step did not complete"
                    );
                    last_failure = Some(result.message);
                    last_step_id = result.step_id;
                    last_log = result.log_path;
                    last_state = result.state;
                }
                Err(e) => {
                    error!(task_id = %task.id, attempt = attempts, error = %e, "Attempt failed");
                    let retryable = e.is_transient();
                    last_failure = Some(format!("Exception: {}", e));
                    last_step_id = None;
                    last_log = None;
                    last_state = StepState::Failed;
                    if !retryable {
                        break;
                    }
                }
            }
        }

        let reason = last_failure.unwrap_or_else(|| "unknown".to_string());
        error!(task_id = %task.id, attempts, reason = %reason, "Task failed");
        let mut result = StepResult::failed(
            task.id,
            last_step_id,
            format!("Failed after {} attempts. Last failure: {}", attempts, reason),
        )
        .with_log(last_log)
        .with_attempts(attempts);
        result.state = last_state;
        result
    }

    async fn attempt(&self, task: &Task) -> Result<StepResult, EmrError> {
        let strategy = strategy_for(task.kind)?;
        let cluster_id = self.manager.ensure_ready().await?;

        let ctx = StepContext::new(&self.layout, task, Utc::now());
        let prepared = strategy.prepare(task, &ctx);

        self.objects
            .put_object(
                &self.layout.bucket,
                &prepared.script_key,
                prepared.script.clone().into_bytes(),
                "text/plain",
            )
            .await?;

        let step_id = self.clusters.add_step(&cluster_id, &prepared.step).await?;
        info!(
            task_id = %task.id,
            cluster_id = %cluster_id,
            step_id = %step_id,
            step_name = %prepared.step.name,
            "Step submitted"
        );

        let status = self.wait_for_step(&cluster_id, &step_id).await?;
        match status.state {
            StepState::Completed => {
                let output = match prepared.output_path {
                    Some(dir) if task.kind.writes_directory() => Some(self.resolve_directory(dir).await),
                    other => other,
                };
                Ok(StepResult::completed(task.id, step_id, "Step completed successfully")
                    .with_output(output)
                    .with_log(prepared.log_path))
            }
            state => {
                let mut result = StepResult::failed(
                    task.id,
                    Some(step_id),
                    status.reason.unwrap_or_else(|| format!("Step ended {}", state)),
                )
                .with_log(prepared.log_path);
                result.state = state;
                Ok(result)
            }
        }
    }

    /// Poll the step at a fixed interval until it is terminal.
    async fn wait_for_step(&self, cluster_id: &str, step_id: &str) -> Result<StepStatus, EmrError> {
        for attempt in 1..=self.poll.max_attempts {
            match self.clusters.describe_step(cluster_id, step_id).await {
                Ok(status) if status.state.is_terminal() => return Ok(status),
                Ok(status) => {
                    debug!(step_id = %step_id, attempt, state = %status.state, "Polling step status");
                }
                Err(e) => {
                    warn!(step_id = %step_id, attempt, error = %e, "Failed to get step status");
                }
            }
            tokio::time::sleep(self.poll.interval).await;
        }

        Err(EmrError::StepTimeout {
            step_id: step_id.to_string(),
            attempts: self.poll.max_attempts,
        })
    }

    /// Directory outputs resolve to their first data file; fall back to the directory.
    async fn resolve_directory(&self, dir: String) -> String {
        match first_data_file(self.objects.as_ref(), &dir).await {
            Ok(Some(file)) => {
                info!(dir = %dir, file = %file, "Resolved output directory");
                file
            }
            Ok(None) => dir,
            Err(e) => {
                warn!(dir = %dir, error = %e, "Failed to list output directory");
                dir
            }
        }
    }
}

#[async_trait]
impl TaskExecutor for StepSubmitter {
    async fn execute(&self, task: &Task) -> StepResult {
        self.submit(task).await
    }
}
