//! AWS SDK implementations of the control-plane traits.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_cloudformation::types::{Parameter, StackStatus as CfnStackStatus};
use aws_sdk_emr::types::{
    ActionOnFailure, ClusterState as EmrClusterState, HadoopJarStepConfig, StepConfig,
    StepState as EmrStepState,
};
use aws_sdk_s3::primitives::ByteStream;
use aws_types::region::Region;
use phantom_core::StepState;
use tracing::{debug, info};

use crate::config::EmrConfig;
use crate::control::{
    ClusterControl, ClusterState, ClusterSummary, ObjectStore, StackControl, StackStatus, StepSpec,
    StepStatus,
};
use crate::error::EmrError;

const CLUSTER_RESOURCE_TYPE: &str = "AWS::EMR::Cluster";
const RANDOM_PARAMETER: &str = "Random";

/// Stringify an SDK error with its full source chain.
fn sdk_err<E: std::error::Error>(e: E) -> EmrError {
    EmrError::AwsSdk(aws_sdk_emr::error::DisplayErrorContext(e).to_string())
}

/// The three SDK clients sharing one loaded AWS config.
#[derive(Clone)]
pub struct AwsControlPlane {
    pub clusters: AwsClusterControl,
    pub stack: AwsStackControl,
    pub objects: S3ObjectStore,
}

impl AwsControlPlane {
    /// Load AWS config for the region in `config`.
    pub async fn connect(config: &EmrConfig) -> Self {
        let aws_cfg = aws_config::defaults(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .load()
            .await;

        info!(
            region = %config.region,
            stack = %config.stack_name,
            bucket = %config.output_bucket,
            "AWS control plane initialised"
        );

        Self {
            clusters: AwsClusterControl {
                client: aws_sdk_emr::Client::new(&aws_cfg),
            },
            stack: AwsStackControl {
                client: aws_sdk_cloudformation::Client::new(&aws_cfg),
                stack_name: config.stack_name.clone(),
            },
            objects: S3ObjectStore {
                client: aws_sdk_s3::Client::new(&aws_cfg),
            },
        }
    }
}

// ── EMR ──────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct AwsClusterControl {
    client: aws_sdk_emr::Client,
}

fn cluster_state_from_sdk(state: Option<&EmrClusterState>) -> ClusterState {
    match state {
        Some(EmrClusterState::Starting) => ClusterState::Starting,
        Some(EmrClusterState::Bootstrapping) => ClusterState::Bootstrapping,
        Some(EmrClusterState::Running) => ClusterState::Running,
        Some(EmrClusterState::Waiting) => ClusterState::Waiting,
        Some(EmrClusterState::Terminating) => ClusterState::Terminating,
        Some(EmrClusterState::Terminated) => ClusterState::Terminated,
        Some(EmrClusterState::TerminatedWithErrors) => ClusterState::TerminatedWithErrors,
        Some(other) => ClusterState::Unknown(other.as_str().to_string()),
        None => ClusterState::Unknown("UNKNOWN".to_string()),
    }
}

fn cluster_state_to_sdk(state: &ClusterState) -> EmrClusterState {
    EmrClusterState::from(state.to_string().as_str())
}

fn step_state_from_sdk(state: Option<&EmrStepState>) -> StepState {
    match state {
        Some(EmrStepState::Running) => StepState::Running,
        Some(EmrStepState::Completed) => StepState::Completed,
        Some(EmrStepState::Cancelled) => StepState::Cancelled,
        Some(EmrStepState::Failed) | Some(EmrStepState::Interrupted) => StepState::Failed,
        // Pending, CancelPending, unknown future variants
        _ => StepState::Pending,
    }
}

#[async_trait]
impl ClusterControl for AwsClusterControl {
    async fn describe_cluster(&self, cluster_id: &str) -> Result<ClusterState, EmrError> {
        let resp = self
            .client
            .describe_cluster()
            .cluster_id(cluster_id)
            .send()
            .await
            .map_err(sdk_err)?;

        let state = resp
            .cluster()
            .and_then(|c| c.status())
            .and_then(|s| s.state());
        Ok(cluster_state_from_sdk(state))
    }

    async fn list_clusters(&self, states: &[ClusterState]) -> Result<Vec<ClusterSummary>, EmrError> {
        let resp = self
            .client
            .list_clusters()
            .set_cluster_states(Some(states.iter().map(cluster_state_to_sdk).collect()))
            .send()
            .await
            .map_err(sdk_err)?;

        Ok(resp
            .clusters()
            .iter()
            .filter_map(|c| {
                Some(ClusterSummary {
                    id: c.id()?.to_string(),
                    name: c.name().unwrap_or_default().to_string(),
                    state: cluster_state_from_sdk(c.status().and_then(|s| s.state())),
                })
            })
            .collect())
    }

    async fn add_step(&self, cluster_id: &str, step: &StepSpec) -> Result<String, EmrError> {
        let jar_step = HadoopJarStepConfig::builder()
            .jar(&step.jar)
            .set_args(Some(step.args.clone()))
            .build();
        let config = StepConfig::builder()
            .name(&step.name)
            .action_on_failure(ActionOnFailure::Continue)
            .hadoop_jar_step(jar_step)
            .build();

        let resp = self
            .client
            .add_job_flow_steps()
            .job_flow_id(cluster_id)
            .steps(config)
            .send()
            .await
            .map_err(sdk_err)?;

        resp.step_ids()
            .first()
            .cloned()
            .ok_or_else(|| EmrError::AwsSdk("No step ID returned".into()))
    }

    async fn describe_step(&self, cluster_id: &str, step_id: &str) -> Result<StepStatus, EmrError> {
        let resp = self
            .client
            .describe_step()
            .cluster_id(cluster_id)
            .step_id(step_id)
            .send()
            .await
            .map_err(sdk_err)?;

        let status = resp.step().and_then(|s| s.status());
        let state = step_state_from_sdk(status.and_then(|s| s.state()));
        let reason = status.and_then(|s| {
            s.failure_details()
                .and_then(|d| d.message())
                .or_else(|| s.state_change_reason().and_then(|r| r.message()))
                .map(str::to_string)
        });

        debug!(step_id = %step_id, state = %state, "Described step");
        Ok(StepStatus { state, reason })
    }
}

// ── CloudFormation ───────────────────────────────────────────────

#[derive(Clone)]
pub struct AwsStackControl {
    client: aws_sdk_cloudformation::Client,
    stack_name: String,
}

fn stack_status_from_sdk(status: &CfnStackStatus) -> StackStatus {
    match status {
        CfnStackStatus::UpdateInProgress => StackStatus::UpdateInProgress,
        CfnStackStatus::UpdateComplete => StackStatus::UpdateComplete,
        CfnStackStatus::UpdateRollbackComplete => StackStatus::UpdateRollbackComplete,
        CfnStackStatus::UpdateRollbackFailed => StackStatus::UpdateRollbackFailed,
        other => StackStatus::Other(other.as_str().to_string()),
    }
}

#[async_trait]
impl StackControl for AwsStackControl {
    fn stack_name(&self) -> &str {
        &self.stack_name
    }

    async fn update_stack(&self, random_value: &str) -> Result<(), EmrError> {
        let result = self
            .client
            .update_stack()
            .stack_name(&self.stack_name)
            .use_previous_template(true)
            .parameters(
                Parameter::builder()
                    .parameter_key(RANDOM_PARAMETER)
                    .parameter_value(random_value)
                    .build(),
            )
            .send()
            .await;

        match result {
            Ok(_) => Ok(()),
            Err(e) => {
                let message = aws_sdk_cloudformation::error::DisplayErrorContext(&e).to_string();
                if message.contains("No updates are to be performed") {
                    Err(EmrError::NoStackUpdates {
                        stack: self.stack_name.clone(),
                    })
                } else if message.contains("UPDATE_IN_PROGRESS") {
                    Err(EmrError::StackUpdateInProgress {
                        stack: self.stack_name.clone(),
                    })
                } else {
                    Err(EmrError::AwsSdk(message))
                }
            }
        }
    }

    async fn describe_stack_status(&self) -> Result<Option<StackStatus>, EmrError> {
        let resp = self
            .client
            .describe_stacks()
            .stack_name(&self.stack_name)
            .send()
            .await
            .map_err(sdk_err)?;

        Ok(resp.stacks().first().and_then(|stack| {
            let status: Option<&CfnStackStatus> = stack.stack_status().into();
            status.map(stack_status_from_sdk)
        }))
    }

    async fn cluster_resource_id(&self) -> Result<Option<String>, EmrError> {
        let resp = self
            .client
            .list_stack_resources()
            .stack_name(&self.stack_name)
            .send()
            .await
            .map_err(sdk_err)?;

        Ok(resp
            .stack_resource_summaries()
            .iter()
            .find(|r| {
                let resource_type: Option<&str> = r.resource_type().into();
                resource_type == Some(CLUSTER_RESOURCE_TYPE)
            })
            .and_then(|r| r.physical_resource_id())
            .map(str::to_string))
    }
}

// ── S3 ───────────────────────────────────────────────────────────

#[derive(Clone)]
pub struct S3ObjectStore {
    client: aws_sdk_s3::Client,
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), EmrError> {
        let size = body.len();
        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .content_type(content_type)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(sdk_err)?;

        info!(bucket = %bucket, key = %key, bytes = size, "Uploaded object");
        Ok(())
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, EmrError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .prefix(prefix)
            .send()
            .await
            .map_err(sdk_err)?;

        Ok(resp
            .contents()
            .iter()
            .filter_map(|o| o.key().map(str::to_string))
            .collect())
    }
}
