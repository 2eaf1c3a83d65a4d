//! Control-plane seams: cluster orchestration, stack orchestration and object storage.
//!
//! The lifecycle manager and step submitter only talk to these traits, so tests
//! swap in fakes and the daemon plugs in the AWS SDK clients from [`crate::aws`].

use std::fmt;

use async_trait::async_trait;
use phantom_core::StepState;

use crate::error::EmrError;

// ── Cluster ──────────────────────────────────────────────────────

/// Lifecycle state of a cluster as reported by the control plane.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ClusterState {
    Starting,
    Bootstrapping,
    Running,
    Waiting,
    Terminating,
    Terminated,
    TerminatedWithErrors,
    Unknown(String),
}

impl ClusterState {
    /// States a cluster can be in while still worth reusing.
    pub const LIVE: [ClusterState; 4] = [
        ClusterState::Running,
        ClusterState::Waiting,
        ClusterState::Starting,
        ClusterState::Bootstrapping,
    ];

    /// Accepts steps right now.
    pub fn is_ready(&self) -> bool {
        matches!(self, ClusterState::Waiting | ClusterState::Running)
    }

    /// Will become ready without intervention.
    pub fn is_starting(&self) -> bool {
        matches!(self, ClusterState::Starting | ClusterState::Bootstrapping)
    }

    pub fn is_terminated(&self) -> bool {
        matches!(
            self,
            ClusterState::Terminating | ClusterState::Terminated | ClusterState::TerminatedWithErrors
        )
    }
}

impl fmt::Display for ClusterState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ClusterState::Starting => "STARTING",
            ClusterState::Bootstrapping => "BOOTSTRAPPING",
            ClusterState::Running => "RUNNING",
            ClusterState::Waiting => "WAITING",
            ClusterState::Terminating => "TERMINATING",
            ClusterState::Terminated => "TERMINATED",
            ClusterState::TerminatedWithErrors => "TERMINATED_WITH_ERRORS",
            ClusterState::Unknown(other) => other.as_str(),
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterSummary {
    pub id: String,
    pub name: String,
    pub state: ClusterState,
}

/// One step to add to a cluster: a named command-runner invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepSpec {
    pub name: String,
    pub jar: String,
    pub args: Vec<String>,
}

/// Observed status of a submitted step.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StepStatus {
    pub state: StepState,
    /// Control-plane explanation for a FAILED or CANCELLED step.
    pub reason: Option<String>,
}

#[async_trait]
pub trait ClusterControl: Send + Sync {
    async fn describe_cluster(&self, cluster_id: &str) -> Result<ClusterState, EmrError>;

    async fn list_clusters(&self, states: &[ClusterState]) -> Result<Vec<ClusterSummary>, EmrError>;

    /// Add one step and return its id.
    async fn add_step(&self, cluster_id: &str, step: &StepSpec) -> Result<String, EmrError>;

    async fn describe_step(&self, cluster_id: &str, step_id: &str) -> Result<StepStatus, EmrError>;
}

// ── Stack ────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StackStatus {
    UpdateInProgress,
    UpdateComplete,
    UpdateRollbackComplete,
    UpdateRollbackFailed,
    Other(String),
}

impl StackStatus {
    pub fn is_rolled_back(&self) -> bool {
        matches!(self, StackStatus::UpdateRollbackComplete | StackStatus::UpdateRollbackFailed)
    }
}

impl fmt::Display for StackStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackStatus::UpdateInProgress => f.write_str("UPDATE_IN_PROGRESS"),
            StackStatus::UpdateComplete => f.write_str("UPDATE_COMPLETE"),
            StackStatus::UpdateRollbackComplete => f.write_str("UPDATE_ROLLBACK_COMPLETE"),
            StackStatus::UpdateRollbackFailed => f.write_str("UPDATE_ROLLBACK_FAILED"),
            StackStatus::Other(s) => f.write_str(s),
        }
    }
}

/// The single infrastructure stack fronting the shared cluster.
#[async_trait]
pub trait StackControl: Send + Sync {
    fn stack_name(&self) -> &str;

    /// Re-apply the previous template with a new `Random` parameter value.
    ///
    /// Must map "no updates" to [`EmrError::NoStackUpdates`] and a concurrent
    /// update to [`EmrError::StackUpdateInProgress`].
    async fn update_stack(&self, random_value: &str) -> Result<(), EmrError>;

    async fn describe_stack_status(&self) -> Result<Option<StackStatus>, EmrError>;

    /// Physical id of the stack's cluster resource, if any.
    async fn cluster_resource_id(&self) -> Result<Option<String>, EmrError>;
}

// ── Object storage ───────────────────────────────────────────────

#[async_trait]
pub trait ObjectStore: Send + Sync {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<(), EmrError>;

    /// Keys under `prefix`, in listing order.
    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, EmrError>;
}
