use phantom_core::TaskKind;

/// Errors raised by the cluster lifecycle and step protocol.
#[derive(Debug, thiserror::Error)]
pub enum EmrError {
    /// An AWS SDK error (stringified with its source chain).
    #[error("AWS SDK error: {0}")]
    AwsSdk(String),

    /// The task dialect is not executed on the cluster.
    #[error("Task type {0} cannot be submitted as a cluster step")]
    UnsupportedKind(TaskKind),

    /// The stack accepted the update request but nothing was replaced.
    #[error("Stack {stack} reported no updates to perform; cluster was not recreated")]
    NoStackUpdates { stack: String },

    /// Another update of the stack is already running.
    #[error("Stack {stack} has an update in progress")]
    StackUpdateInProgress { stack: String },

    #[error("Stack {stack} update failed with status {status}")]
    StackUpdateFailed { stack: String, status: String },

    #[error("Stack {stack} update did not complete after {attempts} polls")]
    StackUpdateTimeout { stack: String, attempts: u32 },

    /// The stack has no cluster resource after a successful update.
    #[error("No cluster resource found in stack {stack}")]
    ClusterNotFound { stack: String },

    #[error("Cluster {cluster_id} terminated while waiting for it ({state})")]
    ClusterTerminated { cluster_id: String, state: String },

    #[error("Cluster {cluster_id} not ready after {attempts} polls")]
    ClusterNotReady { cluster_id: String, attempts: u32 },

    #[error("Step {step_id} did not finish after {attempts} polls")]
    StepTimeout { step_id: String, attempts: u32 },

    /// A malformed `s3://` location.
    #[error("Invalid S3 location: {0}")]
    InvalidLocation(String),
}

impl EmrError {
    /// Whether the error came from the control plane rather than local logic.
    pub fn is_transient(&self) -> bool {
        !matches!(self, EmrError::UnsupportedKind(_) | EmrError::InvalidLocation(_))
    }
}
