pub mod aws;
pub mod cluster;
pub mod config;
pub mod control;
pub mod error;
pub mod output;
pub mod script;
pub mod submit;

pub use cluster::{ClusterCache, ClusterHandle, ClusterManager, LifecycleSettings};
pub use config::{EmrConfig, RetryPolicy};
pub use control::{
    ClusterControl, ClusterState, ClusterSummary, ObjectStore, StackControl, StackStatus, StepSpec,
    StepStatus,
};
pub use error::EmrError;
pub use output::OutputLayout;
pub use submit::{PollSettings, StepSubmitter};
