//! Cluster Lifecycle Manager: discovers, reuses or recreates the one shared cluster.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::config::EmrConfig;
use crate::control::{ClusterControl, ClusterState, ClusterSummary, StackControl, StackStatus};
use crate::error::EmrError;

/// Last known cluster, with the state observed for it and when.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ClusterHandle {
    pub cluster_id: String,
    pub state: ClusterState,
    pub observed_at: Instant,
}

impl ClusterHandle {
    pub fn observed(cluster_id: impl Into<String>, state: ClusterState) -> Self {
        Self {
            cluster_id: cluster_id.into(),
            state,
            observed_at: Instant::now(),
        }
    }

    /// Ready when last seen, and seen recently enough to trust without asking again.
    pub fn is_fresh(&self, ttl: Duration) -> bool {
        self.state.is_ready() && self.observed_at.elapsed() <= ttl
    }
}

/// Shared cluster-handle cache. Cloning shares the slot.
#[derive(Debug, Clone, Default)]
pub struct ClusterCache {
    slot: Arc<Mutex<Option<ClusterHandle>>>,
}

impl ClusterCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn get(&self) -> Option<ClusterHandle> {
        self.slot.lock().await.clone()
    }

    pub async fn set(&self, handle: ClusterHandle) {
        *self.slot.lock().await = Some(handle);
    }

    pub async fn clear(&self) {
        *self.slot.lock().await = None;
    }
}

/// Polling bounds for the lifecycle manager.
#[derive(Debug, Clone)]
pub struct LifecycleSettings {
    pub cluster_logical_id: String,
    pub poll_interval: Duration,
    pub cluster_poll_max_attempts: u32,
    pub stack_poll_max_attempts: u32,
    pub handle_ttl: Duration,
}

impl From<&EmrConfig> for LifecycleSettings {
    fn from(config: &EmrConfig) -> Self {
        Self {
            cluster_logical_id: config.cluster_logical_id.clone(),
            poll_interval: config.cluster_poll_interval(),
            cluster_poll_max_attempts: config.cluster_poll_max_attempts,
            stack_poll_max_attempts: config.stack_poll_max_attempts,
            handle_ttl: config.cluster_handle_ttl(),
        }
    }
}

pub struct ClusterManager {
    clusters: Arc<dyn ClusterControl>,
    stack: Arc<dyn StackControl>,
    settings: LifecycleSettings,
    cache: ClusterCache,
}

impl ClusterManager {
    pub fn new(
        clusters: Arc<dyn ClusterControl>,
        stack: Arc<dyn StackControl>,
        settings: LifecycleSettings,
        cache: ClusterCache,
    ) -> Self {
        Self {
            clusters,
            stack,
            settings,
            cache,
        }
    }

    pub fn cache(&self) -> &ClusterCache {
        &self.cache
    }

    /// Return the id of a cluster that accepts steps, provisioning one if needed.
    ///
    /// Concurrent callers are serialized on the cache slot, so at most one of
    /// them discovers or recreates the cluster.
    pub async fn ensure_ready(&self) -> Result<String, EmrError> {
        let mut slot = self.cache.slot.lock().await;

        if let Some(handle) = slot.as_ref() {
            if handle.is_fresh(self.settings.handle_ttl) {
                debug!(cluster_id = %handle.cluster_id, "Using cached cluster");
                return Ok(handle.cluster_id.clone());
            }
            match self.clusters.describe_cluster(&handle.cluster_id).await {
                Ok(state) if state.is_ready() => {
                    let refreshed = ClusterHandle::observed(handle.cluster_id.clone(), state);
                    let id = refreshed.cluster_id.clone();
                    *slot = Some(refreshed);
                    return Ok(id);
                }
                Ok(state) => {
                    info!(cluster_id = %handle.cluster_id, state = %state, "Cached cluster is not alive");
                }
                Err(e) => {
                    warn!(cluster_id = %handle.cluster_id, error = %e, "Failed to check cached cluster");
                }
            }
        }
        *slot = None;

        let handle = match self.discover().await? {
            Some(handle) => handle,
            None => {
                info!(stack = %self.stack.stack_name(), "No usable cluster found, recreating through the stack");
                self.recreate().await?
            }
        };

        info!(cluster_id = %handle.cluster_id, state = %handle.state, "Cluster ready");
        let id = handle.cluster_id.clone();
        *slot = Some(handle);
        Ok(id)
    }

    /// Look for a reusable cluster: the stack's own first, then any live one.
    async fn discover(&self) -> Result<Option<ClusterHandle>, EmrError> {
        let stack_cluster = match self.stack.cluster_resource_id().await {
            Ok(id) => id,
            Err(e) => {
                warn!(error = %e, "Failed to read cluster id from stack resources");
                None
            }
        };

        if let Some(id) = stack_cluster.as_deref() {
            match self.clusters.describe_cluster(id).await {
                Ok(state) if state.is_ready() => {
                    info!(cluster_id = %id, state = %state, "Found ready cluster from stack");
                    return Ok(Some(ClusterHandle::observed(id, state)));
                }
                Ok(state) if state.is_starting() => {
                    info!(cluster_id = %id, state = %state, "Stack cluster is starting, waiting for it");
                    return self.wait_until_ready(id).await.map(Some);
                }
                Ok(state) => {
                    info!(cluster_id = %id, state = %state, "Stack cluster is not reusable");
                }
                Err(e) => {
                    warn!(cluster_id = %id, error = %e, "Failed to describe stack cluster");
                }
            }
        }

        let live = match self.clusters.list_clusters(&ClusterState::LIVE).await {
            Ok(live) => live,
            Err(e) => {
                warn!(error = %e, "Failed to list live clusters");
                Vec::new()
            }
        };

        match pick_cluster(&live, stack_cluster.as_deref(), &self.settings.cluster_logical_id) {
            Some(found) if found.state.is_ready() => {
                info!(cluster_id = %found.id, state = %found.state, "Reusing existing cluster");
                Ok(Some(ClusterHandle::observed(found.id.clone(), found.state.clone())))
            }
            Some(found) => {
                info!(cluster_id = %found.id, state = %found.state, "Existing cluster is starting, waiting for it");
                self.wait_until_ready(&found.id).await.map(Some)
            }
            None => Ok(None),
        }
    }

    /// Force the stack to replace its cluster, then wait for the new one.
    async fn recreate(&self) -> Result<ClusterHandle, EmrError> {
        match self.stack.update_stack(&random_parameter()).await {
            Ok(()) => {}
            Err(EmrError::StackUpdateInProgress { .. }) => {
                warn!(stack = %self.stack.stack_name(), "Stack update already in progress, waiting before retrying");
                self.wait_for_stack_update().await?;
                self.stack.update_stack(&random_parameter()).await?;
            }
            Err(e) => return Err(e),
        }
        self.wait_for_stack_update().await?;

        let cluster_id = self
            .stack
            .cluster_resource_id()
            .await?
            .ok_or_else(|| EmrError::ClusterNotFound {
                stack: self.stack.stack_name().to_string(),
            })?;
        self.wait_until_ready(&cluster_id).await
    }

    async fn wait_for_stack_update(&self) -> Result<(), EmrError> {
        let stack = self.stack.stack_name().to_string();
        let max = self.settings.stack_poll_max_attempts;

        for attempt in 1..=max {
            match self.stack.describe_stack_status().await? {
                Some(StackStatus::UpdateComplete) => {
                    info!(stack = %stack, attempt, "Stack update complete");
                    return Ok(());
                }
                Some(status) if status.is_rolled_back() => {
                    return Err(EmrError::StackUpdateFailed {
                        stack,
                        status: status.to_string(),
                    });
                }
                status => {
                    debug!(stack = %stack, attempt, status = ?status, "Waiting for stack update");
                }
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        Err(EmrError::StackUpdateTimeout { stack, attempts: max })
    }

    async fn wait_until_ready(&self, cluster_id: &str) -> Result<ClusterHandle, EmrError> {
        let max = self.settings.cluster_poll_max_attempts;

        for attempt in 1..=max {
            match self.clusters.describe_cluster(cluster_id).await {
                Ok(state) if state.is_ready() => return Ok(ClusterHandle::observed(cluster_id, state)),
                Ok(state) if state.is_terminated() => {
                    return Err(EmrError::ClusterTerminated {
                        cluster_id: cluster_id.to_string(),
                        state: state.to_string(),
                    });
                }
                Ok(state) => {
                    debug!(cluster_id = %cluster_id, attempt, state = %state, "Waiting for cluster");
                }
                Err(e) => {
                    warn!(cluster_id = %cluster_id, attempt, error = %e, "Failed to check cluster state");
                }
            }
            tokio::time::sleep(self.settings.poll_interval).await;
        }

        Err(EmrError::ClusterNotReady {
            cluster_id: cluster_id.to_string(),
            attempts: max,
        })
    }
}

/// Prefer the stack's cluster, then one named after the logical id, then the first.
fn pick_cluster<'a>(
    live: &'a [ClusterSummary],
    stack_cluster: Option<&str>,
    logical_id: &str,
) -> Option<&'a ClusterSummary> {
    stack_cluster
        .and_then(|id| live.iter().find(|c| c.id == id))
        .or_else(|| {
            if logical_id.is_empty() {
                None
            } else {
                live.iter().find(|c| c.name.contains(logical_id))
            }
        })
        .or_else(|| live.first())
}

/// Fresh value for the stack's `Random` parameter.
fn random_parameter() -> String {
    let value = (Uuid::new_v4().as_u128() as u32) & 0x7fff_ffff;
    value.max(1).to_string()
}
