//! In-memory control planes that record every call.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use phantom_core::StepState;
use phantom_emr::*;

#[derive(Default)]
pub struct ClusterCalls {
    pub describe_cluster: u32,
    pub list_clusters: u32,
    pub add_step: u32,
    pub describe_step: u32,
}

#[derive(Default)]
struct ClusterWorld {
    states: HashMap<String, VecDeque<ClusterState>>,
    live: Vec<ClusterSummary>,
    step_outcomes: VecDeque<Result<StepStatus, String>>,
    steps: Vec<(String, StepSpec)>,
    calls: ClusterCalls,
}

/// Cluster control whose describe answers come from per-cluster scripts.
/// The last scripted state of a cluster repeats forever.
#[derive(Clone, Default)]
pub struct FakeClusters {
    world: Arc<Mutex<ClusterWorld>>,
}

impl FakeClusters {
    pub fn with_state(self, cluster_id: &str, states: &[ClusterState]) -> Self {
        self.world
            .lock()
            .unwrap()
            .states
            .insert(cluster_id.to_string(), states.iter().cloned().collect());
        self
    }

    pub fn with_live(self, id: &str, name: &str, state: ClusterState) -> Self {
        self.world.lock().unwrap().live.push(ClusterSummary {
            id: id.into(),
            name: name.into(),
            state,
        });
        self
    }

    /// Outcomes handed out per `describe_step`; the last one repeats.
    pub fn with_step_outcomes(self, outcomes: Vec<Result<StepStatus, String>>) -> Self {
        self.world.lock().unwrap().step_outcomes = outcomes.into();
        self
    }

    pub fn calls(&self) -> (u32, u32, u32, u32) {
        let w = self.world.lock().unwrap();
        (
            w.calls.describe_cluster,
            w.calls.list_clusters,
            w.calls.add_step,
            w.calls.describe_step,
        )
    }

    pub fn control_plane_calls(&self) -> u32 {
        let (a, b, c, d) = self.calls();
        a + b + c + d
    }

    pub fn submitted(&self) -> Vec<(String, StepSpec)> {
        self.world.lock().unwrap().steps.clone()
    }
}

fn next_repeating<T: Clone>(queue: &mut VecDeque<T>) -> Option<T> {
    if queue.len() > 1 {
        queue.pop_front()
    } else {
        queue.front().cloned()
    }
}

#[async_trait]
impl ClusterControl for FakeClusters {
    async fn describe_cluster(&self, cluster_id: &str) -> Result<ClusterState, EmrError> {
        let mut w = self.world.lock().unwrap();
        w.calls.describe_cluster += 1;
        w.states
            .get_mut(cluster_id)
            .and_then(next_repeating)
            .ok_or_else(|| EmrError::AwsSdk(format!("cluster {} not found", cluster_id)))
    }

    async fn list_clusters(&self, states: &[ClusterState]) -> Result<Vec<ClusterSummary>, EmrError> {
        let mut w = self.world.lock().unwrap();
        w.calls.list_clusters += 1;
        Ok(w.live
            .iter()
            .filter(|c| states.contains(&c.state))
            .cloned()
            .collect())
    }

    async fn add_step(&self, cluster_id: &str, step: &StepSpec) -> Result<String, EmrError> {
        let mut w = self.world.lock().unwrap();
        w.calls.add_step += 1;
        w.steps.push((cluster_id.to_string(), step.clone()));
        Ok(format!("s-{}", w.calls.add_step))
    }

    async fn describe_step(&self, _cluster_id: &str, _step_id: &str) -> Result<StepStatus, EmrError> {
        let mut w = self.world.lock().unwrap();
        w.calls.describe_step += 1;
        match next_repeating(&mut w.step_outcomes) {
            Some(Ok(status)) => Ok(status),
            Some(Err(msg)) => Err(EmrError::AwsSdk(msg)),
            None => Ok(StepStatus {
                state: StepState::Completed,
                reason: None,
            }),
        }
    }
}

pub fn step(state: StepState, reason: Option<&str>) -> Result<StepStatus, String> {
    Ok(StepStatus {
        state,
        reason: reason.map(str::to_string),
    })
}

// ── Stack ────────────────────────────────────────────────────────

#[derive(Default)]
struct StackWorld {
    resource: Option<String>,
    /// Cluster id the stack exposes after a successful update.
    replacement: Option<String>,
    update_errors: VecDeque<EmrError>,
    statuses: VecDeque<StackStatus>,
    updates: u32,
}

#[derive(Clone, Default)]
pub struct FakeStack {
    world: Arc<Mutex<StackWorld>>,
}

impl FakeStack {
    pub fn with_resource(self, cluster_id: &str) -> Self {
        self.world.lock().unwrap().resource = Some(cluster_id.into());
        self
    }

    pub fn replaces_with(self, cluster_id: &str) -> Self {
        self.world.lock().unwrap().replacement = Some(cluster_id.into());
        self
    }

    pub fn failing_updates(self, errors: Vec<EmrError>) -> Self {
        self.world.lock().unwrap().update_errors = errors.into();
        self
    }

    pub fn with_statuses(self, statuses: &[StackStatus]) -> Self {
        self.world.lock().unwrap().statuses = statuses.iter().cloned().collect();
        self
    }

    pub fn updates(&self) -> u32 {
        self.world.lock().unwrap().updates
    }
}

#[async_trait]
impl StackControl for FakeStack {
    fn stack_name(&self) -> &str {
        "phantom-stack"
    }

    async fn update_stack(&self, random_value: &str) -> Result<(), EmrError> {
        assert!(!random_value.is_empty());
        let mut w = self.world.lock().unwrap();
        w.updates += 1;
        if let Some(err) = w.update_errors.pop_front() {
            return Err(err);
        }
        if let Some(next) = w.replacement.clone() {
            w.resource = Some(next);
        }
        Ok(())
    }

    async fn describe_stack_status(&self) -> Result<Option<StackStatus>, EmrError> {
        let mut w = self.world.lock().unwrap();
        Ok(Some(
            next_repeating(&mut w.statuses).unwrap_or(StackStatus::UpdateComplete),
        ))
    }

    async fn cluster_resource_id(&self) -> Result<Option<String>, EmrError> {
        Ok(self.world.lock().unwrap().resource.clone())
    }
}

// ── Objects ──────────────────────────────────────────────────────

#[derive(Clone, Default)]
pub struct FakeObjects {
    objects: Arc<Mutex<Vec<(String, String, Vec<u8>)>>>,
}

impl FakeObjects {
    pub fn with_key(self, bucket: &str, key: &str) -> Self {
        self.objects
            .lock()
            .unwrap()
            .push((bucket.into(), key.into(), Vec::new()));
        self
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects
            .lock()
            .unwrap()
            .iter()
            .map(|(_, k, _)| k.clone())
            .collect()
    }
}

#[async_trait]
impl ObjectStore for FakeObjects {
    async fn put_object(
        &self,
        bucket: &str,
        key: &str,
        body: Vec<u8>,
        _content_type: &str,
    ) -> Result<(), EmrError> {
        self.objects
            .lock()
            .unwrap()
            .push((bucket.into(), key.into(), body));
        Ok(())
    }

    async fn list_keys(&self, bucket: &str, prefix: &str) -> Result<Vec<String>, EmrError> {
        Ok(self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(b, k, _)| b == bucket && k.starts_with(prefix))
            .map(|(_, k, _)| k.clone())
            .collect())
    }
}

// ── Wiring ───────────────────────────────────────────────────────

pub fn settings() -> LifecycleSettings {
    LifecycleSettings {
        cluster_logical_id: "EmrCluster".into(),
        poll_interval: Duration::from_secs(30),
        cluster_poll_max_attempts: 60,
        stack_poll_max_attempts: 60,
        handle_ttl: Duration::from_secs(30),
    }
}

pub fn manager(clusters: &FakeClusters, stack: &FakeStack, cache: ClusterCache) -> ClusterManager {
    ClusterManager::new(
        Arc::new(clusters.clone()),
        Arc::new(stack.clone()),
        settings(),
        cache,
    )
}
