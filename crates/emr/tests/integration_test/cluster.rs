//! Cluster lifecycle scenarios.

use phantom_emr::*;

use crate::fakes::{manager, FakeClusters, FakeStack};

#[tokio::test(start_paused = true)]
async fn fresh_cached_handle_makes_no_calls() {
    let clusters = FakeClusters::default();
    let stack = FakeStack::default();
    let cache = ClusterCache::new();
    cache
        .set(ClusterHandle::observed("j-CACHED", ClusterState::Waiting))
        .await;

    let mgr = manager(&clusters, &stack, cache);
    assert_eq!(mgr.ensure_ready().await.unwrap(), "j-CACHED");
    assert_eq!(clusters.control_plane_calls(), 0);
    assert_eq!(stack.updates(), 0);
}

#[tokio::test(start_paused = true)]
async fn stale_handle_is_redescribed() {
    let clusters = FakeClusters::default().with_state("j-CACHED", &[ClusterState::Running]);
    let stack = FakeStack::default();
    let cache = ClusterCache::new();
    cache
        .set(ClusterHandle::observed("j-CACHED", ClusterState::Waiting))
        .await;
    tokio::time::advance(std::time::Duration::from_secs(60)).await;

    let mgr = manager(&clusters, &stack, cache.clone());
    assert_eq!(mgr.ensure_ready().await.unwrap(), "j-CACHED");
    assert_eq!(clusters.calls().0, 1);

    let handle = cache.get().await.unwrap();
    assert_eq!(handle.state, ClusterState::Running);
}

#[tokio::test(start_paused = true)]
async fn nothing_discoverable_triggers_exactly_one_stack_update() {
    let clusters = FakeClusters::default().with_state(
        "j-NEW",
        &[ClusterState::Starting, ClusterState::Bootstrapping, ClusterState::Waiting],
    );
    let stack = FakeStack::default()
        .replaces_with("j-NEW")
        .with_statuses(&[StackStatus::UpdateInProgress, StackStatus::UpdateComplete]);
    let cache = ClusterCache::new();

    let mgr = manager(&clusters, &stack, cache.clone());
    assert_eq!(mgr.ensure_ready().await.unwrap(), "j-NEW");
    assert_eq!(stack.updates(), 1);
    assert_eq!(cache.get().await.unwrap().cluster_id, "j-NEW");

    // Second call reuses the handle without touching the stack again.
    assert_eq!(mgr.ensure_ready().await.unwrap(), "j-NEW");
    assert_eq!(stack.updates(), 1);
}

#[tokio::test(start_paused = true)]
async fn dead_cached_handle_falls_back_to_stack_cluster() {
    let clusters = FakeClusters::default()
        .with_state("j-OLD", &[ClusterState::Terminated])
        .with_state("j-STACK", &[ClusterState::Waiting]);
    let stack = FakeStack::default().with_resource("j-STACK");
    let cache = ClusterCache::new();
    cache
        .set(ClusterHandle::observed("j-OLD", ClusterState::Terminated))
        .await;

    let mgr = manager(&clusters, &stack, cache);
    assert_eq!(mgr.ensure_ready().await.unwrap(), "j-STACK");
    assert_eq!(stack.updates(), 0);
}

#[tokio::test(start_paused = true)]
async fn bootstrapping_stack_cluster_is_awaited() {
    let clusters = FakeClusters::default().with_state(
        "j-STACK",
        &[
            ClusterState::Bootstrapping,
            ClusterState::Bootstrapping,
            ClusterState::Bootstrapping,
            ClusterState::Waiting,
        ],
    );
    let stack = FakeStack::default().with_resource("j-STACK");

    let mgr = manager(&clusters, &stack, ClusterCache::new());
    assert_eq!(mgr.ensure_ready().await.unwrap(), "j-STACK");
    assert_eq!(stack.updates(), 0);
}

#[tokio::test(start_paused = true)]
async fn live_cluster_matching_logical_id_is_reused() {
    let clusters = FakeClusters::default()
        .with_live("j-A", "scratch", ClusterState::Waiting)
        .with_live("j-B", "phantom-EmrCluster-1", ClusterState::Running);
    let stack = FakeStack::default();

    let mgr = manager(&clusters, &stack, ClusterCache::new());
    assert_eq!(mgr.ensure_ready().await.unwrap(), "j-B");
    assert_eq!(stack.updates(), 0);
}

#[tokio::test(start_paused = true)]
async fn no_updates_is_a_hard_failure() {
    let clusters = FakeClusters::default();
    let stack = FakeStack::default().failing_updates(vec![EmrError::NoStackUpdates {
        stack: "phantom-stack".into(),
    }]);

    let mgr = manager(&clusters, &stack, ClusterCache::new());
    let err = mgr.ensure_ready().await.unwrap_err();
    assert!(matches!(err, EmrError::NoStackUpdates { .. }));
    assert!(mgr.cache().get().await.is_none());
}

#[tokio::test(start_paused = true)]
async fn update_in_progress_waits_then_retries_once() {
    let clusters = FakeClusters::default().with_state("j-NEW", &[ClusterState::Waiting]);
    let stack = FakeStack::default()
        .replaces_with("j-NEW")
        .failing_updates(vec![EmrError::StackUpdateInProgress {
            stack: "phantom-stack".into(),
        }]);

    let mgr = manager(&clusters, &stack, ClusterCache::new());
    assert_eq!(mgr.ensure_ready().await.unwrap(), "j-NEW");
    assert_eq!(stack.updates(), 2);
}

#[tokio::test(start_paused = true)]
async fn rolled_back_update_fails() {
    let clusters = FakeClusters::default();
    let stack = FakeStack::default()
        .replaces_with("j-NEW")
        .with_statuses(&[StackStatus::UpdateRollbackComplete]);

    let mgr = manager(&clusters, &stack, ClusterCache::new());
    let err = mgr.ensure_ready().await.unwrap_err();
    assert!(matches!(err, EmrError::StackUpdateFailed { .. }));
}

#[tokio::test(start_paused = true)]
async fn cluster_that_never_becomes_ready_times_out() {
    let clusters = FakeClusters::default().with_state("j-NEW", &[ClusterState::Starting]);
    let stack = FakeStack::default().replaces_with("j-NEW");

    let mgr = manager(&clusters, &stack, ClusterCache::new());
    let err = mgr.ensure_ready().await.unwrap_err();
    assert!(matches!(err, EmrError::ClusterNotReady { attempts: 60, .. }));
}
