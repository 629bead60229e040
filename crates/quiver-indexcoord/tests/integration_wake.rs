//! Integration tests for wake coalescing and shutdown quiescence.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::fixtures::{GatedNodeManager, IndexMetaBuilder, RecordingClient};
use common::{init_tracing, wait_until, TestCoordinator};
use quiver_indexcoord::{
    BuilderConfig, IndexBuilder, IndexNodeClient, MemoryLockService, MemoryMetaStore, MetaStore,
    NodeManager, SegmentLockService, TaskState,
};
use quiver_proto::{BuildId, IndexState, NodeId};

/// Tick interval long enough that only the wake channel can drive the
/// loop within a test's lifetime.
fn tick_free_config() -> BuilderConfig {
    BuilderConfig {
        schedule_interval: Duration::from_secs(3600),
        task_capacity: 16,
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn wakes_during_a_pass_coalesce_into_one() {
    init_tracing();

    let meta_store = Arc::new(MemoryMetaStore::new());
    let manager = GatedNodeManager::new();
    let locks = Arc::new(MemoryLockService::new());

    let builder = IndexBuilder::new(
        tick_free_config(),
        Arc::clone(&meta_store) as Arc<dyn MetaStore>,
        Arc::clone(&manager) as Arc<dyn NodeManager>,
        locks as Arc<dyn SegmentLockService>,
        &[],
    )
    .await
    .unwrap();

    // Records land after the startup refresh so nothing is tracked
    // until the enqueues below.
    for id in 1..=10 {
        meta_store
            .insert(IndexMetaBuilder::new(id).build())
            .await
            .unwrap();
    }

    builder.start();

    // Let the initial tick's empty pass go by.
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(manager.peek_count(), 0);

    // Freeze the driver inside the first build's step.
    manager.hold();
    builder.enqueue(BuildId::new(1));
    wait_until("driver blocked mid-pass", || manager.peek_count() == 1).await;

    // Nine more wakes arrive while the pass is running; the channel
    // holds one, the rest are dropped.
    for id in 2..=10 {
        builder.enqueue(BuildId::new(id));
    }

    manager.open();

    // Exactly one coalesced pass follows: ten tasks, ten peeks, on top
    // of the single peek from the frozen pass.
    wait_until("coalesced pass", || manager.peek_count() == 11).await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(manager.peek_count(), 11);

    builder.stop().await;
}

#[tokio::test]
async fn wake_drives_assignment_without_a_tick() {
    let coordinator = TestCoordinator::with_config(tick_free_config(), &[]).await;
    let client = RecordingClient::new();
    coordinator
        .registry
        .register(NodeId::new(1), Arc::clone(&client) as Arc<dyn IndexNodeClient>);
    coordinator
        .meta_store
        .insert(IndexMetaBuilder::new(7).build())
        .await
        .unwrap();

    coordinator.builder.start();
    // The initial tick fires on an empty table; everything after this
    // point is wake-driven.
    tokio::time::sleep(Duration::from_millis(50)).await;

    coordinator.builder.enqueue(BuildId::new(7));

    wait_until("wake-driven assignment", || {
        coordinator.builder.task_state(BuildId::new(7)) == Some(TaskState::InProgress)
    })
    .await;
    assert_eq!(client.request_count(), 1);

    coordinator.builder.stop().await;
}

#[tokio::test]
async fn stop_quiesces_outbound_calls() {
    let coordinator = TestCoordinator::started(&[]).await;
    let client = RecordingClient::new();
    coordinator
        .registry
        .register(NodeId::new(1), Arc::clone(&client) as Arc<dyn IndexNodeClient>);

    let build = BuildId::new(7);
    coordinator
        .meta_store
        .insert(IndexMetaBuilder::new(7).build())
        .await
        .unwrap();
    coordinator.builder.enqueue(build);

    wait_until("build assigned", || {
        coordinator.builder.task_state(build) == Some(TaskState::InProgress)
    })
    .await;

    coordinator.builder.stop().await;
    // A second stop is a no-op.
    coordinator.builder.stop().await;

    // Post-stop mutations only touch the in-memory table; nothing is
    // dispatched, locked, or released any more.
    coordinator
        .meta_store
        .insert(IndexMetaBuilder::new(8).build())
        .await
        .unwrap();
    coordinator.builder.enqueue(BuildId::new(8));

    let reported = coordinator
        .meta_store
        .report_state(build, IndexState::Finished)
        .unwrap();
    coordinator.builder.update_state_by_meta(&reported);

    tokio::time::sleep(Duration::from_millis(150)).await;

    assert_eq!(client.request_count(), 1);
    assert!(coordinator.locks.is_held(build, NodeId::new(1)));
    assert!(coordinator.builder.has_task(BuildId::new(8)));
    assert_eq!(
        coordinator.builder.task_state(BuildId::new(8)),
        Some(TaskState::Init)
    );

    let meta = coordinator
        .meta_store
        .meta(BuildId::new(8))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(meta.state, IndexState::Unissued);
    assert_eq!(meta.index_version, 0);
}
