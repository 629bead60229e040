//! Common test utilities for index coordinator integration tests.

pub mod fixtures;

use std::sync::Arc;
use std::time::Duration;

use quiver_indexcoord::{
    BuilderConfig, IndexBuilder, MemoryLockService, MemoryMetaStore, MetaStore, NodeManager,
    NodeRegistry, SegmentLockService,
};
use quiver_proto::NodeId;

/// Complete test coordinator with all components wired together.
pub struct TestCoordinator {
    pub builder: IndexBuilder,
    pub meta_store: Arc<MemoryMetaStore>,
    pub registry: Arc<NodeRegistry>,
    pub locks: Arc<MemoryLockService>,
}

impl TestCoordinator {
    /// Creates a coordinator over in-memory backends without starting
    /// the driver.
    pub async fn new(live_nodes: &[i64]) -> Self {
        Self::with_config(fast_config(), live_nodes).await
    }

    /// Creates a coordinator with custom builder configuration.
    pub async fn with_config(config: BuilderConfig, live_nodes: &[i64]) -> Self {
        Self::with_parts(config, Arc::new(MemoryMetaStore::new()), live_nodes).await
    }

    /// Creates a coordinator over durable records seeded before the
    /// startup refresh runs (for recovery scenarios).
    pub async fn with_seeded(metas: Vec<quiver_proto::IndexMeta>, live_nodes: &[i64]) -> Self {
        let meta_store = Arc::new(MemoryMetaStore::new());
        for meta in metas {
            meta_store.insert(meta).await.expect("seed meta");
        }
        Self::with_parts(fast_config(), meta_store, live_nodes).await
    }

    async fn with_parts(
        config: BuilderConfig,
        meta_store: Arc<MemoryMetaStore>,
        live_nodes: &[i64],
    ) -> Self {
        init_tracing();

        let registry = Arc::new(NodeRegistry::new());
        let locks = Arc::new(MemoryLockService::new());
        let live: Vec<NodeId> = live_nodes.iter().copied().map(NodeId::new).collect();

        let builder = IndexBuilder::new(
            config,
            Arc::clone(&meta_store) as Arc<dyn MetaStore>,
            Arc::clone(&registry) as Arc<dyn NodeManager>,
            Arc::clone(&locks) as Arc<dyn SegmentLockService>,
            &live,
        )
        .await
        .expect("builder construction");

        Self {
            builder,
            meta_store,
            registry,
            locks,
        }
    }

    /// Creates a coordinator and starts its driver.
    pub async fn started(live_nodes: &[i64]) -> Self {
        let coordinator = Self::new(live_nodes).await;
        coordinator.builder.start();
        coordinator
    }
}

/// Builder configuration with a fast tick for time-sensitive tests.
pub fn fast_config() -> BuilderConfig {
    BuilderConfig {
        schedule_interval: Duration::from_millis(25),
        task_capacity: 16,
    }
}

/// Initialises test logging; safe to call repeatedly.
pub fn init_tracing() {
    use tracing_subscriber::EnvFilter;

    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

/// Polls `cond` until it holds, panicking after five seconds.
pub async fn wait_until(what: &str, mut cond: impl FnMut() -> bool) {
    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while !cond() {
        assert!(
            tokio::time::Instant::now() < deadline,
            "timed out waiting for {what}"
        );
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
}
