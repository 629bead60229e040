//! Durable metadata store for index builds.
//!
//! The meta store is the source of truth: every mutation is atomic and
//! durable before the call returns. The builder loop's in-memory table
//! is only a cache deciding what to do next.

use std::collections::HashMap;
use std::sync::RwLock;

use async_trait::async_trait;
use chrono::Utc;

use quiver_proto::{BuildId, IndexMeta, IndexState, NodeId};

use crate::error::{IndexCoordError, Result};

/// Trait for durable index metadata storage backends.
#[async_trait]
pub trait MetaStore: Send + Sync {
    /// Return every durable record.
    async fn all_metas(&self) -> Result<Vec<IndexMeta>>;

    /// Return the record for a build, if any.
    async fn meta(&self, build_id: BuildId) -> Result<Option<IndexMeta>>;

    /// Return every record currently assigned to a node.
    async fn metas_by_node(&self, node_id: NodeId) -> Result<Vec<IndexMeta>>;

    /// Bump the assignment version and record the target node in one
    /// atomic step. Returns the new version.
    async fn update_version(&self, build_id: BuildId, node_id: NodeId) -> Result<i64>;

    /// Transition the durable state to `InProgress` after a worker
    /// accepted the build.
    async fn build_index(&self, build_id: BuildId) -> Result<()>;

    /// Make the build eligible for a fresh attempt: clear the
    /// assignment and return the durable state to `Unissued`. The
    /// version is kept so reassignments stay strictly increasing.
    async fn reset_meta(&self, build_id: BuildId) -> Result<()>;

    /// Clear the node assignment, leaving state and version untouched.
    async fn reset_node_id(&self, build_id: BuildId) -> Result<()>;

    /// Insert a fresh record for a newly submitted build.
    async fn insert(&self, meta: IndexMeta) -> Result<()>;

    /// Record the catalog's deletion of the build's index.
    async fn mark_deleted(&self, build_id: BuildId) -> Result<()>;
}

/// In-memory meta store.
///
/// Backs tests and single-node runs; data is lost when the process
/// exits, so production deployments use a persistent backend.
#[derive(Debug, Default)]
pub struct MemoryMetaStore {
    metas: RwLock<HashMap<BuildId, IndexMeta>>,
}

impl MemoryMetaStore {
    /// Create a new empty in-memory store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn with_meta<T>(
        &self,
        build_id: BuildId,
        f: impl FnOnce(&mut IndexMeta) -> T,
    ) -> Result<T> {
        let mut metas = self
            .metas
            .write()
            .map_err(|_| IndexCoordError::internal("lock poisoned"))?;

        let meta = metas
            .get_mut(&build_id)
            .ok_or(IndexCoordError::BuildNotFound(build_id))?;

        meta.updated_at = Utc::now();
        Ok(f(meta))
    }

    /// Record a worker's report of the build's durable state.
    ///
    /// Returns the updated record so the caller can hand it to the
    /// builder loop's `update_state_by_meta`.
    pub fn report_state(&self, build_id: BuildId, state: IndexState) -> Result<IndexMeta> {
        self.with_meta(build_id, |meta| {
            meta.state = state;
            meta.clone()
        })
    }
}

#[async_trait]
impl MetaStore for MemoryMetaStore {
    async fn all_metas(&self) -> Result<Vec<IndexMeta>> {
        let metas = self
            .metas
            .read()
            .map_err(|_| IndexCoordError::internal("lock poisoned"))?;
        Ok(metas.values().cloned().collect())
    }

    async fn meta(&self, build_id: BuildId) -> Result<Option<IndexMeta>> {
        let metas = self
            .metas
            .read()
            .map_err(|_| IndexCoordError::internal("lock poisoned"))?;
        Ok(metas.get(&build_id).cloned())
    }

    async fn metas_by_node(&self, node_id: NodeId) -> Result<Vec<IndexMeta>> {
        let metas = self
            .metas
            .read()
            .map_err(|_| IndexCoordError::internal("lock poisoned"))?;
        Ok(metas
            .values()
            .filter(|m| m.node_id == node_id)
            .cloned()
            .collect())
    }

    async fn update_version(&self, build_id: BuildId, node_id: NodeId) -> Result<i64> {
        self.with_meta(build_id, |meta| {
            meta.index_version += 1;
            meta.node_id = node_id;
            meta.index_version
        })
    }

    async fn build_index(&self, build_id: BuildId) -> Result<()> {
        self.with_meta(build_id, |meta| {
            meta.state = IndexState::InProgress;
        })
    }

    async fn reset_meta(&self, build_id: BuildId) -> Result<()> {
        self.with_meta(build_id, |meta| {
            meta.state = IndexState::Unissued;
            meta.node_id = NodeId::UNASSIGNED;
        })
    }

    async fn reset_node_id(&self, build_id: BuildId) -> Result<()> {
        self.with_meta(build_id, |meta| {
            meta.node_id = NodeId::UNASSIGNED;
        })
    }

    async fn insert(&self, meta: IndexMeta) -> Result<()> {
        let mut metas = self
            .metas
            .write()
            .map_err(|_| IndexCoordError::internal("lock poisoned"))?;

        if metas.contains_key(&meta.build_id) {
            return Err(IndexCoordError::internal(format!(
                "build {} already exists",
                meta.build_id
            )));
        }

        metas.insert(meta.build_id, meta);
        Ok(())
    }

    async fn mark_deleted(&self, build_id: BuildId) -> Result<()> {
        self.with_meta(build_id, |meta| {
            meta.mark_deleted = true;
        })
    }
}
