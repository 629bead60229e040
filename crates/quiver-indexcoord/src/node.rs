//! Index node tracking and worker selection.

use std::sync::Arc;

use async_trait::async_trait;
use dashmap::DashMap;

use quiver_proto::{CreateIndexRequest, IndexMeta, NodeId};

use crate::error::Result;

/// Task slots granted to a node registered without an explicit bound.
const DEFAULT_TASK_SLOTS: usize = 4;

/// Client handle for one index node.
///
/// `create_index` signals only acceptance of the task; completion is
/// reported asynchronously through the durable metadata.
#[async_trait]
pub trait IndexNodeClient: Send + Sync {
    /// Ask the node to start building the index described by `request`.
    async fn create_index(&self, request: CreateIndexRequest) -> Result<()>;
}

/// Trait for worker selection backends.
///
/// Placement criteria are opaque to the builder loop: it only needs a
/// node and a client handle, or `None` when every worker is busy or
/// absent (the loop retries on its next pass). A successful peek
/// occupies a task slot on the returned node; the loop gives the slot
/// back through [`release_node`](NodeManager::release_node) once the
/// build stops occupying the node.
#[async_trait]
pub trait NodeManager: Send + Sync {
    /// Pick a worker for the build described by `meta`.
    async fn peek_client(&self, meta: &IndexMeta) -> Option<(NodeId, Arc<dyn IndexNodeClient>)>;

    /// Return the task slot held against `node_id` after its build
    /// finished, was reassigned, was deleted, or never dispatched.
    ///
    /// Defaults to a no-op for managers that do not track load.
    fn release_node(&self, node_id: NodeId) {
        let _ = node_id;
    }
}

struct NodeEntry {
    client: Arc<dyn IndexNodeClient>,
    max_tasks: usize,
    in_flight: usize,
}

/// Registry of live index nodes.
///
/// Thread-safe; the health monitor removes nodes as they fall out of
/// the cluster and registers them again on reconnect. Selection is
/// least-loaded over the registered set, bounded by each node's task
/// slots: a node already running `max_tasks` builds is not offered
/// again until a slot comes back through `release_node`.
#[derive(Default)]
pub struct NodeRegistry {
    nodes: DashMap<NodeId, NodeEntry>,
}

impl NodeRegistry {
    /// Create a new empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a node with the default task slot bound.
    pub fn register(&self, node_id: NodeId, client: Arc<dyn IndexNodeClient>) {
        self.register_with_slots(node_id, client, DEFAULT_TASK_SLOTS);
    }

    /// Register a node with an explicit task slot bound, replacing any
    /// previous entry for it.
    pub fn register_with_slots(
        &self,
        node_id: NodeId,
        client: Arc<dyn IndexNodeClient>,
        max_tasks: usize,
    ) {
        self.nodes.insert(
            node_id,
            NodeEntry {
                client,
                max_tasks,
                in_flight: 0,
            },
        );
    }

    /// Remove a node. Returns true if it was registered.
    pub fn remove(&self, node_id: NodeId) -> bool {
        self.nodes.remove(&node_id).is_some()
    }

    /// Return the IDs of every registered node.
    pub fn node_ids(&self) -> Vec<NodeId> {
        self.nodes.iter().map(|r| *r.key()).collect()
    }

    /// Builds currently accounted against a node.
    pub fn in_flight(&self, node_id: NodeId) -> Option<usize> {
        self.nodes.get(&node_id).map(|e| e.in_flight)
    }

    /// Returns the number of registered nodes.
    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    /// Returns true if no nodes are registered.
    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    /// Pick the node with the fewest builds in flight among those with
    /// a free slot, and occupy one slot on it. Lowest node ID wins a
    /// load tie so selection stays deterministic.
    fn reserve_slot(&self) -> Option<NodeId> {
        let mut best: Option<(NodeId, usize)> = None;
        for entry in &self.nodes {
            let node = entry.value();
            if node.in_flight >= node.max_tasks {
                continue;
            }
            let candidate = (*entry.key(), node.in_flight);
            best = match best {
                Some((best_id, best_load))
                    if (best_load, best_id) <= (candidate.1, candidate.0) =>
                {
                    Some((best_id, best_load))
                }
                _ => Some(candidate),
            };
        }

        let (node_id, _) = best?;
        let mut node = self.nodes.get_mut(&node_id)?;
        // Re-check under the entry lock: the slot may have been taken
        // since the scan.
        if node.in_flight >= node.max_tasks {
            return None;
        }
        node.in_flight += 1;
        Some(node_id)
    }
}

#[async_trait]
impl NodeManager for NodeRegistry {
    async fn peek_client(&self, _meta: &IndexMeta) -> Option<(NodeId, Arc<dyn IndexNodeClient>)> {
        let node_id = self.reserve_slot()?;
        let client = self.nodes.get(&node_id).map(|e| Arc::clone(&e.client))?;
        Some((node_id, client))
    }

    fn release_node(&self, node_id: NodeId) {
        if let Some(mut node) = self.nodes.get_mut(&node_id) {
            node.in_flight = node.in_flight.saturating_sub(1);
        }
    }
}

impl std::fmt::Debug for NodeRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeRegistry")
            .field("nodes", &self.node_ids())
            .finish_non_exhaustive()
    }
}
