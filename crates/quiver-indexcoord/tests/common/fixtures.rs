//! Test fixtures for index coordinator integration tests.

use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::sync::Notify;

use quiver_indexcoord::{IndexCoordError, IndexNodeClient, NodeManager, Result};
use quiver_proto::{
    BuildId, BuildRequest, CreateIndexRequest, IndexMeta, IndexState, NodeId, SegmentId,
};

/// Builder for durable records in arbitrary starting states.
pub struct IndexMetaBuilder {
    meta: IndexMeta,
}

impl IndexMetaBuilder {
    /// Creates a builder for a fresh, unassigned record.
    pub fn new(build_id: i64) -> Self {
        Self {
            meta: IndexMeta::new(build_request(build_id)),
        }
    }

    /// Sets the durable state.
    pub fn state(mut self, state: IndexState) -> Self {
        self.meta.state = state;
        self
    }

    /// Sets the assigned node.
    pub fn node(mut self, node_id: i64) -> Self {
        self.meta.node_id = NodeId::new(node_id);
        self
    }

    /// Sets the assignment version.
    pub fn version(mut self, version: i64) -> Self {
        self.meta.index_version = version;
        self
    }

    /// Marks the record deleted by the catalog.
    pub fn deleted(mut self) -> Self {
        self.meta.mark_deleted = true;
        self
    }

    /// Builds the record.
    pub fn build(self) -> IndexMeta {
        self.meta
    }
}

/// A plausible build request for tests.
pub fn build_request(build_id: i64) -> BuildRequest {
    BuildRequest {
        build_id: BuildId::new(build_id),
        index_id: 100,
        index_name: "embedding_idx".to_owned(),
        segment_ids: vec![SegmentId::new(build_id * 10)],
        data_paths: vec![format!("s3://quiver/segments/{}", build_id * 10)],
        type_params: BTreeMap::from([("dim".to_owned(), "768".to_owned())]),
        index_params: BTreeMap::from([("index_type".to_owned(), "HNSW".to_owned())]),
    }
}

/// Index node client that records every accepted request.
#[derive(Default)]
pub struct RecordingClient {
    requests: Mutex<Vec<CreateIndexRequest>>,
    failing: AtomicUsize,
}

impl RecordingClient {
    /// Creates a client that accepts everything.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes the next `n` assignments fail.
    pub fn fail_next(&self, n: usize) {
        self.failing.store(n, Ordering::SeqCst);
    }

    /// Requests accepted so far.
    pub fn requests(&self) -> Vec<CreateIndexRequest> {
        self.requests.lock().clone()
    }

    /// Number of requests accepted so far.
    pub fn request_count(&self) -> usize {
        self.requests.lock().len()
    }
}

#[async_trait]
impl IndexNodeClient for RecordingClient {
    async fn create_index(&self, request: CreateIndexRequest) -> Result<()> {
        if self
            .failing
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(IndexCoordError::node_rpc("injected assignment failure"));
        }
        self.requests.lock().push(request);
        Ok(())
    }
}

/// Node manager that never has a worker but counts every request, and
/// can hold the caller on a gate to freeze the driver mid-pass.
#[derive(Default)]
pub struct GatedNodeManager {
    peeks: AtomicUsize,
    holding: AtomicBool,
    released: Notify,
}

impl GatedNodeManager {
    /// Creates a manager whose peeks return immediately.
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Makes subsequent peeks block until [`Self::open`] is called.
    pub fn hold(&self) {
        self.holding.store(true, Ordering::SeqCst);
    }

    /// Releases every held peek and lets new ones pass.
    pub fn open(&self) {
        self.holding.store(false, Ordering::SeqCst);
        self.released.notify_waiters();
    }

    /// Number of peeks observed so far.
    pub fn peek_count(&self) -> usize {
        self.peeks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl NodeManager for GatedNodeManager {
    async fn peek_client(&self, _meta: &IndexMeta) -> Option<(NodeId, Arc<dyn IndexNodeClient>)> {
        self.peeks.fetch_add(1, Ordering::SeqCst);
        loop {
            let released = self.released.notified();
            if !self.holding.load(Ordering::SeqCst) {
                break;
            }
            released.await;
        }
        None
    }
}
