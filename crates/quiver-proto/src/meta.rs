//! Durable index build metadata.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::request::BuildRequest;
use crate::types::{BuildId, IndexState, NodeId};

/// The persisted record of a build's assignment and progress.
///
/// Owned by the meta store; the coordinator's in-memory task table is a
/// cache derived from these records. A record with an assigned node owes
/// exactly one segment reference lock for its build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexMeta {
    /// Build this record describes.
    pub build_id: BuildId,
    /// Durable (worker-visible) state.
    pub state: IndexState,
    /// Worker currently assigned, or [`NodeId::UNASSIGNED`].
    pub node_id: NodeId,
    /// Assignment version, bumped by one before every dispatch.
    pub index_version: i64,
    /// Set by the catalog when the index is dropped.
    pub mark_deleted: bool,
    /// The original build request.
    pub request: BuildRequest,
    /// When the record was last mutated.
    pub updated_at: DateTime<Utc>,
}

impl IndexMeta {
    /// Create a fresh, unassigned record for a newly submitted build.
    #[must_use]
    pub fn new(request: BuildRequest) -> Self {
        Self {
            build_id: request.build_id,
            state: IndexState::Unissued,
            node_id: NodeId::UNASSIGNED,
            index_version: 0,
            mark_deleted: false,
            request,
            updated_at: Utc::now(),
        }
    }

    /// Returns true if a worker is currently recorded against this build.
    #[must_use]
    pub const fn is_assigned(&self) -> bool {
        self.node_id.is_assigned()
    }
}
