//! Request payloads exchanged with the catalog and with index nodes.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::types::{BuildId, SegmentId};

/// Client-submitted description of an index build.
///
/// Stored verbatim inside the durable record so that every reassignment
/// can reconstruct the worker request without consulting the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BuildRequest {
    /// Build this request belongs to.
    pub build_id: BuildId,
    /// Identifier of the logical index being built.
    pub index_id: i64,
    /// Human-readable index name.
    pub index_name: String,
    /// Sealed segments whose data feeds the build.
    pub segment_ids: Vec<SegmentId>,
    /// Object-store paths of the input data.
    pub data_paths: Vec<String>,
    /// Field type parameters (dimension, element type, ...).
    pub type_params: BTreeMap<String, String>,
    /// Index construction parameters (index kind, metric, ...).
    pub index_params: BTreeMap<String, String>,
}

/// Request dispatched from the coordinator to an index node.
///
/// Signals only acceptance; completion is reported asynchronously
/// through the durable metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateIndexRequest {
    /// Build this request belongs to.
    pub build_id: BuildId,
    /// Identifier of the logical index being built.
    pub index_id: i64,
    /// Human-readable index name.
    pub index_name: String,
    /// Assignment version; workers stamp artifacts with it so stale
    /// results from a superseded assignment are ignorable.
    pub version: i64,
    /// Path under which the node persists the produced index files.
    pub meta_path: String,
    /// Object-store paths of the input data.
    pub data_paths: Vec<String>,
    /// Field type parameters.
    pub type_params: BTreeMap<String, String>,
    /// Index construction parameters.
    pub index_params: BTreeMap<String, String>,
}
