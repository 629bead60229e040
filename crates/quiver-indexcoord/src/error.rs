//! Error types for the index coordination service.

use quiver_proto::BuildId;

/// Result type alias using [`IndexCoordError`].
pub type Result<T> = std::result::Result<T, IndexCoordError>;

/// Errors that can occur in the index coordination service.
#[derive(Debug, thiserror::Error)]
pub enum IndexCoordError {
    /// Meta store read or write failed.
    #[error("meta store error: {0}")]
    MetaStore(String),

    /// No durable record exists for a build.
    #[error("build not found: {0}")]
    BuildNotFound(BuildId),

    /// No index node is currently able to accept a task.
    #[error("no index node available")]
    NoNodeAvailable,

    /// Segment reference lock service error.
    #[error("segment lock error: {0}")]
    SegmentLock(String),

    /// Index node RPC failed.
    #[error("node rpc error: {0}")]
    NodeRpc(String),

    /// Configuration error.
    #[error("configuration error: {0}")]
    Config(#[from] figment::Error),

    /// Internal error.
    #[error("internal error: {0}")]
    Internal(String),
}

impl IndexCoordError {
    /// Create a meta store error.
    #[must_use]
    pub fn meta_store(msg: impl Into<String>) -> Self {
        Self::MetaStore(msg.into())
    }

    /// Create a segment lock error.
    #[must_use]
    pub fn segment_lock(msg: impl Into<String>) -> Self {
        Self::SegmentLock(msg.into())
    }

    /// Create a node RPC error.
    #[must_use]
    pub fn node_rpc(msg: impl Into<String>) -> Self {
        Self::NodeRpc(msg.into())
    }

    /// Create an internal error.
    #[must_use]
    pub fn internal(msg: impl Into<String>) -> Self {
        Self::Internal(msg.into())
    }
}
