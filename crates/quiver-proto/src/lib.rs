//! Wire and durable metadata types for quiver's index coordination
//! service.
//!
//! This crate holds the vocabulary shared between the coordinator, the
//! meta store, and the index nodes:
//!
//! - Identifier newtypes ([`BuildId`], [`NodeId`], [`SegmentId`])
//! - The durable build state machine ([`IndexState`])
//! - Request payloads ([`BuildRequest`], [`CreateIndexRequest`])
//! - The persisted build record ([`IndexMeta`])
//!
//! Transport is out of scope here; every type is plain serde data so the
//! RPC layer can pick its own encoding.

mod meta;
mod request;
mod types;

pub use meta::IndexMeta;
pub use request::{BuildRequest, CreateIndexRequest};
pub use types::{BuildId, IndexState, NodeId, SegmentId};
