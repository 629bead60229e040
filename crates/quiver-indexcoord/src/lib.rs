//! Quiver index coordination service - build scheduling core.
//!
//! The coordinator drives every long-running index construction task
//! through its lifecycle:
//!
//! - **Assignment**: picking an index node and dispatching the build
//! - **Lock accounting**: pinning input segments for exactly as long as
//!   a worker is recorded against the build
//! - **Failure handling**: reassigning builds whose worker died or
//!   rejected them, with strictly increasing assignment versions
//! - **Recovery**: rebuilding the task table from durable metadata on
//!   startup
//!
//! # Architecture
//!
//! The [`IndexBuilder`] owns an in-memory task table and advances it on
//! a single driver task, woken by a periodic tick and a coalesced wake
//! channel. The durable [`MetaStore`] is the source of truth; the table
//! only decides what to do next. Worker selection ([`NodeManager`]) and
//! segment pinning ([`SegmentLockService`]) are trait objects so the
//! RPC layer stays out of this crate.
//!
//! # Example
//!
//! ```ignore
//! use quiver_indexcoord::{BuilderConfig, IndexBuilder};
//!
//! let builder = IndexBuilder::new(
//!     BuilderConfig::default(),
//!     meta_store,
//!     node_manager,
//!     lock_service,
//!     &live_nodes,
//! )
//! .await?;
//! builder.start();
//! builder.enqueue(build_id);
//! ```

pub mod builder;
pub mod config;
pub mod error;
pub mod lock;
pub mod meta;
pub mod node;
pub mod task;

// Re-export main types
pub use builder::IndexBuilder;
pub use config::{BuilderConfig, IndexCoordConfig};
pub use error::{IndexCoordError, Result};
pub use lock::{MemoryLockService, SegmentLockService};
pub use meta::{MemoryMetaStore, MetaStore};
pub use node::{IndexNodeClient, NodeManager, NodeRegistry};
pub use task::{initial_task_state, TaskState};
