//! Segment reference lock client.
//!
//! A segment reference lock pins the input data of a build against
//! compaction and deletion while the build runs. The lock is owned by a
//! remote coordinator; this module defines the client contract and an
//! in-memory implementation used by tests and single-process runs.

use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use dashmap::DashMap;

use quiver_proto::{BuildId, NodeId, SegmentId};

use crate::error::{IndexCoordError, Result};

/// Trait for segment reference lock backends.
///
/// Both operations are idempotent with respect to the `(build, node)`
/// pair: re-acquiring a held pair succeeds, and releasing a pair that
/// was never acquired succeeds.
#[async_trait]
pub trait SegmentLockService: Send + Sync {
    /// Pin `segment_ids` on behalf of `build_id` executing on `node_id`.
    async fn acquire(
        &self,
        build_id: BuildId,
        node_id: NodeId,
        segment_ids: &[SegmentId],
    ) -> Result<()>;

    /// Release the pin held for `(build_id, node_id)`.
    async fn release(&self, build_id: BuildId, node_id: NodeId) -> Result<()>;
}

/// In-memory segment lock service.
///
/// Tracks held pins so tests can assert lock accountability, and can be
/// told to fail the next N calls to exercise the error paths.
#[derive(Debug, Default)]
pub struct MemoryLockService {
    held: DashMap<(BuildId, NodeId), Vec<SegmentId>>,
    failing_acquires: AtomicUsize,
    failing_releases: AtomicUsize,
}

impl MemoryLockService {
    /// Create a new lock service with no pins held.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `n` acquire calls fail.
    pub fn fail_next_acquires(&self, n: usize) {
        self.failing_acquires.store(n, Ordering::SeqCst);
    }

    /// Make the next `n` release calls fail.
    pub fn fail_next_releases(&self, n: usize) {
        self.failing_releases.store(n, Ordering::SeqCst);
    }

    /// Number of pins currently held for a build.
    #[must_use]
    pub fn held_count(&self, build_id: BuildId) -> usize {
        self.held.iter().filter(|r| r.key().0 == build_id).count()
    }

    /// Returns true if the `(build, node)` pair holds a pin.
    #[must_use]
    pub fn is_held(&self, build_id: BuildId, node_id: NodeId) -> bool {
        self.held.contains_key(&(build_id, node_id))
    }

    /// Total number of pins held across all builds.
    #[must_use]
    pub fn total_held(&self) -> usize {
        self.held.len()
    }

    fn take_failure(counter: &AtomicUsize) -> bool {
        counter
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
    }
}

#[async_trait]
impl SegmentLockService for MemoryLockService {
    async fn acquire(
        &self,
        build_id: BuildId,
        node_id: NodeId,
        segment_ids: &[SegmentId],
    ) -> Result<()> {
        if Self::take_failure(&self.failing_acquires) {
            return Err(IndexCoordError::segment_lock("injected acquire failure"));
        }

        self.held.insert((build_id, node_id), segment_ids.to_vec());
        Ok(())
    }

    async fn release(&self, build_id: BuildId, node_id: NodeId) -> Result<()> {
        if Self::take_failure(&self.failing_releases) {
            return Err(IndexCoordError::segment_lock("injected release failure"));
        }

        self.held.remove(&(build_id, node_id));
        Ok(())
    }
}
