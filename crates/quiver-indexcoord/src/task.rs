//! In-memory task states and the startup refresh rule.

use std::collections::HashSet;

use quiver_proto::{IndexMeta, IndexState, NodeId};

/// Scheduler state of a tracked build.
///
/// A closed set: the builder loop's transition table dispatches on it
/// exhaustively. Not to be confused with the durable
/// [`IndexState`](quiver_proto::IndexState), which is what workers see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskState {
    /// Needs a worker assignment and a segment lock.
    Init,
    /// Worker has accepted the task; awaiting completion.
    InProgress,
    /// Previous attempt failed or its worker died; release the old lock
    /// and reassign.
    Retry,
    /// Worker reported a terminal result; needs lock release and
    /// metadata cleanup.
    Done,
    /// Catalog marked the build removed; release the lock and drop.
    Deleted,
}

impl TaskState {
    /// Returns the state name for log fields.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Init => "init",
            Self::InProgress => "in_progress",
            Self::Retry => "retry",
            Self::Done => "done",
            Self::Deleted => "deleted",
        }
    }
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Derive the initial scheduler state for a durable record.
///
/// This is the startup refresh rule: the in-memory table is exactly the
/// image of the durable records plus the live-worker set under this
/// function, which makes rebuilding it idempotent. `None` means the
/// build needs no further scheduling and is not tracked.
#[must_use]
pub fn initial_task_state(meta: &IndexMeta, live_nodes: &HashSet<NodeId>) -> Option<TaskState> {
    if meta.mark_deleted {
        // A deleted record is only interesting while a lock is still owed.
        return meta.is_assigned().then_some(TaskState::Deleted);
    }

    match meta.state {
        IndexState::Unissued if !meta.is_assigned() => Some(TaskState::Init),
        // Unissued with an assigned node: a previous attempt stalled
        // between version bump and acceptance; release and reassign.
        IndexState::Unissued => Some(TaskState::Retry),
        IndexState::InProgress => {
            if live_nodes.contains(&meta.node_id) {
                Some(TaskState::InProgress)
            } else {
                Some(TaskState::Retry)
            }
        }
        IndexState::Finished | IndexState::Failed => {
            // Terminal with a node still recorded means the lock has not
            // been released yet.
            meta.is_assigned().then_some(TaskState::Done)
        }
    }
}
