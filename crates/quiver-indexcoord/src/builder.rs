//! The index builder loop.
//!
//! One long-lived driver owns the in-memory task table and advances
//! every tracked build by one step per pass. Mutators (submit RPCs,
//! worker reports, the health monitor, the catalog deleter) run on
//! arbitrary tasks and only touch the table; all meta store, node, and
//! lock RPCs happen on the driver, outside the table lock.

use std::collections::{HashMap, HashSet};
use std::path::Path;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use quiver_proto::{BuildId, CreateIndexRequest, IndexMeta, NodeId};

use crate::config::BuilderConfig;
use crate::error::Result;
use crate::lock::SegmentLockService;
use crate::meta::MetaStore;
use crate::node::NodeManager;
use crate::task::{initial_task_state, TaskState};

/// Prefix under which index nodes persist produced index files.
const INDEX_FILE_PREFIX: &str = "index_files";

/// Path an index node writes the build's artifacts under.
fn index_meta_path(build_id: BuildId) -> String {
    Path::new(INDEX_FILE_PREFIX)
        .join(build_id.to_string())
        .to_string_lossy()
        .into_owned()
}

/// Drives index build tasks through their lifecycle.
///
/// Cheap to clone; clones share the task table and the driver.
#[derive(Clone)]
pub struct IndexBuilder {
    config: BuilderConfig,
    tasks: Arc<RwLock<HashMap<BuildId, TaskState>>>,
    meta_store: Arc<dyn MetaStore>,
    node_manager: Arc<dyn NodeManager>,
    lock_service: Arc<dyn SegmentLockService>,
    wake_tx: mpsc::Sender<()>,
    wake_rx: Arc<Mutex<Option<mpsc::Receiver<()>>>>,
    driver: Arc<Mutex<Option<JoinHandle<()>>>>,
    cancel: CancellationToken,
}

impl IndexBuilder {
    /// Create a builder and rebuild its task table from the durable
    /// records and the currently live node set.
    pub async fn new(
        config: BuilderConfig,
        meta_store: Arc<dyn MetaStore>,
        node_manager: Arc<dyn NodeManager>,
        lock_service: Arc<dyn SegmentLockService>,
        live_nodes: &[NodeId],
    ) -> Result<Self> {
        // Capacity one: wakes between passes coalesce into a single
        // extra pass, and a wake that cannot be delivered is dropped.
        let (wake_tx, wake_rx) = mpsc::channel(1);

        let builder = Self {
            tasks: Arc::new(RwLock::new(HashMap::with_capacity(config.task_capacity))),
            config,
            meta_store,
            node_manager,
            lock_service,
            wake_tx,
            wake_rx: Arc::new(Mutex::new(Some(wake_rx))),
            driver: Arc::new(Mutex::new(None)),
            cancel: CancellationToken::new(),
        };

        builder.refresh_tasks(live_nodes).await?;
        Ok(builder)
    }

    /// Begin the background driver.
    pub fn start(&self) {
        let Some(wake_rx) = self.wake_rx.lock().take() else {
            warn!("builder loop already started");
            return;
        };

        let this = self.clone();
        let handle = tokio::spawn(async move { this.drive(wake_rx).await });
        *self.driver.lock() = Some(handle);
    }

    /// Cancel the driver and wait for its current pass to finish.
    ///
    /// Safe to call more than once. Mutators called afterwards only
    /// touch a table that will never be drained.
    pub async fn stop(&self) {
        self.cancel.cancel();

        let handle = self.driver.lock().take();
        if let Some(handle) = handle {
            if let Err(e) = handle.await {
                error!(error = %e, "builder driver task failed");
            }
        }
    }

    /// Track a newly submitted build and wake the loop.
    pub fn enqueue(&self, build_id: BuildId) {
        self.tasks.write().insert(build_id, TaskState::Init);
        info!(build_id = %build_id, "index build enqueued");
        self.notify();
    }

    /// Transition a tracked build to `Deleted` so its lock is released
    /// and the task dropped. Untracked builds are ignored.
    pub fn mark_task_as_deleted(&self, build_id: BuildId) {
        {
            let mut tasks = self.tasks.write();
            if let Some(state) = tasks.get_mut(&build_id) {
                *state = TaskState::Deleted;
            }
        }
        self.notify();
    }

    /// Mark every tracked build assigned to `node_id` for retry.
    pub async fn node_down(&self, node_id: NodeId) {
        let metas = match self.meta_store.metas_by_node(node_id).await {
            Ok(metas) => metas,
            Err(e) => {
                error!(node_id = %node_id, error = %e, "failed to load builds assigned to node");
                return;
            }
        };

        {
            let mut tasks = self.tasks.write();
            for meta in &metas {
                if let Some(state) = tasks.get_mut(&meta.build_id) {
                    if *state != TaskState::Done {
                        *state = TaskState::Retry;
                    }
                }
            }
        }

        warn!(node_id = %node_id, builds = metas.len(), "index node down, marked builds for retry");
        self.notify();
    }

    /// Reflect an externally observed durable state change into the
    /// task table (worker completion reports arrive here).
    pub fn update_state_by_meta(&self, meta: &IndexMeta) {
        let tracked = {
            let mut tasks = self.tasks.write();
            match tasks.get_mut(&meta.build_id) {
                Some(state) => {
                    let previous = *state;
                    if meta.state.is_terminal() {
                        *state = TaskState::Done;
                    } else {
                        // Unissued with a node recorded: the worker
                        // rejected or dropped the assignment.
                        *state = TaskState::Retry;
                    }
                    Some(previous)
                }
                None => None,
            }
        };

        match tracked {
            Some(previous) if meta.state.is_terminal() => {
                info!(
                    build_id = %meta.build_id,
                    previous = previous.as_str(),
                    reported = meta.state.as_str(),
                    "index build finished"
                );
            }
            Some(previous) => {
                info!(
                    build_id = %meta.build_id,
                    previous = previous.as_str(),
                    reported = meta.state.as_str(),
                    node_id = %meta.node_id,
                    "index build needs retry"
                );
            }
            None => {
                warn!(build_id = %meta.build_id, "state report for untracked build, already finalised");
            }
        }
        self.notify();
    }

    /// Returns true if the build is currently tracked.
    #[must_use]
    pub fn has_task(&self, build_id: BuildId) -> bool {
        self.tasks.read().contains_key(&build_id)
    }

    /// Current scheduler state of a tracked build.
    #[must_use]
    pub fn task_state(&self, build_id: BuildId) -> Option<TaskState> {
        self.tasks.read().get(&build_id).copied()
    }

    /// Number of tracked builds.
    #[must_use]
    pub fn task_count(&self) -> usize {
        self.tasks.read().len()
    }

    /// Rebuild the task table from durable records and the live set.
    ///
    /// Pure image of (records, live nodes) under the refresh rule, so
    /// running it twice over the same inputs yields the same table.
    async fn refresh_tasks(&self, live_nodes: &[NodeId]) -> Result<()> {
        let metas = self.meta_store.all_metas().await?;
        let live: HashSet<NodeId> = live_nodes.iter().copied().collect();

        let mut tasks = HashMap::with_capacity(self.config.task_capacity);
        for meta in metas {
            if let Some(state) = initial_task_state(&meta, &live) {
                tasks.insert(meta.build_id, state);
            }
        }

        info!(task_count = tasks.len(), "task table rebuilt from durable metadata");
        *self.tasks.write() = tasks;
        Ok(())
    }

    // Lossy wake: a request that cannot be delivered is dropped; the
    // periodic tick guarantees eventual progress.
    fn notify(&self) {
        let _ = self.wake_tx.try_send(());
    }

    async fn drive(&self, mut wake_rx: mpsc::Receiver<()>) {
        let mut ticker = tokio::time::interval(self.config.schedule_interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    warn!("builder loop stopping");
                    return;
                }
                wake = wake_rx.recv() => match wake {
                    Some(()) => self.run_pass().await,
                    None => return,
                },
                _ = ticker.tick() => self.run_pass().await,
            }
        }
    }

    /// One pass: snapshot the tracked builds, then advance each in
    /// ascending build order. Snapshotting first keeps the table lock
    /// out of every RPC and tolerates concurrent mutation.
    async fn run_pass(&self) {
        let mut build_ids: Vec<BuildId> = {
            let tasks = self.tasks.read();
            tasks.keys().copied().collect()
        };
        build_ids.sort_unstable();

        debug!(task_count = build_ids.len(), "builder pass");
        for build_id in build_ids {
            self.process(build_id).await;
        }
    }

    /// Advance one build by a single step.
    async fn process(&self, build_id: BuildId) {
        // Re-read: the task may have moved or been dropped since the
        // snapshot was taken.
        let Some(state) = self.task_state(build_id) else {
            return;
        };

        debug!(build_id = %build_id, state = state.as_str(), "processing index build task");

        let meta = match self.meta_store.meta(build_id).await {
            Ok(meta) => meta,
            Err(e) => {
                error!(build_id = %build_id, error = %e, "failed to load durable record");
                return;
            }
        };

        match state {
            TaskState::Init => self.process_init(build_id, meta).await,
            // Waiting for the worker's report or a node-down signal.
            TaskState::InProgress => {}
            TaskState::Done => self.process_done(build_id, meta).await,
            TaskState::Retry => self.process_retry(build_id, meta).await,
            TaskState::Deleted => self.process_deleted(build_id, meta).await,
        }
    }

    async fn process_init(&self, build_id: BuildId, meta: Option<IndexMeta>) {
        let Some(meta) = meta else {
            warn!(build_id = %build_id, "no durable record for unassigned build, dropping task");
            self.remove_task(build_id);
            return;
        };

        let Some((node_id, client)) = self.node_manager.peek_client(&meta).await else {
            error!(build_id = %build_id, "no index node available");
            return;
        };

        let version = match self.meta_store.update_version(build_id, node_id).await {
            Ok(version) => version,
            Err(e) => {
                error!(
                    build_id = %build_id,
                    node_id = %node_id,
                    error = %e,
                    "failed to record assignment version"
                );
                // The assignment never landed anywhere durable, so the
                // slot occupied by the peek has to come back here.
                self.node_manager.release_node(node_id);
                return;
            }
        };

        if let Err(e) = self
            .lock_service
            .acquire(build_id, node_id, &meta.request.segment_ids)
            .await
        {
            // The version bump already landed; the retry path releases
            // and resets so the next attempt starts clean.
            error!(
                build_id = %build_id,
                node_id = %node_id,
                error = %e,
                "failed to acquire segment reference lock"
            );
            self.set_task_state(build_id, TaskState::Retry);
            return;
        }

        let request = CreateIndexRequest {
            build_id,
            index_id: meta.request.index_id,
            index_name: meta.request.index_name.clone(),
            version,
            meta_path: index_meta_path(build_id),
            data_paths: meta.request.data_paths.clone(),
            type_params: meta.request.type_params.clone(),
            index_params: meta.request.index_params.clone(),
        };

        if let Err(e) = client.create_index(request).await {
            error!(
                build_id = %build_id,
                node_id = %node_id,
                error = %e,
                "failed to assign build to index node"
            );
            self.set_task_state(build_id, TaskState::Retry);
            return;
        }

        if let Err(e) = self.meta_store.build_index(build_id).await {
            error!(
                build_id = %build_id,
                node_id = %node_id,
                error = %e,
                "failed to move durable state to in_progress"
            );
            self.set_task_state(build_id, TaskState::Retry);
            return;
        }

        self.set_task_state(build_id, TaskState::InProgress);
    }

    async fn process_done(&self, build_id: BuildId, meta: Option<IndexMeta>) {
        let Some(meta) = meta else {
            warn!(build_id = %build_id, "no durable record for finished build, dropping task");
            self.remove_task(build_id);
            return;
        };

        if self
            .release_lock_and_reset_node(build_id, meta.node_id)
            .await
            .is_err()
        {
            // Keep the task; the next pass retries the release.
            return;
        }
        self.remove_task(build_id);
    }

    async fn process_retry(&self, build_id: BuildId, meta: Option<IndexMeta>) {
        let Some(meta) = meta else {
            warn!(build_id = %build_id, "no durable record for retried build, dropping task");
            self.remove_task(build_id);
            return;
        };

        if self
            .release_lock_and_reset_task(build_id, meta.node_id)
            .await
            .is_err()
        {
            return;
        }
        self.set_task_state(build_id, TaskState::Init);
        self.notify();
    }

    async fn process_deleted(&self, build_id: BuildId, meta: Option<IndexMeta>) {
        if let Some(meta) = meta {
            if meta.is_assigned()
                && self
                    .release_lock_and_reset_node(build_id, meta.node_id)
                    .await
                    .is_err()
            {
                return;
            }
        }
        // Deleting the durable record is the catalog's job; the loop
        // only guarantees the lock is gone before it stops tracking.
        self.remove_task(build_id);
    }

    async fn release_lock_and_reset_node(&self, build_id: BuildId, node_id: NodeId) -> Result<()> {
        info!(build_id = %build_id, node_id = %node_id, "releasing segment lock and clearing assignment");

        if let Err(e) = self.lock_service.release(build_id, node_id).await {
            error!(
                build_id = %build_id,
                node_id = %node_id,
                error = %e,
                "failed to release segment reference lock"
            );
            return Err(e);
        }

        if let Err(e) = self.meta_store.reset_node_id(build_id).await {
            error!(build_id = %build_id, error = %e, "failed to clear node assignment");
            return Err(e);
        }

        if node_id.is_assigned() {
            self.node_manager.release_node(node_id);
        }

        Ok(())
    }

    async fn release_lock_and_reset_task(&self, build_id: BuildId, node_id: NodeId) -> Result<()> {
        info!(build_id = %build_id, node_id = %node_id, "releasing segment lock and resetting build");

        if node_id.is_assigned() {
            if let Err(e) = self.lock_service.release(build_id, node_id).await {
                error!(
                    build_id = %build_id,
                    node_id = %node_id,
                    error = %e,
                    "failed to release segment reference lock"
                );
                return Err(e);
            }
        }

        if let Err(e) = self.meta_store.reset_meta(build_id).await {
            error!(build_id = %build_id, error = %e, "failed to reset durable record");
            return Err(e);
        }

        if node_id.is_assigned() {
            self.node_manager.release_node(node_id);
        }

        Ok(())
    }

    fn set_task_state(&self, build_id: BuildId, state: TaskState) {
        self.tasks.write().insert(build_id, state);
    }

    fn remove_task(&self, build_id: BuildId) {
        self.tasks.write().remove(&build_id);
    }
}

impl std::fmt::Debug for IndexBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexBuilder")
            .field("task_count", &self.task_count())
            .finish_non_exhaustive()
    }
}
