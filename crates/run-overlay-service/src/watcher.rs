//! Run watcher: the single writer of a reconciliation state
//!
//! This module owns the lifecycle of one watched run:
//! - Serializing stream batches and tree snapshots through one command queue
//! - Polling the tree source while a run is watched
//! - Publishing a freshly composed render graph after every change
//!
//! Every tree fetch is started by the watcher task, numbered, and runs in a
//! spawned task. Its result comes back through the same queue tagged with the
//! root run and the fetch number, so a result for a run that is no longer
//! watched is dropped, and so is a snapshot older than one already applied.

use std::future;
use std::sync::Arc;

use run_overlay::types::RunId;
use run_overlay::{
    compose, compose_with, IngestStats, RawExecutionEvent, ReconcileReport, ReconciliationState,
    RenderGraph, RenderMode, RenderOptions, StaticGraph, TreeSnapshot,
};
use serde::Serialize;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Interval, MissedTickBehavior};

use crate::config::WatchConfig;
use crate::error::{Result, WatchError};
use crate::tree_source::TreeSource;

/// Service-level counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct WatchStats {
    /// Event batches applied to the watched run
    pub batches_applied: u64,
    /// Event batches dropped because their run is not watched
    pub dropped_batches: u64,
    /// Tree fetches started (polls, terminal signals and explicit requests)
    pub tree_fetches: u64,
    /// Tree fetches that failed
    pub tree_fetch_failures: u64,
    /// Snapshots dropped because the watched run changed
    pub superseded_trees: u64,
    /// Snapshots dropped because a later fetch was already applied
    pub outdated_trees: u64,
}

/// What subscribers see after every change
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderUpdate {
    /// Watched root run, if any
    pub root_run_id: Option<RunId>,
    pub mode: RenderMode,
    pub graph: RenderGraph,
    pub ingest: IngestStats,
    pub watch: WatchStats,
}

type ReconcileReply = oneshot::Sender<Result<ReconcileReport>>;

enum WatchCommand {
    Watch(RunId),
    Close,
    Events {
        run_id: RunId,
        events: Vec<RawExecutionEvent>,
    },
    Reconcile(ReconcileReply),
    TreeFetched {
        root_run_id: RunId,
        seq: u64,
        result: Result<TreeSnapshot>,
        /// Set for explicit requests, `None` for polls
        reply: Option<ReconcileReply>,
    },
    SetMode(RenderMode),
    Flush(oneshot::Sender<()>),
    Shutdown,
}

/// Handle to a running watcher task
///
/// Cheap to clone; every clone talks to the same task. The task stops when
/// `shutdown` is called or every handle is dropped.
#[derive(Clone)]
pub struct RunWatcher {
    commands: mpsc::Sender<WatchCommand>,
    updates: watch::Receiver<Arc<RenderUpdate>>,
}

impl RunWatcher {
    /// Spawn the watcher task on the current tokio runtime
    pub fn spawn(
        graph: StaticGraph,
        config: WatchConfig,
        tree_source: Option<Arc<dyn TreeSource>>,
    ) -> Self {
        let (commands, receiver) = mpsc::channel(config.queue_capacity());

        let mode = config.initial_mode;
        let initial = RenderUpdate {
            root_run_id: None,
            mode,
            graph: idle_render(&graph),
            ingest: IngestStats::default(),
            watch: WatchStats::default(),
        };
        let (updates_tx, updates) = watch::channel(Arc::new(initial));

        let actor = WatchActor {
            graph,
            mode,
            render_options: config.render,
            refresh_on_terminal_signal: config.refresh_on_terminal_signal,
            state: None,
            tree_source,
            poll_in_flight: false,
            fetch_seq: 0,
            applied_seq: 0,
            loopback: commands.downgrade(),
            updates: updates_tx,
            stats: WatchStats::default(),
        };
        tokio::spawn(actor.run(receiver, config.tree_poll_interval().map(poll_interval)));

        Self { commands, updates }
    }

    async fn send(&self, command: WatchCommand) -> Result<()> {
        self.commands.send(command).await.map_err(|_| WatchError::Closed)
    }

    /// Start watching `root_run_id`, discarding any previous run's state
    ///
    /// Watching the run that is already watched keeps its state.
    pub async fn watch_run(&self, root_run_id: impl Into<RunId>) -> Result<()> {
        self.send(WatchCommand::Watch(root_run_id.into())).await
    }

    /// Stop watching and discard the overlay
    pub async fn close_run(&self) -> Result<()> {
        self.send(WatchCommand::Close).await
    }

    /// Queue a batch of stream events received for `run_id`
    pub async fn push_events(
        &self,
        run_id: impl Into<RunId>,
        events: Vec<RawExecutionEvent>,
    ) -> Result<()> {
        self.send(WatchCommand::Events {
            run_id: run_id.into(),
            events,
        })
        .await
    }

    pub async fn set_mode(&self, mode: RenderMode) -> Result<()> {
        self.send(WatchCommand::SetMode(mode)).await
    }

    /// Fetch the tree for the watched run and reconcile it
    ///
    /// Fetch failures are returned to the caller and leave the overlay as it
    /// was. Fails with `Outdated` if a fetch started later landed first.
    pub async fn reconcile_now(&self) -> Result<ReconcileReport> {
        let (reply, response) = oneshot::channel();
        self.send(WatchCommand::Reconcile(reply)).await?;
        response.await.map_err(|_| WatchError::Closed)?
    }

    /// Wait until every command queued before this call has been handled
    pub async fn flush(&self) -> Result<()> {
        let (done, wait) = oneshot::channel();
        self.send(WatchCommand::Flush(done)).await?;
        wait.await.map_err(|_| WatchError::Closed)
    }

    /// Stop the watcher task
    pub async fn shutdown(&self) -> Result<()> {
        self.send(WatchCommand::Shutdown).await
    }

    /// Subscribe to render updates
    pub fn subscribe(&self) -> watch::Receiver<Arc<RenderUpdate>> {
        self.updates.clone()
    }

    /// Most recently published update
    pub fn latest(&self) -> Arc<RenderUpdate> {
        Arc::clone(&self.updates.borrow())
    }

    pub fn watched_run(&self) -> Option<RunId> {
        self.updates.borrow().root_run_id.clone()
    }
}

fn poll_interval(period: std::time::Duration) -> Interval {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    interval
}

async fn next_tick(interval: &mut Option<Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => future::pending().await,
    }
}

/// Static graph only, for when no run is watched
fn idle_render(graph: &StaticGraph) -> RenderGraph {
    compose(
        RenderMode::Build,
        &graph.nodes,
        &graph.edges,
        &ReconciliationState::new(RunId::new()),
    )
}

struct WatchActor {
    graph: StaticGraph,
    mode: RenderMode,
    render_options: RenderOptions,
    refresh_on_terminal_signal: bool,
    state: Option<ReconciliationState>,
    tree_source: Option<Arc<dyn TreeSource>>,
    /// A poll or signal-triggered fetch for the watched run is outstanding
    poll_in_flight: bool,
    /// Number of the most recently started fetch
    fetch_seq: u64,
    /// Number of the fetch whose snapshot was applied last
    applied_seq: u64,
    // Weak so that dropping every handle still closes the queue
    loopback: mpsc::WeakSender<WatchCommand>,
    updates: watch::Sender<Arc<RenderUpdate>>,
    stats: WatchStats,
}

impl WatchActor {
    async fn run(
        mut self,
        mut commands: mpsc::Receiver<WatchCommand>,
        mut poll: Option<Interval>,
    ) {
        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(WatchCommand::Shutdown) | None => break,
                    Some(command) => self.handle(command),
                },
                _ = next_tick(&mut poll) => self.schedule_poll(),
            }
        }
        log::debug!("Run watcher stopped");
    }

    fn handle(&mut self, command: WatchCommand) {
        match command {
            WatchCommand::Watch(root_run_id) => self.watch(root_run_id),
            WatchCommand::Close => {
                if let Some(state) = self.state.take() {
                    log::info!("Stopped watching run '{}'", state.root_run_id());
                }
                self.poll_in_flight = false;
                self.publish();
            }
            WatchCommand::Events { run_id, events } => self.apply_events(run_id, events),
            WatchCommand::Reconcile(reply) => self.request_tree(reply),
            WatchCommand::TreeFetched {
                root_run_id,
                seq,
                result,
                reply,
            } => self.tree_fetched(root_run_id, seq, result, reply),
            WatchCommand::SetMode(mode) => {
                if mode != self.mode {
                    self.mode = mode;
                    self.publish();
                }
            }
            WatchCommand::Flush(done) => {
                let _ = done.send(());
            }
            WatchCommand::Shutdown => {}
        }
    }

    fn is_watching(&self, run_id: &str) -> bool {
        self.state.as_ref().is_some_and(|state| state.root_run_id() == run_id)
    }

    fn watch(&mut self, root_run_id: RunId) {
        if self.is_watching(&root_run_id) {
            return;
        }
        log::info!("Watching run '{}'", root_run_id);
        self.state = Some(ReconciliationState::new(root_run_id));
        self.poll_in_flight = false;
        self.publish();
        self.schedule_poll();
    }

    fn apply_events(&mut self, run_id: RunId, events: Vec<RawExecutionEvent>) {
        let Some(state) = self.state.as_mut().filter(|state| state.root_run_id() == run_id) else {
            log::debug!("Dropping {} events for unwatched run '{}'", events.len(), run_id);
            self.stats.dropped_batches += 1;
            return;
        };

        let outcome = state.apply_events(&events, &self.graph);
        if outcome.rejected > 0 {
            log::debug!(
                "Run '{}': {} events applied, {} rejected",
                run_id,
                outcome.applied,
                outcome.rejected
            );
        }
        self.stats.batches_applied += 1;
        self.publish();

        if outcome.terminal_signal && self.refresh_on_terminal_signal {
            self.schedule_poll();
        }
    }

    fn request_tree(&mut self, reply: ReconcileReply) {
        if self.tree_source.is_none() {
            let _ = reply.send(Err(WatchError::NoTreeSource));
        } else if self.state.is_none() {
            let _ = reply.send(Err(WatchError::NotWatching));
        } else {
            self.start_fetch(Some(reply));
        }
    }

    /// Start a background fetch unless one is already outstanding
    fn schedule_poll(&mut self) {
        if !self.poll_in_flight {
            self.poll_in_flight = self.start_fetch(None);
        }
    }

    fn start_fetch(&mut self, reply: Option<ReconcileReply>) -> bool {
        let (Some(state), Some(source)) = (&self.state, &self.tree_source) else {
            return false;
        };
        let Some(loopback) = self.loopback.upgrade() else {
            return false;
        };

        let root_run_id = state.root_run_id().to_string();
        let source = Arc::clone(source);
        self.fetch_seq += 1;
        let seq = self.fetch_seq;
        self.stats.tree_fetches += 1;

        tokio::spawn(async move {
            let result = source.fetch_tree(&root_run_id).await;
            // Fails only if the watcher has stopped
            let _ = loopback
                .send(WatchCommand::TreeFetched {
                    root_run_id,
                    seq,
                    result,
                    reply,
                })
                .await;
        });
        true
    }

    fn tree_fetched(
        &mut self,
        root_run_id: RunId,
        seq: u64,
        result: Result<TreeSnapshot>,
        reply: Option<ReconcileReply>,
    ) {
        if reply.is_none() && self.is_watching(&root_run_id) {
            self.poll_in_flight = false;
        }

        let outcome = self.apply_fetched(root_run_id, seq, result);
        match reply {
            Some(reply) => {
                // The caller may have given up waiting
                let _ = reply.send(outcome);
            }
            None => {
                if let Err(e) = outcome {
                    log::warn!("Discarding polled tree: {}", e);
                }
            }
        }
    }

    fn apply_fetched(
        &mut self,
        root_run_id: RunId,
        seq: u64,
        result: Result<TreeSnapshot>,
    ) -> Result<ReconcileReport> {
        if !self.is_watching(&root_run_id) {
            self.stats.superseded_trees += 1;
            self.publish();
            return Err(WatchError::Superseded(root_run_id));
        }

        let snapshot = match result {
            Ok(snapshot) => snapshot,
            Err(e) => {
                self.stats.tree_fetch_failures += 1;
                self.publish();
                return Err(e);
            }
        };

        if seq <= self.applied_seq {
            log::debug!(
                "Tree fetch #{} for '{}' landed after fetch #{}, dropping",
                seq,
                root_run_id,
                self.applied_seq
            );
            self.stats.outdated_trees += 1;
            self.publish();
            return Err(WatchError::Outdated(root_run_id));
        }

        let Some(state) = self.state.as_mut() else {
            return Err(WatchError::NotWatching);
        };
        let report = state.reconcile_tree(&snapshot)?;
        self.applied_seq = seq;
        self.publish();
        Ok(report)
    }

    fn publish(&self) {
        let (root_run_id, graph, ingest) = match &self.state {
            Some(state) => (
                Some(state.root_run_id().to_string()),
                compose_with(
                    self.mode,
                    &self.graph.nodes,
                    &self.graph.edges,
                    state,
                    &self.render_options,
                ),
                state.stats(),
            ),
            None => (None, idle_render(&self.graph), IngestStats::default()),
        };

        self.updates.send_replace(Arc::new(RenderUpdate {
            root_run_id,
            mode: self.mode,
            graph,
            ingest,
            watch: self.stats,
        }));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use run_overlay::events::kinds;
    use run_overlay::{ExecutionStatus, RunTreeNode, StaticEdge, StaticNode};
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    const CHILD: &str = "runtime-run:child-a";

    /// Serves queued trees once each, in call order, then whatever tree it
    /// currently holds, or fails when it holds none
    #[derive(Default)]
    struct ScriptedSource {
        queued: Mutex<VecDeque<(Duration, TreeSnapshot)>>,
        tree: Mutex<Option<TreeSnapshot>>,
        calls: AtomicUsize,
    }

    impl ScriptedSource {
        fn serving(tree: TreeSnapshot) -> Arc<Self> {
            let source = Self::default();
            source.set(tree);
            Arc::new(source)
        }

        fn set(&self, tree: TreeSnapshot) {
            *self.tree.lock().unwrap() = Some(tree);
        }

        fn queue(&self, delay: Duration, tree: TreeSnapshot) {
            self.queued.lock().unwrap().push_back((delay, tree));
        }

        async fn wait_for_calls(&self, calls: usize) {
            tokio::time::timeout(Duration::from_secs(5), async {
                while self.calls.load(Ordering::SeqCst) < calls {
                    tokio::task::yield_now().await;
                }
            })
            .await
            .unwrap();
        }
    }

    #[async_trait]
    impl TreeSource for ScriptedSource {
        async fn fetch_tree(&self, _root_run_id: &str) -> Result<TreeSnapshot> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            let queued = self.queued.lock().unwrap().pop_front();
            if let Some((delay, tree)) = queued {
                tokio::time::sleep(delay).await;
                return Ok(tree);
            }
            self.tree
                .lock()
                .unwrap()
                .clone()
                .ok_or_else(|| WatchError::tree_fetch("tree service unavailable", true))
        }
    }

    fn graph() -> StaticGraph {
        StaticGraph::new(
            vec![
                StaticNode::new("n1", "agent", "processing", "Plan"),
                StaticNode::new("spawn_core_group", "spawn_group", "control", "Fan out"),
            ],
            vec![StaticEdge::new("e1", "n1", "spawn_core_group")],
        )
    }

    fn config() -> WatchConfig {
        WatchConfig {
            tree_poll_interval_ms: 0,
            ..WatchConfig::default()
        }
    }

    fn tree(root: &str, child_status: &str) -> TreeSnapshot {
        let mut tree = RunTreeNode::new(root, "running");
        let mut child = RunTreeNode::new("child-a", child_status);
        child.depth = 1;
        child.parent_run_id = Some(root.to_string());
        child.parent_node_id = Some("spawn_core_group".to_string());
        tree.children.push(child);
        TreeSnapshot {
            root_run_id: root.to_string(),
            node_count: 2,
            tree,
        }
    }

    fn spawn_events(root: &str) -> Vec<RawExecutionEvent> {
        vec![
            RawExecutionEvent::spawn_decision(root, "spawn_core_group", &["child-a"]),
            RawExecutionEvent::child_lifecycle(root, "spawn_core_group", "child-a", "running"),
        ]
    }

    fn child_status(update: &RenderUpdate) -> Option<ExecutionStatus> {
        update.graph.find_node(CHILD).and_then(|n| n.execution_status)
    }

    #[tokio::test]
    async fn test_events_publish_render() {
        let watcher = RunWatcher::spawn(graph(), config(), None);
        assert_eq!(watcher.latest().graph.nodes.len(), 2);
        assert_eq!(watcher.watched_run(), None);

        watcher.watch_run("run-root").await.unwrap();
        watcher.push_events("run-root", spawn_events("run-root")).await.unwrap();
        watcher.flush().await.unwrap();

        let update = watcher.latest();
        assert_eq!(update.root_run_id.as_deref(), Some("run-root"));
        assert_eq!(update.mode, RenderMode::Execute);
        assert_eq!(child_status(&update), Some(ExecutionStatus::Running));
        assert_eq!(update.ingest.applied, 2);
        assert_eq!(update.watch.batches_applied, 1);
    }

    #[tokio::test]
    async fn test_batch_for_unwatched_run_dropped() {
        let watcher = RunWatcher::spawn(graph(), config(), None);
        watcher.watch_run("run-root").await.unwrap();
        watcher.push_events("run-other", spawn_events("run-other")).await.unwrap();
        watcher.flush().await.unwrap();

        let update = watcher.latest();
        assert!(update.graph.find_node(CHILD).is_none());
        assert_eq!(update.watch.dropped_batches, 1);
        assert_eq!(update.ingest.applied, 0);
    }

    #[tokio::test]
    async fn test_switching_runs_resets_state() {
        let watcher = RunWatcher::spawn(graph(), config(), None);
        watcher.watch_run("run-1").await.unwrap();
        watcher.push_events("run-1", spawn_events("run-1")).await.unwrap();

        // Same run again keeps state
        watcher.watch_run("run-1").await.unwrap();
        watcher.flush().await.unwrap();
        assert!(watcher.latest().graph.find_node(CHILD).is_some());

        watcher.watch_run("run-2").await.unwrap();
        // Late batch from the previous run
        watcher.push_events("run-1", spawn_events("run-1")).await.unwrap();
        watcher.flush().await.unwrap();

        let update = watcher.latest();
        assert_eq!(update.root_run_id.as_deref(), Some("run-2"));
        assert!(update.graph.find_node(CHILD).is_none());
        assert_eq!(update.watch.dropped_batches, 1);
    }

    #[tokio::test]
    async fn test_close_run_returns_to_static_graph() {
        let watcher = RunWatcher::spawn(graph(), config(), None);
        watcher.watch_run("run-root").await.unwrap();
        watcher.push_events("run-root", spawn_events("run-root")).await.unwrap();
        watcher.close_run().await.unwrap();
        watcher.flush().await.unwrap();

        let update = watcher.latest();
        assert_eq!(update.root_run_id, None);
        assert_eq!(update.graph.nodes.len(), 2);
        assert!(update.graph.nodes.iter().all(|n| n.execution_status.is_none()));
    }

    #[tokio::test]
    async fn test_set_mode_recomposes() {
        let watcher = RunWatcher::spawn(graph(), config(), None);
        watcher.watch_run("run-root").await.unwrap();
        watcher.push_events("run-root", spawn_events("run-root")).await.unwrap();
        watcher.set_mode(RenderMode::Build).await.unwrap();
        watcher.flush().await.unwrap();

        let update = watcher.latest();
        assert_eq!(update.mode, RenderMode::Build);
        assert!(update.graph.find_node(CHILD).is_none());
    }

    #[tokio::test]
    async fn test_reconcile_now_applies_tree() {
        let source = ScriptedSource::serving(tree("run-root", "completed"));
        let watcher = RunWatcher::spawn(graph(), config(), Some(source.clone()));
        watcher.watch_run("run-root").await.unwrap();
        watcher.push_events("run-root", spawn_events("run-root")).await.unwrap();

        let report = watcher.reconcile_now().await.unwrap();
        assert_eq!(report.touched, 1);
        assert_eq!(child_status(&watcher.latest()), Some(ExecutionStatus::Completed));

        // Late stream event does not regress the tree status
        let late = RawExecutionEvent::child_lifecycle(
            "run-root",
            "spawn_core_group",
            "child-a",
            "running",
        );
        watcher.push_events("run-root", vec![late]).await.unwrap();
        watcher.flush().await.unwrap();
        let update = watcher.latest();
        assert_eq!(child_status(&update), Some(ExecutionStatus::Completed));
        assert!(update.ingest.suppressed_by_authority >= 1);
        assert!(source.calls.load(Ordering::SeqCst) >= 1);
    }

    #[tokio::test]
    async fn test_reconcile_now_failure_leaves_state_intact() {
        let source = Arc::new(ScriptedSource::default());
        let watcher = RunWatcher::spawn(graph(), config(), Some(source));
        watcher.watch_run("run-root").await.unwrap();
        watcher.push_events("run-root", spawn_events("run-root")).await.unwrap();
        watcher.flush().await.unwrap();
        let before = watcher.latest().graph.clone();

        let err = watcher.reconcile_now().await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(watcher.latest().graph, before);
        assert_eq!(child_status(&watcher.latest()), Some(ExecutionStatus::Running));
    }

    #[tokio::test]
    async fn test_reconcile_now_without_source_or_run() {
        let watcher = RunWatcher::spawn(graph(), config(), None);
        watcher.watch_run("run-root").await.unwrap();
        assert!(matches!(watcher.reconcile_now().await, Err(WatchError::NoTreeSource)));

        let source = ScriptedSource::serving(tree("run-root", "completed"));
        let watcher = RunWatcher::spawn(graph(), config(), Some(source));
        assert!(matches!(watcher.reconcile_now().await, Err(WatchError::NotWatching)));
    }

    #[tokio::test]
    async fn test_slow_poll_cannot_overwrite_newer_tree() {
        let source = Arc::new(ScriptedSource::default());
        // The fetch started on watch is slow and sees the child still running
        source.queue(Duration::from_millis(300), tree("run-root", "running"));
        source.set(tree("run-root", "completed"));

        let watcher = RunWatcher::spawn(graph(), config(), Some(source.clone()));
        let mut updates = watcher.subscribe();
        watcher.watch_run("run-root").await.unwrap();
        watcher.push_events("run-root", spawn_events("run-root")).await.unwrap();
        source.wait_for_calls(1).await;

        watcher.reconcile_now().await.unwrap();
        assert_eq!(child_status(&watcher.latest()), Some(ExecutionStatus::Completed));

        let update = tokio::time::timeout(
            Duration::from_secs(5),
            updates.wait_for(|u| u.watch.outdated_trees == 1),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(child_status(&update), Some(ExecutionStatus::Completed));
        assert_eq!(update.ingest.reconciliations, 1);
        assert_eq!(update.watch.tree_fetches, 2);
    }

    #[tokio::test]
    async fn test_tree_for_previous_run_is_superseded() {
        let source = Arc::new(ScriptedSource::default());
        source.queue(Duration::from_millis(200), tree("run-1", "completed"));

        let watcher = RunWatcher::spawn(graph(), config(), Some(source.clone()));
        let mut updates = watcher.subscribe();
        watcher.watch_run("run-1").await.unwrap();
        source.wait_for_calls(1).await;

        watcher.watch_run("run-2").await.unwrap();
        watcher.push_events("run-2", spawn_events("run-2")).await.unwrap();

        let update = tokio::time::timeout(
            Duration::from_secs(5),
            updates.wait_for(|u| u.watch.superseded_trees == 1),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(update.root_run_id.as_deref(), Some("run-2"));
        assert_eq!(child_status(&update), Some(ExecutionStatus::Running));
        assert_eq!(update.ingest.reconciliations, 0);
    }

    #[tokio::test]
    async fn test_terminal_signal_triggers_tree_fetch() {
        let source = Arc::new(ScriptedSource::default());
        let watcher = RunWatcher::spawn(graph(), config(), Some(source.clone()));
        let mut updates = watcher.subscribe();

        // The initial fetch on watch fails; wait for it to settle
        watcher.watch_run("run-root").await.unwrap();
        tokio::time::timeout(
            Duration::from_secs(5),
            updates.wait_for(|u| u.watch.tree_fetch_failures == 1),
        )
        .await
        .unwrap()
        .unwrap();

        source.set(tree("run-root", "completed"));
        let mut events = spawn_events("run-root");
        events.push(RawExecutionEvent::new(kinds::RUN_COMPLETED, "run-root"));
        watcher.push_events("run-root", events).await.unwrap();

        let update = tokio::time::timeout(
            Duration::from_secs(5),
            updates.wait_for(|u| child_status(u) == Some(ExecutionStatus::Completed)),
        )
        .await
        .unwrap()
        .unwrap()
        .clone();
        assert_eq!(update.watch.tree_fetches, 2);
        assert_eq!(update.ingest.reconciliations, 1);
    }

    #[tokio::test]
    async fn test_shutdown_closes_handle() {
        let watcher = RunWatcher::spawn(graph(), config(), None);
        watcher.shutdown().await.unwrap();
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            loop {
                if let Err(e) = watcher.flush().await {
                    break e;
                }
                tokio::task::yield_now().await;
            }
        })
        .await
        .unwrap();
        assert!(matches!(result, WatchError::Closed));
    }
}
