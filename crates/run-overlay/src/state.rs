//! Reconciliation state and the apply reducer
//!
//! [`ReconciliationState`] is the whole runtime overlay for one watched root
//! run: spawned entities, per-entity status with authority, and taken edges.
//! It is a plain value. Transitions are [`apply`] (event batches) and
//! [`crate::reconcile::reconcile`] (tree snapshots); both exist as pure
//! functions and as in-place methods for the single writer that owns the
//! state.

use serde::Serialize;

use crate::events::{decode, EdgeRef, ExecutionEvent, RawExecutionEvent, Rejected};
use crate::overlay::{StatusOverlay, TakenEdgeSet, Upsert};
use crate::spawn::SpawnRegistry;
use crate::types::{runtime_run_node_id, ExecutionStatus, NodeId, RunId, StaticGraph};

/// Diagnostic counters for one reconciliation state
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestStats {
    /// Events decoded and applied
    pub applied: u64,
    /// Events with an unrecognized kind
    pub ignored_unknown: u64,
    /// Recognized events with missing or invalid fields
    pub dropped_malformed: u64,
    /// Stream status writes ignored because the entity is tree-authoritative
    pub suppressed_by_authority: u64,
    /// Tree snapshots reconciled
    pub reconciliations: u64,
}

/// Summary of one applied batch
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    pub applied: usize,
    pub rejected: usize,
    /// At least one event suggested the run tree has settled
    pub terminal_signal: bool,
}

/// The runtime overlay for one watched root run
#[derive(Debug, Clone, PartialEq)]
pub struct ReconciliationState {
    root_run_id: RunId,
    pub(crate) registry: SpawnRegistry,
    pub(crate) overlay: StatusOverlay,
    pub(crate) taken_edges: TakenEdgeSet,
    pub(crate) stats: IngestStats,
}

impl ReconciliationState {
    /// Create an empty state for a root run
    pub fn new(root_run_id: impl Into<String>) -> Self {
        Self {
            root_run_id: root_run_id.into(),
            registry: SpawnRegistry::new(),
            overlay: StatusOverlay::new(),
            taken_edges: TakenEdgeSet::new(),
            stats: IngestStats::default(),
        }
    }

    pub fn root_run_id(&self) -> &str {
        &self.root_run_id
    }

    pub fn registry(&self) -> &SpawnRegistry {
        &self.registry
    }

    pub fn overlay(&self) -> &StatusOverlay {
        &self.overlay
    }

    pub fn taken_edges(&self) -> &TakenEdgeSet {
        &self.taken_edges
    }

    pub fn stats(&self) -> IngestStats {
        self.stats
    }

    /// Current status of a child run's runtime node
    pub fn child_status(&self, child_run_id: &str) -> Option<ExecutionStatus> {
        self.overlay.status(&runtime_run_node_id(child_run_id))
    }

    /// Apply a batch of raw events in array order
    ///
    /// Events are never reordered. Unknown and malformed events are logged,
    /// counted, and skipped; they never fail the batch.
    pub fn apply_events(
        &mut self,
        events: &[RawExecutionEvent],
        graph: &StaticGraph,
    ) -> BatchOutcome {
        let mut outcome = BatchOutcome::default();
        for raw in events {
            let result = decode(raw).and_then(|event| {
                self.apply_event(&event, graph)?;
                Ok(event)
            });
            match result {
                Ok(event) => {
                    outcome.applied += 1;
                    outcome.terminal_signal |= event.is_terminal_signal();
                }
                Err(rejected) => {
                    outcome.rejected += 1;
                    self.record_rejection(&rejected);
                }
            }
        }
        outcome
    }

    fn record_rejection(&mut self, rejected: &Rejected) {
        match rejected {
            Rejected::UnknownKind(kind) => {
                log::debug!("Ignoring event of unknown kind '{}'", kind);
                self.stats.ignored_unknown += 1;
            }
            Rejected::Malformed { .. } => {
                log::warn!("Dropping event: {}", rejected);
                self.stats.dropped_malformed += 1;
            }
        }
    }

    /// Apply one decoded event
    ///
    /// Returns `Rejected::Malformed` when the event references something that
    /// cannot exist in this run (an unknown static edge, the root run as a
    /// child); the state is unchanged in that case.
    pub fn apply_event(
        &mut self,
        event: &ExecutionEvent,
        graph: &StaticGraph,
    ) -> Result<(), Rejected> {
        match event {
            ExecutionEvent::SpawnDecision {
                run_id,
                anchor_node_id,
                spawned_run_ids,
            } => {
                let anchor = self.resolve_anchor(run_id, anchor_node_id);
                for child in spawned_run_ids {
                    if *child == self.root_run_id {
                        log::debug!("Skipping spawn of root run '{}'", child);
                        continue;
                    }
                    if self.registry.lookup(child).is_some() {
                        continue;
                    }
                    let node_id = self.registry.register(&anchor, child, None).id.clone();
                    if self.overlay.status(&node_id).is_none() {
                        self.overlay.upsert_stream(&node_id, ExecutionStatus::Pending);
                    }
                }
            }
            ExecutionEvent::ChildLifecycle {
                run_id,
                anchor_node_id,
                child_run_id,
                status,
            } => {
                if *child_run_id == self.root_run_id {
                    return Err(malformed(event, "child_run_id is the root run"));
                }
                if self.registry.lookup(child_run_id).is_none() {
                    let anchor = self.resolve_anchor(run_id, anchor_node_id);
                    log::debug!(
                        "Lifecycle for '{}' arrived before its spawn decision, adding placeholder",
                        child_run_id
                    );
                    self.registry.register_placeholder(&anchor, child_run_id);
                }
                self.stream_status(&runtime_run_node_id(child_run_id), *status);
            }
            ExecutionEvent::NodeLifecycle { run_id, node_id, status } => {
                if *run_id != self.root_run_id {
                    return Err(malformed(event, "node lifecycle from a child run"));
                }
                if graph.find_node(node_id).is_none() {
                    return Err(malformed(event, format!("unknown node '{}'", node_id)));
                }
                self.stream_status(node_id, *status);
            }
            ExecutionEvent::EdgeTraversed { run_id, edge } => {
                if *run_id != self.root_run_id {
                    return Err(malformed(event, "edge traversal from a child run"));
                }
                let static_edge = match edge {
                    EdgeRef::Id(id) => graph.find_edge(id),
                    EdgeRef::Endpoints { source, target } => graph.edge_between(source, target),
                }
                .ok_or_else(|| malformed(event, "edge not in static graph"))?;

                self.taken_edges.mark(&static_edge.id);
                self.stream_status(&static_edge.source, ExecutionStatus::Completed);
                let target_idle = matches!(
                    self.overlay.status(&static_edge.target),
                    None | Some(ExecutionStatus::Pending)
                );
                if target_idle {
                    self.stream_status(&static_edge.target, ExecutionStatus::Running);
                }
            }
            ExecutionEvent::RunFinished { run_id, status } => {
                if *run_id != self.root_run_id && self.registry.lookup(run_id).is_some() {
                    self.stream_status(&runtime_run_node_id(run_id), *status);
                }
            }
        }
        self.stats.applied += 1;
        Ok(())
    }

    /// Anchor for entities announced by `run_id` at `span_id`
    ///
    /// Spans of the root run are static nodes. Spans of a child run live in
    /// a graph that is not rendered, so the child's runtime node is used,
    /// even before that node is registered; composition draws the edge
    /// only once both ends exist.
    fn resolve_anchor(&self, run_id: &str, span_id: &str) -> NodeId {
        if run_id == self.root_run_id {
            span_id.to_string()
        } else {
            runtime_run_node_id(run_id)
        }
    }

    fn stream_status(&mut self, entity_id: &str, status: ExecutionStatus) {
        if self.overlay.upsert_stream(entity_id, status) == Upsert::Suppressed {
            log::debug!(
                "Ignoring stream status '{}' for '{}': tree-authoritative",
                status,
                entity_id
            );
            self.stats.suppressed_by_authority += 1;
        }
    }
}

fn malformed(event: &ExecutionEvent, reason: impl Into<String>) -> Rejected {
    let kind = match event {
        ExecutionEvent::SpawnDecision { .. } => crate::events::kinds::SPAWN_DECISION,
        ExecutionEvent::ChildLifecycle { .. } => crate::events::kinds::CHILD_LIFECYCLE,
        ExecutionEvent::NodeLifecycle { .. } => "node.lifecycle",
        ExecutionEvent::EdgeTraversed { .. } => crate::events::kinds::EDGE_TRAVERSED,
        ExecutionEvent::RunFinished { .. } => "run.finished",
    };
    Rejected::Malformed {
        kind: kind.to_string(),
        reason: reason.into(),
    }
}

/// Apply a batch of events to a copy of `state`
pub fn apply(
    state: &ReconciliationState,
    events: &[RawExecutionEvent],
    graph: &StaticGraph,
) -> ReconciliationState {
    let mut next = state.clone();
    next.apply_events(events, graph);
    next
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::kinds;
    use crate::types::{Authority, StaticEdge, StaticNode};
    use serde_json::json;

    fn test_graph() -> StaticGraph {
        StaticGraph::new(
            vec![
                StaticNode::new("n1", "agent", "processing", "Plan"),
                StaticNode::new("spawn_core_group", "spawn_group", "control", "Fan out"),
                StaticNode::new("n2", "agent", "processing", "Summarize"),
            ],
            vec![
                StaticEdge::new("e1", "n1", "spawn_core_group"),
                StaticEdge::new("e2", "spawn_core_group", "n2"),
            ],
        )
    }

    #[test]
    fn test_spawn_decision_is_idempotent() {
        let graph = test_graph();
        let spawn = RawExecutionEvent::spawn_decision("run-root", "spawn_core_group", &["child-a"]);

        let once = apply(&ReconciliationState::new("run-root"), &[spawn.clone()], &graph);
        let twice = apply(&once, &[spawn], &graph);

        assert_eq!(twice.registry().len(), 1);
        assert_eq!(twice.registry().edges().len(), 1);
        assert_eq!(once.registry(), twice.registry());
        assert_eq!(twice.child_status("child-a"), Some(ExecutionStatus::Pending));
    }

    #[test]
    fn test_spawn_then_lifecycle_sets_running() {
        let graph = test_graph();
        let state = apply(
            &ReconciliationState::new("run-root"),
            &[
                RawExecutionEvent::spawn_decision("run-root", "spawn_core_group", &["child-a"]),
                RawExecutionEvent::child_lifecycle(
                    "run-root",
                    "spawn_core_group",
                    "child-a",
                    "running",
                ),
            ],
            &graph,
        );

        let node = state.registry().lookup("child-a").unwrap();
        assert_eq!(node.id, "runtime-run:child-a");
        assert_eq!(node.anchor_id, "spawn_core_group");
        assert_eq!(state.child_status("child-a"), Some(ExecutionStatus::Running));
    }

    #[test]
    fn test_orphan_lifecycle_creates_placeholder() {
        let graph = test_graph();
        let state = apply(
            &ReconciliationState::new("run-root"),
            &[RawExecutionEvent::child_lifecycle(
                "run-root",
                "spawn_core_group",
                "child-b",
                "running",
            )],
            &graph,
        );
        let node = state.registry().lookup("child-b").unwrap();
        assert!(node.placeholder);
        assert_eq!(state.child_status("child-b"), Some(ExecutionStatus::Running));

        // The later spawn decision must not reset the status
        let state = apply(
            &state,
            &[RawExecutionEvent::spawn_decision("run-root", "spawn_core_group", &["child-b"])],
            &graph,
        );
        assert_eq!(state.registry().len(), 1);
        assert_eq!(state.child_status("child-b"), Some(ExecutionStatus::Running));
    }

    #[test]
    fn test_malformed_and_unknown_events_leave_state_unchanged() {
        let graph = test_graph();
        let initial = ReconciliationState::new("run-root");
        let mut state = initial.clone();
        let outcome = state.apply_events(
            &[
                RawExecutionEvent::new("llm.token", "run-root"),
                RawExecutionEvent::new(kinds::SPAWN_DECISION, "run-root").with_data(json!({})),
                RawExecutionEvent::child_lifecycle("run-root", "g", "child-a", "bogus"),
                RawExecutionEvent::new(kinds::EDGE_TRAVERSED, "run-root")
                    .with_data(json!({ "edge_id": "nope" })),
            ],
            &graph,
        );

        assert_eq!(outcome.applied, 0);
        assert_eq!(outcome.rejected, 4);
        assert_eq!(state.registry(), initial.registry());
        assert_eq!(state.overlay(), initial.overlay());
        assert_eq!(state.stats().ignored_unknown, 1);
        assert_eq!(state.stats().dropped_malformed, 3);
    }

    #[test]
    fn test_order_preservation() {
        let graph = test_graph();
        let s = ReconciliationState::new("run-root");
        let e1 = RawExecutionEvent::spawn_decision("run-root", "spawn_core_group", &["child-a"]);
        let e2 = RawExecutionEvent::new(kinds::EDGE_TRAVERSED, "run-root")
            .with_data(json!({ "edge_id": "e1" }));

        let stepwise = apply(&apply(&s, &[e1.clone()], &graph), &[e2.clone()], &graph);
        let batched = apply(&s, &[e1, e2], &graph);
        assert_eq!(stepwise, batched);
    }

    #[test]
    fn test_edge_traversal_marks_taken_and_statuses() {
        let graph = test_graph();
        let mut state = ReconciliationState::new("run-root");
        state.apply_events(
            &[RawExecutionEvent::new(kinds::EDGE_TRAVERSED, "run-root")
                .with_data(json!({ "source": "n1", "target": "spawn_core_group" }))],
            &graph,
        );

        assert!(state.taken_edges().is_taken("e1"));
        assert!(!state.taken_edges().is_taken("e2"));
        assert_eq!(state.overlay().status("n1"), Some(ExecutionStatus::Completed));
        assert_eq!(state.overlay().status("spawn_core_group"), Some(ExecutionStatus::Running));
        assert_eq!(state.overlay().get("n1").unwrap().authority, Authority::Stream);
    }

    #[test]
    fn test_edge_traversal_does_not_regress_finished_target() {
        let graph = test_graph();
        let mut state = ReconciliationState::new("run-root");
        state.apply_events(
            &[
                RawExecutionEvent::new(kinds::NODE_COMPLETED, "run-root").with_span("n2"),
                RawExecutionEvent::new(kinds::EDGE_TRAVERSED, "run-root")
                    .with_data(json!({ "edge_id": "e2" })),
            ],
            &graph,
        );
        assert_eq!(state.overlay().status("n2"), Some(ExecutionStatus::Completed));
    }

    #[test]
    fn test_nested_spawn_anchors_on_parent_runtime_node() {
        let graph = test_graph();
        let state = apply(
            &ReconciliationState::new("run-root"),
            &[
                RawExecutionEvent::spawn_decision("run-root", "spawn_core_group", &["child-a"]),
                RawExecutionEvent::spawn_decision("child-a", "inner_fanout", &["grandchild-1"]),
            ],
            &graph,
        );
        let grandchild = state.registry().lookup("grandchild-1").unwrap();
        assert_eq!(grandchild.anchor_id, "runtime-run:child-a");
    }

    #[test]
    fn test_root_run_is_never_spawned() {
        let graph = test_graph();
        let state = apply(
            &ReconciliationState::new("run-root"),
            &[
                RawExecutionEvent::spawn_decision("run-root", "spawn_core_group", &["run-root"]),
                RawExecutionEvent::child_lifecycle(
                    "run-root",
                    "spawn_core_group",
                    "run-root",
                    "running",
                ),
            ],
            &graph,
        );
        assert!(state.registry().is_empty());
        assert!(state.overlay().get("runtime-run:run-root").is_none());
    }

    #[test]
    fn test_child_run_finished_updates_child() {
        let graph = test_graph();
        let mut state = ReconciliationState::new("run-root");
        let outcome = state.apply_events(
            &[
                RawExecutionEvent::spawn_decision("run-root", "spawn_core_group", &["child-a"]),
                RawExecutionEvent::new(kinds::RUN_FAILED, "child-a"),
            ],
            &graph,
        );
        assert!(outcome.terminal_signal);
        assert_eq!(state.child_status("child-a"), Some(ExecutionStatus::Failed));
    }
}
