//! Run Overlay - live execution state projected onto a static workflow graph
//!
//! This crate reconciles two views of a running workflow:
//!
//! - A live, possibly out-of-order stream of execution events
//! - A periodically fetched, authoritative run-tree snapshot
//!
//! and projects both onto the author-defined static graph to produce one
//! render graph. It supports:
//!
//! - Dynamic runtime nodes/edges for spawned child runs and orchestration groups
//! - Status authority tracking: tree-confirmed status is never regressed by
//!   stale stream events
//! - Build/execute render modes with deterministic ordering
//!
//! # Architecture
//!
//! Everything here is synchronous and side-effect free:
//!
//! - `events`: tagged-variant decode of raw transport events
//! - `state`: `ReconciliationState` and the `apply` reducer
//! - `reconcile`: tree snapshot reconciliation
//! - `compose`: render graph composition
//!
//! The owner of a `ReconciliationState` is responsible for serializing
//! `apply` and `reconcile` calls (see the `run-overlay-service` crate).
//!
//! # Example
//!
//! ```
//! use run_overlay::{
//!     apply, compose, RawExecutionEvent, ReconciliationState, RenderMode, StaticGraph, StaticNode,
//! };
//!
//! let graph = StaticGraph::new(
//!     vec![StaticNode::new("fanout", "spawn_group", "control", "Fan out")],
//!     vec![],
//! );
//! let state = apply(
//!     &ReconciliationState::new("run-root"),
//!     &[RawExecutionEvent::spawn_decision("run-root", "fanout", &["child-a"])],
//!     &graph,
//! );
//! let render = compose(RenderMode::Execute, &graph.nodes, &graph.edges, &state);
//! assert_eq!(render.nodes.len(), 2);
//! ```

pub mod compose;
pub mod error;
pub mod events;
pub mod overlay;
pub mod reconcile;
pub mod spawn;
pub mod state;
pub mod types;

// Re-export key types
pub use compose::{
    compose, compose_with, RenderEdge, RenderGraph, RenderMode, RenderNode, RenderOptions,
    RuntimeRetention, StrokeStyle,
};
pub use error::{OverlayError, Result};
pub use events::{decode, decode_value, ExecutionEvent, RawExecutionEvent, Rejected};
pub use overlay::{OverlayEntry, StatusOverlay, TakenEdgeSet};
pub use reconcile::{reconcile, ReconcileReport, RunTreeNode, TreeGroup, TreeSnapshot};
pub use spawn::{RuntimeEdge, RuntimeNode, SpawnRegistry};
pub use state::{apply, BatchOutcome, IngestStats, ReconciliationState};
pub use types::{Authority, ExecutionStatus, StaticEdge, StaticGraph, StaticNode};
