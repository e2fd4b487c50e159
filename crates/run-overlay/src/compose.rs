//! Render graph composer
//!
//! Projects the runtime overlay onto the static graph. In build mode the
//! overlay is ignored entirely; in execute mode static entities come first,
//! then runtime entities in registration order, so downstream list diffing
//! stays stable.

use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::spawn::{LayoutHint, RuntimeEntity, RuntimeNode};
use crate::state::ReconciliationState;
use crate::types::{EdgeId, ExecutionStatus, NodeId, StaticEdge, StaticNode};

/// Which view the render graph is for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RenderMode {
    /// Editing view: never shows execution artifacts
    #[default]
    Build,
    /// Watching a run
    Execute,
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "build" => Ok(Self::Build),
            "execute" => Ok(Self::Execute),
            other => Err(format!("unknown render mode '{}'", other)),
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Build => f.write_str("build"),
            Self::Execute => f.write_str("execute"),
        }
    }
}

/// What to do with runtime entities whose work is over
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RuntimeRetention {
    /// Show every runtime entity for historical display
    #[default]
    KeepAll,
    /// Hide runtime nodes that are terminal and whose anchor is terminal
    HideSettled,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderOptions {
    #[serde(default)]
    pub retention: RuntimeRetention,
}

/// Status-derived edge stroke
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StrokeStyle {
    /// Not traversed
    Idle,
    /// Traversed during this run
    Taken,
    /// Leads into a failed node
    Failed,
    /// Connects an anchor to a runtime entity
    Spawned,
}

/// Runtime provenance of a render node
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeInfo {
    pub entity: RuntimeEntity,
    pub anchor_id: NodeId,
    pub layout: LayoutHint,
    pub placeholder: bool,
}

/// A node handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderNode {
    pub id: NodeId,
    #[serde(rename = "type")]
    pub node_type: String,
    pub category: String,
    pub display_name: String,
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub output_type: Option<String>,
    pub is_configured: bool,
    pub has_errors: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub execution_status: Option<ExecutionStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub runtime: Option<RuntimeInfo>,
}

impl From<&StaticNode> for RenderNode {
    fn from(node: &StaticNode) -> Self {
        Self {
            id: node.id.clone(),
            node_type: node.node_type.clone(),
            category: node.category.clone(),
            display_name: node.display_name.clone(),
            config: node.config.clone(),
            input_type: node.input_type.clone(),
            output_type: node.output_type.clone(),
            is_configured: node.is_configured,
            has_errors: node.has_errors,
            execution_status: None,
            runtime: None,
        }
    }
}

impl RenderNode {
    fn from_runtime(node: &RuntimeNode, status: ExecutionStatus) -> Self {
        Self {
            id: node.id.clone(),
            node_type: node.node_type.clone(),
            category: node.category.clone(),
            display_name: node.display_name.clone(),
            config: serde_json::Value::Null,
            input_type: None,
            output_type: None,
            is_configured: true,
            has_errors: status == ExecutionStatus::Failed,
            execution_status: Some(status),
            runtime: Some(RuntimeInfo {
                entity: node.entity.clone(),
                anchor_id: node.anchor_id.clone(),
                layout: node.layout,
                placeholder: node.placeholder,
            }),
        }
    }
}

/// An edge handed to the presentation layer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub animated: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub stroke_style: Option<StrokeStyle>,
}

impl From<&StaticEdge> for RenderEdge {
    fn from(edge: &StaticEdge) -> Self {
        Self {
            id: edge.id.clone(),
            source: edge.source.clone(),
            target: edge.target.clone(),
            source_handle: edge.source_handle.clone(),
            target_handle: edge.target_handle.clone(),
            animated: None,
            stroke_style: None,
        }
    }
}

/// The only artifact exposed to the presentation layer
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RenderGraph {
    pub nodes: Vec<RenderNode>,
    pub edges: Vec<RenderEdge>,
}

impl RenderGraph {
    pub fn find_node(&self, id: &str) -> Option<&RenderNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    pub fn find_edge(&self, id: &str) -> Option<&RenderEdge> {
        self.edges.iter().find(|e| e.id == id)
    }
}

/// Compose the render graph with default options
pub fn compose(
    mode: RenderMode,
    nodes: &[StaticNode],
    edges: &[StaticEdge],
    state: &ReconciliationState,
) -> RenderGraph {
    compose_with(mode, nodes, edges, state, &RenderOptions::default())
}

/// Compose the render graph
///
/// Never mutates its inputs; always returns fresh collections.
pub fn compose_with(
    mode: RenderMode,
    nodes: &[StaticNode],
    edges: &[StaticEdge],
    state: &ReconciliationState,
    options: &RenderOptions,
) -> RenderGraph {
    if mode == RenderMode::Build {
        return RenderGraph {
            nodes: nodes.iter().map(RenderNode::from).collect(),
            edges: edges.iter().map(RenderEdge::from).collect(),
        };
    }

    let overlay = state.overlay();
    let registry = state.registry();
    let hidden = match options.retention {
        RuntimeRetention::KeepAll => HashSet::new(),
        RuntimeRetention::HideSettled => settled_runtime_nodes(state),
    };

    let mut render_nodes = Vec::with_capacity(nodes.len() + registry.len());
    for node in nodes {
        let status = overlay.status_or_pending(&node.id);
        let mut render = RenderNode::from(node);
        render.execution_status = Some(status);
        render.has_errors = status == ExecutionStatus::Failed;
        render_nodes.push(render);
    }
    for node in registry.nodes() {
        if hidden.contains(node.id.as_str()) {
            continue;
        }
        render_nodes.push(RenderNode::from_runtime(node, overlay.status_or_pending(&node.id)));
    }

    let mut render_edges = Vec::with_capacity(edges.len() + registry.edges().len());
    for edge in edges {
        let taken = state.taken_edges().is_taken(&edge.id);
        let stroke = if taken {
            StrokeStyle::Taken
        } else if overlay.status(&edge.target) == Some(ExecutionStatus::Failed) {
            StrokeStyle::Failed
        } else {
            StrokeStyle::Idle
        };
        let mut render = RenderEdge::from(edge);
        render.animated = Some(taken);
        render.stroke_style = Some(stroke);
        render_edges.push(render);
    }
    // A runtime edge can name an anchor that has not been registered yet
    // (a nested spawn seen before its parent); it is drawn once both ends are
    let rendered: HashSet<&str> = render_nodes.iter().map(|n| n.id.as_str()).collect();
    for edge in registry.edges() {
        if !rendered.contains(edge.source.as_str()) || !rendered.contains(edge.target.as_str()) {
            continue;
        }
        let target_status = overlay.status_or_pending(&edge.target);
        let stroke = if target_status == ExecutionStatus::Failed {
            StrokeStyle::Failed
        } else {
            StrokeStyle::Spawned
        };
        render_edges.push(RenderEdge {
            id: edge.id.clone(),
            source: edge.source.clone(),
            target: edge.target.clone(),
            source_handle: None,
            target_handle: None,
            animated: Some(target_status == ExecutionStatus::Running),
            stroke_style: Some(stroke),
        });
    }

    RenderGraph {
        nodes: render_nodes,
        edges: render_edges,
    }
}

/// Runtime nodes to hide under `HideSettled`
///
/// A node is settled when it and its anchor are terminal. Anything anchored
/// on a hidden node is hidden too. Anchors may be registered after the nodes
/// hanging off them, so passes repeat until nothing changes.
fn settled_runtime_nodes(state: &ReconciliationState) -> HashSet<&str> {
    let overlay = state.overlay();
    let mut hidden: HashSet<&str> = HashSet::new();
    loop {
        let before = hidden.len();
        for node in state.registry().nodes() {
            if hidden.contains(node.id.as_str()) {
                continue;
            }
            let own_terminal = overlay.status_or_pending(&node.id).is_terminal();
            let anchor_terminal = overlay.status_or_pending(&node.anchor_id).is_terminal();
            if hidden.contains(node.anchor_id.as_str()) || (own_terminal && anchor_terminal) {
                hidden.insert(node.id.as_str());
            }
        }
        if hidden.len() == before {
            return hidden;
        }
    }
}
