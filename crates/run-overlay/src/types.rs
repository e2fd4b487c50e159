//! Core types for the static graph and execution status
//!
//! The static graph is produced upstream by the GraphSpec normalizer and is
//! never mutated here. Runtime identifiers for spawned entities are derived
//! from run and group ids with fixed prefixes so they cannot collide with
//! author-defined node ids.

use std::fmt;

use serde::{Deserialize, Serialize};

/// Unique identifier for a node (static or runtime)
pub type NodeId = String;

/// Unique identifier for an edge
pub type EdgeId = String;

/// Unique identifier for a run
pub type RunId = String;

/// Prefix for node ids synthesized from child runs
pub const RUNTIME_RUN_PREFIX: &str = "runtime-run:";

/// Prefix for node ids synthesized from orchestration groups
pub const RUNTIME_GROUP_PREFIX: &str = "runtime-group:";

/// Prefix for edge ids connecting runtime entities
pub const RUNTIME_EDGE_PREFIX: &str = "runtime-edge:";

/// Node id of the runtime node for a child run
pub fn runtime_run_node_id(child_run_id: &str) -> NodeId {
    format!("{RUNTIME_RUN_PREFIX}{child_run_id}")
}

/// Node id of the runtime node for an orchestration group
pub fn runtime_group_node_id(group_id: &str) -> NodeId {
    format!("{RUNTIME_GROUP_PREFIX}{group_id}")
}

/// Edge id of a runtime edge, derived from its endpoints
pub fn runtime_edge_id(source: &str, target: &str) -> EdgeId {
    format!("{RUNTIME_EDGE_PREFIX}{source}->{target}")
}

/// Execution status of a node or run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    #[default]
    Pending,
    Running,
    Completed,
    Failed,
    Skipped,
}

impl ExecutionStatus {
    /// Parse a wire status string, accepting the aliases run backends emit
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_ascii_lowercase().as_str() {
            "pending" | "queued" => Some(Self::Pending),
            "running" | "started" => Some(Self::Running),
            "completed" | "succeeded" | "success" | "done" => Some(Self::Completed),
            "failed" | "error" | "errored" => Some(Self::Failed),
            "skipped" | "cancelled" | "canceled" => Some(Self::Skipped),
            _ => None,
        }
    }

    /// Whether no further transitions are expected
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Skipped)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Skipped => "skipped",
        }
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Provenance of a status value
///
/// Ordered: a `Tree` value outranks any `Stream` value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Authority {
    /// Best-effort value from the live event stream
    Stream,
    /// Confirmed value from an authoritative run-tree snapshot
    Tree,
}

/// A node of the author-defined graph
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticNode {
    /// Unique identifier for this node
    pub id: NodeId,
    /// Node type (e.g. "agent", "tool", "spawn_group")
    #[serde(rename = "type")]
    pub node_type: String,
    /// Category for grouping in the UI
    pub category: String,
    /// Human-readable label
    pub display_name: String,
    /// Node configuration as authored
    #[serde(default)]
    pub config: serde_json::Value,
    #[serde(default)]
    pub input_type: Option<String>,
    #[serde(default)]
    pub output_type: Option<String>,
    #[serde(default)]
    pub is_configured: bool,
    #[serde(default)]
    pub has_errors: bool,
}

impl StaticNode {
    /// Create a configured node without errors
    pub fn new(
        id: impl Into<String>,
        node_type: impl Into<String>,
        category: impl Into<String>,
        display_name: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            node_type: node_type.into(),
            category: category.into(),
            display_name: display_name.into(),
            config: serde_json::Value::Null,
            input_type: None,
            output_type: None,
            is_configured: true,
            has_errors: false,
        }
    }
}

/// An edge of the author-defined graph
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StaticEdge {
    /// Unique identifier for this edge
    pub id: EdgeId,
    /// Source node ID
    pub source: NodeId,
    /// Target node ID
    pub target: NodeId,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source_handle: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target_handle: Option<String>,
}

impl StaticEdge {
    /// Create an edge without handles
    pub fn new(
        id: impl Into<String>,
        source: impl Into<String>,
        target: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            source: source.into(),
            target: target.into(),
            source_handle: None,
            target_handle: None,
        }
    }
}

/// The immutable static graph for the current build
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StaticGraph {
    #[serde(default)]
    pub nodes: Vec<StaticNode>,
    #[serde(default)]
    pub edges: Vec<StaticEdge>,
}

impl StaticGraph {
    pub fn new(nodes: Vec<StaticNode>, edges: Vec<StaticEdge>) -> Self {
        Self { nodes, edges }
    }

    /// Find a node by ID
    pub fn find_node(&self, id: &str) -> Option<&StaticNode> {
        self.nodes.iter().find(|n| n.id == id)
    }

    /// Find an edge by ID
    pub fn find_edge(&self, id: &str) -> Option<&StaticEdge> {
        self.edges.iter().find(|e| e.id == id)
    }

    /// Find the first edge connecting `source` to `target`
    pub fn edge_between(&self, source: &str, target: &str) -> Option<&StaticEdge> {
        self.edges
            .iter()
            .find(|e| e.source == source && e.target == target)
    }
}
