//! Spawn registry for dynamically created runtime entities
//!
//! Child runs and orchestration groups that appear while a run executes do
//! not exist in the static graph. The registry synthesizes a node for each
//! of them, bound to an anchor node, plus the edge from the anchor.
//!
//! Storage is arena-style: nodes and edges live in registration order in
//! vectors, with keyed indices on top. Registration is idempotent by child
//! run id (or group id), so replayed events never duplicate entities.

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::types::{
    runtime_edge_id, runtime_group_node_id, runtime_run_node_id, EdgeId, NodeId, RunId,
};

/// Node type of runtime nodes created for child runs
pub const RUNTIME_RUN_TYPE: &str = "runtime_run";

/// Node type of runtime nodes created for orchestration groups
pub const ORCHESTRATION_GROUP_TYPE: &str = "orchestration_group";

/// Category shared by all runtime nodes
pub const RUNTIME_CATEGORY: &str = "runtime";

/// What a runtime node stands for
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RuntimeEntity {
    /// A spawned child run
    ChildRun { child_run_id: RunId },
    /// An orchestration group fanning out child runs
    Group { group_id: String },
}

/// Deterministic placement hint for a runtime node
///
/// Depends only on registration order so redraws are stable.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LayoutHint {
    /// Global registration index
    pub order: usize,
    /// Index among runtime nodes registered under the same anchor
    pub slot: usize,
}

/// A node synthesized at runtime
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeNode {
    /// `runtime-run:<child>` or `runtime-group:<group>`
    pub id: NodeId,
    pub entity: RuntimeEntity,
    #[serde(rename = "type")]
    pub node_type: String,
    pub category: String,
    pub display_name: String,
    /// Node this entity hangs off (static or runtime)
    pub anchor_id: NodeId,
    pub layout: LayoutHint,
    /// Created from an orphan lifecycle event rather than a spawn decision
    pub placeholder: bool,
}

impl RuntimeNode {
    /// The child run id, if this node stands for a child run
    pub fn child_run_id(&self) -> Option<&str> {
        match &self.entity {
            RuntimeEntity::ChildRun { child_run_id } => Some(child_run_id),
            RuntimeEntity::Group { .. } => None,
        }
    }
}

/// An edge connecting an anchor to a runtime node
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RuntimeEdge {
    pub id: EdgeId,
    pub source: NodeId,
    pub target: NodeId,
}

impl RuntimeEdge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let source = source.into();
        let target = target.into();
        Self {
            id: runtime_edge_id(&source, &target),
            source,
            target,
        }
    }
}

/// Registry of runtime nodes and edges for one watched run
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SpawnRegistry {
    nodes: Vec<RuntimeNode>,
    edges: Vec<RuntimeEdge>,
    /// Runtime node id -> index into `nodes`
    index: HashMap<NodeId, usize>,
    /// Anchor id -> number of runtime nodes registered under it
    slots: HashMap<NodeId, usize>,
}

impl SpawnRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a child run under an anchor
    ///
    /// Returns the existing node when the child is already registered; the
    /// anchor and display name of an existing node are never changed here.
    pub fn register(
        &mut self,
        anchor_node_id: &str,
        child_run_id: &str,
        display_hint: Option<&str>,
    ) -> &RuntimeNode {
        self.insert(
            runtime_run_node_id(child_run_id),
            RuntimeEntity::ChildRun {
                child_run_id: child_run_id.to_string(),
            },
            RUNTIME_RUN_TYPE,
            anchor_node_id,
            display_hint.unwrap_or(child_run_id),
            false,
        )
    }

    /// Register a child run known only from a lifecycle event
    pub fn register_placeholder(
        &mut self,
        anchor_node_id: &str,
        child_run_id: &str,
    ) -> &RuntimeNode {
        self.insert(
            runtime_run_node_id(child_run_id),
            RuntimeEntity::ChildRun {
                child_run_id: child_run_id.to_string(),
            },
            RUNTIME_RUN_TYPE,
            anchor_node_id,
            child_run_id,
            true,
        )
    }

    /// Register an orchestration group under an anchor
    pub fn register_group(
        &mut self,
        anchor_node_id: &str,
        group_id: &str,
        display_hint: Option<&str>,
    ) -> &RuntimeNode {
        self.insert(
            runtime_group_node_id(group_id),
            RuntimeEntity::Group {
                group_id: group_id.to_string(),
            },
            ORCHESTRATION_GROUP_TYPE,
            anchor_node_id,
            display_hint.unwrap_or(group_id),
            false,
        )
    }

    fn insert(
        &mut self,
        id: NodeId,
        entity: RuntimeEntity,
        node_type: &str,
        anchor_id: &str,
        display_name: &str,
        placeholder: bool,
    ) -> &RuntimeNode {
        if let Some(&idx) = self.index.get(&id) {
            return &self.nodes[idx];
        }

        let slot = self.slots.entry(anchor_id.to_string()).or_insert(0);
        let layout = LayoutHint {
            order: self.nodes.len(),
            slot: *slot,
        };
        *slot += 1;

        log::debug!("Registering runtime node '{}' under '{}'", id, anchor_id);
        self.edges.push(RuntimeEdge::new(anchor_id, id.clone()));
        self.index.insert(id.clone(), self.nodes.len());
        self.nodes.push(RuntimeNode {
            id,
            entity,
            node_type: node_type.to_string(),
            category: RUNTIME_CATEGORY.to_string(),
            display_name: display_name.to_string(),
            anchor_id: anchor_id.to_string(),
            layout,
            placeholder,
        });
        &self.nodes[self.nodes.len() - 1]
    }

    /// Look up the runtime node for a child run
    pub fn lookup(&self, child_run_id: &str) -> Option<&RuntimeNode> {
        self.get(&runtime_run_node_id(child_run_id))
    }

    /// Look up the runtime node for an orchestration group
    pub fn lookup_group(&self, group_id: &str) -> Option<&RuntimeNode> {
        self.get(&runtime_group_node_id(group_id))
    }

    /// Look up a runtime node by its node id
    pub fn get(&self, node_id: &str) -> Option<&RuntimeNode> {
        self.index.get(node_id).map(|&idx| &self.nodes[idx])
    }

    /// Replace the display name of a placeholder with a real one
    ///
    /// Nodes created from a spawn decision keep their name.
    pub fn annotate(&mut self, child_run_id: &str, display_name: &str) {
        let id = runtime_run_node_id(child_run_id);
        if let Some(&idx) = self.index.get(&id) {
            let node = &mut self.nodes[idx];
            if node.placeholder {
                node.display_name = display_name.to_string();
                node.placeholder = false;
            }
        }
    }

    /// Runtime nodes in registration order
    pub fn nodes(&self) -> &[RuntimeNode] {
        &self.nodes
    }

    /// Runtime edges in registration order
    pub fn edges(&self) -> &[RuntimeEdge] {
        &self.edges
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_register_is_idempotent() {
        let mut registry = SpawnRegistry::new();
        registry.register("spawn_core_group", "child-a", None);
        registry.register("spawn_core_group", "child-a", Some("ignored"));
        registry.register("elsewhere", "child-a", None);

        assert_eq!(registry.len(), 1);
        assert_eq!(registry.edges().len(), 1);

        let node = registry.lookup("child-a").unwrap();
        assert_eq!(node.id, "runtime-run:child-a");
        assert_eq!(node.anchor_id, "spawn_core_group");
        assert_eq!(node.display_name, "child-a");
        assert_eq!(node.child_run_id(), Some("child-a"));
        assert_eq!(registry.edges()[0].id, "runtime-edge:spawn_core_group->runtime-run:child-a");
    }

    #[test]
    fn test_layout_follows_registration_order() {
        let mut registry = SpawnRegistry::new();
        registry.register("g1", "a", None);
        registry.register("g2", "b", None);
        registry.register("g1", "c", None);

        let layouts: Vec<LayoutHint> = registry.nodes().iter().map(|n| n.layout).collect();
        assert_eq!(
            layouts,
            vec![
                LayoutHint { order: 0, slot: 0 },
                LayoutHint { order: 1, slot: 0 },
                LayoutHint { order: 2, slot: 1 },
            ]
        );

        let mut replay = SpawnRegistry::new();
        replay.register("g1", "a", None);
        replay.register("g2", "b", None);
        replay.register("g1", "c", None);
        assert_eq!(registry, replay);
    }

    #[test]
    fn test_placeholder_is_annotated_once() {
        let mut registry = SpawnRegistry::new();
        registry.register_placeholder("g", "child-x");
        assert!(registry.lookup("child-x").unwrap().placeholder);

        registry.annotate("child-x", "researcher");
        let node = registry.lookup("child-x").unwrap();
        assert!(!node.placeholder);
        assert_eq!(node.display_name, "researcher");

        registry.annotate("child-x", "other");
        assert_eq!(registry.lookup("child-x").unwrap().display_name, "researcher");
    }

    #[test]
    fn test_groups_and_runs_share_ordering() {
        let mut registry = SpawnRegistry::new();
        registry.register_group("fanout", "grp-1", Some("Reviewers"));
        registry.register("runtime-group:grp-1", "child-a", None);

        let group = registry.lookup_group("grp-1").unwrap();
        assert_eq!(group.node_type, ORCHESTRATION_GROUP_TYPE);
        assert_eq!(group.display_name, "Reviewers");
        assert!(group.child_run_id().is_none());

        let ids: Vec<&str> = registry.nodes().iter().map(|n| n.id.as_str()).collect();
        assert_eq!(ids, vec!["runtime-group:grp-1", "runtime-run:child-a"]);
        assert!(registry.lookup("grp-1").is_none());
    }
}
