//! Tree reconciler
//!
//! A run-tree snapshot is the authoritative picture of a run and its spawned
//! descendants. Reconciling it elevates every described entity to tree
//! authority. Nothing is removed: a snapshot may be partial, so entities it
//! does not mention keep whatever the stream said about them.
//!
//! The root run itself is represented by the static graph and is never
//! materialized as a runtime node.

use serde::{Deserialize, Serialize};

use crate::error::{OverlayError, Result};
use crate::state::ReconciliationState;
use crate::types::{runtime_group_node_id, runtime_run_node_id, ExecutionStatus, NodeId, RunId};

/// Snapshot returned by the run-tree endpoint
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeSnapshot {
    pub root_run_id: RunId,
    #[serde(default)]
    pub node_count: usize,
    pub tree: RunTreeNode,
}

impl TreeSnapshot {
    /// Decode a snapshot from endpoint JSON
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

/// One run in the tree, with its spawned children
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunTreeNode {
    pub run_id: RunId,
    #[serde(default)]
    pub agent_id: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub depth: u32,
    #[serde(default)]
    pub parent_run_id: Option<RunId>,
    /// Node in the parent run's graph that spawned this run
    #[serde(default)]
    pub parent_node_id: Option<NodeId>,
    #[serde(default)]
    pub spawn_key: Option<String>,
    #[serde(default)]
    pub orchestration_group_id: Option<String>,
    #[serde(default)]
    pub children: Vec<RunTreeNode>,
    #[serde(default)]
    pub groups: Vec<TreeGroup>,
}

impl RunTreeNode {
    /// Create a leaf node
    pub fn new(run_id: impl Into<String>, status: impl Into<String>) -> Self {
        Self {
            run_id: run_id.into(),
            agent_id: None,
            status: Some(status.into()),
            depth: 0,
            parent_run_id: None,
            parent_node_id: None,
            spawn_key: None,
            orchestration_group_id: None,
            children: Vec::new(),
            groups: Vec::new(),
        }
    }

    /// Total number of runs in this subtree, including this one
    pub fn count(&self) -> usize {
        1 + self.children.iter().map(RunTreeNode::count).sum::<usize>()
    }
}

/// An orchestration group declared by a run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TreeGroup {
    #[serde(alias = "id")]
    pub group_id: String,
    /// Node in the declaring run's graph that owns the group
    #[serde(default)]
    pub parent_node_id: Option<NodeId>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub label: Option<String>,
}

/// What a reconciliation pass touched
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ReconcileReport {
    /// Runtime entities elevated to tree authority
    pub touched: usize,
    /// Descendants skipped for lack of an anchor or a valid id
    pub skipped: usize,
}

impl ReconciliationState {
    /// Reconcile an authoritative snapshot into this state
    ///
    /// Fails without touching the state if the snapshot is for another run.
    pub fn reconcile_tree(&mut self, snapshot: &TreeSnapshot) -> Result<ReconcileReport> {
        let root = self.root_run_id().to_string();
        if snapshot.root_run_id != root {
            return Err(OverlayError::run_mismatch(root, snapshot.root_run_id.clone()));
        }
        if snapshot.tree.run_id != root {
            return Err(OverlayError::run_mismatch(root, snapshot.tree.run_id.clone()));
        }

        let mut report = ReconcileReport::default();
        self.visit(&snapshot.tree, true, &mut report);
        self.stats.reconciliations += 1;
        log::debug!(
            "Reconciled tree for '{}': {} touched, {} skipped",
            root,
            report.touched,
            report.skipped
        );
        Ok(report)
    }

    /// Depth-first, pre-order: a run's groups, then each child subtree
    fn visit(&mut self, parent: &RunTreeNode, parent_is_root: bool, report: &mut ReconcileReport) {
        for group in &parent.groups {
            let anchor = if parent_is_root {
                group.parent_node_id.clone()
            } else {
                Some(runtime_run_node_id(&parent.run_id))
            };
            let Some(anchor) = anchor else {
                log::warn!("Tree group '{}' has no parent node, skipping", group.group_id);
                report.skipped += 1;
                continue;
            };
            self.registry
                .register_group(&anchor, &group.group_id, group.label.as_deref());
            if let Some(status) = group.status.as_deref().and_then(ExecutionStatus::parse) {
                self.overlay
                    .upsert_tree(&runtime_group_node_id(&group.group_id), status);
            }
            report.touched += 1;
        }

        for child in &parent.children {
            if child.run_id.is_empty() || child.run_id == self.root_run_id() {
                log::warn!(
                    "Tree node under '{}' has invalid run id '{}', skipping subtree",
                    parent.run_id,
                    child.run_id
                );
                report.skipped += 1;
                continue;
            }

            let group_anchor = child
                .orchestration_group_id
                .as_deref()
                .and_then(|g| self.registry.lookup_group(g))
                .map(|n| n.id.clone());
            let anchor = match group_anchor {
                Some(anchor) => Some(anchor),
                None if parent_is_root => child.parent_node_id.clone(),
                None => Some(runtime_run_node_id(&parent.run_id)),
            };
            let Some(anchor) = anchor else {
                log::warn!("Tree node '{}' has no anchor node, skipping subtree", child.run_id);
                report.skipped += 1;
                continue;
            };

            let node_id = self
                .registry
                .register(&anchor, &child.run_id, child.agent_id.as_deref())
                .id
                .clone();
            if let Some(agent_id) = child.agent_id.as_deref() {
                self.registry.annotate(&child.run_id, agent_id);
            }
            match child.status.as_deref().map(|s| (s, ExecutionStatus::parse(s))) {
                Some((_, Some(status))) => self.overlay.upsert_tree(&node_id, status),
                Some((raw, None)) => {
                    log::warn!("Tree node '{}' has unknown status '{}'", child.run_id, raw)
                }
                None => {}
            }
            report.touched += 1;

            self.visit(child, false, report);
        }
    }
}

/// Reconcile a snapshot into a copy of `state`
pub fn reconcile(
    state: &ReconciliationState,
    snapshot: &TreeSnapshot,
) -> Result<ReconciliationState> {
    let mut next = state.clone();
    next.reconcile_tree(snapshot)?;
    Ok(next)
}
