//! Status overlay store
//!
//! Holds the execution status of every entity (static node id or runtime
//! node id) together with the authority that produced it, and the set of
//! static edges observed as taken.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};

use crate::types::{Authority, EdgeId, ExecutionStatus};

/// Status of one entity and where it came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OverlayEntry {
    pub status: ExecutionStatus,
    pub authority: Authority,
}

/// Outcome of a status upsert
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Upsert {
    /// The entry was created or overwritten
    Applied,
    /// A stream update hit a tree-authoritative entry and was ignored
    Suppressed,
}

/// Per-entity status with authority tracking
///
/// Authority never goes down within one epoch: once an entity carries a
/// `Tree` value, only another `Tree` write may change it.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct StatusOverlay {
    entries: HashMap<String, OverlayEntry>,
}

impl StatusOverlay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Write a status observed on the event stream
    pub fn upsert_stream(&mut self, entity_id: &str, status: ExecutionStatus) -> Upsert {
        match self.entries.get_mut(entity_id) {
            Some(entry) if entry.authority == Authority::Tree => Upsert::Suppressed,
            Some(entry) => {
                entry.status = status;
                Upsert::Applied
            }
            None => {
                self.entries.insert(
                    entity_id.to_string(),
                    OverlayEntry {
                        status,
                        authority: Authority::Stream,
                    },
                );
                Upsert::Applied
            }
        }
    }

    /// Write a status confirmed by a tree snapshot, overwriting anything
    pub fn upsert_tree(&mut self, entity_id: &str, status: ExecutionStatus) {
        self.entries.insert(
            entity_id.to_string(),
            OverlayEntry {
                status,
                authority: Authority::Tree,
            },
        );
    }

    pub fn get(&self, entity_id: &str) -> Option<&OverlayEntry> {
        self.entries.get(entity_id)
    }

    /// Current status, if any update has been seen
    pub fn status(&self, entity_id: &str) -> Option<ExecutionStatus> {
        self.entries.get(entity_id).map(|e| e.status)
    }

    /// Current status, `Pending` when nothing is known
    pub fn status_or_pending(&self, entity_id: &str) -> ExecutionStatus {
        self.status(entity_id).unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Static edges observed as traversed; grows monotonically within an epoch
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TakenEdgeSet {
    edges: BTreeSet<EdgeId>,
}

impl TakenEdgeSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark an edge as taken; returns false if it already was
    pub fn mark(&mut self, edge_id: &str) -> bool {
        self.edges.insert(edge_id.to_string())
    }

    pub fn is_taken(&self, edge_id: &str) -> bool {
        self.edges.contains(edge_id)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.edges.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}
