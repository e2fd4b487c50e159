//! Execution events as delivered by the streaming transport
//!
//! Raw events are loosely shaped JSON. [`decode`] turns each one into a typed
//! [`ExecutionEvent`] or a [`Rejected`] outcome; nothing in here panics or
//! returns an error that could break the stream.

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::{ExecutionStatus, NodeId, RunId};

/// Recognized event names
pub mod kinds {
    pub const SPAWN_DECISION: &str = "orchestration.spawn_decision";
    pub const CHILD_LIFECYCLE: &str = "orchestration.child_lifecycle";
    pub const NODE_STARTED: &str = "node.started";
    pub const NODE_COMPLETED: &str = "node.completed";
    pub const NODE_FAILED: &str = "node.failed";
    pub const NODE_SKIPPED: &str = "node.skipped";
    pub const EDGE_TRAVERSED: &str = "edge.traversed";
    pub const RUN_COMPLETED: &str = "run.completed";
    pub const RUN_FAILED: &str = "run.failed";
}

/// An event as received from the transport
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RawExecutionEvent {
    /// Event name, e.g. `orchestration.spawn_decision`
    pub event: String,
    /// Run that emitted the event
    pub run_id: RunId,
    /// Node (span) within the emitting run's graph
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub span_id: Option<String>,
    /// Kind-specific payload
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
}

impl RawExecutionEvent {
    pub fn new(event: impl Into<String>, run_id: impl Into<String>) -> Self {
        Self {
            event: event.into(),
            run_id: run_id.into(),
            span_id: None,
            data: None,
        }
    }

    pub fn with_span(mut self, span_id: impl Into<String>) -> Self {
        self.span_id = Some(span_id.into());
        self
    }

    pub fn with_data(mut self, data: serde_json::Value) -> Self {
        self.data = Some(data);
        self
    }

    /// Build a spawn decision event
    pub fn spawn_decision(run_id: &str, span_id: &str, spawned_run_ids: &[&str]) -> Self {
        Self::new(kinds::SPAWN_DECISION, run_id)
            .with_span(span_id)
            .with_data(serde_json::json!({ "spawned_run_ids": spawned_run_ids }))
    }

    /// Build a child lifecycle event
    pub fn child_lifecycle(run_id: &str, span_id: &str, child_run_id: &str, status: &str) -> Self {
        Self::new(kinds::CHILD_LIFECYCLE, run_id)
            .with_span(span_id)
            .with_data(serde_json::json!({ "child_run_id": child_run_id, "status": status }))
    }
}

/// How an `edge.traversed` event identifies its edge
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EdgeRef {
    Id(String),
    Endpoints { source: NodeId, target: NodeId },
}

/// A validated, typed execution event
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionEvent {
    /// A spawn/group node decided to fan out child runs
    SpawnDecision {
        run_id: RunId,
        anchor_node_id: NodeId,
        spawned_run_ids: Vec<RunId>,
    },
    /// A child run changed status
    ChildLifecycle {
        run_id: RunId,
        anchor_node_id: NodeId,
        child_run_id: RunId,
        status: ExecutionStatus,
    },
    /// A static node changed status
    NodeLifecycle {
        run_id: RunId,
        node_id: NodeId,
        status: ExecutionStatus,
    },
    /// Control flowed along a static edge
    EdgeTraversed { run_id: RunId, edge: EdgeRef },
    /// The emitting run reached a terminal state
    RunFinished { run_id: RunId, status: ExecutionStatus },
}

impl ExecutionEvent {
    pub fn run_id(&self) -> &str {
        match self {
            Self::SpawnDecision { run_id, .. }
            | Self::ChildLifecycle { run_id, .. }
            | Self::NodeLifecycle { run_id, .. }
            | Self::EdgeTraversed { run_id, .. }
            | Self::RunFinished { run_id, .. } => run_id,
        }
    }

    /// Whether this event suggests the authoritative tree has settled
    /// and is worth re-fetching
    pub fn is_terminal_signal(&self) -> bool {
        match self {
            Self::RunFinished { .. } => true,
            Self::ChildLifecycle { status, .. } => status.is_terminal(),
            _ => false,
        }
    }
}

/// Why an event was not accepted
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Rejected {
    /// Event name outside the recognized set
    #[error("unknown event kind '{0}'")]
    UnknownKind(String),
    /// Recognized kind with a missing or invalid field
    #[error("malformed '{kind}' event: {reason}")]
    Malformed { kind: String, reason: String },
}

impl Rejected {
    fn malformed(kind: &str, reason: impl Into<String>) -> Self {
        Self::Malformed {
            kind: kind.to_string(),
            reason: reason.into(),
        }
    }
}

#[derive(Deserialize)]
struct SpawnDecisionData {
    spawned_run_ids: Vec<String>,
}

#[derive(Deserialize)]
struct ChildLifecycleData {
    child_run_id: String,
    status: String,
}

#[derive(Deserialize)]
struct EdgeTraversedData {
    #[serde(default)]
    edge_id: Option<String>,
    #[serde(default)]
    source: Option<String>,
    #[serde(default)]
    target: Option<String>,
}

/// Decode a raw event into a typed event
pub fn decode(raw: &RawExecutionEvent) -> Result<ExecutionEvent, Rejected> {
    let kind = raw.event.as_str();
    let node_status = match kind {
        kinds::NODE_STARTED => Some(ExecutionStatus::Running),
        kinds::NODE_COMPLETED => Some(ExecutionStatus::Completed),
        kinds::NODE_FAILED => Some(ExecutionStatus::Failed),
        kinds::NODE_SKIPPED => Some(ExecutionStatus::Skipped),
        _ => None,
    };
    let recognized = node_status.is_some()
        || matches!(
            kind,
            kinds::SPAWN_DECISION
                | kinds::CHILD_LIFECYCLE
                | kinds::EDGE_TRAVERSED
                | kinds::RUN_COMPLETED
                | kinds::RUN_FAILED
        );
    if !recognized {
        return Err(Rejected::UnknownKind(raw.event.clone()));
    }
    if raw.run_id.is_empty() {
        return Err(Rejected::malformed(kind, "empty run_id"));
    }
    let run_id = raw.run_id.clone();

    if let Some(status) = node_status {
        return Ok(ExecutionEvent::NodeLifecycle {
            run_id,
            node_id: required_span(raw)?,
            status,
        });
    }

    match kind {
        kinds::SPAWN_DECISION => {
            let anchor_node_id = required_span(raw)?;
            let data: SpawnDecisionData = payload(raw)?;
            if data.spawned_run_ids.iter().any(|id| id.is_empty()) {
                return Err(Rejected::malformed(kind, "empty id in spawned_run_ids"));
            }
            Ok(ExecutionEvent::SpawnDecision {
                run_id,
                anchor_node_id,
                spawned_run_ids: data.spawned_run_ids,
            })
        }
        kinds::CHILD_LIFECYCLE => {
            let anchor_node_id = required_span(raw)?;
            let data: ChildLifecycleData = payload(raw)?;
            if data.child_run_id.is_empty() {
                return Err(Rejected::malformed(kind, "empty child_run_id"));
            }
            let status = ExecutionStatus::parse(&data.status).ok_or_else(|| {
                Rejected::malformed(kind, format!("unknown status '{}'", data.status))
            })?;
            Ok(ExecutionEvent::ChildLifecycle {
                run_id,
                anchor_node_id,
                child_run_id: data.child_run_id,
                status,
            })
        }
        kinds::EDGE_TRAVERSED => {
            let data: EdgeTraversedData = payload(raw)?;
            let edge = match (data.edge_id, data.source, data.target) {
                (Some(id), _, _) if !id.is_empty() => EdgeRef::Id(id),
                (_, Some(source), Some(target)) => EdgeRef::Endpoints { source, target },
                _ => return Err(Rejected::malformed(kind, "missing edge_id or source/target")),
            };
            Ok(ExecutionEvent::EdgeTraversed { run_id, edge })
        }
        kinds::RUN_COMPLETED => Ok(ExecutionEvent::RunFinished {
            run_id,
            status: ExecutionStatus::Completed,
        }),
        _ => Ok(ExecutionEvent::RunFinished {
            run_id,
            status: ExecutionStatus::Failed,
        }),
    }
}

/// Decode an event straight from transport JSON
pub fn decode_value(value: &serde_json::Value) -> Result<ExecutionEvent, Rejected> {
    let raw: RawExecutionEvent = serde_json::from_value(value.clone()).map_err(|e| {
        let kind = value
            .get("event")
            .and_then(|v| v.as_str())
            .unwrap_or("<missing>");
        Rejected::malformed(kind, e.to_string())
    })?;
    decode(&raw)
}

fn required_span(raw: &RawExecutionEvent) -> Result<String, Rejected> {
    match raw.span_id.as_deref() {
        Some(span) if !span.is_empty() => Ok(span.to_string()),
        _ => Err(Rejected::malformed(&raw.event, "missing span_id")),
    }
}

fn payload<T: serde::de::DeserializeOwned>(raw: &RawExecutionEvent) -> Result<T, Rejected> {
    let data = raw
        .data
        .as_ref()
        .ok_or_else(|| Rejected::malformed(&raw.event, "missing data"))?;
    T::deserialize(data).map_err(|e| Rejected::malformed(&raw.event, e.to_string()))
}
