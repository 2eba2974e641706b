//! Core domain models for the flow engine.
//!
//! These types describe a flow as the editor hands it over and the outcome
//! of one run of it. All of them serialise to/from JSON.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use nodes::{ErrorKind, NodeDefinition, NodeError, NodeOutput};

use crate::graph::DroppedEdge;

// ---------------------------------------------------------------------------
// Edge
// ---------------------------------------------------------------------------

/// Directed dependency: `target` consumes `source`'s result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Edge {
    #[serde(default)]
    pub id: String,
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        let (source, target) = (source.into(), target.into());
        Self {
            id: format!("{source}->{target}"),
            source,
            target,
        }
    }
}

// ---------------------------------------------------------------------------
// Flow
// ---------------------------------------------------------------------------

/// A complete flow as saved by the editor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Flow {
    #[serde(default = "Uuid::new_v4")]
    pub id: Uuid,
    #[serde(default)]
    pub name: String,
    pub nodes: Vec<NodeDefinition>,
    #[serde(default)]
    pub edges: Vec<Edge>,
}

impl Flow {
    /// Convenience constructor for testing.
    pub fn new(name: impl Into<String>, nodes: Vec<NodeDefinition>, edges: Vec<Edge>) -> Self {
        Self {
            id: Uuid::new_v4(),
            name: name.into(),
            nodes,
            edges,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-node status
// ---------------------------------------------------------------------------

/// UI-visible status of a node. Moves forward only, once per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExecutionStatus {
    Idle,
    Waiting,
    Processing,
    Completed,
    Error,
}

impl ExecutionStatus {
    fn rank(self) -> u8 {
        match self {
            ExecutionStatus::Idle => 0,
            ExecutionStatus::Waiting => 1,
            ExecutionStatus::Processing => 2,
            ExecutionStatus::Completed | ExecutionStatus::Error => 3,
        }
    }

    /// `true` if moving from `self` to `next` goes strictly forward.
    pub fn can_advance_to(self, next: ExecutionStatus) -> bool {
        next.rank() > self.rank()
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, ExecutionStatus::Completed | ExecutionStatus::Error)
    }
}

// ---------------------------------------------------------------------------
// Failures
// ---------------------------------------------------------------------------

/// Why a node ended without a result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailureKind {
    /// The processor rejected its input or config; not retried.
    Validation,
    /// Transient failures exhausted every attempt.
    RetriesExhausted,
    /// The processor task panicked.
    Panicked,
    /// Never attempted: an upstream dependency failed.
    UpstreamFailed,
    /// Never attempted: the node sits in or behind a cycle.
    Unreachable,
    /// Never attempted: the run was cancelled first.
    Cancelled,
}

impl FailureKind {
    pub fn is_skip(self) -> bool {
        matches!(
            self,
            FailureKind::UpstreamFailed | FailureKind::Unreachable | FailureKind::Cancelled
        )
    }
}

/// Recorded outcome of a node that failed or was skipped.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FailureRecord {
    pub error: String,
    pub timestamp: DateTime<Utc>,
    pub node_type: String,
    pub node_id: String,
    pub attempts: u32,
    pub skipped: bool,
    pub kind: FailureKind,
}

impl FailureRecord {
    /// Failure of a node whose processor ran `attempts` times.
    pub fn attempted(node: &NodeDefinition, error: &NodeError, attempts: u32) -> Self {
        let kind = match error.kind() {
            ErrorKind::Transient => FailureKind::RetriesExhausted,
            ErrorKind::Validation => FailureKind::Validation,
        };
        Self::new(node, kind, error.to_string(), attempts)
    }

    /// Node that was never attempted.
    pub fn skipped(node: &NodeDefinition, kind: FailureKind, reason: impl Into<String>) -> Self {
        Self::new(node, kind, reason.into(), 0)
    }

    pub fn new(node: &NodeDefinition, kind: FailureKind, error: String, attempts: u32) -> Self {
        Self {
            error,
            timestamp: Utc::now(),
            node_type: node.node_type.clone(),
            node_id: node.id.clone(),
            attempts,
            skipped: kind.is_skip(),
            kind,
        }
    }
}

/// Final entry of a node in the result map.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "outcome", content = "value", rename_all = "snake_case")]
pub enum NodeOutcome {
    Completed(NodeOutput),
    Failed(FailureRecord),
}

impl NodeOutcome {
    pub fn output(&self) -> Option<&NodeOutput> {
        match self {
            NodeOutcome::Completed(output) => Some(output),
            NodeOutcome::Failed(_) => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureRecord> {
        match self {
            NodeOutcome::Completed(_) => None,
            NodeOutcome::Failed(record) => Some(record),
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, NodeOutcome::Failed(_))
    }
}

// ---------------------------------------------------------------------------
// Run outcome
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum RunStatus {
    Completed,
    CompletedWithErrors,
    /// Unresolved nodes remained with none ready (cycle).
    Stalled,
    Cancelled,
}

/// Position of a node's execution on the run's monotonic sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeTrace {
    /// Index of the batch the node was dispatched in.
    pub batch: usize,
    pub started_seq: u64,
    pub resolved_seq: u64,
    pub attempts: u32,
}

/// Everything a caller needs to present a finished run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunOutcome {
    pub run_id: Uuid,
    pub status: RunStatus,
    /// Every node ID mapped to its result or failure record.
    pub results: BTreeMap<String, NodeOutcome>,
    /// Node IDs per dispatched batch, in dispatch order.
    pub batches: Vec<Vec<String>>,
    pub dropped_edges: Vec<DroppedEdge>,
    /// Nodes left unresolved when the run stalled.
    pub stalled_nodes: Vec<String>,
    pub traces: BTreeMap<String, NodeTrace>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl RunOutcome {
    pub fn output(&self, node_id: &str) -> Option<&NodeOutput> {
        self.results.get(node_id).and_then(NodeOutcome::output)
    }

    pub fn failure(&self, node_id: &str) -> Option<&FailureRecord> {
        self.results.get(node_id).and_then(NodeOutcome::failure)
    }

    /// IDs of nodes that failed or were skipped.
    pub fn failed_nodes(&self) -> Vec<&str> {
        self.results
            .iter()
            .filter(|(_, outcome)| outcome.is_failed())
            .map(|(id, _)| id.as_str())
            .collect()
    }
}
