//! Workflow snapshot model — an immutable view of a DAG attached to
//! every [`crate::task::TaskResult`].

use crate::duration::DurationMs;
use crate::id::WorkflowId;
use serde::{Deserialize, Serialize};

/// Prefix identifying an internal tool-recorder node. Nodes whose id
/// begins with this pattern (or contains `:tools` as a path segment)
/// are bookkeeping only and MUST be filtered before external emission.
pub const TOOL_RECORDER_MARKER: &str = ":tools";

/// Whether a node id denotes an internal tool-recorder node, e.g.
/// `react:iter:3:tools` and variants containing `:tools`.
pub fn is_tool_recorder_node(node_id: &str) -> bool {
    node_id.contains(TOOL_RECORDER_MARKER)
}

/// Overall phase of a workflow DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowPhase {
    /// Not yet started.
    Pending,
    /// In flight.
    Running,
    /// Finished without error.
    Succeeded,
    /// Finished with an error.
    Failed,
}

/// Status of a single node within the DAG.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeStatus {
    /// Not yet started.
    Pending,
    /// In flight.
    Running,
    /// Finished without error.
    Succeeded,
    /// Finished with an error.
    Failed,
}

/// A single node in the workflow DAG.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    /// The node's id, unique within the snapshot.
    pub id: String,
    /// Current status.
    pub status: NodeStatus,
    /// Input the node was given, if captured.
    pub input: Option<serde_json::Value>,
    /// Output the node produced, if captured.
    pub output: Option<serde_json::Value>,
}

/// Count of nodes in each status, used as a cheap progress summary.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct StatusSummary {
    /// Nodes pending.
    pub pending: u32,
    /// Nodes running.
    pub running: u32,
    /// Nodes succeeded.
    pub succeeded: u32,
    /// Nodes failed.
    pub failed: u32,
}

/// Immutable snapshot of a DAG: nodes, phase, ordered id list, and
/// summary counts.
///
/// Invariant: every id in `order` corresponds to exactly one node in
/// `nodes`. Use [`WorkflowSnapshot::sanitized`] to obtain an
/// externally-safe copy with tool-recorder nodes filtered out.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowSnapshot {
    /// The workflow's id.
    pub id: WorkflowId,
    /// Overall phase.
    pub phase: WorkflowPhase,
    /// Node ids in emission order.
    pub order: Vec<String>,
    /// All nodes, keyed implicitly by `WorkflowNode::id`.
    pub nodes: Vec<WorkflowNode>,
    /// Epoch millis when the workflow started.
    pub started_at: i64,
    /// Epoch millis when the workflow completed, if it has.
    pub completed_at: Option<i64>,
    /// Wall-clock duration, once completed.
    pub duration: DurationMs,
    /// Status summary across all (non-filtered) nodes.
    pub summary: StatusSummary,
}

impl WorkflowSnapshot {
    /// Create a new, empty running snapshot.
    pub fn new(id: WorkflowId, started_at: i64) -> Self {
        Self {
            id,
            phase: WorkflowPhase::Pending,
            order: Vec::new(),
            nodes: Vec::new(),
            started_at,
            completed_at: None,
            duration: DurationMs::ZERO,
            summary: StatusSummary::default(),
        }
    }

    /// Recompute `summary` from the current `nodes`.
    pub fn recompute_summary(&mut self) {
        let mut summary = StatusSummary::default();
        for node in &self.nodes {
            match node.status {
                NodeStatus::Pending => summary.pending += 1,
                NodeStatus::Running => summary.running += 1,
                NodeStatus::Succeeded => summary.succeeded += 1,
                NodeStatus::Failed => summary.failed += 1,
            }
        }
        self.summary = summary;
    }

    /// Return a copy with tool-recorder nodes filtered out of both
    /// `nodes` and `order`, and `summary` recomputed over the retained
    /// set.
    pub fn sanitized(&self) -> Self {
        let nodes: Vec<WorkflowNode> = self
            .nodes
            .iter()
            .filter(|n| !is_tool_recorder_node(&n.id))
            .cloned()
            .collect();
        let retained: std::collections::HashSet<&str> =
            nodes.iter().map(|n| n.id.as_str()).collect();
        let order: Vec<String> = self
            .order
            .iter()
            .filter(|id| retained.contains(id.as_str()))
            .cloned()
            .collect();

        let mut sanitized = Self {
            id: self.id.clone(),
            phase: self.phase,
            order,
            nodes,
            started_at: self.started_at,
            completed_at: self.completed_at,
            duration: self.duration,
            summary: StatusSummary::default(),
        };
        sanitized.recompute_summary();
        sanitized
    }
}
