//! Event envelope — the uniform wire contract every internal event
//! is lifted into by the event translator.

use crate::id::{CorrelationId, LogId, ParentRunId, RunId, SessionId};
use crate::workflow::WorkflowSnapshot;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Current envelope wire version. Bump only on a breaking change to the
/// field set, never on additive changes — consumers must already
/// tolerate unknown payload keys.
pub const ENVELOPE_VERSION: u32 = 1;

/// What kind of node in the workflow DAG an envelope describes.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeKind {
    /// A generic DAG node.
    Node,
    /// One coordinator lifecycle stage (`prepare`, `execute`, ...).
    Orchestrator,
    /// One ReAct loop iteration.
    Iteration,
    /// One step within an iteration.
    Step,
    /// A tool invocation, keyed by `call_id`.
    Tool,
    /// A delegated/subagent subflow.
    Subflow,
    /// A model generation.
    Generation,
    /// The task's final result.
    Result,
    /// Free-form diagnostics (context snapshots, pre-analysis emojis).
    Diagnostic,
    /// New input arriving mid-task.
    Input,
    /// A background task lifecycle event.
    Background,
    /// An event originating from an external collaborating agent.
    ExternalAgent,
    /// Input destined for an external collaborating agent.
    ExternalInput,
    /// A produced artifact (e.g. `artifact.manifest`).
    Artifact,
}

/// The uniform envelope every internal event is lifted into before
/// reaching external listeners.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowEventEnvelope {
    /// Wire format version; always [`ENVELOPE_VERSION`] today.
    pub version: u32,
    /// Dotted event type, e.g. `tool.completed`, `result.final`.
    pub event_type: String,
    /// What kind of node this envelope describes.
    pub node_kind: NodeKind,
    /// Node id. Empty for diagnostics; `call_id` for tool events;
    /// `summarize` for the final result; `subflow-<index>` for subtasks.
    pub node_id: String,
    /// The workflow this envelope belongs to.
    pub workflow_id: Option<String>,
    /// The run this envelope belongs to.
    pub run_id: RunId,
    /// Whether this envelope describes a delegated/subagent subtask.
    pub is_subtask: bool,
    /// The subtask's index within its parent flow, if `is_subtask`.
    pub subtask_index: Option<u32>,
    /// Total subtasks dispatched by the parent flow, if known.
    pub total_subtasks: Option<u32>,
    /// A short preview of the subtask's input, for UI display.
    pub subtask_preview: Option<String>,
    /// The parent flow's configured parallelism cap, if any.
    pub max_parallel: Option<u32>,
    /// The owning session.
    pub session_id: Option<SessionId>,
    /// The task (run) id this envelope was emitted for.
    pub task_id: Option<RunId>,
    /// The delegating task's id, if any.
    pub parent_task_id: Option<ParentRunId>,
    /// Per-request trace id.
    pub log_id: Option<LogId>,
    /// Root of the causal chain.
    pub correlation_id: Option<CorrelationId>,
    /// Depth of agent delegation (0 for a root run).
    pub agent_level: u32,
    /// Epoch millis when the envelope was produced.
    pub timestamp: i64,
    /// Monotonic per-run sequence number, assigned by the translator,
    /// used by listeners to detect gaps.
    pub seq: u64,
    /// Forward-compatible free-form payload.
    pub payload: HashMap<String, serde_json::Value>,
}

impl WorkflowEventEnvelope {
    /// Build a minimal envelope with the required identity fields set
    /// and everything else defaulted.
    pub fn new(event_type: impl Into<String>, node_kind: NodeKind, run_id: RunId) -> Self {
        Self {
            version: ENVELOPE_VERSION,
            event_type: event_type.into(),
            node_kind,
            node_id: String::new(),
            workflow_id: None,
            run_id,
            is_subtask: false,
            subtask_index: None,
            total_subtasks: None,
            subtask_preview: None,
            max_parallel: None,
            session_id: None,
            task_id: None,
            parent_task_id: None,
            log_id: None,
            correlation_id: None,
            agent_level: 0,
            timestamp: 0,
            seq: 0,
            payload: HashMap::new(),
        }
    }

    /// Replace the carried workflow snapshot with its sanitized form and
    /// stash it in the payload under `workflow`.
    pub fn with_sanitized_workflow(mut self, snapshot: &WorkflowSnapshot) -> Self {
        if let Ok(value) = serde_json::to_value(snapshot.sanitized()) {
            self.payload.insert("workflow".to_string(), value);
        }
        self
    }

    /// Whether this envelope's `event_type` is terminal for its run-id's
    /// serializing queue: `result.cancelled`, or `result.final`
    /// with `stream_finished = true` in the payload.
    pub fn is_terminal(&self) -> bool {
        if self.event_type == "result.cancelled" {
            return true;
        }
        if self.event_type == "result.final" {
            return self
                .payload
                .get("stream_finished")
                .and_then(|v| v.as_bool())
                .unwrap_or(false);
        }
        false
    }
}
