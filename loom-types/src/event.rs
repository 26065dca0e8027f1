//! Internal unified events — what the ReAct engine emits before the
//! translator lifts them into [`crate::envelope::WorkflowEventEnvelope`]s.
//! Lives here rather than in the orchestration crate so the engine and
//! the translator can share the vocabulary without a dependency cycle.

use crate::envelope::WorkflowEventEnvelope;
use crate::id::RunId;
use crate::workflow::WorkflowSnapshot;
use rust_decimal::Decimal;
use std::collections::HashMap;

/// Free-form event payload, identical in shape to the envelope's own
/// `payload` field.
pub type Payload = HashMap<String, serde_json::Value>;

/// An event as the ReAct engine (or a subflow it delegated to) produces
/// it, before translation.
#[derive(Debug, Clone)]
pub enum UnifiedEvent {
    /// Already in canonical envelope form — passed through unchanged.
    Canonical(Box<WorkflowEventEnvelope>),
    /// A context snapshot diagnostic, passed through raw.
    ContextSnapshot {
        /// Owning run.
        run_id: RunId,
        /// The snapshot payload.
        snapshot: WorkflowSnapshot,
    },
    /// A pre-analysis emoji diagnostic, passed through raw.
    PreAnalysisEmoji {
        /// Owning run.
        run_id: RunId,
        /// The emoji text.
        emoji: String,
    },
    /// One ReAct loop step.
    Step {
        /// Owning run.
        run_id: RunId,
        /// Step node id.
        node_id: String,
        /// Extra payload.
        payload: Payload,
    },
    /// One ReAct loop iteration boundary.
    Iteration {
        /// Owning run.
        run_id: RunId,
        /// Iteration node id.
        node_id: String,
        /// Extra payload.
        payload: Payload,
    },
    /// A tool call started.
    ToolStarted {
        /// Owning run.
        run_id: RunId,
        /// The tool call's id.
        call_id: String,
        /// Extra payload.
        payload: Payload,
    },
    /// A tool call completed.
    ToolCompleted {
        /// Owning run.
        run_id: RunId,
        /// The tool call's id.
        call_id: String,
        /// The tool's name, for SLA bucketing.
        tool_name: String,
        /// Observed latency in milliseconds.
        latency_ms: u64,
        /// Whether the call succeeded.
        success: bool,
        /// USD cost of this call, if known.
        cost: Decimal,
        /// Extra payload (may carry `artifact_manifest`).
        payload: Payload,
    },
    /// A model generation.
    Generation {
        /// Owning run.
        run_id: RunId,
        /// Generation node id.
        node_id: String,
        /// Extra payload.
        payload: Payload,
    },
    /// The task's final result.
    ResultFinal {
        /// Owning run.
        run_id: RunId,
        /// Whether this is the terminal chunk of a streamed result.
        stream_finished: bool,
        /// Extra payload.
        payload: Payload,
    },
    /// The task was cancelled.
    ResultCancelled {
        /// Owning run.
        run_id: RunId,
    },
    /// A free-form diagnostic.
    Diagnostic {
        /// Owning run.
        run_id: RunId,
        /// Extra payload.
        payload: Payload,
    },
    /// New input arriving mid-task.
    Input {
        /// Owning run.
        run_id: RunId,
        /// Extra payload.
        payload: Payload,
    },
    /// A background task lifecycle event.
    Background {
        /// Owning run.
        run_id: RunId,
        /// Node id, typically the background task id.
        node_id: String,
        /// Extra payload.
        payload: Payload,
    },
    /// An event from an external collaborating agent.
    ExternalAgent {
        /// Owning run.
        run_id: RunId,
        /// Extra payload.
        payload: Payload,
    },
    /// Input destined for an external collaborating agent.
    ExternalInput {
        /// Owning run.
        run_id: RunId,
        /// Extra payload.
        payload: Payload,
    },
    /// A wrapped event produced by a delegated subtask.
    Subflow {
        /// The subtask's own run id.
        run_id: RunId,
        /// The delegating flow's run id.
        parent_run_id: RunId,
        /// Index of this subtask within the parent flow.
        index: u32,
        /// Total subtasks dispatched by the parent flow.
        total: u32,
        /// Short preview of the subtask's input.
        preview: String,
        /// The parent flow's configured parallelism cap, if any.
        max_parallel: Option<u32>,
        /// The wrapped inner event.
        inner: Box<UnifiedEvent>,
    },
}

impl UnifiedEvent {
    /// The run id this event belongs to. For `Subflow` wrappers this is
    /// the subtask's own run id, not the parent's.
    pub fn run_id(&self) -> &RunId {
        match self {
            UnifiedEvent::Canonical(env) => &env.run_id,
            UnifiedEvent::ContextSnapshot { run_id, .. }
            | UnifiedEvent::PreAnalysisEmoji { run_id, .. }
            | UnifiedEvent::Step { run_id, .. }
            | UnifiedEvent::Iteration { run_id, .. }
            | UnifiedEvent::ToolStarted { run_id, .. }
            | UnifiedEvent::ToolCompleted { run_id, .. }
            | UnifiedEvent::Generation { run_id, .. }
            | UnifiedEvent::ResultFinal { run_id, .. }
            | UnifiedEvent::ResultCancelled { run_id }
            | UnifiedEvent::Diagnostic { run_id, .. }
            | UnifiedEvent::Input { run_id, .. }
            | UnifiedEvent::Background { run_id, .. }
            | UnifiedEvent::ExternalAgent { run_id, .. }
            | UnifiedEvent::ExternalInput { run_id, .. } => run_id,
            UnifiedEvent::Subflow { run_id, .. } => run_id,
        }
    }
}
