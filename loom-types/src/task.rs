//! Task state and result — the data handed to, and returned from, the
//! external ReAct engine.

use crate::id::{ParentRunId, RunId, SessionId};
use crate::message::{Message, ToolResult};
use crate::workflow::WorkflowSnapshot;
use serde::{Deserialize, Serialize};

/// Why a task's execution ended.
#[non_exhaustive]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The agent produced a final answer.
    Complete,
    /// The agent is waiting on the user to answer a question.
    AwaitUserInput,
    /// The run was cancelled via context cancellation.
    Cancelled,
    /// The ReAct engine failed; `TaskResult` was substituted with a
    /// minimal error placeholder.
    Error,
    /// Future stop reasons the engine may introduce.
    Custom(String),
}

impl StopReason {
    /// The snake_case wire form, matching this type's serde rename. Used
    /// wherever a stop reason lands in a string field (memory slots,
    /// stage payloads).
    pub fn as_str(&self) -> &str {
        match self {
            StopReason::Complete => "complete",
            StopReason::AwaitUserInput => "await_user_input",
            StopReason::Cancelled => "cancelled",
            StopReason::Error => "error",
            StopReason::Custom(s) => s.as_str(),
        }
    }
}

/// State handed to the ReAct engine for one task execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskState {
    /// Full message transcript for this task, including any proactive
    /// injection appended by the hook registry.
    pub messages: Vec<Message>,
    /// Tool results carried into this task (e.g. from a resumed
    /// checkpoint).
    pub tool_results: Vec<ToolResult>,
    /// Iterations consumed so far.
    pub iterations: u32,
    /// Tokens consumed so far.
    pub token_count: u64,
    /// The owning session.
    pub session_id: SessionId,
    /// This task's own run id.
    pub run_id: RunId,
    /// The delegating run's id, if this is a subagent/delegated run.
    pub parent_run_id: ParentRunId,
    /// Free-text notes carried through from the session.
    pub important: Vec<String>,
}

impl TaskState {
    /// Build the initial state for a fresh (non-resumed) task.
    pub fn new(session_id: SessionId, run_id: RunId, parent_run_id: ParentRunId) -> Self {
        Self {
            messages: Vec::new(),
            tool_results: Vec::new(),
            iterations: 0,
            token_count: 0,
            session_id,
            run_id,
            parent_run_id,
            important: Vec::new(),
        }
    }
}

/// Result of executing one task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    /// The agent's final answer text, if any.
    pub answer: String,
    /// Full message transcript produced during the task.
    pub messages: Vec<Message>,
    /// Iterations consumed.
    pub iterations: u32,
    /// Tokens consumed.
    pub tokens_used: u64,
    /// Why execution ended.
    pub stop_reason: StopReason,
    /// The owning session.
    pub session_id: SessionId,
    /// This task's run id.
    pub run_id: RunId,
    /// The delegating run's id, if any.
    pub parent_run_id: ParentRunId,
    /// External user id this task ran on behalf of, if known — carried
    /// through from the request context so post-task hooks
    /// don't need a second lookup.
    pub user_id: Option<String>,
    /// Channel identifier, if this task ran in a group context.
    pub channel: Option<String>,
    /// Sender id within the channel, if any.
    pub sender_id: Option<String>,
    /// Chat id within the channel, if any.
    pub chat_id: Option<String>,
    /// Workflow DAG snapshot attached by the coordinator.
    pub workflow: WorkflowSnapshot,
    /// Free-text notes carried through to the session.
    pub important: Vec<String>,
}

impl TaskResult {
    /// A minimal error placeholder substituted when the ReAct engine
    /// fails outright — `ExecuteTask` never returns a nil result
    /// externally.
    pub fn error_placeholder(
        session_id: SessionId,
        run_id: RunId,
        parent_run_id: ParentRunId,
        workflow: WorkflowSnapshot,
        message: impl Into<String>,
    ) -> Self {
        Self {
            answer: message.into(),
            messages: Vec::new(),
            iterations: 0,
            tokens_used: 0,
            stop_reason: StopReason::Error,
            session_id,
            run_id,
            parent_run_id,
            user_id: None,
            channel: None,
            sender_id: None,
            chat_id: None,
            workflow,
            important: Vec::new(),
        }
    }

    /// A result stamped with `stop_reason = cancelled`, persisted when
    /// the caller's context is cancelled mid-task.
    pub fn cancelled(
        session_id: SessionId,
        run_id: RunId,
        parent_run_id: ParentRunId,
        workflow: WorkflowSnapshot,
    ) -> Self {
        Self {
            answer: String::new(),
            messages: Vec::new(),
            iterations: 0,
            tokens_used: 0,
            stop_reason: StopReason::Cancelled,
            session_id,
            run_id,
            parent_run_id,
            user_id: None,
            channel: None,
            sender_id: None,
            chat_id: None,
            workflow,
            important: Vec::new(),
        }
    }

    /// Extract the question the agent is waiting on, when the stop
    /// reason is [`StopReason::AwaitUserInput`]. Used to populate the
    /// `await_user_input_question` metadata key. Returns `None` when no
    /// question can be extracted, in which case the metadata pair is
    /// cleared rather than set.
    pub fn extract_await_question(&self) -> Option<&str> {
        if self.stop_reason != StopReason::AwaitUserInput {
            return None;
        }
        let trimmed = self.answer.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed)
        }
    }
}

/// Lightweight view of an in-flight or completed task, handed to
/// proactive hooks instead of the full `TaskState`/`TaskResult`.
#[derive(Debug, Clone)]
pub struct TaskInfo<'a> {
    /// The new task input text, if this is a pre-task view.
    pub input: &'a str,
    /// The owning session.
    pub session_id: &'a SessionId,
    /// This task's run id.
    pub run_id: &'a RunId,
    /// External user id, if known.
    pub user_id: Option<&'a str>,
    /// Channel identifier, if this task arrived on a group channel.
    pub channel: Option<&'a str>,
    /// Chat id within the channel, for group-scoped memory.
    pub chat_id: Option<&'a str>,
}
