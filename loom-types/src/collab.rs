//! External collaborator traits. The coordinator and the engine
//! depend only on these — concrete implementations live in
//! `loom-state-memory`, `loom-state-fs`, `loom-hook-memory`, and
//! `loom-react`.

use crate::attachment::Attachment;
use crate::context::RequestContext;
use crate::error::{EngineError, HookError, SessionError};
use crate::event::UnifiedEvent;
use crate::id::{RunId, SessionId};
use crate::memory::{MemoryEntry, MemoryQuery};
use crate::message::Message;
use crate::session::Session;
use crate::task::{TaskResult, TaskState};
use async_trait::async_trait;
use rust_decimal::Decimal;

/// Sentinel returned by [`SessionStore::get`] when no session exists for
/// the given id. Not a variant of [`SessionError`] directly — callers
/// match on `Ok(None)` rather than an error.
pub type MaybeSession = Option<Session>;

/// Session persistence.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Fetch a session by id. `Ok(None)` means no such session exists —
    /// this is not an error.
    async fn get(&self, id: &SessionId) -> Result<MaybeSession, SessionError>;

    /// Persist a session, creating or overwriting it wholesale.
    async fn save(&self, session: &Session) -> Result<(), SessionError>;

    /// Create a brand new, empty session.
    async fn create(&self, id: &SessionId, now: i64) -> Result<Session, SessionError>;

    /// List known session ids, most-recently-updated first.
    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<SessionId>, SessionError>;

    /// Permanently remove a session and any persisted attachments.
    async fn delete(&self, id: &SessionId) -> Result<(), SessionError>;
}

/// Conversation history replay and append. The
/// history store is distinct from [`Session::messages`]: the session
/// holds only the latest turn's sanitized transcript, while the history
/// store accumulates every turn and is replayed into fresh task state
/// with `source = user_history`.
#[async_trait]
pub trait HistoryManager: Send + Sync {
    /// Replay the session's stored turns, oldest first.
    async fn replay(&self, session_id: &SessionId) -> Result<Vec<Message>, SessionError>;

    /// Append one turn's worth of messages to the session's history.
    async fn append_turn(
        &self,
        session_id: &SessionId,
        messages: Vec<Message>,
    ) -> Result<(), SessionError>;

    /// Drop all stored history for a session.
    async fn clear_session(&self, session_id: &SessionId) -> Result<(), SessionError>;
}

/// Cost accounting. Implementations typically wrap a provider's
/// per-token pricing table; the default no-op tracker always reports
/// zero.
pub trait CostTracker: Send + Sync {
    /// Record a task's token usage and return its cost in USD.
    fn record(&self, run_id: &RunId, input_tokens: u64, output_tokens: u64) -> Decimal;

    /// Running total cost for a run, in USD.
    fn total_for_run(&self, run_id: &RunId) -> Decimal;
}

/// Long-term memory recall and capture.
#[async_trait]
pub trait MemoryService: Send + Sync {
    /// Recall entries matching the query, most-relevant first.
    async fn recall(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>, HookError>;

    /// Persist a new entry, assigning it a stable key. The capture hooks
    /// apply the Jaccard-similarity dedup rule before calling this; the
    /// service itself stores unconditionally.
    async fn capture(&self, entry: MemoryEntry) -> Result<MemoryEntry, HookError>;
}

/// Attachment externalization and retrieval.
#[async_trait]
pub trait AttachmentPersister: Send + Sync {
    /// Persist an attachment's inline `data`, if any, to external
    /// storage and return it with `uri`/`workspace_path` set and `data`
    /// cleared, enforcing the "non-data URI implies no inline data"
    /// invariant idempotently. Small text/markdown payloads may
    /// be returned unchanged under the inline-retention policy.
    async fn externalize(
        &self,
        session_id: &SessionId,
        attachment: Attachment,
    ) -> Result<Attachment, SessionError>;

    /// Load a previously externalized attachment's bytes back, keyed by
    /// its `uri`.
    async fn load(&self, attachment: &Attachment) -> Result<Vec<u8>, SessionError>;
}

/// One-time migration of legacy inline attachments to the externalized
/// retention policy.
#[async_trait]
pub trait AttachmentMigrator: Send + Sync {
    /// Migrate every attachment in the session that is eligible for
    /// externalization but still carries inline `data`, in place.
    /// Returns the number of attachments rewritten.
    async fn migrate(&self, session: &mut Session) -> Result<u32, SessionError>;
}

/// Receiver for internal unified events, implemented by the event
/// pipeline that fronts the serializing listener. Kept in `loom-types`
/// so both the engine and the pipeline can depend on it without a
/// cycle.
pub trait EventSink: Send + Sync {
    /// Accept one event. Implementations must be safe for concurrent
    /// calls and must not block for long — ordering and fan-out happen
    /// downstream, behind a per-run queue.
    fn emit(&self, event: UnifiedEvent);
}

/// Observer invoked after each ReAct iteration with the in-flight task
/// state. The coordinator registers one that snapshots the session
/// asynchronously so diagnostics observe mid-task state.
#[async_trait]
pub trait IterationHook: Send + Sync {
    /// Called once per completed loop iteration.
    async fn on_iteration(&self, ctx: &RequestContext, state: &TaskState);
}

/// The external ReAct engine contract.
#[async_trait]
pub trait ReactEngine: Send + Sync {
    /// Run one task to completion (or to an await-user-input / error
    /// stop). Never panics; if this returns `Err`, the caller substitutes
    /// [`crate::task::TaskResult::error_placeholder`] — the engine does
    /// not forge one itself.
    async fn solve_task(
        &self,
        ctx: &RequestContext,
        env: ExecutionEnvironment,
    ) -> Result<TaskResult, EngineError>;

    /// Register a sink for internal unified events emitted while solving
    /// a task. The sink serializes delivery per run id downstream.
    fn set_event_listener(&self, listener: std::sync::Arc<dyn EventSink>);
}

/// Builds the [`ExecutionEnvironment`] for a task before the engine
/// runs.
#[async_trait]
pub trait PreparationService: Send + Sync {
    /// Assemble session, state, and task analysis for a fresh or resumed
    /// task. When a checkpoint for the session exists, the returned
    /// state resumes from it and the new task input is NOT appended.
    async fn prepare(
        &self,
        ctx: &RequestContext,
        input: &str,
    ) -> Result<ExecutionEnvironment, EngineError>;

    /// Override the environment summary folded into the system prompt.
    fn set_environment_summary(&self, summary: String);

    /// Resolve the named agent preset (system prompt, model defaults) to
    /// use for a task, falling back to the service's default preset.
    fn resolve_agent_preset(&self, name: Option<&str>) -> String;

    /// Resolve the named tool preset (a tool-name allowlist) to use for
    /// a task, falling back to "no restriction" when `None`.
    fn resolve_tool_preset(&self, name: Option<&str>) -> Option<Vec<String>>;
}

/// Mid-run checkpointing, keyed by session id: a task interrupted
/// mid-loop can be resumed by the next task on the same session.
#[async_trait]
pub trait CheckpointStore: Send + Sync {
    /// Save an in-progress task's state under its session id.
    async fn save(&self, session_id: &SessionId, state: &TaskState) -> Result<(), SessionError>;

    /// Load a previously checkpointed task's state, if any.
    async fn load(&self, session_id: &SessionId) -> Result<Option<TaskState>, SessionError>;

    /// Discard a checkpoint once the task has finished.
    async fn clear(&self, session_id: &SessionId) -> Result<(), SessionError>;
}

/// Per-task overrides resolved by the coordinator's runtime config
/// layer, merged over the engine's own defaults the same
/// way the engine merges per-request config over static config.
#[derive(Debug, Clone, Default)]
pub struct EngineOverrides {
    /// Model identifier override, if any.
    pub model: Option<String>,
    /// Maximum loop iterations override, if any.
    pub max_iterations: Option<u32>,
    /// Maximum output tokens per provider call override, if any.
    pub max_tokens: Option<u32>,
}

/// The coordinator's cheap pre-analysis of the task, carried on the
/// environment so stage envelopes can echo it.
#[derive(Debug, Clone, Default)]
pub struct TaskAnalysis {
    /// Short preview of the task input, for stage payloads and UI.
    pub input_preview: String,
    /// Keywords extracted from the input.
    pub keywords: Vec<String>,
    /// Whether the state was resumed from a checkpoint, in which case
    /// the new task input was not appended.
    pub resumed_from_checkpoint: bool,
}

/// Everything the ReAct engine needs to run one task: the session it
/// belongs to, the state it starts from, the resolved prompt and tool
/// restrictions, and the coordinator's analysis of the task.
pub struct ExecutionEnvironment {
    /// The owning session.
    pub session: Session,
    /// The task's starting state (messages, iteration count, ...).
    pub state: TaskState,
    /// Resolved system prompt, including the environment summary.
    pub system_prompt: String,
    /// Tool names this task is allowed to call, or `None` for no
    /// restriction.
    pub tool_allowlist: Option<Vec<String>>,
    /// Per-task engine overrides from the runtime config layer.
    pub overrides: EngineOverrides,
    /// Pre-analysis of the task input.
    pub analysis: TaskAnalysis,
}
