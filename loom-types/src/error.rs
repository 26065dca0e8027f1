//! Error taxonomy for the core, organized by handling policy rather
//! than by subsystem.

use thiserror::Error;

/// Errors from the session manager: sanitize, persist, reset.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum SessionError {
    /// The session store has no record for the given id.
    #[error("session not found: {0}")]
    NotFound(String),

    /// The store rejected a write.
    #[error("failed to save session: {0}")]
    SaveFailed(String),

    /// Serialization of session state failed.
    #[error("serialization error: {0}")]
    Serialization(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from the proactive hook registry and memory hooks. Hook
/// errors are logged and ignored by the registry — this type exists so
/// individual hooks can report *why*, even though the registry never
/// propagates it to the caller.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum HookError {
    /// The hook's own logic failed.
    #[error("hook failed: {0}")]
    Failed(String),

    /// A collaborator the hook depends on (memory service, etc.) failed.
    #[error("collaborator error: {0}")]
    Collaborator(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Errors from the background task registry.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum BackgroundError {
    /// No manager in any session owns the given task id.
    #[error("task \"{0}\" not found in any session")]
    TaskNotFound(String),

    /// The manager refused the cancellation for a reason other than
    /// "not found" — this aborts the cross-session search.
    #[error("cancel failed: {0}")]
    CancelFailed(String),
}

/// Errors from the ReAct engine collaborator and the preparation service.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum EngineError {
    /// Preparation of the execution environment failed.
    #[error("preparation failed: {0}")]
    PreparationFailed(String),

    /// The ReAct engine itself failed.
    #[error("task execution failed: {0}")]
    ExecutionFailed(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Top-level error returned by the agent coordinator. Each variant
/// carries a short human-readable prefix identifying the stage that
/// failed.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum CoordinatorError {
    /// Preparation service failed to build an execution environment.
    #[error("prepare execution: {0}")]
    Preparation(String),

    /// The ReAct engine failed outright (not substituted with an
    /// error TaskResult — this is for failures before that point).
    #[error("task execution failed: {0}")]
    Execution(#[from] EngineError),

    /// The caller's context was cancelled mid-task.
    #[error("task cancelled")]
    Cancelled,

    /// Session persistence failed after task completion.
    #[error("session save: {0}")]
    Session(#[from] SessionError),

    /// Context-window preview failed.
    #[error("build context window: {0}")]
    ContextWindow(String),

    /// Memory capture/recall failed in a way that the coordinator
    /// surfaces (the hook registry itself still ignores it).
    #[error("memory capture: {0}")]
    Memory(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}
