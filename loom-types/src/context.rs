//! Per-request context propagated immutably through a run. The subagent
//! marker travels here so every spawned worker inherits it.

use crate::id::{CorrelationId, LogId, ParentRunId, RunId, SessionId, UserId};

/// Identity and tracing fields threaded through one `ExecuteTask` call
/// and every collaborator it invokes. Built once by the coordinator and
/// passed down by reference; nothing downstream mutates it.
#[derive(Debug, Clone)]
pub struct RequestContext {
    /// The owning session.
    pub session_id: SessionId,
    /// This task's own run id.
    pub run_id: RunId,
    /// The delegating run's id, if this is a subagent/delegated run.
    pub parent_run_id: ParentRunId,
    /// Per-request trace id, fresh on every call.
    pub log_id: LogId,
    /// Root of the causal chain — equal to the root run's own `run_id`.
    pub correlation_id: CorrelationId,
    /// External user id, if known.
    pub user_id: Option<UserId>,
    /// Depth of agent delegation; 0 for a root run.
    pub agent_level: u32,
    /// Set for delegated/subagent runs: no hooks fire, no session is
    /// persisted, and the correlation id is inherited rather than
    /// freshly minted.
    pub is_subagent: bool,
}

impl RequestContext {
    /// Build the context for a fresh root run.
    pub fn root(session_id: SessionId, run_id: RunId, log_id: LogId) -> Self {
        let correlation_id = CorrelationId::new(run_id.as_str());
        Self {
            session_id,
            run_id,
            parent_run_id: ParentRunId::default(),
            log_id,
            correlation_id,
            user_id: None,
            agent_level: 0,
            is_subagent: false,
        }
    }

    /// Derive the context for a delegated/subagent run: a fresh
    /// `run_id`, the parent's `run_id` recorded, the parent's
    /// `correlation_id` inherited unchanged, agent level incremented,
    /// and `is_subagent` set.
    pub fn delegate(&self, child_run_id: RunId, child_log_id: LogId) -> Self {
        Self {
            session_id: self.session_id.clone(),
            run_id: child_run_id,
            parent_run_id: ParentRunId::new(self.run_id.as_str()),
            log_id: child_log_id,
            correlation_id: self.correlation_id.clone(),
            user_id: self.user_id.clone(),
            agent_level: self.agent_level + 1,
            is_subagent: true,
        }
    }
}
