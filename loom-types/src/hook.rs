//! Proactive hook registry types. A `ProactiveHook` observes
//! task start/completion — distinct from per-iteration guardrail hooks,
//! which are an internal concern of the ReAct engine and not part of
//! this contract.

use crate::error::HookError;
use crate::task::{TaskInfo, TaskResult};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// What kind of content a hook is contributing.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InjectionType {
    /// Recalled long-term memory.
    MemoryRecall,
    /// A proactive suggestion.
    Suggestion,
    /// A warning surfaced to the agent.
    Warning,
    /// Context pulled from an OKR/goal-tracking system.
    OkrContext,
    /// A notice that a particular skill/capability was activated.
    SkillActivation,
}

impl InjectionType {
    /// Human-readable subsection heading used by
    /// [`format_injections_as_context`].
    pub fn heading(&self) -> &'static str {
        match self {
            InjectionType::MemoryRecall => "Recalled Memory",
            InjectionType::Suggestion => "Suggestion",
            InjectionType::Warning => "Warning",
            InjectionType::OkrContext => "OKR Context",
            InjectionType::SkillActivation => "Skill Activation",
        }
    }
}

/// A single piece of content a hook contributes to be prepended into
/// the model's context for a task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Injection {
    /// What kind of content this is.
    pub injection_type: InjectionType,
    /// The content itself.
    pub content: String,
    /// Which hook produced it, for attribution in the formatted block.
    pub source: String,
    /// Higher priority sorts first. Ties preserve registration order.
    pub priority: i32,
}

/// Render a set of injections (already in priority order) as a single
/// markdown block headed `"## Proactive Context"`, one subsection per
/// injection, typed and sourced.
pub fn format_injections_as_context(injections: &[Injection]) -> String {
    if injections.is_empty() {
        return String::new();
    }
    let mut out = String::from("## Proactive Context\n\n");
    for injection in injections {
        out.push_str(&format!(
            "### {} ({})\n\n{}\n\n",
            injection.injection_type.heading(),
            injection.source,
            injection.content
        ));
    }
    out
}

/// A hook that observes task start and completion.
///
/// Implementations: memory recall, memory capture,
/// conversation capture.
#[async_trait]
pub trait ProactiveHook: Send + Sync {
    /// The hook's name, for logging and attribution.
    fn name(&self) -> &str;

    /// Called before a task runs. Returns zero or more injections to
    /// prepend to the model's context. Errors are logged by the
    /// registry and do not stop other hooks from running.
    async fn on_task_start(&self, info: &TaskInfo<'_>) -> Result<Vec<Injection>, HookError>;

    /// Called after a task completes, unconditionally. Errors are
    /// logged and ignored — every hook still runs.
    async fn on_task_completed(&self, result: &TaskResult) -> Result<(), HookError>;
}
