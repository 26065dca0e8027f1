//! Default [`PreparationService`]: loads or creates the session, replays
//! history, resumes from a checkpoint when one exists, and resolves the
//! system prompt from agent presets plus the environment summary.

use async_trait::async_trait;
use loom_types::collab::{
    CheckpointStore, ExecutionEnvironment, PreparationService, TaskAnalysis,
};
use loom_types::content::Content;
use loom_types::error::EngineError;
use loom_types::message::{Message, MessageSource};
use loom_types::task::TaskState;
use loom_types::text::{extract_keywords, truncate_runes};
use loom_types::{HistoryManager, RequestContext, SessionStore};
use std::collections::HashMap;
use std::sync::{Arc, Mutex};

const INPUT_PREVIEW_CHARS: usize = 120;

/// Stock preparation service backed by the session store and history
/// manager. Agent presets are named system prompts; tool presets are
/// named tool allowlists.
pub struct DefaultPreparation {
    store: Arc<dyn SessionStore>,
    history: Arc<dyn HistoryManager>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    default_prompt: String,
    agent_presets: HashMap<String, String>,
    tool_presets: HashMap<String, Vec<String>>,
    environment_summary: Mutex<String>,
    now_fn: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl DefaultPreparation {
    /// Build a preparation service over the given store and history.
    pub fn new(store: Arc<dyn SessionStore>, history: Arc<dyn HistoryManager>) -> Self {
        Self {
            store,
            history,
            checkpoints: None,
            default_prompt: "You are a helpful assistant.".to_string(),
            agent_presets: HashMap::new(),
            tool_presets: HashMap::new(),
            environment_summary: Mutex::new(String::new()),
            now_fn: Arc::new(default_now),
        }
    }

    /// Override the default system prompt.
    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.default_prompt = prompt.into();
        self
    }

    /// Register a named agent preset.
    pub fn with_agent_preset(mut self, name: impl Into<String>, prompt: impl Into<String>) -> Self {
        self.agent_presets.insert(name.into(), prompt.into());
        self
    }

    /// Register a named tool preset (an allowlist of tool names).
    pub fn with_tool_preset(mut self, name: impl Into<String>, tools: Vec<String>) -> Self {
        self.tool_presets.insert(name.into(), tools);
        self
    }

    /// Attach a checkpoint store; sessions with a live checkpoint resume
    /// from it instead of starting a fresh state.
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Override the clock used for session creation timestamps.
    pub fn with_clock(mut self, now_fn: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    fn build_system_prompt(&self, user_persona: &str) -> String {
        let mut pieces = vec![self.resolve_agent_preset(None)];
        let summary = self.environment_summary.lock().unwrap();
        if !summary.is_empty() {
            pieces.push(format!("## Environment\n\n{summary}"));
        }
        if !user_persona.is_empty() {
            pieces.push(format!("## User Persona\n\n{user_persona}"));
        }
        pieces.join("\n\n")
    }
}

fn default_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

#[async_trait]
impl PreparationService for DefaultPreparation {
    async fn prepare(
        &self,
        ctx: &RequestContext,
        input: &str,
    ) -> Result<ExecutionEnvironment, EngineError> {
        let session = match self
            .store
            .get(&ctx.session_id)
            .await
            .map_err(|e| EngineError::PreparationFailed(e.to_string()))?
        {
            Some(session) => session,
            None => self
                .store
                .create(&ctx.session_id, (self.now_fn)())
                .await
                .map_err(|e| EngineError::PreparationFailed(e.to_string()))?,
        };

        let mut resumed = false;
        let mut state = None;
        if let Some(checkpoints) = &self.checkpoints {
            match checkpoints.load(&ctx.session_id).await {
                Ok(Some(mut checkpointed)) => {
                    checkpointed.run_id = ctx.run_id.clone();
                    checkpointed.parent_run_id = ctx.parent_run_id.clone();
                    resumed = true;
                    state = Some(checkpointed);
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(session_id = %ctx.session_id, error = %e,
                        "checkpoint load failed, starting fresh");
                }
            }
        }

        let mut state = match state {
            Some(state) => state,
            None => {
                let mut state = TaskState::new(
                    ctx.session_id.clone(),
                    ctx.run_id.clone(),
                    ctx.parent_run_id.clone(),
                );
                let mut replayed = self
                    .history
                    .replay(&ctx.session_id)
                    .await
                    .unwrap_or_else(|e| {
                        tracing::warn!(session_id = %ctx.session_id, error = %e,
                            "history replay failed, starting without history");
                        Vec::new()
                    });
                // Replayed turns must never persist again.
                for message in &mut replayed {
                    message.source = MessageSource::UserHistory;
                }
                state.messages = replayed;
                if !input.is_empty() {
                    state.messages.push(Message::new(
                        "user",
                        Content::text(input),
                        MessageSource::UserInput,
                    ));
                }
                state
            }
        };
        state.important = session.important_notes.clone().unwrap_or_default();

        let analysis = TaskAnalysis {
            input_preview: truncate_runes(input, INPUT_PREVIEW_CHARS),
            keywords: extract_keywords(input),
            resumed_from_checkpoint: resumed,
        };

        Ok(ExecutionEnvironment {
            system_prompt: self.build_system_prompt(&session.user_persona),
            tool_allowlist: self.resolve_tool_preset(None),
            overrides: Default::default(),
            analysis,
            session,
            state,
        })
    }

    fn set_environment_summary(&self, summary: String) {
        *self.environment_summary.lock().unwrap() = summary;
    }

    fn resolve_agent_preset(&self, name: Option<&str>) -> String {
        name.and_then(|n| self.agent_presets.get(n))
            .cloned()
            .unwrap_or_else(|| self.default_prompt.clone())
    }

    fn resolve_tool_preset(&self, name: Option<&str>) -> Option<Vec<String>> {
        name.and_then(|n| self.tool_presets.get(n)).cloned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_state_memory::{MemoryCheckpointStore, MemoryHistoryManager, MemoryStore};
    use loom_types::id::{LogId, ParentRunId, RunId, SessionId};

    fn ctx() -> RequestContext {
        RequestContext::root(SessionId::new("s1"), RunId::new("r1"), LogId::new("l1"))
    }

    fn prep() -> DefaultPreparation {
        DefaultPreparation::new(
            Arc::new(MemoryStore::new()),
            Arc::new(MemoryHistoryManager::new()),
        )
        .with_clock(Arc::new(|| 100))
    }

    #[tokio::test]
    async fn creates_session_on_first_reference_and_appends_input() {
        let prep = prep();
        let env = prep.prepare(&ctx(), "deploy the gateway").await.unwrap();
        assert_eq!(env.session.id.as_str(), "s1");
        assert_eq!(env.state.messages.len(), 1);
        assert!(matches!(
            env.state.messages[0].source,
            MessageSource::UserInput
        ));
        assert!(!env.analysis.resumed_from_checkpoint);
        assert!(env.analysis.keywords.contains(&"deploy".to_string()));
    }

    #[tokio::test]
    async fn replayed_history_is_marked_user_history() {
        let history = Arc::new(MemoryHistoryManager::new());
        history
            .append_turn(
                &SessionId::new("s1"),
                vec![Message::new(
                    "user",
                    Content::text("earlier question"),
                    MessageSource::UserInput,
                )],
            )
            .await
            .unwrap();
        let prep = DefaultPreparation::new(Arc::new(MemoryStore::new()), history)
            .with_clock(Arc::new(|| 100));

        let env = prep.prepare(&ctx(), "next question").await.unwrap();
        assert_eq!(env.state.messages.len(), 2);
        assert!(matches!(
            env.state.messages[0].source,
            MessageSource::UserHistory
        ));
        assert!(matches!(
            env.state.messages[1].source,
            MessageSource::UserInput
        ));
    }

    #[tokio::test]
    async fn checkpoint_resume_skips_appending_the_new_input() {
        let checkpoints = Arc::new(MemoryCheckpointStore::new());
        let mut suspended = TaskState::new(
            SessionId::new("s1"),
            RunId::new("old-run"),
            ParentRunId::default(),
        );
        suspended.messages.push(Message::new(
            "user",
            Content::text("original task"),
            MessageSource::UserInput,
        ));
        suspended.iterations = 3;
        loom_types::CheckpointStore::save(checkpoints.as_ref(), &SessionId::new("s1"), &suspended)
            .await
            .unwrap();

        let prep = prep().with_checkpoint_store(checkpoints);
        let env = prep.prepare(&ctx(), "the answer is eu-west-1").await.unwrap();

        assert!(env.analysis.resumed_from_checkpoint);
        assert_eq!(env.state.iterations, 3);
        assert_eq!(env.state.run_id.as_str(), "r1");
        // The new input is not appended; injections are additive on top.
        assert_eq!(env.state.messages.len(), 1);
    }

    #[tokio::test]
    async fn system_prompt_folds_in_summary_and_persona() {
        let store = MemoryStore::new();
        let mut session = store.create(&SessionId::new("s1"), 0).await.unwrap();
        session.user_persona = "prefers terse replies".to_string();
        store.save(&session).await.unwrap();

        let prep = DefaultPreparation::new(
            Arc::new(store),
            Arc::new(MemoryHistoryManager::new()),
        )
        .with_system_prompt("Base prompt.");
        prep.set_environment_summary("linux host".to_string());

        let env = prep.prepare(&ctx(), "hello there").await.unwrap();
        assert!(env.system_prompt.contains("Base prompt."));
        assert!(env.system_prompt.contains("linux host"));
        assert!(env.system_prompt.contains("terse replies"));
    }

    #[test]
    fn presets_fall_back_to_defaults() {
        let prep = prep()
            .with_agent_preset("researcher", "You research.")
            .with_tool_preset("readonly", vec!["read_file".to_string()]);
        assert_eq!(prep.resolve_agent_preset(Some("researcher")), "You research.");
        assert_eq!(
            prep.resolve_agent_preset(Some("missing")),
            "You are a helpful assistant."
        );
        assert_eq!(
            prep.resolve_tool_preset(Some("readonly")),
            Some(vec!["read_file".to_string()])
        );
        assert_eq!(prep.resolve_tool_preset(None), None);
    }
}
