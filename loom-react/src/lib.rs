#![deny(missing_docs)]
//! ReAct engine — model + tools in a reasoning loop.
//!
//! Implements [`loom_types::ReactEngine`] by running the
//! Reason-Act-Observe cycle: assemble context → call model → execute
//! tools → repeat until done. Every step of the loop is narrated as
//! [`UnifiedEvent`]s through the registered [`EventSink`], and the loop
//! maintains the [`WorkflowSnapshot`] that ends up on the
//! [`TaskResult`]. Tool activity is additionally recorded on internal
//! `react:iter:<n>:tools` bookkeeping nodes, which the event pipeline
//! filters before anything reaches an external listener.

use async_trait::async_trait;
use loom_provider::convert::{
    message_to_provider_message, parts_to_content, provider_parts_to_assistant_message,
};
use loom_provider::types::{
    ContentPart, ProviderMessage, ProviderRequest, ProviderResponse, StopReason as WireStop,
    ToolSchema,
};
use loom_provider::{ContextStrategy, NoCompaction, Provider, ProviderDefaults};
use loom_tool::{ToolError, ToolRegistry};
use loom_types::collab::{CheckpointStore, EventSink, ExecutionEnvironment, IterationHook};
use loom_types::content::Content;
use loom_types::error::EngineError;
use loom_types::event::{Payload, UnifiedEvent};
use loom_types::id::WorkflowId;
use loom_types::message::{Message, MessageSource, ToolResult};
use loom_types::task::{StopReason, TaskResult, TaskState};
use loom_types::text::truncate_runes;
use loom_types::workflow::{NodeStatus, WorkflowNode, WorkflowPhase, WorkflowSnapshot};
use loom_types::{ReactEngine, RequestContext};
use rust_decimal::Decimal;
use serde_json::json;
use std::sync::{Arc, RwLock};
use std::time::Instant;

/// Built-in pseudo-tool: calling it suspends the task with
/// `stop_reason = await_user_input` instead of executing anything. The
/// question travels back as the task's answer and lands in session
/// metadata.
const ASK_USER_TOOL: &str = "ask_user";

const ANSWER_PREVIEW_CHARS: usize = 200;

/// Resolved configuration merging engine defaults with per-task
/// overrides from the execution environment.
struct ResolvedConfig {
    model: Option<String>,
    system: String,
    max_iterations: u32,
    max_tokens: u32,
    allowed_tools: Option<Vec<String>>,
}

/// In-process ReAct engine, generic over `P: Provider` (not
/// object-safe). The object-safe boundary is [`loom_types::ReactEngine`],
/// which `LocalReactEngine<P>` implements via `#[async_trait]`.
pub struct LocalReactEngine<P: Provider> {
    provider: P,
    tools: Arc<ToolRegistry>,
    context_strategy: Box<dyn ContextStrategy>,
    defaults: ProviderDefaults,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    iteration_hooks: Vec<Arc<dyn IterationHook>>,
    listener: RwLock<Option<Arc<dyn EventSink>>>,
    now_fn: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl<P: Provider> LocalReactEngine<P> {
    /// Create an engine with the given provider, tool registry, and
    /// completion defaults. No compaction, no checkpointing, no
    /// iteration hooks until configured.
    pub fn new(provider: P, tools: Arc<ToolRegistry>, defaults: ProviderDefaults) -> Self {
        Self {
            provider,
            tools,
            context_strategy: Box::new(NoCompaction),
            defaults,
            checkpoints: None,
            iteration_hooks: Vec::new(),
            listener: RwLock::new(None),
            now_fn: Arc::new(default_now),
        }
    }

    /// Replace the context compaction strategy.
    pub fn with_context_strategy(mut self, strategy: Box<dyn ContextStrategy>) -> Self {
        self.context_strategy = strategy;
        self
    }

    /// Attach a checkpoint store. In-flight state is saved under the
    /// session id after every iteration; an `await_user_input` stop
    /// leaves the checkpoint in place for the next task to resume, a
    /// completed task clears it.
    pub fn with_checkpoint_store(mut self, store: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(store);
        self
    }

    /// Register an iteration hook, called after each completed loop
    /// iteration with the in-flight state.
    pub fn with_iteration_hook(mut self, hook: Arc<dyn IterationHook>) -> Self {
        self.iteration_hooks.push(hook);
        self
    }

    /// Override the clock used for workflow timestamps.
    pub fn with_clock(mut self, now_fn: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    fn emit(&self, event: UnifiedEvent) {
        let listener = self.listener.read().unwrap();
        if let Some(sink) = listener.as_ref() {
            sink.emit(event);
        }
    }

    fn emit_snapshot(&self, ctx: &RequestContext, snapshot: &WorkflowSnapshot) {
        self.emit(UnifiedEvent::ContextSnapshot {
            run_id: ctx.run_id.clone(),
            snapshot: snapshot.clone(),
        });
    }

    fn resolve_config(&self, env: &ExecutionEnvironment) -> ResolvedConfig {
        let overrides = &env.overrides;
        let system = if env.system_prompt.is_empty() {
            self.defaults.system_prompt.clone()
        } else {
            env.system_prompt.clone()
        };
        ResolvedConfig {
            model: overrides.model.clone().or_else(|| {
                if self.defaults.default_model.is_empty() {
                    None
                } else {
                    Some(self.defaults.default_model.clone())
                }
            }),
            system,
            max_iterations: overrides
                .max_iterations
                .unwrap_or(self.defaults.default_max_turns),
            max_tokens: overrides
                .max_tokens
                .unwrap_or(self.defaults.default_max_tokens),
            allowed_tools: env.tool_allowlist.clone(),
        }
    }

    fn build_tool_schemas(&self, config: &ResolvedConfig, is_subagent: bool) -> Vec<ToolSchema> {
        let mut schemas: Vec<ToolSchema> = self
            .tools
            .iter()
            .filter(|tool| !is_subagent || tool.subagent_allowed())
            .map(|tool| ToolSchema {
                name: tool.name().to_string(),
                description: tool.description().to_string(),
                input_schema: tool.input_schema(),
            })
            .collect();

        schemas.push(ask_user_schema());

        if let Some(allowed) = &config.allowed_tools {
            schemas.retain(|s| allowed.contains(&s.name));
        }

        schemas
    }

    async fn run_tool(&self, name: &str, input: serde_json::Value) -> (String, Option<String>) {
        let result = match self.tools.get(name) {
            Some(tool) => tool.call(input).await,
            None => Err(ToolError::NotFound(name.to_string())),
        };
        match result {
            Ok(value) => (serde_json::to_string(&value).unwrap_or_default(), None),
            Err(e) => {
                let message = e.to_string();
                (message.clone(), Some(message))
            }
        }
    }

    async fn finish(
        &self,
        ctx: &RequestContext,
        state: TaskState,
        mut workflow: WorkflowSnapshot,
        stop_reason: StopReason,
        answer: String,
    ) -> Result<TaskResult, EngineError> {
        let now = (self.now_fn)();
        workflow.phase = WorkflowPhase::Succeeded;
        workflow.completed_at = Some(now);
        workflow.duration =
            loom_types::DurationMs::from_millis(now.saturating_sub(workflow.started_at) as u64);
        workflow.recompute_summary();
        self.emit_snapshot(ctx, &workflow);

        if let Some(checkpoints) = &self.checkpoints {
            let outcome = match stop_reason {
                // Suspended tasks leave their state behind for the next
                // task on this session to resume from.
                StopReason::AwaitUserInput => checkpoints.save(&ctx.session_id, &state).await,
                _ => checkpoints.clear(&ctx.session_id).await,
            };
            if let Err(e) = outcome {
                tracing::warn!(session_id = %ctx.session_id, error = %e, "checkpoint update failed");
            }
        }

        let mut payload = Payload::new();
        payload.insert(
            "answer".to_string(),
            json!(truncate_runes(&answer, ANSWER_PREVIEW_CHARS)),
        );
        payload.insert("stop_reason".to_string(), json!(stop_reason.as_str()));
        payload.insert("tokens_used".to_string(), json!(state.token_count));
        self.emit(UnifiedEvent::ResultFinal {
            run_id: ctx.run_id.clone(),
            stream_finished: true,
            payload,
        });

        Ok(TaskResult {
            answer,
            messages: state.messages,
            iterations: state.iterations,
            tokens_used: state.token_count,
            stop_reason,
            session_id: ctx.session_id.clone(),
            run_id: ctx.run_id.clone(),
            parent_run_id: ctx.parent_run_id.clone(),
            user_id: ctx.user_id.as_ref().map(|u| u.to_string()),
            channel: None,
            sender_id: None,
            chat_id: None,
            workflow,
            important: state.important,
        })
    }
}

#[async_trait]
impl<P: Provider + 'static> ReactEngine for LocalReactEngine<P> {
    async fn solve_task(
        &self,
        ctx: &RequestContext,
        env: ExecutionEnvironment,
    ) -> Result<TaskResult, EngineError> {
        let config = self.resolve_config(&env);
        let mut state = env.state;
        let tools = self.build_tool_schemas(&config, ctx.is_subagent);

        let mut workflow = WorkflowSnapshot::new(
            WorkflowId::new(format!("wf-{}", ctx.run_id)),
            (self.now_fn)(),
        );
        workflow.phase = WorkflowPhase::Running;
        self.emit_snapshot(ctx, &workflow);

        let mut provider_messages: Vec<ProviderMessage> =
            state.messages.iter().map(message_to_provider_message).collect();
        let mut last_text = String::new();

        while state.iterations < config.max_iterations {
            let iter = state.iterations + 1;
            let iter_node = format!("react:iter:{iter}");
            push_node(&mut workflow, &iter_node, NodeStatus::Running);

            let mut payload = Payload::new();
            payload.insert("iteration".to_string(), json!(iter));
            self.emit(UnifiedEvent::Iteration {
                run_id: ctx.run_id.clone(),
                node_id: iter_node.clone(),
                payload,
            });

            let request = ProviderRequest {
                model: config.model.clone(),
                messages: provider_messages.clone(),
                tools: tools.clone(),
                max_tokens: Some(config.max_tokens),
                temperature: None,
                system: Some(config.system.clone()),
                extra: serde_json::Value::Null,
            };

            let response = match self.provider.complete(request).await {
                Ok(response) => response,
                Err(e) => {
                    set_status(&mut workflow, &iter_node, NodeStatus::Failed);
                    workflow.phase = WorkflowPhase::Failed;
                    workflow.recompute_summary();
                    self.emit_snapshot(ctx, &workflow);
                    return Err(EngineError::ExecutionFailed(e.to_string()));
                }
            };

            state.token_count += response.usage.total();
            self.emit(UnifiedEvent::Generation {
                run_id: ctx.run_id.clone(),
                node_id: format!("react:iter:{iter}:generate"),
                payload: generation_payload(&response),
            });

            if let Some(text) = parts_to_content(&response.content).as_text() {
                last_text = text.to_string();
            }
            state
                .messages
                .push(provider_parts_to_assistant_message(&response.content));

            match response.stop_reason {
                WireStop::MaxTokens => {
                    set_status(&mut workflow, &iter_node, NodeStatus::Failed);
                    workflow.phase = WorkflowPhase::Failed;
                    workflow.recompute_summary();
                    self.emit_snapshot(ctx, &workflow);
                    return Err(EngineError::ExecutionFailed(
                        "output truncated (max_tokens)".into(),
                    ));
                }
                WireStop::ContentFilter => {
                    set_status(&mut workflow, &iter_node, NodeStatus::Failed);
                    workflow.phase = WorkflowPhase::Failed;
                    workflow.recompute_summary();
                    self.emit_snapshot(ctx, &workflow);
                    return Err(EngineError::ExecutionFailed("content filtered".into()));
                }
                WireStop::EndTurn => {
                    state.iterations = iter;
                    set_status(&mut workflow, &iter_node, NodeStatus::Succeeded);
                    return self
                        .finish(ctx, state, workflow, StopReason::Complete, last_text)
                        .await;
                }
                WireStop::ToolUse => {}
            }

            let tool_uses = response.tool_uses();

            if let Some((_, _, input)) = tool_uses.iter().find(|(_, name, _)| name == ASK_USER_TOOL)
            {
                let question = input
                    .get("question")
                    .and_then(|q| q.as_str())
                    .unwrap_or(last_text.as_str())
                    .to_string();
                state.iterations = iter;
                set_status(&mut workflow, &iter_node, NodeStatus::Succeeded);
                return self
                    .finish(ctx, state, workflow, StopReason::AwaitUserInput, question)
                    .await;
            }

            // Internal bookkeeping node for this iteration's tool batch.
            // Filtered out of everything external.
            let recorder_node = format!("react:iter:{iter}:tools");
            push_node(&mut workflow, &recorder_node, NodeStatus::Running);

            let mut provider_results = Vec::new();
            let mut tool_results = Vec::new();
            for (call_id, name, input) in tool_uses {
                let mut started = Payload::new();
                started.insert("tool_name".to_string(), json!(name));
                started.insert("arguments".to_string(), input.clone());
                self.emit(UnifiedEvent::ToolStarted {
                    run_id: ctx.run_id.clone(),
                    call_id: call_id.clone(),
                    payload: started,
                });

                let tool_start = Instant::now();
                let (content, error) = self.run_tool(&name, input).await;
                let latency_ms = tool_start.elapsed().as_millis() as u64;
                let success = error.is_none();

                let mut completed = Payload::new();
                completed.insert("tool_name".to_string(), json!(name));
                completed.insert("latency_ms".to_string(), json!(latency_ms));
                completed.insert("success".to_string(), json!(success));
                if let Ok(value) = serde_json::from_str::<serde_json::Value>(&content) {
                    if let Some(manifest) = value.get("artifact_manifest") {
                        completed.insert("artifact_manifest".to_string(), manifest.clone());
                    }
                    if let Some(title) = value.get("session_title") {
                        completed.insert("session_title".to_string(), title.clone());
                    }
                }
                self.emit(UnifiedEvent::ToolCompleted {
                    run_id: ctx.run_id.clone(),
                    call_id: call_id.clone(),
                    tool_name: name.clone(),
                    latency_ms,
                    success,
                    cost: Decimal::ZERO,
                    payload: completed,
                });

                provider_results.push(ContentPart::ToolResult {
                    tool_use_id: call_id.clone(),
                    content: content.clone(),
                    is_error: !success,
                });
                tool_results.push(ToolResult {
                    call_id,
                    content,
                    metadata: serde_json::Value::Null,
                    attachments: Default::default(),
                    error,
                });
            }

            set_status(&mut workflow, &recorder_node, NodeStatus::Succeeded);

            let mut tool_message =
                Message::new("tool", Content::text(""), MessageSource::ToolResult);
            tool_message.tool_results = tool_results.clone();
            state.messages.push(tool_message);
            state.tool_results.extend(tool_results);

            provider_messages.push(ProviderMessage::assistant(response.content));
            provider_messages.push(ProviderMessage::user(provider_results));

            state.iterations = iter;
            set_status(&mut workflow, &iter_node, NodeStatus::Succeeded);
            workflow.recompute_summary();
            self.emit_snapshot(ctx, &workflow);

            if let Some(checkpoints) = &self.checkpoints {
                if let Err(e) = checkpoints.save(&ctx.session_id, &state).await {
                    tracing::warn!(session_id = %ctx.session_id, error = %e, "iteration checkpoint failed");
                }
            }
            for hook in &self.iteration_hooks {
                hook.on_iteration(ctx, &state).await;
            }

            let limit = config.max_tokens as usize * 4;
            if self.context_strategy.should_compact(&provider_messages, limit) {
                provider_messages = self.context_strategy.compact(provider_messages);
            }
        }

        self.finish(
            ctx,
            state,
            workflow,
            StopReason::Custom("max_iterations".to_string()),
            last_text,
        )
        .await
    }

    fn set_event_listener(&self, listener: Arc<dyn EventSink>) {
        *self.listener.write().unwrap() = Some(listener);
    }
}

fn default_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn push_node(workflow: &mut WorkflowSnapshot, id: &str, status: NodeStatus) {
    workflow.nodes.push(WorkflowNode {
        id: id.to_string(),
        status,
        input: None,
        output: None,
    });
    workflow.order.push(id.to_string());
}

fn set_status(workflow: &mut WorkflowSnapshot, id: &str, status: NodeStatus) {
    if let Some(node) = workflow.nodes.iter_mut().find(|n| n.id == id) {
        node.status = status;
    }
}

fn generation_payload(response: &ProviderResponse) -> Payload {
    let mut payload = Payload::new();
    payload.insert("model".to_string(), json!(response.model));
    payload.insert(
        "input_tokens".to_string(),
        json!(response.usage.input_tokens),
    );
    payload.insert(
        "output_tokens".to_string(),
        json!(response.usage.output_tokens),
    );
    payload
}

fn ask_user_schema() -> ToolSchema {
    ToolSchema {
        name: ASK_USER_TOOL.into(),
        description: "Pause the task and ask the user a clarifying question.".into(),
        input_schema: json!({
            "type": "object",
            "properties": {
                "question": {"type": "string", "description": "The question to ask the user"}
            },
            "required": ["question"]
        }),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_provider::types::TokenUsage;
    use loom_provider::ProviderError;
    use loom_types::collab::{EngineOverrides, TaskAnalysis};
    use loom_types::id::{LogId, ParentRunId, RunId, SessionId};
    use loom_types::session::Session;
    use std::collections::VecDeque;
    use std::future::Future;
    use std::pin::Pin;
    use std::sync::Mutex;
    use tests_support::MemoryCheckpoints;

    struct MockProvider {
        responses: Mutex<VecDeque<ProviderResponse>>,
    }

    impl MockProvider {
        fn new(responses: Vec<ProviderResponse>) -> Self {
            Self {
                responses: Mutex::new(responses.into()),
            }
        }
    }

    impl Provider for MockProvider {
        fn complete(
            &self,
            _request: ProviderRequest,
        ) -> impl Future<Output = Result<ProviderResponse, ProviderError>> + Send {
            let response = self
                .responses
                .lock()
                .unwrap()
                .pop_front()
                .expect("MockProvider: no more responses queued");
            async move { Ok(response) }
        }
    }

    struct EchoTool;

    impl loom_tool::ToolDyn for EchoTool {
        fn name(&self) -> &str {
            "echo"
        }
        fn description(&self) -> &str {
            "Echoes input"
        }
        fn input_schema(&self) -> serde_json::Value {
            json!({"type": "object"})
        }
        fn call(
            &self,
            input: serde_json::Value,
        ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>>
        {
            Box::pin(async move { Ok(json!({"echoed": input})) })
        }
    }

    struct RecordingSink {
        events: Mutex<Vec<String>>,
    }

    impl EventSink for RecordingSink {
        fn emit(&self, event: UnifiedEvent) {
            let label = match &event {
                UnifiedEvent::ContextSnapshot { .. } => "snapshot".to_string(),
                UnifiedEvent::Iteration { node_id, .. } => format!("iteration:{node_id}"),
                UnifiedEvent::Generation { .. } => "generation".to_string(),
                UnifiedEvent::ToolStarted { call_id, .. } => format!("tool.started:{call_id}"),
                UnifiedEvent::ToolCompleted { call_id, .. } => format!("tool.completed:{call_id}"),
                UnifiedEvent::ResultFinal { .. } => "result.final".to_string(),
                _ => "other".to_string(),
            };
            self.events.lock().unwrap().push(label);
        }
    }

    fn text_response(text: &str) -> ProviderResponse {
        ProviderResponse {
            content: vec![ContentPart::Text {
                text: text.to_string(),
            }],
            stop_reason: WireStop::EndTurn,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 5,
                ..Default::default()
            },
            model: "mock-model".into(),
            cost: None,
            truncated: None,
        }
    }

    fn tool_use_response(id: &str, name: &str, input: serde_json::Value) -> ProviderResponse {
        ProviderResponse {
            content: vec![ContentPart::ToolUse {
                id: id.to_string(),
                name: name.to_string(),
                input,
            }],
            stop_reason: WireStop::ToolUse,
            usage: TokenUsage {
                input_tokens: 10,
                output_tokens: 15,
                ..Default::default()
            },
            model: "mock-model".into(),
            cost: None,
            truncated: None,
        }
    }

    fn ctx() -> RequestContext {
        RequestContext::root(SessionId::new("s1"), RunId::new("r1"), LogId::new("l1"))
    }

    fn env_for(input: &str) -> ExecutionEnvironment {
        let session = Session::new(SessionId::new("s1"), 0);
        let mut state = TaskState::new(
            SessionId::new("s1"),
            RunId::new("r1"),
            ParentRunId::default(),
        );
        state.messages.push(Message::new(
            "user",
            Content::text(input),
            MessageSource::UserInput,
        ));
        ExecutionEnvironment {
            session,
            state,
            system_prompt: "You are a test agent.".to_string(),
            tool_allowlist: None,
            overrides: EngineOverrides::default(),
            analysis: TaskAnalysis::default(),
        }
    }

    fn engine_with_tools(
        responses: Vec<ProviderResponse>,
        tools: ToolRegistry,
    ) -> LocalReactEngine<MockProvider> {
        LocalReactEngine::new(
            MockProvider::new(responses),
            Arc::new(tools),
            ProviderDefaults::default(),
        )
        .with_clock(Arc::new(|| 1_000))
    }

    fn engine(responses: Vec<ProviderResponse>) -> LocalReactEngine<MockProvider> {
        engine_with_tools(responses, ToolRegistry::new())
    }

    #[tokio::test]
    async fn simple_completion() {
        let engine = engine(vec![text_response("Hello!")]);
        let result = engine.solve_task(&ctx(), env_for("Hi")).await.unwrap();

        assert_eq!(result.stop_reason, StopReason::Complete);
        assert_eq!(result.answer, "Hello!");
        assert_eq!(result.iterations, 1);
        assert_eq!(result.tokens_used, 15);
        assert_eq!(result.workflow.phase, WorkflowPhase::Succeeded);
    }

    #[tokio::test]
    async fn tool_use_and_followup() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        let engine = engine_with_tools(
            vec![
                tool_use_response("tu_1", "echo", json!({"msg": "test"})),
                text_response("Done."),
            ],
            tools,
        );

        let result = engine.solve_task(&ctx(), env_for("Use echo")).await.unwrap();

        assert_eq!(result.stop_reason, StopReason::Complete);
        assert_eq!(result.iterations, 2);
        let tool_message = result
            .messages
            .iter()
            .find(|m| !m.tool_results.is_empty())
            .expect("tool-result message");
        assert!(tool_message.tool_results[0].error.is_none());
        assert!(tool_message.tool_results[0].content.contains("echoed"));
    }

    #[tokio::test]
    async fn unknown_tool_yields_error_result_and_loop_continues() {
        let engine = engine(vec![
            tool_use_response("tu_1", "nonexistent", json!({})),
            text_response("Recovered."),
        ]);

        let result = engine.solve_task(&ctx(), env_for("go")).await.unwrap();
        assert_eq!(result.stop_reason, StopReason::Complete);
        let tool_message = result
            .messages
            .iter()
            .find(|m| !m.tool_results.is_empty())
            .unwrap();
        assert!(tool_message.tool_results[0].error.is_some());
    }

    #[tokio::test]
    async fn ask_user_suspends_with_await_user_input() {
        let engine = engine(vec![tool_use_response(
            "tu_1",
            "ask_user",
            json!({"question": "Which region should I deploy to?"}),
        )]);

        let result = engine.solve_task(&ctx(), env_for("deploy")).await.unwrap();
        assert_eq!(result.stop_reason, StopReason::AwaitUserInput);
        assert_eq!(result.answer, "Which region should I deploy to?");
    }

    #[tokio::test]
    async fn max_iterations_stops_the_loop() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        let mut engine = engine_with_tools(
            vec![
                tool_use_response("tu_1", "echo", json!({})),
                tool_use_response("tu_2", "echo", json!({})),
            ],
            tools,
        );
        engine.defaults.default_max_turns = 2;

        let result = engine.solve_task(&ctx(), env_for("loop")).await.unwrap();
        assert_eq!(
            result.stop_reason,
            StopReason::Custom("max_iterations".to_string())
        );
        assert_eq!(result.iterations, 2);
    }

    #[tokio::test]
    async fn subagent_context_hides_root_only_tools() {
        struct RootOnlyTool;
        impl loom_tool::ToolDyn for RootOnlyTool {
            fn name(&self) -> &str {
                "spawn_subagent"
            }
            fn description(&self) -> &str {
                "Spawns a subagent"
            }
            fn input_schema(&self) -> serde_json::Value {
                json!({"type": "object"})
            }
            fn call(
                &self,
                _input: serde_json::Value,
            ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>>
            {
                Box::pin(async { Ok(json!({})) })
            }
            fn subagent_allowed(&self) -> bool {
                false
            }
        }

        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        tools.register(Arc::new(RootOnlyTool));
        let engine = engine_with_tools(vec![text_response("ok")], tools);

        let config = engine.resolve_config(&env_for("x"));
        let root_schemas = engine.build_tool_schemas(&config, false);
        let sub_schemas = engine.build_tool_schemas(&config, true);
        assert!(root_schemas.iter().any(|s| s.name == "spawn_subagent"));
        assert!(!sub_schemas.iter().any(|s| s.name == "spawn_subagent"));
        assert!(sub_schemas.iter().any(|s| s.name == ASK_USER_TOOL));
    }

    #[tokio::test]
    async fn events_are_emitted_in_loop_order() {
        let sink = Arc::new(RecordingSink {
            events: Mutex::new(Vec::new()),
        });
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        let engine = engine_with_tools(
            vec![
                tool_use_response("tu_1", "echo", json!({})),
                text_response("Done."),
            ],
            tools,
        );
        engine.set_event_listener(sink.clone());

        engine.solve_task(&ctx(), env_for("go")).await.unwrap();

        let events = sink.events.lock().unwrap().clone();
        let started = events
            .iter()
            .position(|e| e == "tool.started:tu_1")
            .unwrap();
        let completed = events
            .iter()
            .position(|e| e == "tool.completed:tu_1")
            .unwrap();
        let final_pos = events.iter().position(|e| e == "result.final").unwrap();
        let first_iter = events
            .iter()
            .position(|e| e == "iteration:react:iter:1")
            .unwrap();
        assert!(first_iter < started);
        assert!(started < completed);
        assert!(completed < final_pos);
    }

    #[tokio::test]
    async fn workflow_records_tool_recorder_nodes_that_sanitize_away() {
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        let engine = engine_with_tools(
            vec![
                tool_use_response("tu_1", "echo", json!({})),
                text_response("Done."),
            ],
            tools,
        );

        let result = engine.solve_task(&ctx(), env_for("go")).await.unwrap();
        assert!(result
            .workflow
            .nodes
            .iter()
            .any(|n| n.id == "react:iter:1:tools"));
        let sanitized = result.workflow.sanitized();
        assert!(sanitized.nodes.iter().all(|n| !n.id.contains(":tools")));
        assert_eq!(sanitized.order.len(), sanitized.nodes.len());
    }

    #[tokio::test]
    async fn checkpoint_saved_per_iteration_and_cleared_on_completion() {
        let checkpoints = Arc::new(MemoryCheckpoints::default());
        let mut tools = ToolRegistry::new();
        tools.register(Arc::new(EchoTool));
        let engine = engine_with_tools(
            vec![
                tool_use_response("tu_1", "echo", json!({})),
                text_response("Done."),
            ],
            tools,
        )
        .with_checkpoint_store(checkpoints.clone());

        engine.solve_task(&ctx(), env_for("go")).await.unwrap();
        assert!(checkpoints.saves.lock().unwrap().len() >= 1);
        assert_eq!(*checkpoints.clears.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn await_user_input_leaves_checkpoint_behind() {
        let checkpoints = Arc::new(MemoryCheckpoints::default());
        let engine = engine(vec![tool_use_response(
            "tu_1",
            "ask_user",
            json!({"question": "which one?"}),
        )])
        .with_checkpoint_store(checkpoints.clone());

        engine.solve_task(&ctx(), env_for("pick")).await.unwrap();
        assert!(checkpoints.saves.lock().unwrap().len() >= 1);
        assert_eq!(*checkpoints.clears.lock().unwrap(), 0);
    }

    #[tokio::test]
    async fn provider_failure_is_surfaced_as_engine_error() {
        struct FailingProvider;
        impl Provider for FailingProvider {
            fn complete(
                &self,
                _request: ProviderRequest,
            ) -> impl Future<Output = Result<ProviderResponse, ProviderError>> + Send {
                async { Err(ProviderError::RateLimited) }
            }
        }

        let engine = LocalReactEngine::new(
            FailingProvider,
            Arc::new(ToolRegistry::new()),
            ProviderDefaults::default(),
        );
        let result = engine.solve_task(&ctx(), env_for("hi")).await;
        assert!(matches!(result, Err(EngineError::ExecutionFailed(_))));
    }

    /// Minimal recording checkpoint store used by the tests above.
    mod tests_support {
        use super::*;
        use loom_types::error::SessionError;

        #[derive(Default)]
        pub struct MemoryCheckpoints {
            pub saves: Mutex<Vec<SessionId>>,
            pub clears: Mutex<u32>,
        }

        #[async_trait]
        impl CheckpointStore for MemoryCheckpoints {
            async fn save(
                &self,
                session_id: &SessionId,
                _state: &TaskState,
            ) -> Result<(), SessionError> {
                self.saves.lock().unwrap().push(session_id.clone());
                Ok(())
            }

            async fn load(
                &self,
                _session_id: &SessionId,
            ) -> Result<Option<TaskState>, SessionError> {
                Ok(None)
            }

            async fn clear(&self, _session_id: &SessionId) -> Result<(), SessionError> {
                *self.clears.lock().unwrap() += 1;
                Ok(())
            }
        }
    }
}
