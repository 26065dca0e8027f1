//! Coordinator integration tests: the full execute-task lifecycle over
//! a scripted provider, without any network.

use loom_provider::types::{
    ContentPart, ProviderRequest, ProviderResponse, StopReason as WireStop, TokenUsage,
};
use loom_provider::{Provider, ProviderDefaults, ProviderError};
use loom_tool::{ToolDyn, ToolError, ToolRegistry};
use loom_types::envelope::WorkflowEventEnvelope;
use loom_types::error::{CoordinatorError, HookError};
use loom_types::hook::{Injection, ProactiveHook};
use loom_types::id::SessionId;
use loom_types::message::MessageSource;
use loom_types::session::metadata_keys;
use loom_types::task::{StopReason, TaskInfo, TaskResult};
use loom_types::{HistoryManager, RequestContext, SessionStore};
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use taskloom::prelude::*;

// ---------------------------------------------------------------------------
// Scaffolding
// ---------------------------------------------------------------------------

struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
}

impl ScriptedProvider {
    fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
        }
    }
}

impl Provider for ScriptedProvider {
    fn complete(
        &self,
        _request: ProviderRequest,
    ) -> impl Future<Output = Result<ProviderResponse, ProviderError>> + Send {
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("ScriptedProvider: no more responses queued");
        async move { Ok(response) }
    }
}

/// Provider that never answers; used to exercise cancellation.
struct StallingProvider;

impl Provider for StallingProvider {
    fn complete(
        &self,
        _request: ProviderRequest,
    ) -> impl Future<Output = Result<ProviderResponse, ProviderError>> + Send {
        async {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Err(ProviderError::RequestFailed("unreachable".into()))
        }
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
        model: "scripted".into(),
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
        model: "scripted".into(),
        cost: None,
        truncated: None,
    }
}

struct BashTool;

impl ToolDyn for BashTool {
    fn name(&self) -> &str {
        "bash"
    }
    fn description(&self) -> &str {
        "Runs a shell command"
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    fn call(
        &self,
        _input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>> {
        Box::pin(async { Ok(serde_json::json!({"stdout": "ok"})) })
    }
}

/// Proposes a different session title on every call, so first-write-wins
/// is observable.
struct PlanTool {
    titles: Mutex<VecDeque<&'static str>>,
}

impl ToolDyn for PlanTool {
    fn name(&self) -> &str {
        "plan"
    }
    fn description(&self) -> &str {
        "Plans the task and proposes a session title"
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    fn call(
        &self,
        _input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>> {
        let title = self.titles.lock().unwrap().pop_front().unwrap_or("untitled");
        Box::pin(async move { Ok(serde_json::json!({"session_title": title, "steps": 2})) })
    }
}

struct CollectingSink {
    envelopes: Mutex<Vec<WorkflowEventEnvelope>>,
}

impl CollectingSink {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            envelopes: Mutex::new(Vec::new()),
        })
    }

    fn envelopes(&self) -> Vec<WorkflowEventEnvelope> {
        self.envelopes.lock().unwrap().clone()
    }
}

impl EnvelopeSink for CollectingSink {
    fn deliver(&self, envelope: WorkflowEventEnvelope) {
        self.envelopes.lock().unwrap().push(envelope);
    }
}

struct Fixture {
    coordinator: Arc<AgentCoordinator>,
    store: Arc<MemoryStore>,
    history: Arc<MemoryHistoryManager>,
}

fn fixture_with<P: Provider + 'static>(
    provider: P,
    tools: ToolRegistry,
    hooks: Option<Arc<ProactiveHookRegistry>>,
) -> Fixture {
    let store = Arc::new(MemoryStore::new());
    let history = Arc::new(MemoryHistoryManager::new());

    let mut builder = AgentCoordinator::builder(store.clone(), history.clone());
    if let Some(hooks) = hooks {
        builder = builder.with_hook_registry(hooks);
    }
    let engine = LocalReactEngine::new(provider, Arc::new(tools), ProviderDefaults::default())
        .with_iteration_hook(builder.iteration_persister());
    let coordinator = Arc::new(builder.with_engine(Arc::new(engine)).build());

    Fixture {
        coordinator,
        store,
        history,
    }
}

fn fixture(responses: Vec<ProviderResponse>, tools: ToolRegistry) -> Fixture {
    fixture_with(ScriptedProvider::new(responses), tools, None)
}

// ---------------------------------------------------------------------------
// Lifecycle
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn happy_path_streams_ordered_envelopes_and_persists_session() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(BashTool));
    let fixture = fixture(
        vec![
            tool_use_response("tu_1", "bash", serde_json::json!({"command": "ls"})),
            text_response("all done"),
        ],
        tools,
    );
    let sink = CollectingSink::new();

    let result = fixture
        .coordinator
        .execute_task(
            TaskOptions::new("s1", "list the files").with_user("u1"),
            sink.clone(),
        )
        .await
        .unwrap();

    assert_eq!(result.stop_reason, StopReason::Complete);
    assert_eq!(result.answer, "all done");

    let envelopes = sink.envelopes();
    assert!(!envelopes.is_empty());
    assert_eq!(envelopes[0].event_type, "stage.started");
    assert_eq!(envelopes[0].node_id, "prepare");

    // Strict per-run ordering: sequence numbers climb monotonically.
    let seqs: Vec<u64> = envelopes.iter().map(|e| e.seq).collect();
    assert!(seqs.windows(2).all(|w| w[0] < w[1]), "seqs out of order: {seqs:?}");

    let types: Vec<&str> = envelopes.iter().map(|e| e.event_type.as_str()).collect();
    assert!(types.contains(&"tool.started"));
    assert!(types.contains(&"tool.completed"));
    assert!(types.contains(&"result.final"));
    let persist = envelopes
        .iter()
        .find(|e| e.node_id == "persist")
        .expect("persist stage envelope");
    assert_eq!(persist.event_type, "stage.succeeded");

    // Every envelope is stamped with the run's identity.
    for envelope in &envelopes {
        assert_eq!(envelope.session_id.as_ref().unwrap().as_str(), "s1");
        assert_eq!(envelope.task_id.as_ref().unwrap(), &result.run_id);
        assert!(envelope.timestamp > 0);
    }

    // No tool-recorder node ever reaches the sink.
    assert!(envelopes.iter().all(|e| !e.node_id.contains(":tools")));

    let session = fixture
        .store
        .get(&SessionId::new("s1"))
        .await
        .unwrap()
        .expect("session persisted");
    assert_eq!(
        session.metadata.get(metadata_keys::LAST_TASK_ID),
        Some(&result.run_id.to_string())
    );
    assert_eq!(
        session.metadata.get(metadata_keys::USER_ID),
        Some(&"u1".to_string())
    );
    assert!(session.metadata.get(metadata_keys::LAST_PARENT_TASK_ID).is_none());
    let messages = session.messages.as_ref().unwrap();
    assert!(!messages.is_empty());
    assert!(messages
        .iter()
        .all(|m| !matches!(m.source, MessageSource::UserHistory)));

    let turns = fixture.history.replay(&SessionId::new("s1")).await.unwrap();
    assert!(!turns.is_empty());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn second_task_replays_history_but_never_persists_it() {
    let fixture = fixture(
        vec![text_response("first answer"), text_response("second answer")],
        ToolRegistry::new(),
    );

    fixture
        .coordinator
        .execute_task(TaskOptions::new("s1", "first question"), CollectingSink::new())
        .await
        .unwrap();
    fixture
        .coordinator
        .execute_task(TaskOptions::new("s1", "second question"), CollectingSink::new())
        .await
        .unwrap();

    let session = fixture
        .store
        .get(&SessionId::new("s1"))
        .await
        .unwrap()
        .unwrap();
    let messages = session.messages.as_ref().unwrap();
    assert!(messages
        .iter()
        .all(|m| !matches!(m.source, MessageSource::UserHistory)));
    // The latest turn only: one input, one reply.
    assert_eq!(messages.len(), 2);

    // The history store accumulated both turns.
    let turns = fixture.history.replay(&SessionId::new("s1")).await.unwrap();
    assert_eq!(turns.len(), 4);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn await_user_input_metadata_is_present_iff_suspended() {
    let fixture = fixture(
        vec![
            tool_use_response(
                "tu_1",
                "ask_user",
                serde_json::json!({"question": "Which region?"}),
            ),
            text_response("deployed to eu-west-1"),
        ],
        ToolRegistry::new(),
    );

    let result = fixture
        .coordinator
        .execute_task(TaskOptions::new("s1", "deploy"), CollectingSink::new())
        .await
        .unwrap();
    assert_eq!(result.stop_reason, StopReason::AwaitUserInput);

    let session = fixture
        .store
        .get(&SessionId::new("s1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        session.metadata.get(metadata_keys::AWAIT_USER_INPUT),
        Some(&"true".to_string())
    );
    assert_eq!(
        session.metadata.get(metadata_keys::AWAIT_USER_INPUT_QUESTION),
        Some(&"Which region?".to_string())
    );

    // The next completed task clears the pair.
    fixture
        .coordinator
        .execute_task(TaskOptions::new("s1", "eu-west-1"), CollectingSink::new())
        .await
        .unwrap();
    let session = fixture
        .store
        .get(&SessionId::new("s1"))
        .await
        .unwrap()
        .unwrap();
    assert!(session.metadata.get(metadata_keys::AWAIT_USER_INPUT).is_none());
    assert!(session
        .metadata
        .get(metadata_keys::AWAIT_USER_INPUT_QUESTION)
        .is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancellation_persists_a_cancelled_snapshot() {
    let fixture = fixture_with(StallingProvider, ToolRegistry::new(), None);
    let sink = CollectingSink::new();

    let cancel = {
        let manager = fixture
            .coordinator
            .background_manager(&SessionId::new("s1"))
            .unwrap();
        manager.register("task-1")
    };
    let canceller = cancel.clone();
    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_millis(50)).await;
        canceller.cancel();
    });

    let outcome = fixture
        .coordinator
        .execute_task(
            TaskOptions::new("s1", "long task").with_cancel_flag(cancel),
            sink.clone(),
        )
        .await;
    assert!(matches!(outcome, Err(CoordinatorError::Cancelled)));

    let envelopes = sink.envelopes();
    assert!(envelopes
        .iter()
        .any(|e| e.event_type == "result.cancelled"));

    let session = fixture
        .store
        .get(&SessionId::new("s1"))
        .await
        .unwrap()
        .unwrap();
    // The snapshot was persisted: the cancelled run is the last task.
    assert!(session.metadata.get(metadata_keys::LAST_TASK_ID).is_some());
    assert!(session.metadata.get(metadata_keys::AWAIT_USER_INPUT).is_none());
}

// ---------------------------------------------------------------------------
// Subagent rule
// ---------------------------------------------------------------------------

struct CountingHook {
    starts: Mutex<u32>,
    completions: Mutex<u32>,
}

#[async_trait::async_trait]
impl ProactiveHook for CountingHook {
    fn name(&self) -> &str {
        "counting"
    }

    async fn on_task_start(&self, _info: &TaskInfo<'_>) -> Result<Vec<Injection>, HookError> {
        *self.starts.lock().unwrap() += 1;
        Ok(Vec::new())
    }

    async fn on_task_completed(&self, _result: &TaskResult) -> Result<(), HookError> {
        *self.completions.lock().unwrap() += 1;
        Ok(())
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subagent_runs_skip_hooks_and_session_persistence() {
    let hook = Arc::new(CountingHook {
        starts: Mutex::new(0),
        completions: Mutex::new(0),
    });
    let hooks = Arc::new(ProactiveHookRegistry::new());
    hooks.add(hook.clone()).await;

    let fixture = fixture_with(
        ScriptedProvider::new(vec![text_response("subagent done")]),
        ToolRegistry::new(),
        Some(hooks),
    );

    let parent = RequestContext::root(
        SessionId::new("s1"),
        loom_types::id::RunId::new("task-parent"),
        loom_types::id::LogId::new("log-parent"),
    );
    let result = fixture
        .coordinator
        .execute_task(
            TaskOptions::new("s1", "delegated work")
                .with_run_id("task-sub-1")
                .delegated_from(&parent),
            CollectingSink::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.run_id.as_str(), "task-sub-1");
    assert_eq!(result.parent_run_id.as_str(), "task-parent");
    assert_eq!(*hook.starts.lock().unwrap(), 0);
    assert_eq!(*hook.completions.lock().unwrap(), 0);

    // Preparation created the session, but no task completion was
    // recorded on it.
    let session = fixture
        .store
        .get(&SessionId::new("s1"))
        .await
        .unwrap()
        .unwrap();
    assert!(session.metadata.get(metadata_keys::LAST_TASK_ID).is_none());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn subagent_envelopes_carry_parent_and_correlation() {
    let fixture = fixture(vec![text_response("done")], ToolRegistry::new());
    let sink = CollectingSink::new();

    let parent = RequestContext::root(
        SessionId::new("s1"),
        loom_types::id::RunId::new("task-parent"),
        loom_types::id::LogId::new("log-parent"),
    );
    fixture
        .coordinator
        .execute_task(
            TaskOptions::new("s1", "child work")
                .with_run_id("task-sub-1")
                .delegated_from(&parent),
            sink.clone(),
        )
        .await
        .unwrap();

    let envelopes = sink.envelopes();
    let prepare = envelopes
        .iter()
        .find(|e| e.node_id == "prepare")
        .expect("prepare envelope");
    assert_eq!(prepare.task_id.as_ref().unwrap().as_str(), "task-sub-1");
    assert_eq!(
        prepare.parent_task_id.as_ref().unwrap().as_str(),
        "task-parent"
    );
    assert_eq!(
        prepare.correlation_id.as_ref().unwrap().as_str(),
        "task-parent"
    );
    assert!(prepare.is_subtask);
}

// ---------------------------------------------------------------------------
// Attachments & sanitation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn save_hoists_attachments_and_enforces_uri_invariant() {
    use loom_types::attachment::{Attachment, AttachmentSource};
    use loom_types::content::Content;
    use loom_types::message::Message;
    use loom_types::workflow::WorkflowSnapshot;

    let dir = tempfile::tempdir().unwrap();
    let store = Arc::new(MemoryStore::new());
    let history = Arc::new(MemoryHistoryManager::new());
    let coordinator = AgentCoordinator::builder(store.clone(), history)
        .with_attachment_persister(Arc::new(FsAttachmentPersister::new(dir.path())))
        .build();

    let mut reply = Message::new(
        "assistant",
        Content::text("chart attached"),
        MessageSource::AssistantReply,
    );
    reply.attachments.insert(
        "chart.png".to_string(),
        Attachment {
            name: "chart.png".to_string(),
            media_type: "image/png".to_string(),
            data: "aGVsbG8=".to_string(),
            uri: String::new(),
            workspace_path: String::new(),
            source: AttachmentSource::Tool,
        },
    );
    let replayed = Message::new(
        "user",
        Content::text("old turn"),
        MessageSource::UserHistory,
    );

    let ctx = RequestContext::root(
        SessionId::new("s1"),
        loom_types::id::RunId::new("r1"),
        loom_types::id::LogId::new("l1"),
    );
    let result = TaskResult {
        answer: "chart attached".to_string(),
        messages: vec![replayed, reply],
        iterations: 1,
        tokens_used: 10,
        stop_reason: StopReason::Complete,
        session_id: SessionId::new("s1"),
        run_id: loom_types::id::RunId::new("r1"),
        parent_run_id: Default::default(),
        user_id: None,
        channel: None,
        sender_id: None,
        chat_id: None,
        workflow: WorkflowSnapshot::new(loom_types::id::WorkflowId::new("w1"), 0),
        important: Vec::new(),
    };

    coordinator
        .save_session_after_execution(&ctx, &result, true)
        .await
        .unwrap();

    let session = store.get(&SessionId::new("s1")).await.unwrap().unwrap();
    let attachments = session.attachments.as_ref().unwrap();
    let chart = attachments.get("chart.png").expect("hoisted attachment");
    assert!(chart.uri.starts_with("file://"));
    assert!(chart.data.is_empty(), "inline data must be cleared");

    let messages = session.messages.as_ref().unwrap();
    assert_eq!(messages.len(), 1, "user_history message must be dropped");
    assert!(messages[0].attachments.is_empty(), "attachments hoisted off the message");
}

// ---------------------------------------------------------------------------
// Title, reset, background cancellation
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn plan_tool_output_titles_the_session_first_write_wins() {
    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(PlanTool {
        titles: Mutex::new(vec!["Deploy the gateway", "A different title"].into()),
    }));
    let fixture = fixture(
        vec![
            tool_use_response("tu_1", "plan", serde_json::json!({})),
            text_response("planned"),
            tool_use_response("tu_2", "plan", serde_json::json!({})),
            text_response("planned again"),
        ],
        tools,
    );

    fixture
        .coordinator
        .execute_task(TaskOptions::new("s1", "deploy"), CollectingSink::new())
        .await
        .unwrap();
    let session = fixture
        .store
        .get(&SessionId::new("s1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        session.metadata.get(metadata_keys::TITLE),
        Some(&"Deploy the gateway".to_string())
    );

    // A later task cannot retitle the session.
    fixture
        .coordinator
        .execute_task(TaskOptions::new("s1", "redeploy"), CollectingSink::new())
        .await
        .unwrap();
    let session = fixture
        .store
        .get(&SessionId::new("s1"))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        session.metadata.get(metadata_keys::TITLE),
        Some(&"Deploy the gateway".to_string())
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn reset_session_clears_turn_state_and_history() {
    let fixture = fixture(vec![text_response("hello")], ToolRegistry::new());
    fixture
        .coordinator
        .execute_task(TaskOptions::new("s1", "hi"), CollectingSink::new())
        .await
        .unwrap();

    fixture
        .coordinator
        .reset_session(&SessionId::new("s1"))
        .await
        .unwrap();

    let session = fixture
        .store
        .get(&SessionId::new("s1"))
        .await
        .unwrap()
        .unwrap();
    assert!(session.messages.as_ref().unwrap().is_empty());
    assert!(fixture
        .history
        .replay(&SessionId::new("s1"))
        .await
        .unwrap()
        .is_empty());

    // Resetting a missing session is not an error.
    fixture
        .coordinator
        .reset_session(&SessionId::new("never-seen"))
        .await
        .unwrap();
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn cancel_background_task_consults_every_session_manager() {
    let fixture = fixture(vec![], ToolRegistry::new());
    for session in ["s1", "s2", "s3"] {
        fixture
            .coordinator
            .background_manager(&SessionId::new(session))
            .unwrap()
            .register(format!("{session}-task"));
    }

    let err = fixture
        .coordinator
        .cancel_background_task("task-X")
        .unwrap_err();
    assert_eq!(err.to_string(), "task \"task-X\" not found in any session");

    assert!(fixture.coordinator.cancel_background_task("s2-task").is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_task_is_cancellable_by_id() {
    let fixture = fixture_with(StallingProvider, ToolRegistry::new(), None);
    let sink = CollectingSink::new();
    let parent = RequestContext::root(
        SessionId::new("s1"),
        loom_types::id::RunId::new("root-run"),
        loom_types::id::LogId::new("root-log"),
    );

    let run_id = fixture
        .coordinator
        .spawn_background_task(
            &parent,
            TaskOptions::new("s1", "long running job").with_run_id("bg-1"),
            sink.clone(),
        )
        .unwrap();
    assert_eq!(run_id.as_str(), "bg-1");

    // Let the detached run reach the engine, then cancel it by id.
    tokio::time::sleep(Duration::from_millis(100)).await;
    fixture.coordinator.cancel_background_task("bg-1").unwrap();

    let mut cancelled = false;
    let mut progressed = false;
    for _ in 0..100 {
        let envelopes = sink.envelopes();
        cancelled = envelopes.iter().any(|e| e.event_type == "result.cancelled");
        progressed = envelopes.iter().any(|e| e.event_type == "subflow.completed");
        if cancelled && progressed {
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    assert!(cancelled, "expected a result.cancelled envelope");
    assert!(progressed, "expected a subflow.completed envelope");

    let envelopes = sink.envelopes();
    let cancelled_env = envelopes
        .iter()
        .find(|e| e.event_type == "result.cancelled")
        .unwrap();
    assert!(cancelled_env.is_subtask);
    assert_eq!(cancelled_env.node_id, "subflow-0");
    assert_eq!(cancelled_env.subtask_index, Some(0));

    let progress = envelopes
        .iter()
        .find(|e| e.event_type == "subflow.completed")
        .unwrap();
    assert_eq!(progress.run_id.as_str(), "root-run");
    assert_eq!(progress.payload["completed"], serde_json::json!(1));
    assert_eq!(progress.payload["failed"], serde_json::json!(1));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn background_task_completion_reports_subflow_progress() {
    let fixture = fixture(
        vec![text_response("done in background")],
        ToolRegistry::new(),
    );
    let sink = CollectingSink::new();
    let parent = RequestContext::root(
        SessionId::new("s1"),
        loom_types::id::RunId::new("root-run"),
        loom_types::id::LogId::new("root-log"),
    );

    fixture
        .coordinator
        .spawn_background_task(&parent, TaskOptions::new("s1", "background job"), sink.clone())
        .unwrap();

    let mut progress = None;
    for _ in 0..100 {
        if let Some(envelope) = sink
            .envelopes()
            .into_iter()
            .find(|e| e.event_type == "subflow.completed")
        {
            progress = Some(envelope);
            break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    let progress = progress.expect("subflow.completed envelope");
    assert_eq!(progress.run_id.as_str(), "root-run");
    assert_eq!(progress.subtask_index, Some(0));
    assert_eq!(progress.payload["completed"], serde_json::json!(1));
    assert_eq!(progress.payload["success"], serde_json::json!(1));
    assert_eq!(progress.payload["failed"], serde_json::json!(0));
    assert_eq!(progress.payload["tool_calls"], serde_json::json!(0));
    // The scripted response costs 10 input + 5 output tokens.
    assert_eq!(progress.payload["tokens"], serde_json::json!(15));

    // The delegated run's own envelopes are marked as subtask traffic.
    let final_envelope = sink
        .envelopes()
        .into_iter()
        .find(|e| e.event_type == "result.final")
        .expect("result.final envelope");
    assert!(final_envelope.is_subtask);
    assert_eq!(final_envelope.subtask_preview.as_deref(), Some("background job"));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn null_collaborators_degrade_to_no_ops() {
    use loom_types::test_utils::{
        InlineAttachmentPersister, NoopAttachmentMigrator, NullCostTracker, NullMemoryService,
    };

    let hooks = Arc::new(ProactiveHookRegistry::new());
    hooks
        .add(Arc::new(MemoryRecallHook::new(Arc::new(NullMemoryService))))
        .await;

    let store = Arc::new(MemoryStore::new());
    let history = Arc::new(MemoryHistoryManager::new());
    let builder = AgentCoordinator::builder(store.clone(), history)
        .with_hook_registry(hooks)
        .with_cost_tracker(Arc::new(NullCostTracker))
        .with_attachment_persister(Arc::new(InlineAttachmentPersister))
        .with_attachment_migrator(Arc::new(NoopAttachmentMigrator))
        .with_sla_collector(Arc::new(InMemorySlaCollector::new()));
    let engine = LocalReactEngine::new(
        ScriptedProvider::new(vec![text_response("quiet success")]),
        Arc::new(ToolRegistry::new()),
        ProviderDefaults::default(),
    )
    .with_iteration_hook(builder.iteration_persister());
    let coordinator = builder.with_engine(Arc::new(engine)).build();

    let result = coordinator
        .execute_task(
            TaskOptions::new("s1", "say something").with_user("u1"),
            CollectingSink::new(),
        )
        .await
        .unwrap();
    assert_eq!(result.answer, "quiet success");
    assert!(store.get(&SessionId::new("s1")).await.unwrap().is_some());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn preview_context_window_counts_history_and_input() {
    let fixture = fixture(vec![text_response("first answer")], ToolRegistry::new());
    fixture
        .coordinator
        .execute_task(TaskOptions::new("s1", "first question"), CollectingSink::new())
        .await
        .unwrap();

    let preview = fixture
        .coordinator
        .preview_context_window(&SessionId::new("s1"), "second question")
        .await
        .unwrap();
    // Two replayed messages plus the new input.
    assert_eq!(preview.message_count, 3);
    assert!(preview.estimated_tokens > 0);
    assert!(preview.system_prompt_chars > 0);
}
