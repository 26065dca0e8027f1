//! The agent coordinator: single entry point for task
//! execution. Owns the event pipeline, the per-session save mutexes,
//! the proactive hook dispatch, and the persistence flow; delegates the
//! reasoning loop itself to the [`ReactEngine`] collaborator.

use crate::config::{EffectiveConfig, RuntimeConfigResolver};
use crate::pipeline::{EventPipeline, StageStatus, SubflowDescriptor, TitleSlot};
use crate::prepare::DefaultPreparation;
use loom_hooks::ProactiveHookRegistry;
use loom_orch_local::{BackgroundTaskRegistry, CancelFlag, EnvelopeSink, Manager, SlaCollector};
use loom_types::attachment::Attachment;
use loom_types::collab::{
    AttachmentMigrator, AttachmentPersister, CheckpointStore, CostTracker, EventSink,
    ExecutionEnvironment, IterationHook, PreparationService, ReactEngine,
};
use loom_types::error::{
    BackgroundError, CoordinatorError, EngineError, SessionError,
};
use loom_types::event::{Payload, UnifiedEvent};
use loom_types::hook::format_injections_as_context;
use loom_types::id::{LogId, RunId, SessionId, UserId, WorkflowId};
use loom_types::message::{Message, MessageSource};
use loom_types::session::{metadata_keys, Session};
use loom_types::task::{TaskInfo, TaskResult, TaskState};
use loom_types::text::truncate_runes;
use loom_types::workflow::{WorkflowPhase, WorkflowSnapshot};
use loom_types::{HistoryManager, RequestContext, SessionStore};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;
use tokio::sync::Mutex;

const STAGE_PREPARE: &str = "prepare";
const STAGE_EXECUTE: &str = "execute";
const STAGE_SUMMARIZE: &str = "summarize";
const STAGE_PERSIST: &str = "persist";

/// Budget for the end-of-task flush barrier.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(2);

const ANSWER_PREVIEW_CHARS: usize = 200;

/// Everything a caller specifies about one task beyond its input text.
#[derive(Clone)]
pub struct TaskOptions {
    /// The owning session.
    pub session_id: SessionId,
    /// The task input text.
    pub input: String,
    /// Explicit run id; generated when absent.
    pub run_id: Option<RunId>,
    /// External user id, for hooks and session metadata.
    pub user_id: Option<String>,
    /// Channel identifier, for group-scoped memory and metadata.
    pub channel: Option<String>,
    /// Sender id within the channel.
    pub sender_id: Option<String>,
    /// Chat id within the channel.
    pub chat_id: Option<String>,
    /// Whether history is replayed and persisted for this task.
    pub history_enabled: bool,
    /// Present for delegated/subagent runs: the delegating run's
    /// context. No hooks fire, no session persists, and the correlation
    /// id is inherited.
    pub parent: Option<RequestContext>,
    /// Cooperative cancellation signal; the task aborts at the engine's
    /// next suspension point once cancelled.
    pub cancel: Option<CancelFlag>,
}

impl TaskOptions {
    /// Options for a plain foreground task.
    pub fn new(session_id: impl Into<SessionId>, input: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            input: input.into(),
            run_id: None,
            user_id: None,
            channel: None,
            sender_id: None,
            chat_id: None,
            history_enabled: true,
            parent: None,
            cancel: None,
        }
    }

    /// Pin the run id instead of generating one.
    pub fn with_run_id(mut self, run_id: impl Into<RunId>) -> Self {
        self.run_id = Some(run_id.into());
        self
    }

    /// Attribute the task to an external user.
    pub fn with_user(mut self, user_id: impl Into<String>) -> Self {
        self.user_id = Some(user_id.into());
        self
    }

    /// Mark the task as arriving on a group channel.
    pub fn with_channel(mut self, channel: impl Into<String>, chat_id: impl Into<String>) -> Self {
        self.channel = Some(channel.into());
        self.chat_id = Some(chat_id.into());
        self
    }

    /// Record which channel member sent the task.
    pub fn with_sender(mut self, sender_id: impl Into<String>) -> Self {
        self.sender_id = Some(sender_id.into());
        self
    }

    /// Disable history replay and persistence for this task.
    pub fn without_history(mut self) -> Self {
        self.history_enabled = false;
        self
    }

    /// Mark the task as a delegated subagent run of `parent`.
    pub fn delegated_from(mut self, parent: &RequestContext) -> Self {
        self.parent = Some(parent.clone());
        self
    }

    /// Attach a cancellation flag.
    pub fn with_cancel_flag(mut self, cancel: CancelFlag) -> Self {
        self.cancel = Some(cancel);
        self
    }
}

/// What the model would see if a task started now.
#[derive(Debug, Clone)]
pub struct ContextWindowPreview {
    /// Messages that would enter the context, including replayed history
    /// and the new input.
    pub message_count: usize,
    /// Rough token estimate over those messages (4 chars per token).
    pub estimated_tokens: usize,
    /// Length of the resolved system prompt, in characters.
    pub system_prompt_chars: usize,
}

/// Per-session save mutexes: concurrent saves for the same session are
/// serialized, saves for different sessions never contend.
#[derive(Default)]
pub(crate) struct SessionLocks {
    locks: Mutex<HashMap<SessionId, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub(crate) async fn for_session(&self, id: &SessionId) -> Arc<Mutex<()>> {
        let mut locks = self.locks.lock().await;
        locks.entry(id.clone()).or_default().clone()
    }
}

/// Iteration-level session persister: snapshots the in-flight transcript after each
/// ReAct iteration and saves it on a background task under the same
/// per-session mutex the foreground save uses, so diagnostics observe
/// mid-task state without ever seeing a torn write.
pub struct SessionPersister {
    store: Arc<dyn SessionStore>,
    locks: Arc<SessionLocks>,
    now_fn: Arc<dyn Fn() -> i64 + Send + Sync>,
}

#[async_trait::async_trait]
impl IterationHook for SessionPersister {
    async fn on_iteration(&self, ctx: &RequestContext, state: &TaskState) {
        if ctx.is_subagent {
            return;
        }
        let store = self.store.clone();
        let locks = self.locks.clone();
        let now = (self.now_fn)();
        let session_id = ctx.session_id.clone();
        let messages: Vec<Message> = state
            .messages
            .iter()
            .filter(|m| !matches!(m.source, MessageSource::UserHistory))
            .cloned()
            .collect();
        let important = state.important.clone();
        tokio::spawn(async move {
            let lock = locks.for_session(&session_id).await;
            let _guard = lock.lock().await;
            match store.get(&session_id).await {
                Ok(Some(mut session)) => {
                    session.messages = Some(messages);
                    session.important_notes = Some(important);
                    session.updated_at = now;
                    if let Err(e) = store.save(&session).await {
                        tracing::debug!(session_id = %session_id, error = %e,
                            "iteration snapshot save failed");
                    }
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::debug!(session_id = %session_id, error = %e,
                        "iteration snapshot load failed");
                }
            }
        });
    }
}

/// Engine stand-in used when no engine was configured: every task fails
/// cleanly instead of panicking. Missing components degrade to no-ops.
struct UnconfiguredEngine;

#[async_trait::async_trait]
impl ReactEngine for UnconfiguredEngine {
    async fn solve_task(
        &self,
        _ctx: &RequestContext,
        _env: ExecutionEnvironment,
    ) -> Result<TaskResult, EngineError> {
        Err(EngineError::ExecutionFailed("no engine configured".into()))
    }

    fn set_event_listener(&self, _listener: Arc<dyn EventSink>) {}
}

/// Assembles an [`AgentCoordinator`]. The builder exists to break the
/// construction cycle between the coordinator, the engine, and the
/// iteration persister: take [`CoordinatorBuilder::iteration_persister`]
/// first, build the engine with it, then hand the engine back.
pub struct CoordinatorBuilder {
    store: Arc<dyn SessionStore>,
    history: Arc<dyn HistoryManager>,
    locks: Arc<SessionLocks>,
    engine: Option<Arc<dyn ReactEngine>>,
    preparation: Option<Arc<dyn PreparationService>>,
    hooks: Option<Arc<ProactiveHookRegistry>>,
    sla: Option<Arc<dyn SlaCollector>>,
    cost: Option<Arc<dyn CostTracker>>,
    persister: Option<Arc<dyn AttachmentPersister>>,
    migrator: Option<Arc<dyn AttachmentMigrator>>,
    checkpoints: Option<Arc<dyn CheckpointStore>>,
    resolver: Option<Arc<dyn RuntimeConfigResolver>>,
    now_fn: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl CoordinatorBuilder {
    fn new(store: Arc<dyn SessionStore>, history: Arc<dyn HistoryManager>) -> Self {
        Self {
            store,
            history,
            locks: Arc::new(SessionLocks::default()),
            engine: None,
            preparation: None,
            hooks: None,
            sla: None,
            cost: None,
            persister: None,
            migrator: None,
            checkpoints: None,
            resolver: None,
            now_fn: Arc::new(default_now),
        }
    }

    /// The iteration-level session persister bound to this coordinator's
    /// store and save mutexes. Hand it to the engine via
    /// `with_iteration_hook` before passing the engine back here.
    pub fn iteration_persister(&self) -> Arc<SessionPersister> {
        Arc::new(SessionPersister {
            store: self.store.clone(),
            locks: self.locks.clone(),
            now_fn: self.now_fn.clone(),
        })
    }

    /// Set the ReAct engine.
    pub fn with_engine(mut self, engine: Arc<dyn ReactEngine>) -> Self {
        self.engine = Some(engine);
        self
    }

    /// Replace the default preparation service.
    pub fn with_preparation(mut self, preparation: Arc<dyn PreparationService>) -> Self {
        self.preparation = Some(preparation);
        self
    }

    /// Attach a proactive hook registry.
    pub fn with_hook_registry(mut self, hooks: Arc<ProactiveHookRegistry>) -> Self {
        self.hooks = Some(hooks);
        self
    }

    /// Attach a tool-SLA collector; `tool.completed` envelopes gain a
    /// `tool_sla` payload.
    pub fn with_sla_collector(mut self, sla: Arc<dyn SlaCollector>) -> Self {
        self.sla = Some(sla);
        self
    }

    /// Attach a cost tracker, fed with each task's token usage.
    pub fn with_cost_tracker(mut self, cost: Arc<dyn CostTracker>) -> Self {
        self.cost = Some(cost);
        self
    }

    /// Attach an attachment persister, used while sanitizing messages
    /// for persistence.
    pub fn with_attachment_persister(mut self, persister: Arc<dyn AttachmentPersister>) -> Self {
        self.persister = Some(persister);
        self
    }

    /// Attach an attachment migrator, run over the session's attachments
    /// at save time.
    pub fn with_attachment_migrator(mut self, migrator: Arc<dyn AttachmentMigrator>) -> Self {
        self.migrator = Some(migrator);
        self
    }

    /// Attach a checkpoint store, consulted by the default preparation
    /// service to resume suspended tasks.
    pub fn with_checkpoint_store(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = Some(checkpoints);
        self
    }

    /// Attach a runtime configuration resolver.
    pub fn with_runtime_config_resolver(
        mut self,
        resolver: Arc<dyn RuntimeConfigResolver>,
    ) -> Self {
        self.resolver = Some(resolver);
        self
    }

    /// Override the coordinator's clock.
    pub fn with_clock(mut self, now_fn: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        self.now_fn = now_fn;
        self
    }

    /// Finish construction: wires the event pipeline into the engine and
    /// defaults any missing collaborator to its stock implementation.
    pub fn build(self) -> AgentCoordinator {
        let pipeline = Arc::new(EventPipeline::new(self.sla.clone(), self.now_fn.clone()));
        let engine: Arc<dyn ReactEngine> =
            self.engine.unwrap_or_else(|| Arc::new(UnconfiguredEngine));
        engine.set_event_listener(pipeline.clone());

        let preparation: Arc<dyn PreparationService> = match self.preparation {
            Some(preparation) => preparation,
            None => {
                let mut preparation =
                    DefaultPreparation::new(self.store.clone(), self.history.clone());
                if let Some(checkpoints) = &self.checkpoints {
                    preparation = preparation.with_checkpoint_store(checkpoints.clone());
                }
                Arc::new(preparation)
            }
        };

        AgentCoordinator {
            store: self.store,
            history: self.history,
            engine,
            preparation,
            hooks: self.hooks,
            cost: self.cost,
            persister: self.persister,
            migrator: self.migrator,
            resolver: self.resolver,
            background: Arc::new(BackgroundTaskRegistry::new()),
            pipeline,
            locks: self.locks,
            now_fn: self.now_fn,
            id_counter: AtomicU64::new(1),
            subflow_counters: StdMutex::new(HashMap::new()),
        }
    }
}

/// The agent coordinator. See the module docs for the lifecycle.
pub struct AgentCoordinator {
    store: Arc<dyn SessionStore>,
    history: Arc<dyn HistoryManager>,
    engine: Arc<dyn ReactEngine>,
    preparation: Arc<dyn PreparationService>,
    hooks: Option<Arc<ProactiveHookRegistry>>,
    cost: Option<Arc<dyn CostTracker>>,
    persister: Option<Arc<dyn AttachmentPersister>>,
    migrator: Option<Arc<dyn AttachmentMigrator>>,
    resolver: Option<Arc<dyn RuntimeConfigResolver>>,
    background: Arc<BackgroundTaskRegistry>,
    pipeline: Arc<EventPipeline>,
    locks: Arc<SessionLocks>,
    now_fn: Arc<dyn Fn() -> i64 + Send + Sync>,
    id_counter: AtomicU64,
    subflow_counters: StdMutex<HashMap<String, u32>>,
}

fn default_now() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

impl AgentCoordinator {
    /// Start building a coordinator over the given session store and
    /// history manager.
    pub fn builder(
        store: Arc<dyn SessionStore>,
        history: Arc<dyn HistoryManager>,
    ) -> CoordinatorBuilder {
        CoordinatorBuilder::new(store, history)
    }

    fn generate_id(&self, prefix: &str) -> String {
        let n = self.id_counter.fetch_add(1, Ordering::SeqCst);
        format!("{prefix}-{:x}-{n}", (self.now_fn)())
    }

    fn build_context(&self, opts: &TaskOptions) -> RequestContext {
        let run_id = opts
            .run_id
            .clone()
            .unwrap_or_else(|| RunId::new(self.generate_id("run")));
        let log_id = LogId::new(self.generate_id("log"));
        let mut ctx = match &opts.parent {
            Some(parent) => parent.delegate(run_id, log_id),
            None => RequestContext::root(opts.session_id.clone(), run_id, log_id),
        };
        ctx.session_id = opts.session_id.clone();
        if let Some(user_id) = &opts.user_id {
            ctx.user_id = Some(UserId::new(user_id.as_str()));
        }
        ctx
    }

    fn resolve_effective_config(&self, ctx: &RequestContext) -> EffectiveConfig {
        let Some(resolver) = &self.resolver else {
            return EffectiveConfig::default();
        };
        match resolver.resolve(ctx) {
            Ok(config) => config,
            Err(e) => {
                // A broken resolver never fails a task.
                tracing::debug!(run_id = %ctx.run_id, error = %e,
                    "runtime config resolver failed, using defaults");
                EffectiveConfig::default()
            }
        }
    }

    fn empty_workflow(&self, ctx: &RequestContext, phase: WorkflowPhase) -> WorkflowSnapshot {
        let mut workflow = WorkflowSnapshot::new(
            WorkflowId::new(format!("wf-{}", ctx.run_id)),
            (self.now_fn)(),
        );
        workflow.phase = phase;
        workflow
    }

    /// Execute one task end to end. Envelopes for the run stream
    /// to `sink` in strict order; the result carries the workflow
    /// snapshot. Subagent-marked tasks skip hooks and persistence.
    pub async fn execute_task(
        &self,
        opts: TaskOptions,
        sink: Arc<dyn EnvelopeSink>,
    ) -> Result<TaskResult, CoordinatorError> {
        let ctx = self.build_context(&opts);
        let title: TitleSlot = Arc::new(StdMutex::new(None));
        self.pipeline.register_run(&ctx, sink, title.clone());
        let outcome = self.execute_inner(&ctx, &opts, &title).await;
        self.pipeline.flush_run(ctx.run_id.as_str(), FLUSH_TIMEOUT).await;
        self.pipeline.unregister_run(ctx.run_id.as_str());
        outcome
    }

    async fn execute_inner(
        &self,
        ctx: &RequestContext,
        opts: &TaskOptions,
        title: &TitleSlot,
    ) -> Result<TaskResult, CoordinatorError> {
        let effective = self.resolve_effective_config(ctx);
        let history_enabled = opts.history_enabled && effective.history_enabled;

        let mut payload = Payload::new();
        payload.insert("input_preview".to_string(), json!(truncate_runes(&opts.input, 120)));
        self.pipeline
            .emit_stage(ctx, STAGE_PREPARE, StageStatus::Started, payload);

        let mut env = match self.preparation.prepare(ctx, &opts.input).await {
            Ok(env) => env,
            Err(e) => {
                let mut payload = Payload::new();
                payload.insert("error".to_string(), json!(e.to_string()));
                self.pipeline
                    .emit_stage(ctx, STAGE_PREPARE, StageStatus::Failed, payload);
                return Err(CoordinatorError::Preparation(e.to_string()));
            }
        };
        env.overrides = effective.engine_overrides();

        let mut payload = Payload::new();
        payload.insert("keywords".to_string(), json!(env.analysis.keywords));
        payload.insert(
            "resumed_from_checkpoint".to_string(),
            json!(env.analysis.resumed_from_checkpoint),
        );
        self.pipeline
            .emit_stage(ctx, STAGE_PREPARE, StageStatus::Succeeded, payload);

        if !ctx.is_subagent {
            if let Some(hooks) = &self.hooks {
                let info = TaskInfo {
                    input: &opts.input,
                    session_id: &ctx.session_id,
                    run_id: &ctx.run_id,
                    user_id: opts.user_id.as_deref(),
                    channel: opts.channel.as_deref(),
                    chat_id: opts.chat_id.as_deref(),
                };
                let injections = hooks.run_on_task_start(&info).await;
                if !injections.is_empty() {
                    let block = format_injections_as_context(&injections);
                    env.state.messages.push(Message::proactive(block));
                }
            }
        }

        self.pipeline
            .emit_stage(ctx, STAGE_EXECUTE, StageStatus::Started, Payload::new());

        let solved = match &opts.cancel {
            Some(cancel) => {
                tokio::select! {
                    result = self.engine.solve_task(ctx, env) => Some(result),
                    _ = cancel.cancelled() => None,
                }
            }
            None => Some(self.engine.solve_task(ctx, env).await),
        };

        let mut result = match solved {
            None => {
                self.pipeline.emit(UnifiedEvent::ResultCancelled {
                    run_id: ctx.run_id.clone(),
                });
                let snapshot = TaskResult::cancelled(
                    ctx.session_id.clone(),
                    ctx.run_id.clone(),
                    ctx.parent_run_id.clone(),
                    self.empty_workflow(ctx, WorkflowPhase::Failed),
                );
                if !ctx.is_subagent {
                    if let Err(e) = self
                        .save_locked(ctx, &snapshot, history_enabled, Some(title))
                        .await
                    {
                        tracing::warn!(run_id = %ctx.run_id, error = %e,
                            "failed to persist cancellation snapshot");
                    }
                }
                return Err(CoordinatorError::Cancelled);
            }
            Some(Err(e)) => {
                let mut payload = Payload::new();
                payload.insert("error".to_string(), json!(e.to_string()));
                self.pipeline
                    .emit_stage(ctx, STAGE_EXECUTE, StageStatus::Failed, payload);
                let placeholder = TaskResult::error_placeholder(
                    ctx.session_id.clone(),
                    ctx.run_id.clone(),
                    ctx.parent_run_id.clone(),
                    self.empty_workflow(ctx, WorkflowPhase::Failed),
                    e.to_string(),
                );
                if !ctx.is_subagent {
                    if let Err(save_err) = self
                        .save_locked(ctx, &placeholder, history_enabled, Some(title))
                        .await
                    {
                        tracing::warn!(run_id = %ctx.run_id, error = %save_err,
                            "failed to persist error snapshot");
                    }
                }
                return Err(CoordinatorError::Execution(e));
            }
            Some(Ok(result)) => result,
        };

        let mut payload = Payload::new();
        payload.insert("iterations".to_string(), json!(result.iterations));
        payload.insert("tokens_used".to_string(), json!(result.tokens_used));
        self.pipeline
            .emit_stage(ctx, STAGE_EXECUTE, StageStatus::Succeeded, payload);

        result.channel = opts.channel.clone();
        result.sender_id = opts.sender_id.clone();
        result.chat_id = opts.chat_id.clone();
        if result.user_id.is_none() {
            result.user_id = opts.user_id.clone();
        }

        if let Some(cost) = &self.cost {
            cost.record(&ctx.run_id, result.tokens_used, 0);
        }

        let mut payload = Payload::new();
        payload.insert(
            "answer_preview".to_string(),
            json!(truncate_runes(&result.answer, ANSWER_PREVIEW_CHARS)),
        );
        payload.insert("stop_reason".to_string(), json!(result.stop_reason.as_str()));
        self.pipeline
            .emit_stage(ctx, STAGE_SUMMARIZE, StageStatus::Succeeded, payload);

        if !ctx.is_subagent {
            if let Some(hooks) = &self.hooks {
                hooks.run_on_task_completed(&result).await;
            }

            match self
                .save_locked(ctx, &result, history_enabled, Some(title))
                .await
            {
                Ok(()) => {
                    self.pipeline
                        .emit_stage(ctx, STAGE_PERSIST, StageStatus::Succeeded, Payload::new());
                }
                Err(e) => {
                    let mut payload = Payload::new();
                    payload.insert("error".to_string(), json!(e.to_string()));
                    self.pipeline
                        .emit_stage(ctx, STAGE_PERSIST, StageStatus::Failed, payload);
                    return Err(e);
                }
            }
        }

        Ok(result)
    }

    /// Persist the session after a task: append history, sanitize
    /// messages and attachments, run the migrator, update metadata, and
    /// save, all under the session's save mutex.
    pub async fn save_session_after_execution(
        &self,
        ctx: &RequestContext,
        result: &TaskResult,
        history_enabled: bool,
    ) -> Result<(), CoordinatorError> {
        self.save_locked(ctx, result, history_enabled, None).await
    }

    async fn save_locked(
        &self,
        ctx: &RequestContext,
        result: &TaskResult,
        history_enabled: bool,
        title: Option<&TitleSlot>,
    ) -> Result<(), CoordinatorError> {
        let lock = self.locks.for_session(&ctx.session_id).await;
        let _guard = lock.lock().await;
        let now = (self.now_fn)();

        let mut session = match self.store.get(&ctx.session_id).await {
            Ok(Some(session)) => session,
            Ok(None) => Session::new(ctx.session_id.clone(), now),
            Err(e) => {
                return Err(CoordinatorError::Session(SessionError::SaveFailed(
                    e.to_string(),
                )))
            }
        };

        if history_enabled {
            let turn: Vec<Message> = result
                .messages
                .iter()
                .filter(|m| !matches!(m.source, MessageSource::UserHistory))
                .cloned()
                .collect();
            if let Err(e) = self.history.append_turn(&ctx.session_id, turn).await {
                tracing::warn!(session_id = %ctx.session_id, error = %e,
                    "history append failed, continuing with session save");
            }
        }

        let mut attachments: HashMap<String, Attachment> =
            session.attachments.take().unwrap_or_default();
        let mut messages = Vec::new();
        for message in &result.messages {
            if matches!(message.source, MessageSource::UserHistory) {
                continue;
            }
            let mut message = message.clone();
            for (name, attachment) in std::mem::take(&mut message.attachments) {
                let mut attachment = attachment;
                if let Some(persister) = &self.persister {
                    match persister.externalize(&ctx.session_id, attachment.clone()).await {
                        Ok(externalized) => attachment = externalized,
                        Err(e) => {
                            tracing::warn!(name = %name, error = %e,
                                "attachment externalization failed, keeping inline form");
                        }
                    }
                }
                attachment.enforce_uri_invariant();
                attachments.insert(name, attachment);
            }
            messages.push(message);
        }
        for attachment in attachments.values_mut() {
            attachment.enforce_uri_invariant();
        }
        session.attachments = Some(attachments);

        if let Some(migrator) = &self.migrator {
            let has_attachments = session
                .attachments
                .as_ref()
                .map(|a| !a.is_empty())
                .unwrap_or(false);
            if has_attachments {
                let mut candidate = session.clone();
                match migrator.migrate(&mut candidate).await {
                    Ok(_) => session = candidate,
                    Err(e) => {
                        tracing::warn!(session_id = %ctx.session_id, error = %e,
                            "attachment migration failed, retaining pre-migration attachments");
                    }
                }
            }
        }

        session.updated_at = now;
        if history_enabled {
            session.messages = Some(messages);
            session.important_notes = Some(result.important.clone());
        } else {
            session.messages = None;
            session.attachments = None;
            session.important_notes = None;
        }

        session
            .metadata
            .insert(metadata_keys::SESSION_ID.to_string(), ctx.session_id.to_string());
        if let Some(user_id) = &result.user_id {
            session.fill_metadata_if_empty(metadata_keys::USER_ID, user_id);
        }
        if let Some(channel) = &result.channel {
            session.fill_metadata_if_empty(metadata_keys::CHANNEL, channel);
        }
        session.record_last_task(&result.run_id, &result.parent_run_id);
        session.set_await_user_input(result.extract_await_question());
        if let Some(title) = title {
            let observed = title.lock().unwrap().clone();
            if let Some(observed) = observed {
                session.set_title_once(&observed);
            }
        }

        self.store
            .save(&session)
            .await
            .map_err(|e| CoordinatorError::Session(SessionError::SaveFailed(e.to_string())))
    }

    /// Build the execution environment for a task without running it.
    pub async fn prepare_execution(
        &self,
        opts: &TaskOptions,
    ) -> Result<ExecutionEnvironment, CoordinatorError> {
        let ctx = self.build_context(opts);
        self.preparation
            .prepare(&ctx, &opts.input)
            .await
            .map_err(|e| CoordinatorError::Preparation(e.to_string()))
    }

    /// Estimate what the model would see for a task on this session.
    pub async fn preview_context_window(
        &self,
        session_id: &SessionId,
        input: &str,
    ) -> Result<ContextWindowPreview, CoordinatorError> {
        let opts = TaskOptions::new(session_id.clone(), input);
        let ctx = self.build_context(&opts);
        let env = self
            .preparation
            .prepare(&ctx, input)
            .await
            .map_err(|e| CoordinatorError::ContextWindow(e.to_string()))?;

        let mut chars = 0usize;
        for message in &env.state.messages {
            if let Some(text) = message.content.as_text() {
                chars += text.len();
            }
            for result in &message.tool_results {
                chars += result.content.len();
            }
        }
        Ok(ContextWindowPreview {
            message_count: env.state.messages.len(),
            estimated_tokens: chars / 4,
            system_prompt_chars: env.system_prompt.len(),
        })
    }

    /// Fetch a session; `Ok(None)` when it does not exist.
    pub async fn get_session(&self, id: &SessionId) -> Result<Option<Session>, CoordinatorError> {
        self.store
            .get(id)
            .await
            .map_err(CoordinatorError::Session)
    }

    /// Fetch a session, creating it when missing (sessions are created
    /// on first reference).
    pub async fn ensure_session(&self, id: &SessionId) -> Result<Session, CoordinatorError> {
        if let Some(session) = self.get_session(id).await? {
            return Ok(session);
        }
        self.store
            .create(id, (self.now_fn)())
            .await
            .map_err(CoordinatorError::Session)
    }

    /// List known session ids, most-recently-updated first.
    pub async fn list_sessions(
        &self,
        limit: usize,
        offset: usize,
    ) -> Result<Vec<SessionId>, CoordinatorError> {
        self.store
            .list(limit, offset)
            .await
            .map_err(CoordinatorError::Session)
    }

    /// Clear all per-turn state from a session and its external
    /// history. A missing session is not an error; the history store is
    /// cleared regardless.
    pub async fn reset_session(&self, id: &SessionId) -> Result<(), CoordinatorError> {
        let lock = self.locks.for_session(id).await;
        let _guard = lock.lock().await;

        if let Err(e) = self.history.clear_session(id).await {
            tracing::warn!(session_id = %id, error = %e, "history clear failed during reset");
        }

        match self.store.get(id).await {
            Ok(Some(mut session)) => {
                session.reset((self.now_fn)());
                self.store
                    .save(&session)
                    .await
                    .map_err(CoordinatorError::Session)
            }
            Ok(None) => Ok(()),
            Err(e) => Err(CoordinatorError::Session(e)),
        }
    }

    /// The background task manager for a session, created on first use.
    /// `None` for an empty session id.
    pub fn background_manager(&self, session_id: &SessionId) -> Option<Arc<Manager>> {
        self.background.get(session_id)
    }

    /// Spawn a task as a detached background subagent run of `parent`.
    /// Returns the run id; cancel it with
    /// [`Self::cancel_background_task`]. The run carries the subagent
    /// marker (no hooks, no session persistence, inherited correlation
    /// id) and its events are lifted into subflow-wrapped form, so the
    /// parent's listener sees `subflow.completed` progress.
    pub fn spawn_background_task(
        self: &Arc<Self>,
        parent: &RequestContext,
        mut opts: TaskOptions,
        sink: Arc<dyn EnvelopeSink>,
    ) -> Result<RunId, CoordinatorError> {
        let Some(manager) = self.background.get(&opts.session_id) else {
            return Err(CoordinatorError::Other(
                "background task needs a session id".into(),
            ));
        };
        let run_id = match &opts.run_id {
            Some(run_id) => run_id.clone(),
            None => {
                let run_id = RunId::new(self.generate_id("bg"));
                opts.run_id = Some(run_id.clone());
                run_id
            }
        };
        let cancel = manager.register(run_id.as_str());
        opts.cancel = Some(cancel);

        let index = {
            let mut counters = self.subflow_counters.lock().unwrap();
            let counter = counters.entry(parent.run_id.to_string()).or_insert(0);
            let index = *counter;
            *counter += 1;
            index
        };
        self.pipeline.mark_subflow(
            run_id.as_str(),
            SubflowDescriptor {
                parent_run_id: parent.run_id.clone(),
                index,
                total: index + 1,
                preview: truncate_runes(&opts.input, 80),
                max_parallel: None,
            },
        );
        // Progress envelopes ride the parent's queue; give them a sink
        // when the parent task is not itself executing right now.
        let parent_registered_here = self.pipeline.ensure_run_registered(
            parent,
            sink.clone(),
            Arc::new(StdMutex::new(None)),
        );

        opts.parent = Some(parent.clone());
        let coordinator = self.clone();
        let task_id = run_id.clone();
        let parent_run = parent.run_id.clone();
        tokio::spawn(async move {
            if let Err(e) = coordinator.execute_task(opts, sink).await {
                tracing::warn!(task_id = %task_id, error = %e, "background task ended with error");
            }
            if parent_registered_here {
                coordinator
                    .pipeline
                    .flush_run(parent_run.as_str(), FLUSH_TIMEOUT)
                    .await;
                coordinator.pipeline.unregister_run(parent_run.as_str());
            }
            manager.forget(task_id.as_str());
        });
        Ok(run_id)
    }

    /// Cancel a background task by id, searching every session's
    /// manager. Asynchronous: the flag is set and the call returns; the
    /// ReAct loop observes it at its next suspension point.
    pub fn cancel_background_task(&self, task_id: &str) -> Result<(), BackgroundError> {
        self.background.cancel_task(task_id)
    }

    /// Override the environment summary on the preparation service.
    pub fn set_environment_summary(&self, summary: String) {
        self.preparation.set_environment_summary(summary);
    }

    /// Release pipeline resources: drains the queue for events that
    /// arrived without a run id.
    pub async fn close(&self) -> Result<(), CoordinatorError> {
        self.pipeline.flush_run("unknown", FLUSH_TIMEOUT).await;
        Ok(())
    }
}
