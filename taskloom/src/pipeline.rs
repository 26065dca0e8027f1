//! The coordinator's listener decoration stack: unified
//! events go through SLA-aware translation, plan-title observation,
//! per-run identity stamping, and finally the serializing per-run
//! delivery stage. Layer order is fixed: translation assigns sequence
//! numbers, stamping happens at delivery, and the serializing listener
//! guarantees FIFO order per run id.

use loom_orch_local::{EnvelopeSink, EventTranslator, SerializingListener, SlaCollector};
use loom_types::envelope::{NodeKind, WorkflowEventEnvelope};
use loom_types::event::{Payload, UnifiedEvent};
use loom_types::EventSink;
use loom_types::RequestContext;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

/// The tool whose completions carry a proposed session title.
const PLAN_TOOL: &str = "plan";

/// Outcome qualifier on a coordinator stage envelope.
#[derive(Debug, Clone, Copy)]
pub enum StageStatus {
    /// The stage began.
    Started,
    /// The stage finished without error.
    Succeeded,
    /// The stage failed; the payload carries the error string.
    Failed,
}

impl fmt::Display for StageStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageStatus::Started => "started",
            StageStatus::Succeeded => "succeeded",
            StageStatus::Failed => "failed",
        };
        write!(f, "{s}")
    }
}

/// Shared slot the pipeline writes an observed session title into and
/// the coordinator reads back at persist time.
pub type TitleSlot = Arc<Mutex<Option<String>>>;

/// How a delegated run relates to its parent flow. Runs marked with one
/// of these have every event they emit lifted into a subflow-wrapped
/// form before translation, so the parent's listener sees per-subtask
/// progress.
#[derive(Clone)]
pub(crate) struct SubflowDescriptor {
    /// The delegating run.
    pub(crate) parent_run_id: loom_types::id::RunId,
    /// Index of this subtask within the parent flow.
    pub(crate) index: u32,
    /// Subtasks dispatched by the parent flow so far.
    pub(crate) total: u32,
    /// Short preview of the subtask's input.
    pub(crate) preview: String,
    /// The parent flow's parallelism cap, if any.
    pub(crate) max_parallel: Option<u32>,
}

#[derive(Clone)]
struct RunIdentity {
    session_id: loom_types::id::SessionId,
    task_id: loom_types::id::RunId,
    parent_task_id: loom_types::id::ParentRunId,
    log_id: loom_types::id::LogId,
    correlation_id: loom_types::id::CorrelationId,
    agent_level: u32,
}

struct RunRegistration {
    identity: RunIdentity,
    sink: Arc<dyn EnvelopeSink>,
    title: TitleSlot,
}

/// Per-run routing table shared between the pipeline front (producers)
/// and the delivery stage (the serializing workers).
type RunTable = Arc<RwLock<HashMap<String, RunRegistration>>>;

/// Delivery-side decorator: stamps each envelope with its run's
/// identity, observes `plan` tool completions for a session title, and
/// forwards to the run's registered external sink. Envelopes for runs
/// nobody registered are dropped; there is no listener to give them to.
struct RouterSink {
    runs: RunTable,
    now_fn: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl RouterSink {
    fn stamp(envelope: &mut WorkflowEventEnvelope, identity: &RunIdentity, now: i64) {
        envelope.session_id.get_or_insert_with(|| identity.session_id.clone());
        envelope.task_id.get_or_insert_with(|| identity.task_id.clone());
        if !identity.parent_task_id.is_empty() && envelope.parent_task_id.is_none() {
            envelope.parent_task_id = Some(identity.parent_task_id.clone());
        }
        envelope.log_id.get_or_insert_with(|| identity.log_id.clone());
        envelope
            .correlation_id
            .get_or_insert_with(|| identity.correlation_id.clone());
        envelope.agent_level = identity.agent_level;
        if identity.agent_level > 0 {
            envelope.is_subtask = true;
        }
        if envelope.timestamp == 0 {
            envelope.timestamp = now;
        }
    }

    fn observe_title(envelope: &WorkflowEventEnvelope, title: &TitleSlot) {
        if envelope.event_type != "tool.completed" {
            return;
        }
        let is_plan = envelope
            .payload
            .get("tool_name")
            .and_then(|v| v.as_str())
            .map(|name| name == PLAN_TOOL)
            .unwrap_or(false);
        if !is_plan {
            return;
        }
        if let Some(session_title) = envelope.payload.get("session_title").and_then(|v| v.as_str())
        {
            let mut slot = title.lock().unwrap();
            // First observed title wins, matching the metadata rule.
            if slot.is_none() && !session_title.is_empty() {
                *slot = Some(session_title.to_string());
            }
        }
    }
}

impl EnvelopeSink for RouterSink {
    fn deliver(&self, mut envelope: WorkflowEventEnvelope) {
        let runs = self.runs.read().unwrap();
        let Some(registration) = runs.get(envelope.run_id.as_str()) else {
            tracing::debug!(run_id = %envelope.run_id, event_type = %envelope.event_type,
                "dropping envelope for unregistered run");
            return;
        };
        Self::stamp(&mut envelope, &registration.identity, (self.now_fn)());
        Self::observe_title(&envelope, &registration.title);
        let sink = registration.sink.clone();
        drop(runs);
        sink.deliver(envelope);
    }
}

/// The full pipeline: translator in front, serializing listener behind,
/// with a per-run routing table in between. One pipeline serves every
/// run the coordinator executes; runs register on entry and unregister
/// after their final flush.
pub struct EventPipeline {
    translator: EventTranslator,
    listener: SerializingListener<RouterSink>,
    runs: RunTable,
    subflows: RwLock<HashMap<String, SubflowDescriptor>>,
}

impl EventPipeline {
    /// Build a pipeline, optionally wiring a tool-SLA collector into the
    /// translation stage.
    pub fn new(
        sla: Option<Arc<dyn SlaCollector>>,
        now_fn: Arc<dyn Fn() -> i64 + Send + Sync>,
    ) -> Self {
        let runs: RunTable = Arc::new(RwLock::new(HashMap::new()));
        let router = Arc::new(RouterSink {
            runs: runs.clone(),
            now_fn,
        });
        let translator = match sla {
            Some(sla) => EventTranslator::new().with_sla_collector(sla),
            None => EventTranslator::new(),
        };
        Self {
            translator,
            listener: SerializingListener::new(router),
            runs,
            subflows: RwLock::new(HashMap::new()),
        }
    }

    /// Register a run's identity and external sink. Envelopes for this
    /// run id flow to `sink` until [`Self::unregister_run`].
    pub fn register_run(
        &self,
        ctx: &RequestContext,
        sink: Arc<dyn EnvelopeSink>,
        title: TitleSlot,
    ) {
        let registration = RunRegistration {
            identity: RunIdentity {
                session_id: ctx.session_id.clone(),
                task_id: ctx.run_id.clone(),
                parent_task_id: ctx.parent_run_id.clone(),
                log_id: ctx.log_id.clone(),
                correlation_id: ctx.correlation_id.clone(),
                agent_level: ctx.agent_level,
            },
            sink,
            title,
        };
        self.runs
            .write()
            .unwrap()
            .insert(ctx.run_id.to_string(), registration);
    }

    /// Register a run only if nothing else already did. Returns whether
    /// this call created the registration (the caller then owns its
    /// removal).
    pub(crate) fn ensure_run_registered(
        &self,
        ctx: &RequestContext,
        sink: Arc<dyn EnvelopeSink>,
        title: TitleSlot,
    ) -> bool {
        if self.runs.read().unwrap().contains_key(ctx.run_id.as_str()) {
            return false;
        }
        self.register_run(ctx, sink, title);
        true
    }

    /// Mark a run as a delegated subtask of a parent flow. Every event
    /// it emits is wrapped as a subflow event until the run is
    /// unregistered.
    pub(crate) fn mark_subflow(&self, run_id: &str, descriptor: SubflowDescriptor) {
        self.subflows
            .write()
            .unwrap()
            .insert(run_id.to_string(), descriptor);
    }

    /// Remove a run's registration (and any subflow mark). Call only
    /// after the final flush; envelopes still in the queue at removal
    /// are dropped at delivery.
    pub fn unregister_run(&self, run_id: &str) {
        self.runs.write().unwrap().remove(run_id);
        self.subflows.write().unwrap().remove(run_id);
    }

    /// Emit one coordinator stage envelope (`prepare`, `execute`,
    /// `summarize`, `persist`) for a run.
    pub fn emit_stage(
        &self,
        ctx: &RequestContext,
        stage: &str,
        status: StageStatus,
        payload: Payload,
    ) {
        let mut envelope = WorkflowEventEnvelope::new(
            format!("stage.{status}"),
            NodeKind::Orchestrator,
            ctx.run_id.clone(),
        );
        envelope.node_id = stage.to_string();
        envelope.payload = payload;
        self.emit(UnifiedEvent::Canonical(Box::new(envelope)));
    }

    /// Flush the run's queue with the coordinator's bounded budget.
    pub async fn flush_run(&self, run_id: &str, budget: Duration) {
        self.listener.flush_within(run_id, budget).await;
    }
}

impl EventSink for EventPipeline {
    fn emit(&self, event: UnifiedEvent) {
        let descriptor = {
            let subflows = self.subflows.read().unwrap();
            subflows.get(event.run_id().as_str()).cloned()
        };
        let event = match descriptor {
            Some(descriptor) => UnifiedEvent::Subflow {
                run_id: event.run_id().clone(),
                parent_run_id: descriptor.parent_run_id,
                index: descriptor.index,
                total: descriptor.total,
                preview: descriptor.preview,
                max_parallel: descriptor.max_parallel,
                inner: Box::new(event),
            },
            None => event,
        };
        for envelope in self.translator.translate(&event) {
            self.listener.dispatch(envelope);
        }
    }
}
