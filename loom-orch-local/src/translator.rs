//! Event translator — lifts [`UnifiedEvent`]s into zero or
//! more [`WorkflowEventEnvelope`]s.

use crate::sla::SlaCollector;
use loom_types::envelope::{NodeKind, WorkflowEventEnvelope};
use loom_types::event::UnifiedEvent;
use loom_types::id::{RunId, WorkflowId};
use loom_types::workflow::{is_tool_recorder_node, WorkflowSnapshot};
use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

const ARTIFACT_MANIFEST_EXCLUDED_TOOL: &str = "acp_executor";
const ARTIFACT_MANIFEST_KEY: &str = "artifact_manifest";

#[derive(Default)]
struct LastContext {
    snapshot: Option<WorkflowSnapshot>,
    workflow_id: Option<WorkflowId>,
}

/// Key identifying one subflow's accumulated statistics: the delegating
/// run's id, falling back to the subtask's own run id when the wrapper
/// carries no parent.
type SubflowKey = String;

#[derive(Default, Clone)]
struct SubflowStats {
    completed: u32,
    total: u32,
    tokens: u64,
    tool_calls: u32,
    success: u32,
    failed: u32,
}

/// Lifts internal [`UnifiedEvent`]s into the uniform envelope contract.
/// Holds small mutable caches (last-known context, subflow stats) behind
/// short-held locks — never a single global lock across unrelated runs.
pub struct EventTranslator {
    last_context: RwLock<LastContext>,
    sla: Option<Arc<dyn SlaCollector>>,
    subflow_stats: Mutex<HashMap<SubflowKey, SubflowStats>>,
    seq_counters: Mutex<HashMap<String, u64>>,
}

impl EventTranslator {
    /// Build a translator with no SLA collector configured.
    pub fn new() -> Self {
        Self {
            last_context: RwLock::new(LastContext::default()),
            sla: None,
            subflow_stats: Mutex::new(HashMap::new()),
            seq_counters: Mutex::new(HashMap::new()),
        }
    }

    /// Attach an SLA collector used to enrich `tool.completed` envelopes.
    pub fn with_sla_collector(mut self, sla: Arc<dyn SlaCollector>) -> Self {
        self.sla = Some(sla);
        self
    }

    fn next_seq(&self, run_id: &RunId) -> u64 {
        let mut counters = self.seq_counters.lock().unwrap();
        let counter = counters.entry(run_id.to_string()).or_insert(0);
        *counter += 1;
        *counter
    }

    fn base_envelope(&self, event_type: &str, node_kind: NodeKind, run_id: &RunId) -> WorkflowEventEnvelope {
        let mut envelope = WorkflowEventEnvelope::new(event_type.to_string(), node_kind, run_id.clone());
        envelope.seq = self.next_seq(run_id);
        let last = self.last_context.read().unwrap();
        if let Some(snapshot) = &last.snapshot {
            envelope = envelope.with_sanitized_workflow(snapshot);
        }
        envelope.workflow_id = last.workflow_id.as_ref().map(|w| w.to_string());
        envelope
    }

    fn remember_context(&self, snapshot: &WorkflowSnapshot) {
        let mut last = self.last_context.write().unwrap();
        last.workflow_id = Some(snapshot.id.clone());
        last.snapshot = Some(snapshot.clone());
    }

    /// Translate one internal event into zero or more envelopes.
    pub fn translate(&self, event: &UnifiedEvent) -> Vec<WorkflowEventEnvelope> {
        match event {
            UnifiedEvent::Canonical(envelope) => {
                let mut envelope = (**envelope).clone();
                if envelope.seq == 0 {
                    envelope.seq = self.next_seq(&envelope.run_id);
                }
                vec![envelope]
            }

            UnifiedEvent::ContextSnapshot { run_id, snapshot } => {
                self.remember_context(snapshot);
                let mut envelope = self.base_envelope("context.snapshot", NodeKind::Diagnostic, run_id);
                envelope = envelope.with_sanitized_workflow(snapshot);
                vec![envelope]
            }

            UnifiedEvent::PreAnalysisEmoji { run_id, emoji } => {
                let mut envelope = self.base_envelope("diagnostic.emoji", NodeKind::Diagnostic, run_id);
                envelope
                    .payload
                    .insert("emoji".to_string(), serde_json::Value::String(emoji.clone()));
                vec![envelope]
            }

            UnifiedEvent::Step { run_id, node_id, payload } => {
                if is_tool_recorder_node(node_id) {
                    return Vec::new();
                }
                let mut envelope = self.base_envelope("step", NodeKind::Step, run_id);
                envelope.node_id = node_id.clone();
                envelope.payload.extend(payload.clone());
                vec![envelope]
            }

            UnifiedEvent::Iteration { run_id, node_id, payload } => {
                if is_tool_recorder_node(node_id) {
                    return Vec::new();
                }
                let mut envelope = self.base_envelope("iteration", NodeKind::Iteration, run_id);
                envelope.node_id = node_id.clone();
                envelope.payload.extend(payload.clone());
                vec![envelope]
            }

            UnifiedEvent::ToolStarted { run_id, call_id, payload } => {
                if is_tool_recorder_node(call_id) {
                    return Vec::new();
                }
                let mut envelope = self.base_envelope("tool.started", NodeKind::Tool, run_id);
                envelope.node_id = call_id.clone();
                envelope.payload.extend(payload.clone());
                vec![envelope]
            }

            UnifiedEvent::ToolCompleted {
                run_id,
                call_id,
                tool_name,
                latency_ms,
                success,
                cost,
                payload,
            } => {
                if is_tool_recorder_node(call_id) {
                    return Vec::new();
                }
                if let Some(sla) = &self.sla {
                    sla.record(tool_name, *latency_ms, *success, *cost);
                }
                let mut envelope = self.base_envelope("tool.completed", NodeKind::Tool, run_id);
                envelope.node_id = call_id.clone();
                envelope.payload.extend(payload.clone());
                if let Some(sla) = &self.sla {
                    if let Some(snap) = sla.snapshot(tool_name) {
                        if let Ok(value) = serde_json::to_value(&snap) {
                            envelope.payload.insert("tool_sla".to_string(), value);
                        }
                    }
                }

                let mut envelopes = vec![envelope];
                let has_manifest = payload.contains_key(ARTIFACT_MANIFEST_KEY);
                if has_manifest && tool_name != ARTIFACT_MANIFEST_EXCLUDED_TOOL {
                    let mut manifest_envelope =
                        self.base_envelope("artifact.manifest", NodeKind::Artifact, run_id);
                    manifest_envelope.node_id = call_id.clone();
                    if let Some(manifest) = payload.get(ARTIFACT_MANIFEST_KEY) {
                        manifest_envelope
                            .payload
                            .insert("manifest".to_string(), manifest.clone());
                    }
                    envelopes.push(manifest_envelope);
                }
                envelopes
            }

            UnifiedEvent::Generation { run_id, node_id, payload } => {
                let mut envelope = self.base_envelope("generation", NodeKind::Generation, run_id);
                envelope.node_id = node_id.clone();
                envelope.payload.extend(payload.clone());
                vec![envelope]
            }

            UnifiedEvent::ResultFinal { run_id, stream_finished, payload } => {
                let mut envelope = self.base_envelope("result.final", NodeKind::Result, run_id);
                envelope.node_id = "summarize".to_string();
                envelope.payload.extend(payload.clone());
                envelope.payload.insert(
                    "stream_finished".to_string(),
                    serde_json::Value::Bool(*stream_finished),
                );
                vec![envelope]
            }

            UnifiedEvent::ResultCancelled { run_id } => {
                let mut envelope = self.base_envelope("result.cancelled", NodeKind::Result, run_id);
                envelope.node_id = "summarize".to_string();
                vec![envelope]
            }

            UnifiedEvent::Diagnostic { run_id, payload } => {
                let mut envelope = self.base_envelope("diagnostic", NodeKind::Diagnostic, run_id);
                envelope.node_id = String::new();
                envelope.payload.extend(payload.clone());
                vec![envelope]
            }

            UnifiedEvent::Input { run_id, payload } => {
                let mut envelope = self.base_envelope("input", NodeKind::Input, run_id);
                envelope.payload.extend(payload.clone());
                vec![envelope]
            }

            UnifiedEvent::Background { run_id, node_id, payload } => {
                let mut envelope = self.base_envelope("background", NodeKind::Background, run_id);
                envelope.node_id = node_id.clone();
                envelope.payload.extend(payload.clone());
                vec![envelope]
            }

            UnifiedEvent::ExternalAgent { run_id, payload } => {
                let mut envelope = self.base_envelope("external_agent", NodeKind::ExternalAgent, run_id);
                envelope.payload.extend(payload.clone());
                vec![envelope]
            }

            UnifiedEvent::ExternalInput { run_id, payload } => {
                let mut envelope = self.base_envelope("external_input", NodeKind::ExternalInput, run_id);
                envelope.payload.extend(payload.clone());
                vec![envelope]
            }

            UnifiedEvent::Subflow {
                run_id,
                parent_run_id,
                index,
                total,
                preview,
                max_parallel,
                inner,
            } => self.translate_subflow(run_id, parent_run_id, *index, *total, preview, *max_parallel, inner),
        }
    }

    fn translate_subflow(
        &self,
        run_id: &RunId,
        parent_run_id: &RunId,
        index: u32,
        total: u32,
        preview: &str,
        max_parallel: Option<u32>,
        inner: &UnifiedEvent,
    ) -> Vec<WorkflowEventEnvelope> {
        let mut envelopes = self.translate(inner);
        for envelope in &mut envelopes {
            envelope.is_subtask = true;
            envelope.node_id = format!("subflow-{index}");
            envelope.subtask_index = Some(index);
            envelope.total_subtasks = Some(total);
            envelope.subtask_preview = Some(preview.to_string());
            envelope.max_parallel = max_parallel;
        }

        let key: SubflowKey = if parent_run_id.is_empty() {
            run_id.to_string()
        } else {
            parent_run_id.to_string()
        };

        let mut finished = false;
        let mut stats_map = self.subflow_stats.lock().unwrap();
        let stats = stats_map.entry(key.clone()).or_default();
        stats.total = stats.total.max(total);
        match inner {
            UnifiedEvent::ToolCompleted { .. } => {
                stats.tool_calls += 1;
            }
            UnifiedEvent::ResultFinal {
                stream_finished: true,
                payload,
                ..
            } => {
                finished = true;
                stats.completed += 1;
                if let Some(tokens) = payload.get("tokens_used").and_then(|v| v.as_u64()) {
                    stats.tokens += tokens;
                }
                let errored = payload
                    .get("stop_reason")
                    .and_then(|v| v.as_str())
                    .map(|reason| reason == "error")
                    .unwrap_or(false);
                if errored {
                    stats.failed += 1;
                } else {
                    stats.success += 1;
                }
            }
            UnifiedEvent::ResultCancelled { .. } => {
                finished = true;
                stats.completed += 1;
                stats.failed += 1;
            }
            _ => {}
        }
        let snapshot = stats.clone();
        // Reclaim once every task in the subflow has finished.
        if finished && snapshot.completed >= snapshot.total.max(1) {
            stats_map.remove(&key);
        }
        drop(stats_map);

        if finished {
            // Progress envelopes ride the parent flow's queue: the
            // subtask's own queue tears down on its terminal event.
            let progress_run = if parent_run_id.is_empty() {
                run_id
            } else {
                parent_run_id
            };
            let mut completed_envelope =
                self.base_envelope("subflow.completed", NodeKind::Subflow, progress_run);
            completed_envelope.is_subtask = true;
            completed_envelope.node_id = format!("subflow-{index}");
            completed_envelope.subtask_index = Some(index);
            completed_envelope.total_subtasks = Some(snapshot.total);
            for (name, value) in [
                ("completed", u64::from(snapshot.completed)),
                ("total", u64::from(snapshot.total)),
                ("tokens", snapshot.tokens),
                ("tool_calls", u64::from(snapshot.tool_calls)),
                ("success", u64::from(snapshot.success)),
                ("failed", u64::from(snapshot.failed)),
            ] {
                completed_envelope
                    .payload
                    .insert(name.to_string(), serde_json::Value::from(value));
            }
            envelopes.push(completed_envelope);
        }

        envelopes
    }
}

impl Default for EventTranslator {
    fn default() -> Self {
        Self::new()
    }
}
