#![deny(missing_docs)]
//! Memory recall, memory capture, and conversation capture hooks
//! — the three stock [`loom_types::hook::ProactiveHook`]
//! implementations taskloom ships.

use async_trait::async_trait;
use loom_types::collab::MemoryService;
use loom_types::error::HookError;
use loom_types::hook::{Injection, InjectionType, ProactiveHook};
use loom_types::memory::{slot_keys, EntryScope, EntryType, MemoryEntry, MemoryQuery};
use loom_types::task::{TaskInfo, TaskResult};
use loom_types::text;
use serde_json::json;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;

const DEFAULT_MAX_RECALLS: usize = 5;
const GROUP_CHAT_EXTRA_RECALLS: usize = 2;
const MIN_RECALL_INPUT_RUNES: usize = 4;
const MAX_TASK_SUMMARY_CHARS: usize = 200;
const MAX_ANSWER_SUMMARY_CHARS: usize = 1000;
const DEDUP_CANDIDATE_LIMIT: usize = 5;
const WORKFLOW_TRACE_TOOL_THRESHOLD: usize = 2;

fn chat_scoped_user_id(channel: &str, chat_id: &str) -> String {
    format!("chat:{channel}:{chat_id}")
}

fn unique_tool_names(result: &TaskResult) -> Vec<String> {
    let mut seen = HashSet::new();
    let mut names = Vec::new();
    for message in &result.messages {
        for call in &message.tool_calls {
            if seen.insert(call.name.clone()) {
                names.push(call.name.clone());
            }
        }
    }
    names
}

fn tool_outcomes(result: &TaskResult) -> Vec<(String, bool)> {
    // Calls live on assistant messages, results on the tool message that
    // follows; resolve names across the whole transcript.
    let mut names = HashMap::new();
    for message in &result.messages {
        for call in &message.tool_calls {
            names.insert(call.id.clone(), call.name.clone());
        }
    }
    let mut outcomes = Vec::new();
    for message in &result.messages {
        for tool_result in &message.tool_results {
            let name = names
                .get(&tool_result.call_id)
                .cloned()
                .unwrap_or_else(|| tool_result.call_id.clone());
            outcomes.push((name, tool_result.error.is_none()));
        }
    }
    outcomes
}

fn task_input_text(result: &TaskResult) -> String {
    result
        .messages
        .iter()
        .find(|m| matches!(m.source, loom_types::message::MessageSource::UserInput))
        .and_then(|m| m.content.as_text())
        .unwrap_or_default()
        .to_string()
}

/// Pre-task hook that recalls relevant long-term memories and injects
/// them into the task's context.
pub struct MemoryRecallHook {
    memory: Arc<dyn MemoryService>,
    enabled: bool,
    max_recalls: usize,
}

impl MemoryRecallHook {
    /// Build a recall hook against the given memory service, enabled by
    /// default with [`DEFAULT_MAX_RECALLS`].
    pub fn new(memory: Arc<dyn MemoryService>) -> Self {
        Self {
            memory,
            enabled: true,
            max_recalls: DEFAULT_MAX_RECALLS,
        }
    }

    /// Disable recall entirely.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Override the per-recall limit.
    pub fn with_max_recalls(mut self, max_recalls: usize) -> Self {
        self.max_recalls = max_recalls;
        self
    }
}

#[async_trait]
impl ProactiveHook for MemoryRecallHook {
    fn name(&self) -> &str {
        "memory_recall"
    }

    async fn on_task_start(&self, info: &TaskInfo<'_>) -> Result<Vec<Injection>, HookError> {
        if !self.enabled || info.input.is_empty() {
            return Ok(Vec::new());
        }

        let keywords = text::extract_keywords(info.input);
        if keywords.is_empty() && info.input.chars().count() < MIN_RECALL_INPUT_RUNES {
            return Ok(Vec::new());
        }

        let user_id = info.user_id.unwrap_or("default").to_string();
        let mut query = MemoryQuery {
            user_id: user_id.clone(),
            text: info.input.to_string(),
            keywords: keywords.clone(),
            slots: Default::default(),
            limit: self.max_recalls,
        };
        let mut entries = self
            .memory
            .recall(&query)
            .await
            .map_err(|e| HookError::Collaborator(e.to_string()))?;

        if let (Some(channel), Some(chat_id)) = (info.channel, info.chat_id) {
            query.user_id = chat_scoped_user_id(channel, chat_id);
            query.limit = GROUP_CHAT_EXTRA_RECALLS;
            let chat_entries = self
                .memory
                .recall(&query)
                .await
                .map_err(|e| HookError::Collaborator(e.to_string()))?;
            entries.extend(chat_entries.into_iter().take(GROUP_CHAT_EXTRA_RECALLS));
        }

        if entries.is_empty() {
            return Ok(Vec::new());
        }

        let content = entries
            .iter()
            .map(|e| format!("- {}", e.content))
            .collect::<Vec<_>>()
            .join("\n");

        Ok(vec![Injection {
            injection_type: InjectionType::MemoryRecall,
            content,
            source: self.name().to_string(),
            priority: 100,
        }])
    }

    async fn on_task_completed(&self, _result: &TaskResult) -> Result<(), HookError> {
        Ok(())
    }
}

/// Shared capture skeleton for [`MemoryCaptureHook`] and
/// [`ConversationCaptureHook`] — they differ only in which tasks
/// they fire for and which scopes they capture into.
struct CaptureSkeleton {
    memory: Arc<dyn MemoryService>,
    similarity_threshold: f64,
}

impl CaptureSkeleton {
    fn build_summary(result: &TaskResult, tool_names: &[String]) -> String {
        format!(
            "Task: {}\nTools: {}\nOutcome: {}\nResult: {}",
            text::truncate_runes(&task_input_text(result), MAX_TASK_SUMMARY_CHARS),
            tool_names.join(", "),
            result.stop_reason.as_str(),
            text::truncate_runes(&result.answer, MAX_ANSWER_SUMMARY_CHARS),
        )
    }

    fn build_keywords(content: &str, tool_names: &[String]) -> Vec<String> {
        let mut keywords = text::extract_keywords(content);
        let mut seen: HashSet<String> = keywords.iter().cloned().collect();
        for name in tool_names {
            let lower = name.to_lowercase();
            if seen.insert(lower.clone()) {
                keywords.push(lower);
            }
        }
        keywords
    }

    fn build_slots(
        result: &TaskResult,
        entry_type: EntryType,
        scope: EntryScope,
        source: &str,
        tool_names: &[String],
    ) -> std::collections::HashMap<String, String> {
        let mut slots = std::collections::HashMap::new();
        slots.insert(slot_keys::TYPE.to_string(), entry_type.as_str().to_string());
        slots.insert(slot_keys::SCOPE.to_string(), scope.as_str().to_string());
        slots.insert(slot_keys::SOURCE.to_string(), source.to_string());
        slots.insert(slot_keys::OUTCOME.to_string(), result.stop_reason.as_str().to_string());
        slots.insert(slot_keys::TOOL_SEQUENCE.to_string(), tool_names.join("→"));
        slots.insert(slot_keys::SESSION_ID.to_string(), result.session_id.to_string());
        if let Some(channel) = &result.channel {
            slots.insert(slot_keys::CHANNEL.to_string(), channel.clone());
        }
        if let Some(sender_id) = &result.sender_id {
            slots.insert(slot_keys::SENDER_ID.to_string(), sender_id.clone());
        }
        if let Some(chat_id) = &result.chat_id {
            slots.insert(slot_keys::CHAT_ID.to_string(), chat_id.clone());
        }
        slots
    }

    async fn is_duplicate(&self, user_id: &str, content: &str, keywords: &[String]) -> bool {
        let query = MemoryQuery {
            user_id: user_id.to_string(),
            text: content.to_string(),
            keywords: keywords.to_vec(),
            slots: Default::default(),
            limit: DEDUP_CANDIDATE_LIMIT,
        };
        let candidates = match self.memory.recall(&query).await {
            Ok(entries) => entries,
            Err(_) => return false,
        };
        candidates
            .iter()
            .any(|c| text::jaccard_similarity(content, &c.content) >= self.similarity_threshold)
    }

    #[allow(clippy::too_many_arguments)]
    async fn capture_for_user(
        &self,
        user_id: &str,
        result: &TaskResult,
        entry_type: EntryType,
        scope: EntryScope,
        source: &str,
        tool_names: &[String],
        now: i64,
    ) -> Result<(), HookError> {
        let content = Self::build_summary(result, tool_names);
        let keywords = Self::build_keywords(&content, tool_names);

        if self.is_duplicate(user_id, &content, &keywords).await {
            tracing::debug!(user_id, "skipping duplicate memory capture");
            return Ok(());
        }

        let entry = MemoryEntry {
            keywords: keywords.clone(),
            slots: Self::build_slots(result, entry_type, scope, source, tool_names),
            ..MemoryEntry::new(user_id, content, now)
        };
        self.memory
            .capture(entry)
            .await
            .map_err(|e| HookError::Collaborator(e.to_string()))?;

        if tool_names.len() >= WORKFLOW_TRACE_TOOL_THRESHOLD {
            let trace = json!({
                "task_id": result.run_id.to_string(),
                "user_id": user_id,
                "outcome": result.stop_reason.as_str(),
                "created_at": now,
                "tools": tool_outcomes(result)
                    .into_iter()
                    .map(|(name, success)| json!({"name": name, "success": success}))
                    .collect::<Vec<_>>(),
            });
            let trace_entry = MemoryEntry::new(user_id, trace.to_string(), now)
                .with_slot(slot_keys::TYPE, EntryType::WorkflowTrace.as_str());
            self.memory
                .capture(trace_entry)
                .await
                .map_err(|e| HookError::Collaborator(e.to_string()))?;
        }

        Ok(())
    }
}

/// Post-task hook that summarizes and captures tool-using tasks into
/// long-term memory.
pub struct MemoryCaptureHook {
    skeleton: CaptureSkeleton,
    enabled: bool,
    auto_capture_enabled: bool,
    message_capture_enabled: bool,
    now_fn: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl MemoryCaptureHook {
    /// Build a capture hook. `now_fn` supplies the creation timestamp
    /// (epoch millis) so callers control the clock in tests.
    pub fn new(memory: Arc<dyn MemoryService>, now_fn: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        Self {
            skeleton: CaptureSkeleton {
                memory,
                similarity_threshold: text::DEFAULT_SIMILARITY_THRESHOLD,
            },
            enabled: true,
            auto_capture_enabled: true,
            message_capture_enabled: false,
            now_fn,
        }
    }

    /// Disable the hook entirely.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Disable auto-capture policy.
    pub fn without_auto_capture(mut self) -> Self {
        self.auto_capture_enabled = false;
        self
    }

    /// Allow this hook to also capture zero-tool-call tasks.
    pub fn with_message_capture(mut self) -> Self {
        self.message_capture_enabled = true;
        self
    }
}

#[async_trait]
impl ProactiveHook for MemoryCaptureHook {
    fn name(&self) -> &str {
        "memory_capture"
    }

    async fn on_task_start(&self, _info: &TaskInfo<'_>) -> Result<Vec<Injection>, HookError> {
        Ok(Vec::new())
    }

    async fn on_task_completed(&self, result: &TaskResult) -> Result<(), HookError> {
        let tool_names = unique_tool_names(result);
        let Some(user_id) = result.user_id.as_deref() else {
            return Ok(());
        };

        if !self.enabled
            || !self.auto_capture_enabled
            || (tool_names.is_empty() && !self.message_capture_enabled)
            || result.answer.is_empty()
            || user_id.is_empty()
        {
            return Ok(());
        }

        self.skeleton
            .capture_for_user(
                user_id,
                result,
                EntryType::AutoCapture,
                EntryScope::User,
                self.name(),
                &tool_names,
                (self.now_fn)(),
            )
            .await
    }
}

/// Post-task hook that captures pure-conversation tasks (zero tool
/// calls) into long-term memory.
pub struct ConversationCaptureHook {
    skeleton: CaptureSkeleton,
    enabled: bool,
    now_fn: Arc<dyn Fn() -> i64 + Send + Sync>,
}

impl ConversationCaptureHook {
    /// Build a conversation-capture hook.
    pub fn new(memory: Arc<dyn MemoryService>, now_fn: Arc<dyn Fn() -> i64 + Send + Sync>) -> Self {
        Self {
            skeleton: CaptureSkeleton {
                memory,
                similarity_threshold: text::DEFAULT_SIMILARITY_THRESHOLD,
            },
            enabled: true,
            now_fn,
        }
    }

    /// Disable the hook entirely.
    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }
}

#[async_trait]
impl ProactiveHook for ConversationCaptureHook {
    fn name(&self) -> &str {
        "conversation_capture"
    }

    async fn on_task_start(&self, _info: &TaskInfo<'_>) -> Result<Vec<Injection>, HookError> {
        Ok(Vec::new())
    }

    async fn on_task_completed(&self, result: &TaskResult) -> Result<(), HookError> {
        let tool_names = unique_tool_names(result);
        let Some(user_id) = result.user_id.as_deref() else {
            return Ok(());
        };

        if !self.enabled || !tool_names.is_empty() || result.answer.is_empty() || user_id.is_empty() {
            return Ok(());
        }

        let now = (self.now_fn)();
        self.skeleton
            .capture_for_user(
                user_id,
                result,
                EntryType::ChatTurn,
                EntryScope::User,
                self.name(),
                &tool_names,
                now,
            )
            .await?;

        if let (Some(channel), Some(chat_id)) = (&result.channel, &result.chat_id) {
            let chat_user = chat_scoped_user_id(channel, chat_id);
            self.skeleton
                .capture_for_user(
                    &chat_user,
                    result,
                    EntryType::ChatTurn,
                    EntryScope::Chat,
                    self.name(),
                    &tool_names,
                    now,
                )
                .await?;
        }

        Ok(())
    }
}

/// Reference in-memory [`MemoryService`]: keyword-overlap recall over a
/// flat entry list. Good enough for tests, demos, and single-process
/// deployments; production backends sit behind the same trait.
#[derive(Default)]
pub struct InMemoryMemoryService {
    entries: std::sync::Mutex<Vec<MemoryEntry>>,
    next_key: std::sync::atomic::AtomicU64,
}

impl InMemoryMemoryService {
    /// An empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an entry directly, bypassing capture-time key assignment
    /// rules. Used to preload fixtures.
    pub fn seed(&self, entry: MemoryEntry) {
        self.entries.lock().unwrap().push(entry);
    }

    /// All stored entries, in capture order.
    pub fn entries(&self) -> Vec<MemoryEntry> {
        self.entries.lock().unwrap().clone()
    }

    fn matches(entry: &MemoryEntry, query: &MemoryQuery) -> bool {
        if entry.user_id != query.user_id {
            return false;
        }
        for (key, value) in &query.slots {
            if entry.slots.get(key) != Some(value) {
                return false;
            }
        }
        if query.keywords.is_empty() {
            return true;
        }
        let content_lower = entry.content.to_lowercase();
        query.keywords.iter().any(|k| {
            entry.keywords.iter().any(|ek| ek == k) || content_lower.contains(k.as_str())
        })
    }
}

#[async_trait]
impl MemoryService for InMemoryMemoryService {
    async fn recall(&self, query: &MemoryQuery) -> Result<Vec<MemoryEntry>, HookError> {
        let entries = self.entries.lock().unwrap();
        Ok(entries
            .iter()
            .filter(|e| Self::matches(e, query))
            .take(if query.limit == 0 { usize::MAX } else { query.limit })
            .cloned()
            .collect())
    }

    async fn capture(&self, mut entry: MemoryEntry) -> Result<MemoryEntry, HookError> {
        if entry.key.is_empty() {
            let n = self
                .next_key
                .fetch_add(1, std::sync::atomic::Ordering::SeqCst);
            entry.key = format!("mem-{n}");
        }
        self.entries.lock().unwrap().push(entry.clone());
        Ok(entry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_types::id::{ParentRunId, RunId, SessionId, WorkflowId};
    use loom_types::message::{Message, MessageSource};
    use loom_types::task::StopReason;
    use loom_types::workflow::WorkflowSnapshot;
    use std::sync::Mutex;
    use tokio::sync::Mutex as AsyncMutex;

    #[derive(Default)]
    struct FakeMemory {
        saved: AsyncMutex<Vec<MemoryEntry>>,
        recall_results: Mutex<Vec<MemoryEntry>>,
    }

    #[async_trait]
    impl MemoryService for FakeMemory {
        async fn recall(&self, _query: &MemoryQuery) -> Result<Vec<MemoryEntry>, HookError> {
            Ok(self.recall_results.lock().unwrap().clone())
        }

        async fn capture(&self, entry: MemoryEntry) -> Result<MemoryEntry, HookError> {
            self.saved.lock().await.push(entry.clone());
            Ok(entry)
        }
    }

    fn base_result(answer: &str, stop_reason: StopReason) -> TaskResult {
        TaskResult {
            answer: answer.to_string(),
            messages: Vec::new(),
            iterations: 1,
            tokens_used: 10,
            stop_reason,
            session_id: SessionId::new("s1"),
            run_id: RunId::new("r1"),
            parent_run_id: ParentRunId::default(),
            user_id: Some("u1".to_string()),
            channel: None,
            sender_id: None,
            chat_id: None,
            workflow: WorkflowSnapshot::new(WorkflowId::new("w1"), 0),
            important: Vec::new(),
        }
    }

    #[tokio::test]
    async fn recall_hook_skips_empty_input() {
        let memory = Arc::new(FakeMemory::default());
        let hook = MemoryRecallHook::new(memory);
        let session_id = SessionId::new("s1");
        let run_id = RunId::new("r1");
        let info = TaskInfo {
            input: "",
            session_id: &session_id,
            run_id: &run_id,
            user_id: None,
            channel: None,
            chat_id: None,
        };
        assert!(hook.on_task_start(&info).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn recall_hook_injects_with_priority_100() {
        let memory = Arc::new(FakeMemory::default());
        memory
            .recall_results
            .lock()
            .unwrap()
            .push(MemoryEntry::new("u1", "likes blue-green deploys", 0));
        let hook = MemoryRecallHook::new(memory);
        let session_id = SessionId::new("s1");
        let run_id = RunId::new("r1");
        let info = TaskInfo {
            input: "how should I deploy the gateway",
            session_id: &session_id,
            run_id: &run_id,
            user_id: Some("u1"),
            channel: None,
            chat_id: None,
        };
        let injections = hook.on_task_start(&info).await.unwrap();
        assert_eq!(injections.len(), 1);
        assert_eq!(injections[0].priority, 100);
        assert!(injections[0].content.contains("blue-green"));
    }

    #[tokio::test]
    async fn capture_hook_skips_when_no_tools_and_message_capture_disabled() {
        let memory = Arc::new(FakeMemory::default());
        let hook = MemoryCaptureHook::new(memory.clone(), Arc::new(|| 0));
        let result = base_result("done", StopReason::Complete);
        hook.on_task_completed(&result).await.unwrap();
        assert!(memory.saved.lock().await.is_empty());
    }

    #[tokio::test]
    async fn capture_hook_saves_when_tool_calls_present() {
        let memory = Arc::new(FakeMemory::default());
        let hook = MemoryCaptureHook::new(memory.clone(), Arc::new(|| 0));
        let mut result = base_result("deployed successfully", StopReason::Complete);
        result.messages.push(Message {
            role: "assistant".to_string(),
            content: loom_types::content::Content::text("calling tool"),
            source: MessageSource::AssistantReply,
            attachments: Default::default(),
            tool_calls: vec![loom_types::message::ToolCall {
                id: "c1".to_string(),
                name: "deploy".to_string(),
                arguments: json!({}),
            }],
            tool_results: Vec::new(),
        });
        hook.on_task_completed(&result).await.unwrap();
        assert_eq!(memory.saved.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn capture_hook_skips_duplicates_by_jaccard_similarity() {
        let memory = Arc::new(FakeMemory::default());
        memory
            .recall_results
            .lock()
            .unwrap()
            .push(MemoryEntry::new("u1", "Task: deploy gateway now\nTools: deploy\nOutcome: complete\nResult: deployed successfully", 0));
        let hook = MemoryCaptureHook::new(memory.clone(), Arc::new(|| 0));
        let mut result = base_result("deployed successfully", StopReason::Complete);
        result.messages.push(Message {
            role: "assistant".to_string(),
            content: loom_types::content::Content::text("calling tool"),
            source: MessageSource::AssistantReply,
            attachments: Default::default(),
            tool_calls: vec![loom_types::message::ToolCall {
                id: "c1".to_string(),
                name: "deploy".to_string(),
                arguments: json!({}),
            }],
            tool_results: Vec::new(),
        });
        result.messages[0] = result.messages[0].clone();
        hook.on_task_completed(&result).await.unwrap();
        assert!(memory.saved.lock().await.is_empty());
    }

    #[tokio::test]
    async fn conversation_capture_fires_only_without_tool_calls() {
        let memory = Arc::new(FakeMemory::default());
        let hook = ConversationCaptureHook::new(memory.clone(), Arc::new(|| 0));
        let result = base_result("sure, happy to chat", StopReason::Complete);
        hook.on_task_completed(&result).await.unwrap();
        assert_eq!(memory.saved.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn in_memory_service_recalls_by_keyword_overlap() {
        let service = InMemoryMemoryService::new();
        let mut entry = MemoryEntry::new("u1", "prefers blue-green deployment", 0);
        entry.keywords = vec!["deployment".to_string()];
        service.seed(entry);
        service.seed(MemoryEntry::new("u1", "likes coffee", 0));

        let query = MemoryQuery {
            user_id: "u1".to_string(),
            text: "deploy the gateway".to_string(),
            keywords: vec!["deployment".to_string()],
            slots: Default::default(),
            limit: 5,
        };
        let recalled = service.recall(&query).await.unwrap();
        assert_eq!(recalled.len(), 1);
        assert!(recalled[0].content.contains("blue-green"));
    }

    #[tokio::test]
    async fn in_memory_service_assigns_keys_on_capture() {
        let service = InMemoryMemoryService::new();
        let saved = service
            .capture(MemoryEntry::new("u1", "remember this", 0))
            .await
            .unwrap();
        assert!(!saved.key.is_empty());
        assert_eq!(service.entries().len(), 1);
    }

    #[tokio::test]
    async fn conversation_capture_saves_chat_scoped_entry_in_group_context() {
        let memory = Arc::new(FakeMemory::default());
        let hook = ConversationCaptureHook::new(memory.clone(), Arc::new(|| 0));
        let mut result = base_result("sure, happy to chat", StopReason::Complete);
        result.channel = Some("lark".to_string());
        result.sender_id = Some("ou-42".to_string());
        result.chat_id = Some("room-1".to_string());
        hook.on_task_completed(&result).await.unwrap();
        let saved = memory.saved.lock().await;
        assert_eq!(saved.len(), 2);
        assert_eq!(saved[1].user_id, "chat:lark:room-1");
        assert_eq!(
            saved[0].slots.get(slot_keys::SENDER_ID).map(String::as_str),
            Some("ou-42")
        );
    }
}
