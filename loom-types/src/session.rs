//! Session model. Lifecycle: created on first reference, updated on
//! each task completion, never deleted by the core.

use crate::attachment::Attachment;
use crate::id::{ParentRunId, RunId, SessionId};
use crate::message::Message;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Well-known metadata keys. Metadata is otherwise a free-form
/// `string -> string` map, but these keys carry invariants the session
/// manager enforces.
pub mod metadata_keys {
    /// Mirrors the session's own id.
    pub const SESSION_ID: &str = "session_id";
    /// RunId of the most recently completed task.
    pub const LAST_TASK_ID: &str = "last_task_id";
    /// ParentRunId of the most recently completed task, absent when
    /// that task had no parent.
    pub const LAST_PARENT_TASK_ID: &str = "last_parent_task_id";
    /// Session title. First write wins — set at most once.
    pub const TITLE: &str = "title";
    /// Present iff the most recent result's stop reason is
    /// `await_user_input` with an extractable question.
    pub const AWAIT_USER_INPUT: &str = "await_user_input";
    /// Companion to `AWAIT_USER_INPUT`; always present/absent together.
    pub const AWAIT_USER_INPUT_QUESTION: &str = "await_user_input_question";
    /// External user id, propagated from request context.
    pub const USER_ID: &str = "user_id";
    /// Channel identifier (e.g. Lark/WeChat room), same propagation rule.
    pub const CHANNEL: &str = "channel";
}

/// A conversation session: transcript, attachments, and free-form notes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Session {
    /// The session's own id.
    pub id: SessionId,
    /// Transcript. `None` when history is disabled on the request
    /// context for the turn that last saved this session.
    pub messages: Option<Vec<Message>>,
    /// Attachments extracted from messages and normalized to
    /// session-level storage, keyed by name.
    pub attachments: Option<HashMap<String, Attachment>>,
    /// Free-text notes the agent has chosen to remember across tasks.
    pub important_notes: Option<Vec<String>>,
    /// Outstanding todo items.
    pub todos: Vec<String>,
    /// Free-form string metadata; see [`metadata_keys`] for reserved keys.
    pub metadata: HashMap<String, String>,
    /// Free-text persona/preferences for this session's user.
    pub user_persona: String,
    /// Unix epoch milliseconds at creation.
    pub created_at: i64,
    /// Unix epoch milliseconds at last update.
    pub updated_at: i64,
}

impl Session {
    /// Create a new, empty session stamped at `now`.
    pub fn new(id: SessionId, now: i64) -> Self {
        let mut metadata = HashMap::new();
        metadata.insert(metadata_keys::SESSION_ID.to_string(), id.to_string());
        Self {
            id,
            messages: Some(Vec::new()),
            attachments: Some(HashMap::new()),
            important_notes: Some(Vec::new()),
            todos: Vec::new(),
            metadata,
            user_persona: String::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// Fill `user_id`/`channel` metadata only if currently empty or
    /// absent.
    pub fn fill_metadata_if_empty(&mut self, key: &str, value: &str) {
        if value.is_empty() {
            return;
        }
        let should_set = self.metadata.get(key).map(|v| v.is_empty()).unwrap_or(true);
        if should_set {
            self.metadata.insert(key.to_string(), value.to_string());
        }
    }

    /// Set the session title, first write wins.
    pub fn set_title_once(&mut self, title: &str) {
        if title.is_empty() {
            return;
        }
        self.metadata
            .entry(metadata_keys::TITLE.to_string())
            .or_insert_with(|| title.to_string());
    }

    /// Update `last_task_id`/`last_parent_task_id` metadata for a
    /// completed task.
    pub fn record_last_task(&mut self, run_id: &RunId, parent_run_id: &ParentRunId) {
        self.metadata.insert(
            metadata_keys::LAST_TASK_ID.to_string(),
            run_id.to_string(),
        );
        if parent_run_id.is_empty() {
            self.metadata.remove(metadata_keys::LAST_PARENT_TASK_ID);
        } else {
            self.metadata.insert(
                metadata_keys::LAST_PARENT_TASK_ID.to_string(),
                parent_run_id.to_string(),
            );
        }
    }

    /// Set or clear the await-user-input metadata pair atomically,
    /// enforcing the invariant that both keys are present or absent
    /// together.
    pub fn set_await_user_input(&mut self, question: Option<&str>) {
        match question {
            Some(q) if !q.is_empty() => {
                self.metadata
                    .insert(metadata_keys::AWAIT_USER_INPUT.to_string(), "true".into());
                self.metadata.insert(
                    metadata_keys::AWAIT_USER_INPUT_QUESTION.to_string(),
                    q.to_string(),
                );
            }
            _ => {
                self.metadata.remove(metadata_keys::AWAIT_USER_INPUT);
                self.metadata
                    .remove(metadata_keys::AWAIT_USER_INPUT_QUESTION);
            }
        }
    }

    /// Reset all per-turn state: clears transcript,
    /// attachments, notes, todos, and the await-input metadata pair, then
    /// stamps `updated_at`. Does not touch `id`/`created_at`/`user_persona`.
    pub fn reset(&mut self, now: i64) {
        self.messages = Some(Vec::new());
        self.attachments = Some(HashMap::new());
        self.important_notes = Some(Vec::new());
        self.todos.clear();
        self.set_await_user_input(None);
        self.updated_at = now;
    }
}
