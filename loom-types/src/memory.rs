//! Memory entry model and the slot conventions the memory hooks
//! write into it.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Slot value conventions. These are not enforced by the type system —
/// slots are a free-form string map on the memory service's external
/// contract — but the hooks always write one of these.
pub mod slot_keys {
    /// `type` slot: one of [`super::EntryType`]'s serialized forms.
    pub const TYPE: &str = "type";
    /// `scope` slot: one of [`super::EntryScope`]'s serialized forms.
    pub const SCOPE: &str = "scope";
    /// Which hook produced this entry.
    pub const SOURCE: &str = "source";
    /// The task's stop reason at capture time.
    pub const OUTCOME: &str = "outcome";
    /// Owning session id.
    pub const SESSION_ID: &str = "session_id";
    /// Sender id within the channel, if any.
    pub const SENDER_ID: &str = "sender_id";
    /// Channel identifier, if any.
    pub const CHANNEL: &str = "channel";
    /// Chat id within the channel, if any.
    pub const CHAT_ID: &str = "chat_id";
    /// Tool names joined by `"→"`.
    pub const TOOL_SEQUENCE: &str = "tool_sequence";
}

/// The `type` slot's conventional values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryType {
    /// Captured automatically after a tool-using task.
    AutoCapture,
    /// A structured record of the tools used in a task.
    WorkflowTrace,
    /// Captured from a pure-conversation task.
    ChatTurn,
}

impl EntryType {
    /// The slot string this type serializes to.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryType::AutoCapture => "auto_capture",
            EntryType::WorkflowTrace => "workflow_trace",
            EntryType::ChatTurn => "chat_turn",
        }
    }
}

/// The `scope` slot's conventional values.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryScope {
    /// Scoped to the user across all channels.
    User,
    /// Scoped to a specific group chat.
    Chat,
}

impl EntryScope {
    /// The slot string this scope serializes to.
    pub fn as_str(&self) -> &'static str {
        match self {
            EntryScope::User => "user",
            EntryScope::Chat => "chat",
        }
    }
}

/// A recalled or captured long-term memory entry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryEntry {
    /// Owning user id, or a synthetic `chat:<channel>:<chat_id>` id for
    /// chat-scoped entries.
    pub user_id: String,
    /// The entry's textual content.
    pub content: String,
    /// Extracted keywords, see [`crate::text`] rules.
    pub keywords: Vec<String>,
    /// Free-form slots; see [`slot_keys`] for the conventions the hooks use.
    pub slots: HashMap<String, String>,
    /// Epoch millis at creation.
    pub created_at: i64,
    /// Stable key, assigned by the memory service on save.
    pub key: String,
}

impl MemoryEntry {
    /// Build a new entry with no assigned key (the memory service fills
    /// it in on save).
    pub fn new(user_id: impl Into<String>, content: impl Into<String>, created_at: i64) -> Self {
        Self {
            user_id: user_id.into(),
            content: content.into(),
            keywords: Vec::new(),
            slots: HashMap::new(),
            created_at,
            key: String::new(),
        }
    }

    /// Set a slot, following the [`slot_keys`] conventions.
    pub fn with_slot(mut self, key: &str, value: impl Into<String>) -> Self {
        self.slots.insert(key.to_string(), value.into());
        self
    }
}

/// Query parameters for a memory recall.
#[derive(Debug, Clone, Default)]
pub struct MemoryQuery {
    /// Who to recall memories for.
    pub user_id: String,
    /// Free text to match against (may be empty if keywords are set).
    pub text: String,
    /// Keywords to match against.
    pub keywords: Vec<String>,
    /// Slots to filter by, if the backend supports it.
    pub slots: HashMap<String, String>,
    /// Maximum number of entries to return.
    pub limit: usize,
}
