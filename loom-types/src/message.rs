//! Message model: transcript entries with their tool calls, tool
//! results, and attachments.

use crate::attachment::Attachment;
use crate::content::Content;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// What produced a message. Drives persistence sanitation — messages
/// with `source = UserHistory` are never persisted.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MessageSource {
    /// The agent's system prompt.
    SystemPrompt,
    /// New input for this task.
    UserInput,
    /// Prior conversation turns replayed from history.
    UserHistory,
    /// A reply from the assistant.
    AssistantReply,
    /// The output of a tool call.
    ToolResult,
    /// A proactive hook's injection.
    Proactive,
}

/// A request from the assistant to invoke a tool.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCall {
    /// Unique identifier for this call, matched against `ToolResult::call_id`.
    pub id: String,
    /// Name of the tool to invoke.
    pub name: String,
    /// Arguments passed to the tool.
    pub arguments: serde_json::Value,
}

/// The result of executing a tool call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolResult {
    /// The `ToolCall::id` this result corresponds to.
    pub call_id: String,
    /// The tool's output content.
    pub content: String,
    /// Arbitrary metadata returned alongside the content (e.g.
    /// `artifact_manifest`, consumed by the event translator).
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Attachments produced by the tool call.
    #[serde(default)]
    pub attachments: HashMap<String, Attachment>,
    /// Set when the tool call failed.
    pub error: Option<String>,
}

/// A single message in a session's transcript.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    /// `system | user | assistant | tool`, in the conventional sense.
    pub role: String,
    /// The message body.
    pub content: Content,
    /// What produced this message.
    pub source: MessageSource,
    /// Attachments keyed by name.
    #[serde(default)]
    pub attachments: HashMap<String, Attachment>,
    /// Tool calls requested by this message (assistant messages only).
    #[serde(default)]
    pub tool_calls: Vec<ToolCall>,
    /// Tool results carried by this message (tool-result messages only).
    #[serde(default)]
    pub tool_results: Vec<ToolResult>,
}

impl Message {
    /// Construct a minimal message with no attachments or tool activity.
    pub fn new(role: impl Into<String>, content: Content, source: MessageSource) -> Self {
        Self {
            role: role.into(),
            content,
            source,
            attachments: HashMap::new(),
            tool_calls: Vec::new(),
            tool_results: Vec::new(),
        }
    }

    /// Build the `user`-role proactive-injection message appended to
    /// `state.messages` before the ReAct engine runs.
    pub fn proactive(formatted_injections: impl Into<String>) -> Self {
        Self::new(
            "user",
            Content::text(formatted_injections),
            MessageSource::Proactive,
        )
    }
}
