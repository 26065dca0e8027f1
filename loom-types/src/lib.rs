//! # loom-types — core data model and collaborator traits for taskloom
//!
//! This crate defines the wire types, session/task/memory data model, and
//! the external collaborator traits that the rest of the workspace
//! depends on. It has no async runtime opinions beyond `async-trait` and
//! carries no business logic of its own — every trait here is implemented
//! in a sibling crate.
//!
//! ## Layout
//!
//! | Module | What it defines |
//! |--------|------------------|
//! | [`id`] | Typed id wrappers (`SessionId`, `RunId`, ...) |
//! | [`content`] | Universal message content (`Content`, `ContentBlock`) |
//! | [`duration`] | [`DurationMs`], a stable-wire-format duration |
//! | [`message`] | `Message`, `ToolCall`, `ToolResult` |
//! | [`attachment`] | `Attachment` and its retention policy |
//! | [`session`] | `Session` and its metadata-key conventions |
//! | [`task`] | `TaskState`, `TaskResult`, `TaskInfo` |
//! | [`workflow`] | `WorkflowSnapshot` and DAG sanitization |
//! | [`envelope`] | `WorkflowEventEnvelope`, the uniform event wire contract |
//! | [`event`] | `UnifiedEvent`, the engine's pre-translation vocabulary |
//! | [`memory`] | `MemoryEntry`, `MemoryQuery` |
//! | [`hook`] | `ProactiveHook`, `Injection`, context formatting |
//! | [`context`] | `RequestContext`, propagated per-run identity |
//! | [`error`] | Error taxonomy, organized by handling policy |
//! | [`collab`] | External collaborator traits |
//! | [`text`] | Keyword extraction, Jaccard similarity, rune truncation |
//!
//! ## Dependency Notes
//!
//! This crate depends on `serde_json::Value` for extension data fields
//! (metadata, tool inputs, custom payloads). JSON is the interchange
//! format at every boundary here; `serde_json::Value` is the de facto
//! standard in the Rust ecosystem for this, and the alternative (generic
//! `T: Serialize`) would complicate trait object safety without
//! practical benefit.

#![deny(missing_docs)]

pub mod attachment;
pub mod collab;
pub mod content;
pub mod context;
pub mod duration;
pub mod envelope;
pub mod error;
pub mod event;
pub mod hook;
pub mod id;
pub mod memory;
pub mod message;
pub mod session;
pub mod task;
pub mod text;
pub mod workflow;

#[cfg(feature = "test-utils")]
pub mod test_utils;

// Re-exports for convenience
pub use attachment::{Attachment, AttachmentSource, INLINE_RETENTION_LIMIT_BYTES};
pub use collab::{
    AttachmentMigrator, AttachmentPersister, CheckpointStore, CostTracker, EngineOverrides,
    EventSink, ExecutionEnvironment, HistoryManager, IterationHook, MaybeSession, MemoryService,
    PreparationService, ReactEngine, SessionStore, TaskAnalysis,
};
pub use content::{Content, ContentBlock, ImageSource};
pub use context::RequestContext;
pub use duration::DurationMs;
pub use envelope::{NodeKind, WorkflowEventEnvelope, ENVELOPE_VERSION};
pub use event::{Payload, UnifiedEvent};
pub use error::{
    BackgroundError, CoordinatorError, EngineError, HookError, SessionError,
};
pub use hook::{format_injections_as_context, Injection, InjectionType, ProactiveHook};
pub use id::{CorrelationId, LogId, ParentRunId, RunId, SessionId, UserId, WorkflowId};
pub use memory::{slot_keys, EntryScope, EntryType, MemoryEntry, MemoryQuery};
pub use message::{Message, MessageSource, ToolCall, ToolResult};
pub use session::{metadata_keys, Session};
pub use task::{StopReason, TaskInfo, TaskResult, TaskState};
pub use workflow::{
    is_tool_recorder_node, NodeStatus, StatusSummary, WorkflowNode, WorkflowPhase,
    WorkflowSnapshot, TOOL_RECORDER_MARKER,
};
