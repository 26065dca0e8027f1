#![deny(missing_docs)]
//! # taskloom — agent task orchestration runtime
//!
//! The coordinator crate: drives a ReAct task to completion while
//! streaming a strictly ordered sequence of workflow lifecycle events
//! to subscribers, injects proactive context before each task, captures
//! memory after it, and persists the session with attachment
//! externalization.
//!
//! The heavy lifting lives in the sibling crates, re-exported here for
//! a single import surface:
//!
//! | Crate | Role |
//! |-------|------|
//! | `loom-types` | Data model + collaborator traits |
//! | `loom-provider` | Provider wire types and the `Provider` trait |
//! | `loom-tool` | Tool registry |
//! | `loom-react` | The ReAct engine |
//! | `loom-hooks` | Proactive hook registry |
//! | `loom-hook-memory` | Memory recall/capture hooks |
//! | `loom-orch-local` | Event translation, serialized delivery, background tasks |
//! | `loom-state-memory` / `loom-state-fs` | Session/history/checkpoint backends |
//!
//! ## Composition
//!
//! The construction order breaks the coordinator ↔ engine ↔ listener
//! cycle: take the iteration persister from the builder, build the
//! engine with it, then hand the engine back — the builder wires the
//! event pipeline into the engine via its setter.
//!
//! ```no_run
//! # use std::sync::Arc;
//! use taskloom::prelude::*;
//! # use loom_provider::{Provider, ProviderRequest, ProviderResponse, ProviderError};
//! # struct MyProvider;
//! # impl Provider for MyProvider {
//! #     fn complete(&self, _r: ProviderRequest)
//! #         -> impl std::future::Future<Output = Result<ProviderResponse, ProviderError>> + Send
//! #     { async { Err(ProviderError::RateLimited) } }
//! # }
//! # async fn compose() {
//! let store = Arc::new(MemoryStore::new());
//! let history = Arc::new(MemoryHistoryManager::new());
//!
//! let builder = AgentCoordinator::builder(store, history);
//! let engine = LocalReactEngine::new(
//!     MyProvider,
//!     Arc::new(ToolRegistry::new()),
//!     ProviderDefaults::default(),
//! )
//! .with_iteration_hook(builder.iteration_persister());
//! let coordinator = builder.with_engine(Arc::new(engine)).build();
//!
//! let result = coordinator
//!     .execute_task(
//!         TaskOptions::new("session-1", "deploy the api-gateway"),
//!         Arc::new(|envelope: WorkflowEventEnvelope| {
//!             println!("{} {}", envelope.seq, envelope.event_type);
//!         }),
//!     )
//!     .await;
//! # let _ = result;
//! # }
//! ```

pub use loom_hook_memory;
pub use loom_hooks;
pub use loom_orch_local;
pub use loom_provider;
pub use loom_react;
pub use loom_state_fs;
pub use loom_state_memory;
pub use loom_tool;
pub use loom_types;

pub mod config;
pub mod coordinator;
pub mod pipeline;
pub mod prepare;

pub use config::{EffectiveConfig, RuntimeConfigResolver, StaticConfigResolver};
pub use coordinator::{
    AgentCoordinator, ContextWindowPreview, CoordinatorBuilder, SessionPersister, TaskOptions,
};
pub use pipeline::{EventPipeline, StageStatus, TitleSlot};
pub use prepare::DefaultPreparation;

/// Happy-path imports for composing a taskloom runtime.
pub mod prelude {
    pub use crate::config::{EffectiveConfig, RuntimeConfigResolver, StaticConfigResolver};
    pub use crate::coordinator::{AgentCoordinator, TaskOptions};
    pub use crate::prepare::DefaultPreparation;
    pub use loom_hook_memory::{
        ConversationCaptureHook, InMemoryMemoryService, MemoryCaptureHook, MemoryRecallHook,
    };
    pub use loom_hooks::ProactiveHookRegistry;
    pub use loom_orch_local::{
        BackgroundTaskRegistry, CancelFlag, EnvelopeSink, InMemorySlaCollector,
    };
    pub use loom_provider::{Provider, ProviderDefaults};
    pub use loom_react::LocalReactEngine;
    pub use loom_state_fs::{FsAttachmentPersister, FsStore};
    pub use loom_state_memory::{MemoryCheckpointStore, MemoryHistoryManager, MemoryStore};
    pub use loom_tool::{ToolDyn, ToolRegistry};
    pub use loom_types::{
        Attachment, Injection, InjectionType, Message, MessageSource, ProactiveHook,
        RequestContext, Session, SessionId, StopReason, TaskResult, WorkflowEventEnvelope,
    };
}
