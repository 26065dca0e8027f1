#![deny(missing_docs)]
//! In-process event pipeline: lifts raw ReAct engine events into the
//! uniform envelope contract, serializes delivery per run id, collects
//! per-tool SLA stats, and tracks background tasks spawned on behalf of
//! a session.

mod background;
mod listener;
mod sla;
mod translator;

pub use background::{BackgroundTaskRegistry, CancelFlag, Manager};
pub use listener::{EnvelopeSink, SerializingListener};
pub use loom_types::event::{Payload, UnifiedEvent};
pub use sla::{InMemorySlaCollector, SlaCollector, ToolSla};
pub use translator::EventTranslator;
