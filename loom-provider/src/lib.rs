#![deny(missing_docs)]
//! Provider-facing wire types and conversions used by the ReAct engine
//! (`loom-react`).
//!
//! Key traits defined here:
//! - [`Provider`] — LLM provider interface (not object-safe, uses RPITIT)
//! - [`ContextStrategy`] — context window management

pub mod context;
pub mod convert;
pub mod provider;
pub mod types;

// Re-exports
pub use context::{ContextStrategy, NoCompaction, SlidingWindow};
pub use convert::{
    content_block_to_part, content_part_to_block, content_to_parts, message_to_provider_message,
    parts_to_content, provider_parts_to_assistant_message,
};
pub use provider::{Provider, ProviderDefaults, ProviderError};
pub use types::*;
