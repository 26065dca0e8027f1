//! Provider trait and engine-facing defaults for LLM backends.
//!
//! The [`Provider`] trait uses RPITIT (return-position `impl Trait` in
//! traits) and is intentionally NOT object-safe. The object-safe
//! boundary is `loom_types::ReactEngine` — the engine is generic over
//! `P: Provider`.

use crate::types::{ProviderRequest, ProviderResponse};
use std::future::Future;
use thiserror::Error;

/// Errors from LLM providers.
#[non_exhaustive]
#[derive(Debug, Error)]
pub enum ProviderError {
    /// HTTP or network request failed.
    #[error("request failed: {0}")]
    RequestFailed(String),

    /// Provider rate-limited the request.
    #[error("rate limited")]
    RateLimited,

    /// Authentication/authorization failed.
    #[error("auth failed: {0}")]
    AuthFailed(String),

    /// Could not parse the provider's response.
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// Catch-all for other errors.
    #[error("{0}")]
    Other(#[from] Box<dyn std::error::Error + Send + Sync>),
}

impl ProviderError {
    /// Whether retrying this request might succeed. Rate limits and
    /// transport failures are transient; auth and parse failures are
    /// not.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            ProviderError::RateLimited | ProviderError::RequestFailed(_)
        )
    }
}

/// LLM provider interface.
///
/// Each backend (Anthropic, OpenAI, Ollama) implements this trait.
/// Provider-native features (truncation, caching, thinking blocks)
/// are the implementation's business, configured through
/// `ProviderRequest.extra`.
pub trait Provider: Send + Sync {
    /// Send a completion request to the provider.
    fn complete(
        &self,
        request: ProviderRequest,
    ) -> impl Future<Output = Result<ProviderResponse, ProviderError>> + Send;
}

/// Static completion defaults for a provider-backed engine instance.
///
/// Per-task overrides arrive through the execution environment; these
/// are what the engine falls back to when no override is present.
pub struct ProviderDefaults {
    /// Base system prompt, used when the preparation service resolves
    /// an empty one.
    pub system_prompt: String,

    /// Default model identifier. Empty means "let the provider pick".
    pub default_model: String,

    /// Default maximum output tokens per provider call.
    pub default_max_tokens: u32,

    /// Default maximum ReAct loop iterations.
    pub default_max_turns: u32,
}

impl Default for ProviderDefaults {
    fn default() -> Self {
        Self {
            system_prompt: "You are a helpful assistant.".into(),
            default_model: String::new(),
            default_max_tokens: 4096,
            default_max_turns: 25,
        }
    }
}
