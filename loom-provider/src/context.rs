//! Context strategies for managing the conversation window.
//!
//! The [`ContextStrategy`] trait handles client-side context compaction.
//! Provider-native truncation (e.g., OpenAI `truncation: auto`) is
//! invisible to the strategy — handled by the Provider impl internally.

use crate::types::{ContentPart, ProviderMessage};

/// Rough chars-per-token ratio used by the estimation heuristics.
const CHARS_PER_TOKEN: usize = 4;

/// Flat token charge for an image part.
const IMAGE_TOKEN_ESTIMATE: usize = 1000;

/// Per-message overhead (role, formatting).
const MESSAGE_OVERHEAD_TOKENS: usize = 4;

fn part_tokens(part: &ContentPart) -> usize {
    match part {
        ContentPart::Text { text } => text.len() / CHARS_PER_TOKEN,
        ContentPart::ToolUse { input, .. } => input.to_string().len() / CHARS_PER_TOKEN,
        ContentPart::ToolResult { content, .. } => content.len() / CHARS_PER_TOKEN,
        ContentPart::Image { .. } => IMAGE_TOKEN_ESTIMATE,
    }
}

fn message_tokens(message: &ProviderMessage) -> usize {
    message.content.iter().map(part_tokens).sum::<usize>() + MESSAGE_OVERHEAD_TOKENS
}

/// Strategy for managing context window size.
pub trait ContextStrategy: Send + Sync {
    /// Estimate token count for a message list.
    fn token_estimate(&self, messages: &[ProviderMessage]) -> usize;

    /// Whether compaction should run given the current messages and limit.
    fn should_compact(&self, messages: &[ProviderMessage], limit: usize) -> bool;

    /// Compact the message list. Returns a shorter list.
    fn compact(&self, messages: Vec<ProviderMessage>) -> Vec<ProviderMessage>;
}

/// A no-op context strategy that never compacts.
///
/// Useful for short conversations or when the provider handles
/// truncation natively.
pub struct NoCompaction;

impl ContextStrategy for NoCompaction {
    fn token_estimate(&self, messages: &[ProviderMessage]) -> usize {
        messages
            .iter()
            .map(|m| m.content.iter().map(part_tokens).sum::<usize>())
            .sum()
    }

    fn should_compact(&self, _messages: &[ProviderMessage], _limit: usize) -> bool {
        false
    }

    fn compact(&self, messages: Vec<ProviderMessage>) -> Vec<ProviderMessage> {
        messages
    }
}

/// Sliding-window compaction: when the transcript exceeds the limit,
/// drop the middle — keep the first message (the task input) and as
/// many recent messages as fit into roughly half the original size.
#[derive(Default)]
pub struct SlidingWindow;

impl SlidingWindow {
    /// A new sliding-window strategy.
    pub fn new() -> Self {
        Self
    }
}

impl ContextStrategy for SlidingWindow {
    fn token_estimate(&self, messages: &[ProviderMessage]) -> usize {
        messages.iter().map(message_tokens).sum()
    }

    fn should_compact(&self, messages: &[ProviderMessage], limit: usize) -> bool {
        self.token_estimate(messages) > limit
    }

    fn compact(&self, messages: Vec<ProviderMessage>) -> Vec<ProviderMessage> {
        if messages.len() <= 2 {
            return messages;
        }

        let target = self.token_estimate(&messages) / 2;
        let first = messages[0].clone();
        let mut budget = target.saturating_sub(message_tokens(&first));

        let mut kept = Vec::new();
        for message in messages[1..].iter().rev() {
            let cost = message_tokens(message);
            if cost > budget && !kept.is_empty() {
                break;
            }
            kept.push(message.clone());
            budget = budget.saturating_sub(cost);
        }
        kept.reverse();

        let mut result = vec![first];
        result.extend(kept);
        result
    }
}
