//! Bidirectional conversion between `loom-types` and the provider wire
//! format.
//!
//! `loom_types::Content` has no `ToolUse`/`ToolResult` variants — those
//! live on `Message.tool_calls`/`tool_results` instead. Providers
//! need them inlined into the conversation transcript, so conversion
//! happens at the `Message` level, not just `Content`.

use crate::types::{ContentPart, ImageSource, ProviderMessage, Role};
use loom_types::content::{Content, ContentBlock};
use loom_types::message::{Message, MessageSource, ToolCall};

/// Convert a `loom-types` `ContentBlock` to a provider `ContentPart`.
pub fn content_block_to_part(block: &ContentBlock) -> ContentPart {
    match block {
        ContentBlock::Text { text } => ContentPart::Text { text: text.clone() },
        ContentBlock::Image { source, media_type } => ContentPart::Image {
            source: image_source_to_internal(source),
            media_type: media_type.clone(),
        },
        ContentBlock::Custom { content_type, data } => ContentPart::Text {
            text: format!(
                "[custom:{}] {}",
                content_type,
                serde_json::to_string(data).unwrap_or_default()
            ),
        },
        // Handle non_exhaustive future variants
        _ => ContentPart::Text {
            text: "[unknown content block]".into(),
        },
    }
}

/// Convert a provider `ContentPart` to a `loom-types` `ContentBlock`,
/// when one exists. `ToolUse`/`ToolResult` parts have no `ContentBlock`
/// counterpart — callers fold those into `Message.tool_calls`/
/// `tool_results` instead (see [`provider_parts_to_assistant_message`]).
pub fn content_part_to_block(part: &ContentPart) -> Option<ContentBlock> {
    match part {
        ContentPart::Text { text } => Some(ContentBlock::Text { text: text.clone() }),
        ContentPart::Image { source, media_type } => Some(ContentBlock::Image {
            source: image_source_to_loom(source),
            media_type: media_type.clone(),
        }),
        ContentPart::ToolUse { .. } | ContentPart::ToolResult { .. } => None,
    }
}

/// Convert `loom-types` `Content` to a list of provider `ContentPart`s.
pub fn content_to_parts(content: &Content) -> Vec<ContentPart> {
    match content {
        Content::Text(text) => vec![ContentPart::Text { text: text.clone() }],
        Content::Blocks(blocks) => blocks.iter().map(content_block_to_part).collect(),
        // Handle non_exhaustive
        _ => vec![ContentPart::Text {
            text: "[unknown content]".into(),
        }],
    }
}

/// Convert provider `ContentPart`s back to `loom-types` `Content`,
/// dropping any `ToolUse`/`ToolResult` parts (they belong on the
/// message's `tool_calls`/`tool_results`, not its content).
pub fn parts_to_content(parts: &[ContentPart]) -> Content {
    let blocks: Vec<ContentBlock> = parts.iter().filter_map(content_part_to_block).collect();
    if let [ContentBlock::Text { text }] = blocks.as_slice() {
        return Content::Text(text.clone());
    }
    Content::Blocks(blocks)
}

fn role_to_provider(role: &str) -> Role {
    match role {
        "system" => Role::System,
        "assistant" => Role::Assistant,
        _ => Role::User,
    }
}

/// Convert a `loom-types` `Message` into the `ProviderMessage` the model
/// actually sees: content blocks plus inlined tool-use/tool-result parts.
pub fn message_to_provider_message(message: &Message) -> ProviderMessage {
    let mut content = content_to_parts(&message.content);
    for call in &message.tool_calls {
        content.push(ContentPart::ToolUse {
            id: call.id.clone(),
            name: call.name.clone(),
            input: call.arguments.clone(),
        });
    }
    for result in &message.tool_results {
        content.push(ContentPart::ToolResult {
            tool_use_id: result.call_id.clone(),
            content: result.content.clone(),
            is_error: result.error.is_some(),
        });
    }
    ProviderMessage {
        role: role_to_provider(&message.role),
        content,
    }
}

/// Build the assistant reply `Message` from a provider's response
/// content: text/image parts become `Content`, `ToolUse` parts become
/// `tool_calls`.
pub fn provider_parts_to_assistant_message(parts: &[ContentPart]) -> Message {
    let content = parts_to_content(parts);
    let tool_calls: Vec<ToolCall> = parts
        .iter()
        .filter_map(|p| match p {
            ContentPart::ToolUse { id, name, input } => Some(ToolCall {
                id: id.clone(),
                name: name.clone(),
                arguments: input.clone(),
            }),
            _ => None,
        })
        .collect();
    let mut message = Message::new("assistant", content, MessageSource::AssistantReply);
    message.tool_calls = tool_calls;
    message
}

fn image_source_to_internal(source: &loom_types::content::ImageSource) -> ImageSource {
    match source {
        loom_types::content::ImageSource::Base64 { data } => ImageSource::Base64 { data: data.clone() },
        loom_types::content::ImageSource::Url { url } => ImageSource::Url { url: url.clone() },
        // Handle non_exhaustive
        _ => ImageSource::Url { url: String::new() },
    }
}

fn image_source_to_loom(source: &ImageSource) -> loom_types::content::ImageSource {
    match source {
        ImageSource::Base64 { data } => loom_types::content::ImageSource::Base64 { data: data.clone() },
        ImageSource::Url { url } => loom_types::content::ImageSource::Url { url: url.clone() },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_types::message::ToolResult as LoomToolResult;
    use serde_json::json;

    #[test]
    fn text_roundtrip() {
        let block = ContentBlock::Text { text: "hello".into() };
        let part = content_block_to_part(&block);
        let back = content_part_to_block(&part).unwrap();
        assert_eq!(block, back);
    }

    #[test]
    fn image_roundtrip() {
        let block = ContentBlock::Image {
            source: loom_types::content::ImageSource::Url {
                url: "https://example.com/img.png".into(),
            },
            media_type: "image/png".into(),
        };
        let part = content_block_to_part(&block);
        let back = content_part_to_block(&part).unwrap();
        assert_eq!(block, back);
    }

    #[test]
    fn custom_block_becomes_text() {
        let block = ContentBlock::Custom {
            content_type: "thinking".into(),
            data: json!({"thought": "hmm"}),
        };
        let part = content_block_to_part(&block);
        match &part {
            ContentPart::Text { text } => assert!(text.contains("[custom:thinking]")),
            _ => panic!("expected Text"),
        }
    }

    #[test]
    fn message_with_tool_calls_inlines_tool_use_parts() {
        let mut message = Message::new("assistant", Content::text("let me check"), MessageSource::AssistantReply);
        message.tool_calls.push(ToolCall {
            id: "call-1".into(),
            name: "search".into(),
            arguments: json!({"q": "rust"}),
        });
        let provider_message = message_to_provider_message(&message);
        assert_eq!(provider_message.role, Role::Assistant);
        assert_eq!(provider_message.content.len(), 2);
        assert!(matches!(provider_message.content[1], ContentPart::ToolUse { .. }));
    }

    #[test]
    fn assistant_message_extracts_tool_calls_from_parts() {
        let parts = vec![
            ContentPart::Text { text: "ok".into() },
            ContentPart::ToolUse {
                id: "call-1".into(),
                name: "search".into(),
                input: json!({}),
            },
        ];
        let message = provider_parts_to_assistant_message(&parts);
        assert_eq!(message.tool_calls.len(), 1);
        assert_eq!(message.content, Content::text("ok"));
    }

    #[test]
    fn message_with_tool_results_inlines_tool_result_parts() {
        let mut message = Message::new("tool", Content::text(""), MessageSource::ToolResult);
        message.tool_results.push(LoomToolResult {
            call_id: "call-1".into(),
            content: "boom".into(),
            metadata: serde_json::Value::Null,
            attachments: Default::default(),
            error: Some("boom".into()),
        });
        let provider_message = message_to_provider_message(&message);
        match provider_message.content.last().unwrap() {
            ContentPart::ToolResult {
                tool_use_id,
                is_error,
                ..
            } => {
                assert_eq!(tool_use_id, "call-1");
                assert!(*is_error);
            }
            other => panic!("expected ToolResult part, got {other:?}"),
        }
    }
}
