//! Attachment model and retention policy: inline payloads are
//! externalized to URIs before persistence, with a small-text carve-out.

use serde::{Deserialize, Serialize};

/// Small text/markdown payloads under this size may retain inline data;
/// anything larger, or any binary payload, must be externalized.
pub const INLINE_RETENTION_LIMIT_BYTES: usize = 4096;

/// Where an attachment originated. Used to decide retention eligibility
/// without re-deriving it from the owning message.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachmentSource {
    /// Supplied inline with the task input.
    Inline,
    /// Produced by a tool call.
    Tool,
    /// Injected by a proactive hook.
    Proactive,
}

/// A named binary or text payload attached to a message or session.
///
/// Invariant: if `uri` is set to a non-`data:` URL, `data` must be
/// cleared before persistence (see [`Attachment::enforce_uri_invariant`]).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    /// The attachment's name, unique within its owning map.
    pub name: String,
    /// MIME type, e.g. `text/markdown`, `image/png`.
    pub media_type: String,
    /// Inline base64-encoded payload. Cleared once externalized.
    #[serde(default)]
    pub data: String,
    /// External URI once persisted. Empty until the attachment
    /// persister has run.
    #[serde(default)]
    pub uri: String,
    /// Path within the execution workspace, if materialized to disk.
    #[serde(default)]
    pub workspace_path: String,
    /// Where this attachment came from.
    pub source: AttachmentSource,
}

impl Attachment {
    /// Whether a URI counts as "external" for the purposes of the
    /// data-clearing invariant. A `data:` URI still carries its payload
    /// inline and is not considered external.
    pub fn has_external_uri(&self) -> bool {
        !self.uri.is_empty() && !self.uri.starts_with("data:")
    }

    /// Whether this attachment is eligible to retain inline data without
    /// going through the persister: small text/markdown only.
    pub fn eligible_for_inline_retention(&self) -> bool {
        let is_text_like = self.media_type.starts_with("text/")
            || self.media_type == "application/markdown";
        is_text_like && self.data.len() <= INLINE_RETENTION_LIMIT_BYTES
    }

    /// Enforce the "external URI implies no inline data" invariant.
    /// Idempotent — both persistence stages may call it again on
    /// re-entry.
    pub fn enforce_uri_invariant(&mut self) {
        if self.has_external_uri() {
            self.data.clear();
        }
    }
}
