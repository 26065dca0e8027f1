//! In-memory no-op collaborators for use in other crates' test suites.
//! Gated behind the `test-utils` feature.

use crate::attachment::Attachment;
use crate::error::{HookError, SessionError};
use crate::id::RunId;
use crate::memory::{MemoryEntry, MemoryQuery};
use crate::session::Session;
use async_trait::async_trait;
use rust_decimal::Decimal;

/// A [`crate::collab::CostTracker`] that always reports zero cost.
#[derive(Debug, Default)]
pub struct NullCostTracker;

impl crate::collab::CostTracker for NullCostTracker {
    fn record(&self, _run_id: &RunId, _input_tokens: u64, _output_tokens: u64) -> Decimal {
        Decimal::ZERO
    }

    fn total_for_run(&self, _run_id: &RunId) -> Decimal {
        Decimal::ZERO
    }
}

/// A [`crate::collab::MemoryService`] that never recalls anything and
/// echoes back whatever it's asked to capture.
#[derive(Debug, Default)]
pub struct NullMemoryService;

#[async_trait]
impl crate::collab::MemoryService for NullMemoryService {
    async fn recall(&self, _query: &MemoryQuery) -> Result<Vec<MemoryEntry>, HookError> {
        Ok(Vec::new())
    }

    async fn capture(&self, entry: MemoryEntry) -> Result<MemoryEntry, HookError> {
        Ok(entry)
    }
}

/// An [`crate::collab::AttachmentMigrator`] that never finds anything to
/// migrate.
#[derive(Debug, Default)]
pub struct NoopAttachmentMigrator;

#[async_trait]
impl crate::collab::AttachmentMigrator for NoopAttachmentMigrator {
    async fn migrate(&self, _session: &mut Session) -> Result<u32, SessionError> {
        Ok(0)
    }
}

/// An [`crate::collab::AttachmentPersister`] that keeps everything
/// inline, for tests that don't exercise externalization.
#[derive(Debug, Default)]
pub struct InlineAttachmentPersister;

#[async_trait]
impl crate::collab::AttachmentPersister for InlineAttachmentPersister {
    async fn externalize(
        &self,
        _session_id: &crate::id::SessionId,
        attachment: Attachment,
    ) -> Result<Attachment, SessionError> {
        Ok(attachment)
    }

    async fn load(&self, attachment: &Attachment) -> Result<Vec<u8>, SessionError> {
        Ok(attachment.data.clone().into_bytes())
    }
}
