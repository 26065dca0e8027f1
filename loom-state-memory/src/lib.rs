#![deny(missing_docs)]
//! In-memory [`SessionStore`] and [`HistoryManager`] implementation.
//!
//! Uses a `HashMap` behind a `RwLock` for concurrent access. Suitable
//! for testing, prototyping, and single-process deployments where
//! persistence across restarts is not required — see `loom-state-fs`
//! for a durable backend.

use async_trait::async_trait;
use loom_types::error::SessionError;
use loom_types::id::SessionId;
use loom_types::message::{Message, MessageSource};
use loom_types::session::Session;
use loom_types::{HistoryManager, SessionStore};
use std::collections::HashMap;
use tokio::sync::RwLock;

/// In-memory session store backed by a `HashMap` behind a `RwLock`.
#[derive(Default)]
pub struct MemoryStore {
    sessions: RwLock<HashMap<SessionId, Session>>,
}

impl MemoryStore {
    /// Create a new empty in-memory store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SessionStore for MemoryStore {
    async fn get(&self, id: &SessionId) -> Result<Option<Session>, SessionError> {
        let sessions = self.sessions.read().await;
        Ok(sessions.get(id).cloned())
    }

    async fn save(&self, session: &Session) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        sessions.insert(session.id.clone(), session.clone());
        Ok(())
    }

    async fn create(&self, id: &SessionId, now: i64) -> Result<Session, SessionError> {
        let session = Session::new(id.clone(), now);
        let mut sessions = self.sessions.write().await;
        sessions.insert(id.clone(), session.clone());
        Ok(session)
    }

    async fn list(&self, limit: usize, offset: usize) -> Result<Vec<SessionId>, SessionError> {
        let sessions = self.sessions.read().await;
        let mut ids: Vec<&Session> = sessions.values().collect();
        ids.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        Ok(ids
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|s| s.id.clone())
            .collect())
    }

    async fn delete(&self, id: &SessionId) -> Result<(), SessionError> {
        let mut sessions = self.sessions.write().await;
        sessions.remove(id);
        Ok(())
    }
}

/// In-memory [`HistoryManager`]: accumulates each session's turns in a
/// map separate from the session itself, dropping `UserHistory`-sourced
/// messages before storing them: only freshly produced turns are
/// appended, replayed history is never written back.
#[derive(Default)]
pub struct MemoryHistoryManager {
    turns: RwLock<HashMap<SessionId, Vec<Message>>>,
}

impl MemoryHistoryManager {
    /// A new, empty history store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl HistoryManager for MemoryHistoryManager {
    async fn replay(&self, session_id: &SessionId) -> Result<Vec<Message>, SessionError> {
        let turns = self.turns.read().await;
        Ok(turns.get(session_id).cloned().unwrap_or_default())
    }

    async fn append_turn(
        &self,
        session_id: &SessionId,
        messages: Vec<Message>,
    ) -> Result<(), SessionError> {
        let mut turns = self.turns.write().await;
        turns.entry(session_id.clone()).or_default().extend(
            messages
                .into_iter()
                .filter(|m| !matches!(m.source, MessageSource::UserHistory)),
        );
        Ok(())
    }

    async fn clear_session(&self, session_id: &SessionId) -> Result<(), SessionError> {
        let mut turns = self.turns.write().await;
        turns.remove(session_id);
        Ok(())
    }
}

/// In-memory [`loom_types::CheckpointStore`], keyed by session id.
/// Suitable for tests and single-process resumption within one uptime.
#[derive(Default)]
pub struct MemoryCheckpointStore {
    states: RwLock<HashMap<SessionId, loom_types::task::TaskState>>,
}

impl MemoryCheckpointStore {
    /// A new, empty checkpoint store.
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl loom_types::CheckpointStore for MemoryCheckpointStore {
    async fn save(
        &self,
        session_id: &SessionId,
        state: &loom_types::task::TaskState,
    ) -> Result<(), SessionError> {
        let mut states = self.states.write().await;
        states.insert(session_id.clone(), state.clone());
        Ok(())
    }

    async fn load(
        &self,
        session_id: &SessionId,
    ) -> Result<Option<loom_types::task::TaskState>, SessionError> {
        let states = self.states.read().await;
        Ok(states.get(session_id).cloned())
    }

    async fn clear(&self, session_id: &SessionId) -> Result<(), SessionError> {
        let mut states = self.states.write().await;
        states.remove(session_id);
        Ok(())
    }
}
