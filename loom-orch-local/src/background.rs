//! Background task registry — tracks detached tasks spawned
//! on behalf of a session and lets any of them be cancelled by id,
//! without a `tokio-util` `CancellationToken` dependency: a plain
//! `AtomicBool` plus `Notify` covers the one thing this registry needs.

use loom_types::error::BackgroundError;
use loom_types::id::SessionId;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::Notify;

/// Cooperative cancellation signal for one background task. The task
/// body is expected to `select!` on [`CancelFlag::cancelled`] at its
/// yield points.
#[derive(Clone)]
pub struct CancelFlag {
    flag: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl CancelFlag {
    fn new() -> Self {
        Self {
            flag: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Signal cancellation and wake anyone awaiting [`Self::cancelled`].
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::SeqCst);
        self.notify.notify_waiters();
    }

    /// Whether cancellation has been requested.
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::SeqCst)
    }

    /// Resolve once [`Self::cancel`] has been called. Resolves
    /// immediately if it already was.
    pub async fn cancelled(&self) {
        if self.is_cancelled() {
            return;
        }
        self.notify.notified().await;
    }
}

struct TrackedTask {
    cancel: CancelFlag,
}

/// Owns the background tasks for one session.
#[derive(Default)]
pub struct Manager {
    tasks: Mutex<HashMap<String, TrackedTask>>,
}

impl Manager {
    /// Register a new background task under `task_id`, returning the
    /// [`CancelFlag`] its body should observe.
    pub fn register(&self, task_id: impl Into<String>) -> CancelFlag {
        let cancel = CancelFlag::new();
        self.tasks.lock().unwrap().insert(
            task_id.into(),
            TrackedTask {
                cancel: cancel.clone(),
            },
        );
        cancel
    }

    /// Drop a task's bookkeeping once it has finished, cancelled or not.
    pub fn forget(&self, task_id: &str) {
        self.tasks.lock().unwrap().remove(task_id);
    }

    /// Request cancellation of one task owned by this manager.
    fn cancel(&self, task_id: &str) -> Result<(), BackgroundError> {
        let tasks = self.tasks.lock().unwrap();
        match tasks.get(task_id) {
            Some(tracked) => {
                tracked.cancel.cancel();
                Ok(())
            }
            None => Err(BackgroundError::TaskNotFound(task_id.to_string())),
        }
    }
}

/// Lazily-instantiated, per-session [`Manager`]s, with cross-session
/// cancellation lookup.
#[derive(Default)]
pub struct BackgroundTaskRegistry {
    managers: Mutex<HashMap<SessionId, Arc<Manager>>>,
}

impl BackgroundTaskRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Return the manager for `session_id`, creating one on first use.
    /// Returns `None` for an empty session id — there is nothing to
    /// register background tasks against.
    pub fn get(&self, session_id: &SessionId) -> Option<Arc<Manager>> {
        if session_id.is_empty() {
            return None;
        }
        let mut managers = self.managers.lock().unwrap();
        Some(
            managers
                .entry(session_id.clone())
                .or_insert_with(|| Arc::new(Manager::default()))
                .clone(),
        )
    }

    /// Cancel a task by id, trying every known session's manager in
    /// turn. A manager reporting "not found" is transparent; any other
    /// error, or exhausting every manager, surfaces to the caller.
    pub fn cancel_task(&self, task_id: &str) -> Result<(), BackgroundError> {
        let managers: Vec<Arc<Manager>> = self.managers.lock().unwrap().values().cloned().collect();
        for manager in managers {
            match manager.cancel(task_id) {
                Ok(()) => return Ok(()),
                Err(BackgroundError::TaskNotFound(_)) => continue,
                Err(other) => return Err(other),
            }
        }
        Err(BackgroundError::TaskNotFound(task_id.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn get_returns_none_for_empty_session_id() {
        let registry = BackgroundTaskRegistry::new();
        assert!(registry.get(&SessionId::new("")).is_none());
    }

    #[test]
    fn get_is_stable_across_calls_for_the_same_session() {
        let registry = BackgroundTaskRegistry::new();
        let session = SessionId::new("s1");
        let a = registry.get(&session).unwrap();
        let b = registry.get(&session).unwrap();
        a.register("t1");
        assert!(b.cancel("t1").is_ok());
    }

    #[test]
    fn cancel_task_searches_every_session_and_ignores_not_found() {
        let registry = BackgroundTaskRegistry::new();
        let s1 = registry.get(&SessionId::new("s1")).unwrap();
        let s2 = registry.get(&SessionId::new("s2")).unwrap();
        s1.register("t1");
        let flag = s2.register("t2");

        assert!(registry.cancel_task("t2").is_ok());
        assert!(flag.is_cancelled());
    }

    #[test]
    fn cancel_task_reports_not_found_when_exhausted() {
        let registry = BackgroundTaskRegistry::new();
        registry.get(&SessionId::new("s1")).unwrap().register("t1");
        let err = registry.cancel_task("missing").unwrap_err();
        assert!(matches!(err, BackgroundError::TaskNotFound(_)));
    }

    #[tokio::test]
    async fn cancel_flag_wakes_pending_waiter() {
        let manager = Manager::default();
        let flag = manager.register("t1");
        let waiter = flag.clone();
        let handle = tokio::spawn(async move {
            waiter.cancelled().await;
        });
        manager.cancel("t1").unwrap();
        handle.await.unwrap();
    }
}
