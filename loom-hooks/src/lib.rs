#![deny(missing_docs)]
//! Proactive hook registry — aggregates injections from
//! every registered hook before a task starts, and notifies every hook
//! unconditionally after a task completes.

use loom_types::hook::{Injection, ProactiveHook};
use loom_types::task::{TaskInfo, TaskResult};
use std::sync::Arc;
use tokio::sync::RwLock;

/// Ordered collection of proactive hooks, dispatched at task start and
/// task completion.
///
/// `run_on_task_start` takes a read-locked snapshot of the hook list,
/// runs every hook in turn, and returns their injections sorted by
/// descending priority — ties preserve registration order, since the
/// sort is stable over the registration-order vector.
/// `run_on_task_completed` runs every hook unconditionally; a failing
/// hook is logged and otherwise ignored so one bad hook never blocks
/// the rest.
pub struct ProactiveHookRegistry {
    hooks: RwLock<Vec<Arc<dyn ProactiveHook>>>,
}

impl ProactiveHookRegistry {
    /// An empty registry.
    pub fn new() -> Self {
        Self {
            hooks: RwLock::new(Vec::new()),
        }
    }

    /// Register a hook. Hooks run in registration order when priorities
    /// tie.
    pub async fn add(&self, hook: Arc<dyn ProactiveHook>) {
        self.hooks.write().await.push(hook);
    }

    /// Run every hook's `on_task_start`, collect all injections, and
    /// return them sorted by descending priority with ties broken by
    /// registration order.
    pub async fn run_on_task_start(&self, info: &TaskInfo<'_>) -> Vec<Injection> {
        // Snapshot under the read lock, release before dispatch: a slow
        // hook must not block concurrent registration.
        let hooks = self.hooks.read().await.clone();
        let mut injections = Vec::new();
        for hook in hooks.iter() {
            match hook.on_task_start(info).await {
                Ok(mut produced) => injections.append(&mut produced),
                Err(e) => {
                    tracing::warn!(hook = hook.name(), error = %e, "proactive hook failed on task start");
                }
            }
        }
        injections.sort_by(|a, b| b.priority.cmp(&a.priority));
        injections
    }

    /// Run every hook's `on_task_completed` unconditionally. Errors are
    /// logged and otherwise ignored.
    pub async fn run_on_task_completed(&self, result: &TaskResult) {
        let hooks = self.hooks.read().await.clone();
        for hook in hooks.iter() {
            if let Err(e) = hook.on_task_completed(result).await {
                tracing::warn!(hook = hook.name(), error = %e, "proactive hook failed on task completion");
            }
        }
    }
}

impl Default for ProactiveHookRegistry {
    fn default() -> Self {
        Self::new()
    }
}
