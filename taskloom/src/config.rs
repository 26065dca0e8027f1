//! Runtime configuration resolution: static defaults
//! merged with an optional per-request resolver, falling back silently
//! when the resolver errors.

use loom_types::collab::EngineOverrides;
use loom_types::RequestContext;

/// The effective per-task configuration after merging static defaults
/// with whatever the runtime resolver contributes.
#[derive(Debug, Clone)]
pub struct EffectiveConfig {
    /// Model identifier override for this task, if any.
    pub model: Option<String>,
    /// Maximum ReAct iterations override, if any.
    pub max_iterations: Option<u32>,
    /// Maximum output tokens per provider call override, if any.
    pub max_tokens: Option<u32>,
    /// Whether conversation history is replayed and persisted for this
    /// task. A task-level opt-out always wins over this.
    pub history_enabled: bool,
}

impl Default for EffectiveConfig {
    fn default() -> Self {
        Self {
            model: None,
            max_iterations: None,
            max_tokens: None,
            history_enabled: true,
        }
    }
}

impl EffectiveConfig {
    /// The engine-facing slice of this configuration.
    pub fn engine_overrides(&self) -> EngineOverrides {
        EngineOverrides {
            model: self.model.clone(),
            max_iterations: self.max_iterations,
            max_tokens: self.max_tokens,
        }
    }
}

/// Resolves per-request configuration, e.g. from a control plane or a
/// tenant settings table. Resolution failures are logged and the static
/// defaults are used unchanged; a broken resolver never fails a task.
pub trait RuntimeConfigResolver: Send + Sync {
    /// Resolve the configuration for one request.
    fn resolve(&self, ctx: &RequestContext) -> Result<EffectiveConfig, String>;
}

/// The default resolver: always returns the same configuration.
pub struct StaticConfigResolver {
    config: EffectiveConfig,
}

impl StaticConfigResolver {
    /// Wrap a fixed configuration.
    pub fn new(config: EffectiveConfig) -> Self {
        Self { config }
    }
}

impl RuntimeConfigResolver for StaticConfigResolver {
    fn resolve(&self, _ctx: &RequestContext) -> Result<EffectiveConfig, String> {
        Ok(self.config.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use loom_types::id::{LogId, RunId, SessionId};

    #[test]
    fn static_resolver_echoes_its_config() {
        let resolver = StaticConfigResolver::new(EffectiveConfig {
            model: Some("m1".into()),
            ..Default::default()
        });
        let ctx = RequestContext::root(SessionId::new("s1"), RunId::new("r1"), LogId::new("l1"));
        let resolved = resolver.resolve(&ctx).unwrap();
        assert_eq!(resolved.model.as_deref(), Some("m1"));
        assert!(resolved.history_enabled);
    }
}
