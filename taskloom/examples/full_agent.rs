//! End-to-end agent run without any API keys: a scripted provider, one
//! tool, memory hooks, and an envelope printer.
//!
//! Run with:
//!
//! ```sh
//! cargo run --example full_agent -p taskloom
//! ```

use loom_provider::types::{
    ContentPart, ProviderRequest, ProviderResponse, StopReason, TokenUsage,
};
use loom_provider::ProviderError;
use loom_tool::ToolError;
use std::collections::VecDeque;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use taskloom::prelude::*;

// ---------------------------------------------------------------------------
// A scripted provider: answers from a queue instead of a network call
// ---------------------------------------------------------------------------

struct ScriptedProvider {
    responses: Mutex<VecDeque<ProviderResponse>>,
}

impl Provider for ScriptedProvider {
    fn complete(
        &self,
        _request: ProviderRequest,
    ) -> impl Future<Output = Result<ProviderResponse, ProviderError>> + Send {
        let response = self
            .responses
            .lock()
            .unwrap()
            .pop_front()
            .expect("script exhausted");
        async move { Ok(response) }
    }
}

// ---------------------------------------------------------------------------
// A simple uptime-check tool for the agent to use
// ---------------------------------------------------------------------------

struct UptimeTool;

impl ToolDyn for UptimeTool {
    fn name(&self) -> &str {
        "check_uptime"
    }
    fn description(&self) -> &str {
        "Checks whether a service responds"
    }
    fn input_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "service": {"type": "string", "description": "Service name"}
            },
            "required": ["service"]
        })
    }
    fn call(
        &self,
        input: serde_json::Value,
    ) -> Pin<Box<dyn Future<Output = Result<serde_json::Value, ToolError>> + Send + '_>> {
        Box::pin(async move {
            let service = input
                .get("service")
                .and_then(|s| s.as_str())
                .unwrap_or("unknown");
            Ok(serde_json::json!({"service": service, "status": "up", "latency_ms": 12}))
        })
    }
}

#[tokio::main]
async fn main() {
    init_tracing();

    let store = Arc::new(MemoryStore::new());
    let history = Arc::new(MemoryHistoryManager::new());
    let memory = Arc::new(InMemoryMemoryService::new());

    // Seed a memory so the recall hook has something to inject.
    memory.seed({
        let mut entry = loom_types::MemoryEntry::new(
            "demo-user",
            "api-gateway is deployed blue-green; prefer draining the old color first",
            0,
        );
        entry.keywords = vec!["gateway".into(), "deploy".into()];
        entry
    });

    let hooks = Arc::new(ProactiveHookRegistry::new());
    hooks
        .add(Arc::new(MemoryRecallHook::new(memory.clone())))
        .await;
    hooks
        .add(Arc::new(MemoryCaptureHook::new(
            memory.clone(),
            Arc::new(now_millis),
        )))
        .await;

    let script = vec![
        ProviderResponse {
            content: vec![ContentPart::ToolUse {
                id: "call-1".into(),
                name: "check_uptime".into(),
                input: serde_json::json!({"service": "api-gateway"}),
            }],
            stop_reason: StopReason::ToolUse,
            usage: TokenUsage {
                input_tokens: 42,
                output_tokens: 12,
                ..Default::default()
            },
            model: "scripted-model".into(),
            cost: None,
            truncated: None,
        },
        ProviderResponse {
            content: vec![ContentPart::Text {
                text: "api-gateway is up (12 ms); safe to start the blue-green rollout.".into(),
            }],
            stop_reason: StopReason::EndTurn,
            usage: TokenUsage {
                input_tokens: 58,
                output_tokens: 24,
                ..Default::default()
            },
            model: "scripted-model".into(),
            cost: None,
            truncated: None,
        },
    ];

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(UptimeTool));

    let builder = AgentCoordinator::builder(store, history).with_hook_registry(hooks);
    let engine = LocalReactEngine::new(
        ScriptedProvider {
            responses: Mutex::new(script.into()),
        },
        Arc::new(tools),
        ProviderDefaults::default(),
    )
    .with_iteration_hook(builder.iteration_persister());
    let coordinator = builder.with_engine(Arc::new(engine)).build();

    let result = coordinator
        .execute_task(
            TaskOptions::new("demo-session", "deploy the api-gateway").with_user("demo-user"),
            Arc::new(|envelope: WorkflowEventEnvelope| {
                println!(
                    "  [{:>3}] {:<18} node={}",
                    envelope.seq, envelope.event_type, envelope.node_id
                );
            }),
        )
        .await
        .expect("task failed");

    println!();
    println!("answer:     {}", result.answer);
    println!("stop:       {}", result.stop_reason.as_str());
    println!("iterations: {}", result.iterations);
    println!("workflow:   {:?}", result.workflow.phase);
    println!("memories:   {}", memory.entries().len());
}

fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as i64)
        .unwrap_or(0)
}

fn init_tracing() {
    use tracing_subscriber::EnvFilter;
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();
}
