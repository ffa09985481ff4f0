//! End-to-end tests for agent orchestration: a parent loop delegating to
//! sub-agents, bounded sub-agent admission and event streaming over the bus.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use nestclaw_agent::{AgentLoop, DelegateTool, SubAgentFactory};
use nestclaw_core::bus::MessageBus;
use nestclaw_core::error::ProviderError;
use nestclaw_core::event::{SubAgentCompletedEvent, ToolCompletedEvent, ToolStartedEvent};
use nestclaw_core::message::{Message, Role, ToolCallRequest};
use nestclaw_core::provider::{Provider, ProviderRequest, ProviderResponse};
use nestclaw_core::tool::ToolRegistry;
use nestclaw_core::{AgentFinishReason, AgentRequest, CancellationToken, SubAgentRequest};

// ── Mock Provider ────────────────────────────────────────────────────────

/// Answers parent conversations from a script and sub-agent conversations
/// (recognised by their system prompt) by echoing the task.
struct RoutingProvider {
    parent_script: Mutex<Vec<ProviderResponse>>,
    calls: Mutex<HashMap<String, usize>>,
}

impl RoutingProvider {
    fn new(parent_script: Vec<ProviderResponse>) -> Self {
        Self {
            parent_script: Mutex::new(parent_script),
            calls: Mutex::new(HashMap::new()),
        }
    }

    fn calls_for(&self, kind: &str) -> usize {
        self.calls.lock().unwrap().get(kind).copied().unwrap_or(0)
    }
}

#[async_trait::async_trait]
impl Provider for RoutingProvider {
    fn name(&self) -> &str {
        "routing_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let is_child = request
            .messages
            .first()
            .is_some_and(|m| m.role == Role::System && m.content.starts_with("worker"));

        if is_child {
            *self.calls.lock().unwrap().entry("child".into()).or_default() += 1;
            let task = &request.messages[1].content;
            if task.contains("fail") {
                return Err(ProviderError::Network("connection reset".into()));
            }
            return Ok(ProviderResponse::text(format!("child finished: {task}")));
        }

        *self.calls.lock().unwrap().entry("parent".into()).or_default() += 1;
        let mut script = self.parent_script.lock().unwrap();
        assert!(!script.is_empty(), "parent script exhausted");
        Ok(script.remove(0))
    }
}

fn delegate_call(id: &str, task: &str) -> ToolCallRequest {
    ToolCallRequest::new(
        id,
        "delegate_task",
        serde_json::json!({"task": task, "system_prompt": "worker: be brief"}).to_string(),
    )
}

fn build(provider: Arc<RoutingProvider>, bus: MessageBus, max_subagents: usize) -> (AgentLoop, Arc<SubAgentFactory>) {
    let child_loop = AgentLoop::new(provider.clone(), Arc::new(ToolRegistry::new()), bus.clone());
    let factory = Arc::new(SubAgentFactory::new(child_loop, max_subagents));

    let mut tools = ToolRegistry::new();
    tools.register(Arc::new(DelegateTool::new(factory.clone())));
    let parent = AgentLoop::new(provider, Arc::new(tools), bus);
    (parent, factory)
}

// ── Tests ────────────────────────────────────────────────────────────────

#[tokio::test]
async fn e2e_parent_delegates_and_uses_child_answer() {
    let provider = Arc::new(RoutingProvider::new(vec![
        ProviderResponse::tool_calls("", vec![delegate_call("d1", "list primes below 10")]),
        ProviderResponse::text("The sub-agent found 2, 3, 5, 7."),
    ]));
    let (parent, factory) = build(provider.clone(), MessageBus::new(), 2);

    let result = parent
        .run(
            AgentRequest::new("default", vec![Message::user("Find primes below 10")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.finish_reason, AgentFinishReason::Stop);
    assert_eq!(result.content, "The sub-agent found 2, 3, 5, 7.");
    assert_eq!(result.tool_executions.len(), 1);
    assert!(result.tool_executions[0].success);
    assert_eq!(result.tool_executions[0].output, "child finished: list primes below 10");

    // The child's conversation never leaks into the parent history.
    assert!(result.messages.iter().all(|m| m.role != Role::System));
    assert_eq!(provider.calls_for("parent"), 2);
    assert_eq!(provider.calls_for("child"), 1);
    assert_eq!(factory.completed_count(), 1);
    assert_eq!(factory.active_count(), 0);
}

#[tokio::test]
async fn e2e_concurrent_subagents_fail_independently() {
    let provider = Arc::new(RoutingProvider::new(Vec::new()));
    let (_, factory) = build(provider, MessageBus::new(), 5);
    let cancel = CancellationToken::new();

    let (a, b) = tokio::join!(
        factory.spawn(SubAgentRequest::new("summarize").with_system_prompt("worker"), &cancel),
        factory.spawn(SubAgentRequest::new("fail loudly").with_system_prompt("worker"), &cancel),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    assert!(a.success);
    assert_eq!(a.content, "child finished: summarize");
    assert!(!b.success);
    assert!(b.error.as_deref().unwrap().contains("Provider error"));

    let history = factory.completed_sessions();
    assert_eq!(history.len(), 2);
    assert!(history.iter().all(|r| r.session_id.starts_with("subagent:")));
    assert_eq!(factory.active_count(), 0);
}

#[tokio::test]
async fn e2e_failed_delegation_is_visible_to_parent() {
    let provider = Arc::new(RoutingProvider::new(vec![
        ProviderResponse::tool_calls(
            "",
            vec![delegate_call("ok", "summarize"), delegate_call("bad", "fail now")],
        ),
        ProviderResponse::text("One of two tasks succeeded."),
    ]));
    let (parent, factory) = build(provider, MessageBus::new(), 2);

    let result = parent
        .run(
            AgentRequest::new("default", vec![Message::user("do both")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    assert_eq!(result.finish_reason, AgentFinishReason::Stop);
    let outcomes: Vec<_> = result.tool_executions.iter().map(|e| (e.tool_call_id.as_str(), e.success)).collect();
    assert_eq!(outcomes, vec![("ok", true), ("bad", false)]);
    assert_eq!(factory.completed_count(), 2);
}

#[tokio::test]
async fn e2e_events_stream_to_ui_channel() {
    let provider = Arc::new(RoutingProvider::new(vec![
        ProviderResponse::tool_calls("", vec![delegate_call("d1", "draft an outline")]),
        ProviderResponse::text("Outline ready."),
    ]));
    let bus = MessageBus::new();
    let (_started_sub, mut started) = bus.subscribe_channel::<ToolStartedEvent>();
    let (_completed_sub, mut completed) = bus.subscribe_channel::<ToolCompletedEvent>();
    let (_child_sub, mut children) = bus.subscribe_channel::<SubAgentCompletedEvent>();
    let (parent, _) = build(provider, bus, 1);

    parent
        .run(
            AgentRequest::new("default", vec![Message::user("outline")]),
            &CancellationToken::new(),
        )
        .await
        .unwrap();

    let s = started.recv().await.unwrap();
    assert_eq!(s.tool_name, "delegate_task");
    assert_eq!(s.tool_call_id, "d1");

    let c = completed.recv().await.unwrap();
    assert_eq!(c.tool_call_id, "d1");
    assert!(c.success);
    assert_eq!(c.output, "child finished: draft an outline");

    let child = children.recv().await.unwrap();
    assert!(child.success);
    assert!(child.session_id.starts_with("subagent:"));
}

#[tokio::test]
async fn e2e_cancelling_parent_stops_run() {
    let provider = Arc::new(RoutingProvider::new(vec![ProviderResponse::text("unused")]));
    let (parent, factory) = build(provider.clone(), MessageBus::new(), 1);
    let cancel = CancellationToken::new();
    cancel.cancel();

    let err = parent
        .run(AgentRequest::new("default", vec![Message::user("hi")]), &cancel)
        .await
        .unwrap_err();
    assert!(err.is_cancelled());
    assert_eq!(provider.calls_for("parent"), 0);
    assert_eq!(factory.completed_count(), 0);
}
