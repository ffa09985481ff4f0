//! Shared test helpers: scripted providers and small tools.

use async_trait::async_trait;
use nestclaw_core::error::{ProviderError, ToolError};
use nestclaw_core::message::{Role, ToolCallRequest};
use nestclaw_core::provider::{Provider, ProviderRequest, ProviderResponse, Usage};
use nestclaw_core::tool::{Tool, ToolRegistry, ToolResult};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{Notify, watch};
use tokio_util::sync::CancellationToken;

/// A mock provider that returns a sequence of scripted responses.
///
/// Each call to `complete` returns the next response in the queue. When
/// `repeat_last` is set the final response is returned forever, otherwise
/// running past the script panics. Every request is recorded.
pub struct SequentialMockProvider {
    responses: Vec<ProviderResponse>,
    repeat_last: bool,
    requests: Mutex<Vec<ProviderRequest>>,
}

impl SequentialMockProvider {
    pub fn new(responses: Vec<ProviderResponse>) -> Self {
        Self {
            responses,
            repeat_last: false,
            requests: Mutex::new(Vec::new()),
        }
    }

    /// Create a provider that returns a single text response (no tool calls).
    pub fn single_text(text: &str) -> Self {
        Self::new(vec![make_text_response(text)])
    }

    /// Create a provider that first returns tool calls, then a final answer.
    pub fn tool_then_answer(tool_calls: Vec<ToolCallRequest>, answer: &str) -> Self {
        Self::new(vec![
            make_tool_call_response(tool_calls),
            make_text_response(answer),
        ])
    }

    /// Create a provider that returns `response` on every call.
    pub fn repeating(response: ProviderResponse) -> Self {
        Self {
            repeat_last: true,
            ..Self::new(vec![response])
        }
    }

    pub fn call_count(&self) -> usize {
        self.requests.lock().unwrap().len()
    }

    pub fn requests(&self) -> Vec<ProviderRequest> {
        self.requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl Provider for SequentialMockProvider {
    fn name(&self) -> &str {
        "sequential_mock"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut requests = self.requests.lock().unwrap();
        let index = requests.len();
        requests.push(request);

        match self.responses.get(index) {
            Some(response) => Ok(response.clone()),
            None if self.repeat_last && !self.responses.is_empty() => {
                Ok(self.responses[self.responses.len() - 1].clone())
            }
            None => panic!(
                "SequentialMockProvider: no more responses (call #{}, have {})",
                index,
                self.responses.len()
            ),
        }
    }
}

/// A provider that always fails with an API error.
pub struct FailingProvider;

#[async_trait]
impl Provider for FailingProvider {
    fn name(&self) -> &str {
        "failing"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        Err(ProviderError::ApiError {
            status_code: 500,
            message: "upstream exploded".into(),
        })
    }
}

/// A provider that answers with the last user message, but fails when that
/// message contains "explode".
pub struct TaskEchoProvider;

#[async_trait]
impl Provider for TaskEchoProvider {
    fn name(&self) -> &str {
        "task_echo"
    }

    async fn complete(&self, request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let task = request
            .messages
            .iter()
            .rev()
            .find(|m| m.role == Role::User)
            .map(|m| m.content.clone())
            .unwrap_or_default();
        if task.contains("explode") {
            return Err(ProviderError::Network("connection reset".into()));
        }
        tokio::task::yield_now().await;
        Ok(make_text_response(&format!("done: {task}")))
    }
}

/// A provider that blocks every call until the gate is opened.
///
/// `entered` receives one permit per call that reached the gate, so a test
/// can wait until a run is provably in flight.
pub struct GatedProvider {
    open: watch::Sender<bool>,
    pub entered: Notify,
    response: ProviderResponse,
}

impl GatedProvider {
    pub fn new(response: ProviderResponse) -> Self {
        let (open, _) = watch::channel(false);
        Self {
            open,
            entered: Notify::new(),
            response,
        }
    }

    pub fn open(&self) {
        self.open.send_replace(true);
    }
}

#[async_trait]
impl Provider for GatedProvider {
    fn name(&self) -> &str {
        "gated"
    }

    async fn complete(&self, _request: ProviderRequest) -> Result<ProviderResponse, ProviderError> {
        let mut rx = self.open.subscribe();
        self.entered.notify_one();
        rx.wait_for(|open| *open)
            .await
            .map_err(|_| ProviderError::Network("gate dropped".into()))?;
        Ok(self.response.clone())
    }
}

/// Create a simple text response (no tool calls).
pub fn make_text_response(text: &str) -> ProviderResponse {
    ProviderResponse {
        usage: Some(Usage {
            prompt_tokens: 10,
            completion_tokens: 5,
            total_tokens: 15,
        }),
        model: "mock-model".into(),
        ..ProviderResponse::text(text)
    }
}

/// Create a response requesting the given tool calls.
pub fn make_tool_call_response(tool_calls: Vec<ToolCallRequest>) -> ProviderResponse {
    ProviderResponse {
        model: "mock-model".into(),
        ..ProviderResponse::tool_calls("", tool_calls)
    }
}

/// Helper to create a tool call with id `call_<name>`.
pub fn make_tool_call(name: &str, args: serde_json::Value) -> ToolCallRequest {
    ToolCallRequest::new(format!("call_{name}"), name, args.to_string())
}

/// Echoes its `text` argument and counts invocations.
#[derive(Default)]
pub struct EchoTool {
    pub calls: AtomicUsize,
}

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }
    fn description(&self) -> &str {
        "Echoes back the input"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": { "text": { "type": "string" } },
            "required": ["text"]
        })
    }
    async fn execute(&self, arguments: serde_json::Value, _cancel: CancellationToken) -> Result<ToolResult, ToolError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(ToolResult::ok(arguments["text"].as_str().unwrap_or_default()))
    }
}

/// Always fails with an execution error.
pub struct BrokenTool;

#[async_trait]
impl Tool for BrokenTool {
    fn name(&self) -> &str {
        "broken"
    }
    fn description(&self) -> &str {
        "Always fails"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: serde_json::Value, _cancel: CancellationToken) -> Result<ToolResult, ToolError> {
        Err(ToolError::ExecutionFailed {
            tool_name: "broken".into(),
            reason: "disk on fire".into(),
        })
    }
}

/// Sleeps for `millis` (or until cancelled), then reports its name.
pub struct SleepTool {
    pub name: &'static str,
    pub millis: u64,
}

#[async_trait]
impl Tool for SleepTool {
    fn name(&self) -> &str {
        self.name
    }
    fn description(&self) -> &str {
        "Sleeps for a while"
    }
    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({"type": "object"})
    }
    async fn execute(&self, _arguments: serde_json::Value, cancel: CancellationToken) -> Result<ToolResult, ToolError> {
        tokio::select! {
            _ = cancel.cancelled() => Err(ToolError::Cancelled(self.name.into())),
            _ = tokio::time::sleep(std::time::Duration::from_millis(self.millis)) => {
                Ok(ToolResult::ok(format!("{} slept", self.name)))
            }
        }
    }
}

/// Registry with the given tools.
pub fn registry(tools: Vec<Arc<dyn Tool>>) -> Arc<ToolRegistry> {
    let mut registry = ToolRegistry::new();
    for tool in tools {
        registry.register(tool);
    }
    Arc::new(registry)
}
