//! The agent reasoning loop implementation.
//!
//! One invocation walks `AwaitingModel → {ExecutingTools → AwaitingModel}*`
//! until the provider stops asking for tools (`Completed`), the provider
//! fails, or the round cap is hit.

use std::any::{Any, type_name};
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;
use futures::future::join_all;
use nestclaw_config::AppConfig;
pub use nestclaw_core::agent::DEFAULT_MAX_ITERATIONS;
use nestclaw_core::agent::{AgentFinishReason, AgentRequest, AgentResult, ToolExecution, ToolExecutionMode};
use nestclaw_core::bus::MessageBus;
use nestclaw_core::error::{Error, ProviderError, ToolError};
use nestclaw_core::event::{ModelRespondedEvent, ToolCompletedEvent, ToolStartedEvent};
use nestclaw_core::message::{Message, ToolCallRequest};
use nestclaw_core::provider::{Provider, ProviderRequest, ProviderResponse, ToolDefinition, collect_stream};
use nestclaw_core::tool::{ToolRegistry, ToolResult};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// The core agent loop that orchestrates LLM calls and tool execution.
///
/// An `AgentLoop` holds no per-run state; one instance can serve any number
/// of concurrent invocations.
pub struct AgentLoop {
    /// The LLM provider to use
    provider: Arc<dyn Provider>,

    /// Tool registry
    tools: Arc<ToolRegistry>,

    /// Bus that receives tool and model lifecycle events
    bus: MessageBus,

    /// Temperature setting
    temperature: f32,

    /// Default max tokens per response
    max_tokens: Option<u32>,

    /// Maximum provider rounds per invocation
    max_iterations: u32,

    /// Scheduling of tool calls within one round
    execution_mode: ToolExecutionMode,

    /// Use `Provider::stream` and accumulate chunks
    streaming: bool,
}

/// Mutable state of one invocation.
struct RunState {
    messages: Vec<Message>,
    executions: Vec<ToolExecution>,
    rounds: u32,
}

impl RunState {
    fn into_result(self, content: String, finish_reason: AgentFinishReason) -> AgentResult {
        AgentResult {
            content,
            tool_executions: self.executions,
            finish_reason,
            rounds: self.rounds,
            messages: self.messages,
        }
    }
}

impl AgentLoop {
    /// Create a new agent loop.
    pub fn new(provider: Arc<dyn Provider>, tools: Arc<ToolRegistry>, bus: MessageBus) -> Self {
        Self {
            provider,
            tools,
            bus,
            temperature: 0.7,
            max_tokens: None,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            execution_mode: ToolExecutionMode::Sequential,
            streaming: false,
        }
    }

    /// Create an agent loop with the top-level settings from `config`.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        bus: MessageBus,
        config: &AppConfig,
    ) -> Self {
        Self::new(provider, tools, bus)
            .with_temperature(config.default_temperature)
            .with_max_tokens(config.default_max_tokens)
            .with_max_iterations(config.agent.max_iterations)
            .with_execution_mode(config.agent.tool_execution)
            .with_streaming(config.agent.streaming)
    }

    /// Set the maximum number of provider rounds. At least one round always
    /// runs, so values below 1 are treated as 1.
    pub fn with_max_iterations(mut self, max: u32) -> Self {
        self.max_iterations = max.max(1);
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = temperature;
        self
    }

    /// Set the default max tokens per LLM response.
    pub fn with_max_tokens(mut self, max: u32) -> Self {
        self.max_tokens = Some(max);
        self
    }

    pub fn with_execution_mode(mut self, mode: ToolExecutionMode) -> Self {
        self.execution_mode = mode;
        self
    }

    pub fn with_streaming(mut self, enabled: bool) -> Self {
        self.streaming = enabled;
        self
    }

    pub fn max_iterations(&self) -> u32 {
        self.max_iterations
    }

    pub fn bus(&self) -> &MessageBus {
        &self.bus
    }

    /// Run one turn to completion.
    ///
    /// Provider failures and cancellation are returned as `Err`. Tool
    /// failures never are: they are fed back to the model.
    pub async fn run(&self, request: AgentRequest, cancel: &CancellationToken) -> Result<AgentResult, Error> {
        let mut state = RunState {
            messages: request.initial_messages,
            executions: Vec::new(),
            rounds: 0,
        };
        let (content, finish_reason) = self.drive(&request.model, &mut state, cancel).await?;
        Ok(state.into_result(content, finish_reason))
    }

    /// Like [`run`](Self::run), but provider failures become an
    /// [`AgentFinishReason::Failed`] result carrying the partial tool
    /// executions. Cancellation is still returned as `Err`.
    pub async fn run_settled(&self, request: AgentRequest, cancel: &CancellationToken) -> Result<AgentResult, Error> {
        let mut state = RunState {
            messages: request.initial_messages,
            executions: Vec::new(),
            rounds: 0,
        };
        match self.drive(&request.model, &mut state, cancel).await {
            Ok((content, finish_reason)) => Ok(state.into_result(content, finish_reason)),
            Err(Error::Cancelled) => Err(Error::Cancelled),
            Err(e) => {
                warn!(model = %request.model, error = %e, "Agent run failed");
                Ok(state.into_result(e.to_string(), AgentFinishReason::Failed))
            }
        }
    }

    async fn drive(
        &self,
        model: &str,
        state: &mut RunState,
        cancel: &CancellationToken,
    ) -> Result<(String, AgentFinishReason), Error> {
        info!(
            model = %model,
            messages = state.messages.len(),
            "Processing agent request"
        );

        let tool_definitions = self.tools.definitions();

        loop {
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            state.rounds += 1;
            debug!(model = %model, round = state.rounds, "Agent loop round");

            let response = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(Error::Cancelled),
                response = self.call_provider(model, &state.messages, &tool_definitions) => response?,
            };

            self.publish(
                ModelRespondedEvent {
                    model: if response.model.is_empty() { model.to_string() } else { response.model.clone() },
                    round: state.rounds,
                    finish_reason: response.finish_reason,
                    usage: response.usage,
                    timestamp: Utc::now(),
                },
                cancel,
            )
            .await;
            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if !response.wants_tools() {
                // Final answer; tool calls on a non-tool finish are not executed
                state.messages.push(Message::assistant(response.content.clone()));
                info!(
                    model = %model,
                    rounds = state.rounds,
                    tool_executions = state.executions.len(),
                    "Agent run completed"
                );
                return Ok((response.content, AgentFinishReason::Stop));
            }

            if response.tool_calls.is_empty() {
                return Err(ProviderError::MalformedResponse(
                    "finish reason is tool_calls but no tool calls were returned".into(),
                )
                .into());
            }

            debug!(tool_count = response.tool_calls.len(), "Executing tool calls");
            state.messages.push(response.to_message());

            match self.execution_mode {
                ToolExecutionMode::Sequential => {
                    for call in &response.tool_calls {
                        if cancel.is_cancelled() {
                            return Err(Error::Cancelled);
                        }
                        let execution = self.execute_call(call, cancel).await;
                        record(state, execution);
                    }
                }
                ToolExecutionMode::Concurrent => {
                    if cancel.is_cancelled() {
                        return Err(Error::Cancelled);
                    }
                    let executions =
                        join_all(response.tool_calls.iter().map(|call| self.execute_call(call, cancel))).await;
                    for execution in executions {
                        record(state, execution);
                    }
                }
            }

            if cancel.is_cancelled() {
                return Err(Error::Cancelled);
            }

            if state.rounds >= self.max_iterations {
                warn!(
                    model = %model,
                    rounds = state.rounds,
                    "Max tool iterations reached, stopping"
                );
                let content = format!(
                    "Reached the maximum of {} tool rounds without a final answer.",
                    self.max_iterations
                );
                return Ok((content, AgentFinishReason::MaxIterations));
            }
        }
    }

    async fn call_provider(
        &self,
        model: &str,
        messages: &[Message],
        tools: &[ToolDefinition],
    ) -> Result<ProviderResponse, ProviderError> {
        let request = ProviderRequest {
            model: model.to_string(),
            messages: messages.to_vec(),
            tools: tools.to_vec(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        };

        if self.streaming {
            let rx = self.provider.stream(request).await?;
            collect_stream(model, rx).await
        } else {
            self.provider.complete(request).await
        }
    }

    /// Execute one requested call. Never fails: every problem becomes a
    /// failed result the model can see.
    async fn execute_call(&self, call: &ToolCallRequest, cancel: &CancellationToken) -> ToolExecution {
        let Some(tool) = self.tools.get(&call.name) else {
            warn!(tool = %call.name, call_id = %call.id, "Model requested an unknown tool");
            return execution_record(call, ToolResult::fail(format!("unknown tool: {}", call.name)), 0);
        };

        self.publish(
            ToolStartedEvent {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                arguments_json: call.arguments_json.clone(),
                timestamp: Utc::now(),
            },
            cancel,
        )
        .await;

        let start = Instant::now();
        let result = if cancel.is_cancelled() {
            ToolResult::fail(ToolError::Cancelled(call.name.clone()).to_string())
        } else {
            match decode_arguments(&call.arguments_json) {
                Ok(arguments) => match tool.execute(arguments, cancel.clone()).await {
                    Ok(result) => result,
                    Err(e) => ToolResult::fail(e.to_string()),
                },
                Err(e) => ToolResult::fail(e.to_string()),
            }
        };
        let duration_ms = start.elapsed().as_millis() as u64;

        if result.success {
            debug!(tool = %call.name, duration_ms, "Tool executed");
        } else {
            warn!(tool = %call.name, error = %result.message_content(), "Tool execution failed");
        }

        self.publish(
            ToolCompletedEvent {
                tool_call_id: call.id.clone(),
                tool_name: call.name.clone(),
                success: result.success,
                output: result.output.clone(),
                error: result.error.clone(),
                duration_ms,
                timestamp: Utc::now(),
            },
            cancel,
        )
        .await;

        execution_record(call, result, duration_ms)
    }

    /// Publish `event`, but stop waiting on subscribers once `cancel` fires.
    async fn publish<T: Any + Send + Sync>(&self, event: T, cancel: &CancellationToken) {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => debug!(event = type_name::<T>(), "Dropped event publish on cancellation"),
            _ = self.bus.publish(event) => {}
        }
    }
}

fn decode_arguments(raw: &str) -> Result<serde_json::Value, ToolError> {
    if raw.trim().is_empty() {
        return Ok(serde_json::Value::Object(serde_json::Map::new()));
    }
    serde_json::from_str(raw).map_err(|e| ToolError::InvalidArguments(e.to_string()))
}

fn execution_record(call: &ToolCallRequest, result: ToolResult, duration_ms: u64) -> ToolExecution {
    ToolExecution {
        tool_call_id: call.id.clone(),
        tool_name: call.name.clone(),
        arguments_json: call.arguments_json.clone(),
        success: result.success,
        output: result.output,
        error: result.error,
        duration_ms,
    }
}

/// Append the tool-role message for `execution` and record it.
fn record(state: &mut RunState, execution: ToolExecution) {
    let content = match (&execution.error, execution.success) {
        (Some(error), false) => error.clone(),
        _ => execution.output.clone(),
    };
    state.messages.push(Message::tool_result(
        execution.tool_call_id.clone(),
        execution.tool_name.clone(),
        content,
    ));
    state.executions.push(execution);
}
