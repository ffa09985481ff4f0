//! Agent run request/result types shared by the loop, the sub-agent
//! factory and their callers.

use serde::{Deserialize, Serialize};

use crate::message::Message;

/// Model name used when a sub-agent request does not pick one.
pub const DEFAULT_SUBAGENT_MODEL: &str = "default";

/// Prefix of every sub-agent session id.
pub const SUBAGENT_SESSION_PREFIX: &str = "subagent:";

/// Default round cap per agent loop invocation.
pub const DEFAULT_MAX_ITERATIONS: u32 = 25;

/// Default ceiling on sub-agent runs in flight.
pub const DEFAULT_MAX_CONCURRENT: usize = 5;

/// Input to one agent loop invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentRequest {
    /// Model passed through to the provider
    pub model: String,

    /// Conversation so far, oldest first
    pub initial_messages: Vec<Message>,
}

impl AgentRequest {
    pub fn new(model: impl Into<String>, initial_messages: Vec<Message>) -> Self {
        Self {
            model: model.into(),
            initial_messages,
        }
    }
}

/// Why an agent run ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentFinishReason {
    /// The model produced a final answer
    Stop,
    /// The round cap was hit while the model still wanted tools
    MaxIterations,
    /// The provider failed mid-run
    Failed,
}

/// One tool invocation as recorded in an [`AgentResult`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ToolExecution {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments_json: String,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
}

/// Output of one agent loop invocation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentResult {
    /// Final answer (or the failure description for `Failed`)
    pub content: String,

    /// Every tool executed, in invocation order
    pub tool_executions: Vec<ToolExecution>,

    pub finish_reason: AgentFinishReason,

    /// Provider rounds performed
    pub rounds: u32,

    /// Full history at the end of the run, including the caller's messages
    pub messages: Vec<Message>,
}

/// How the tool calls of one round are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolExecutionMode {
    /// One call at a time, in provider order
    #[default]
    Sequential,
    /// All calls of a round at once; results still appended in provider order
    Concurrent,
}

/// A delegated task for an isolated sub-agent.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentRequest {
    pub task: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub system_prompt: Option<String>,
}

impl SubAgentRequest {
    pub fn new(task: impl Into<String>) -> Self {
        Self {
            task: task.into(),
            model: None,
            system_prompt: None,
        }
    }

    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    pub fn with_system_prompt(mut self, prompt: impl Into<String>) -> Self {
        self.system_prompt = Some(prompt.into());
        self
    }

    /// The model to run with, falling back to [`DEFAULT_SUBAGENT_MODEL`].
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_SUBAGENT_MODEL)
    }

    /// The isolated starting history: optional system prompt, then the task.
    pub fn initial_messages(&self) -> Vec<Message> {
        let mut messages = Vec::with_capacity(2);
        if let Some(prompt) = &self.system_prompt {
            messages.push(Message::system(prompt.clone()));
        }
        messages.push(Message::user(self.task.clone()));
        messages
    }
}

/// Summary of a settled sub-agent run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubAgentResult {
    /// `subagent:<uuid>`
    pub session_id: String,
    pub success: bool,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}
