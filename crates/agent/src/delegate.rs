//! `delegate_task` tool: lets a parent agent hand work to a sub-agent.

use std::sync::Arc;

use async_trait::async_trait;
use nestclaw_core::agent::SubAgentRequest;
use nestclaw_core::error::{Error, ToolError};
use nestclaw_core::tool::{Tool, ToolResult};
use serde::Deserialize;
use tokio_util::sync::CancellationToken;

use crate::subagent::SubAgentFactory;

#[derive(Debug, Deserialize)]
struct DelegateArgs {
    task: String,
    #[serde(default)]
    model: Option<String>,
    #[serde(default)]
    system_prompt: Option<String>,
}

/// Runs the requested task on a [`SubAgentFactory`] and returns the
/// sub-agent's answer as the tool output.
pub struct DelegateTool {
    factory: Arc<SubAgentFactory>,
}

impl DelegateTool {
    pub fn new(factory: Arc<SubAgentFactory>) -> Self {
        Self { factory }
    }
}

#[async_trait]
impl Tool for DelegateTool {
    fn name(&self) -> &str {
        "delegate_task"
    }

    fn description(&self) -> &str {
        "Delegate a self-contained task to a sub-agent with a fresh conversation. \
         Returns the sub-agent's final answer."
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "task": {
                    "type": "string",
                    "description": "What the sub-agent should do"
                },
                "model": {
                    "type": "string",
                    "description": "Model for the sub-agent (optional)"
                },
                "system_prompt": {
                    "type": "string",
                    "description": "System prompt for the sub-agent (optional)"
                }
            },
            "required": ["task"]
        })
    }

    async fn execute(&self, arguments: serde_json::Value, cancel: CancellationToken) -> Result<ToolResult, ToolError> {
        let args: DelegateArgs =
            serde_json::from_value(arguments).map_err(|e| ToolError::InvalidArguments(e.to_string()))?;
        if args.task.trim().is_empty() {
            return Err(ToolError::InvalidArguments("'task' must not be empty".into()));
        }

        let mut request = SubAgentRequest::new(args.task);
        if let Some(model) = args.model {
            request = request.with_model(model);
        }
        if let Some(prompt) = args.system_prompt {
            request = request.with_system_prompt(prompt);
        }

        match self.factory.spawn(request, &cancel).await {
            Ok(result) if result.success => Ok(ToolResult::ok(result.content)),
            Ok(result) => Ok(ToolResult::fail(format!(
                "sub-agent {} failed: {}",
                result.session_id,
                result.error.unwrap_or_default()
            ))),
            Err(Error::Cancelled) => Err(ToolError::Cancelled(self.name().into())),
            Err(e) => Ok(ToolResult::fail(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::loop_runner::AgentLoop;
    use crate::test_helpers::*;
    use nestclaw_core::bus::MessageBus;
    use nestclaw_core::provider::Provider;
    use nestclaw_core::tool::ToolRegistry;

    fn tool(provider: Arc<dyn Provider>, max: usize) -> (DelegateTool, Arc<SubAgentFactory>) {
        let factory = Arc::new(SubAgentFactory::new(
            AgentLoop::new(provider, Arc::new(ToolRegistry::new()), MessageBus::new()),
            max,
        ));
        (DelegateTool::new(factory.clone()), factory)
    }

    #[test]
    fn schema_requires_task() {
        let (tool, _) = tool(Arc::new(TaskEchoProvider), 1);
        let def = tool.to_definition();
        assert_eq!(def.name, "delegate_task");
        assert_eq!(def.parameters["required"], serde_json::json!(["task"]));
    }

    #[tokio::test]
    async fn returns_subagent_answer() {
        let (tool, factory) = tool(Arc::new(TaskEchoProvider), 1);
        let result = tool
            .execute(serde_json::json!({"task": "count to three"}), CancellationToken::new())
            .await
            .unwrap();
        assert!(result.success);
        assert_eq!(result.output, "done: count to three");
        assert_eq!(factory.completed_count(), 1);
    }

    #[tokio::test]
    async fn missing_task_is_invalid() {
        let (tool, _) = tool(Arc::new(TaskEchoProvider), 1);
        let err = tool
            .execute(serde_json::json!({"model": "x"}), CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::InvalidArguments(_)));
    }

    #[tokio::test]
    async fn failed_subagent_is_failed_result() {
        let (tool, _) = tool(Arc::new(FailingProvider), 1);
        let result = tool
            .execute(serde_json::json!({"task": "x"}), CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.message_content().contains("upstream exploded"));
    }

    #[tokio::test]
    async fn capacity_rejection_is_failed_result() {
        let (tool, _) = tool(Arc::new(TaskEchoProvider), 0);
        let result = tool
            .execute(serde_json::json!({"task": "x"}), CancellationToken::new())
            .await
            .unwrap();
        assert!(!result.success);
        assert!(result.message_content().contains("max concurrent sub-agents reached"));
    }

    #[tokio::test]
    async fn cancellation_is_tool_error() {
        let (tool, _) = tool(Arc::new(TaskEchoProvider), 1);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = tool
            .execute(serde_json::json!({"task": "x"}), cancel)
            .await
            .unwrap_err();
        assert!(matches!(err, ToolError::Cancelled(_)));
    }
}
