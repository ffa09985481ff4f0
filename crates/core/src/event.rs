//! Lifecycle events published on the [`MessageBus`](crate::bus::MessageBus).
//!
//! Each event is its own type so observers subscribe to exactly what they
//! render: a UI wants tool progress, a cost tracker wants model usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::provider::{FinishReason, Usage};

/// A tool is about to run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolStartedEvent {
    pub tool_call_id: String,
    pub tool_name: String,
    pub arguments_json: String,
    pub timestamp: DateTime<Utc>,
}

/// A tool finished, successfully or not.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolCompletedEvent {
    pub tool_call_id: String,
    pub tool_name: String,
    pub success: bool,
    pub output: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}

/// The provider answered one round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ModelRespondedEvent {
    pub model: String,
    pub round: u32,
    pub finish_reason: FinishReason,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub usage: Option<Usage>,
    pub timestamp: DateTime<Utc>,
}

/// A sub-agent run settled (success or caught failure).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubAgentCompletedEvent {
    pub session_id: String,
    pub success: bool,
    pub duration_ms: u64,
    pub timestamp: DateTime<Utc>,
}
