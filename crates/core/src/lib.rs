//! # NestClaw Core
//!
//! Domain types, traits, error definitions and the in-process message bus
//! for the NestClaw agent runtime. Concrete providers and tools live outside
//! this crate; everything here is the contract they implement against.
//!
//! ## Design Philosophy
//!
//! Every external collaborator is defined as a trait here. This enables:
//! - Swapping implementations via configuration
//! - Easy testing with scripted mock implementations
//! - Clean dependency graph (all crates depend inward on core)

pub mod agent;
pub mod bus;
pub mod error;
pub mod event;
pub mod message;
pub mod provider;
pub mod tool;

// Re-export key types at crate root for ergonomics
pub use agent::{
    AgentFinishReason, AgentRequest, AgentResult, SubAgentRequest, SubAgentResult, ToolExecution,
    ToolExecutionMode,
};
pub use bus::{HandlerError, HandlerResult, MessageBus, PublishReport, Subscription};
pub use error::{Error, ProviderError, Result, ToolError};
pub use event::{ModelRespondedEvent, SubAgentCompletedEvent, ToolCompletedEvent, ToolStartedEvent};
pub use message::{Message, Role, ToolCallRequest};
pub use provider::{FinishReason, Provider, ProviderRequest, ProviderResponse, StreamChunk, ToolDefinition, Usage};
pub use tool::{Tool, ToolRegistry, ToolResult};
pub use tokio_util::sync::CancellationToken;
