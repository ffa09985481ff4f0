//! The agent orchestration layer of NestClaw.
//!
//! The agent follows a **Think → Act → Observe** cycle:
//!
//! 1. **Send** the conversation and tool catalogue to the provider
//! 2. **If tool calls**: execute them, append one result per call, loop back
//! 3. **If text response**: return it as the final answer
//!
//! The loop stops at the first final answer or when the round cap is
//! reached. Sub-agents are independent runs of the same loop, admitted by
//! [`SubAgentFactory`] under a hard concurrency ceiling and exposed to a
//! parent agent through [`DelegateTool`].

pub mod delegate;
pub mod loop_runner;
pub mod subagent;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use delegate::DelegateTool;
pub use loop_runner::{AgentLoop, DEFAULT_MAX_ITERATIONS};
pub use subagent::{DEFAULT_MAX_CONCURRENT, SubAgentFactory};
