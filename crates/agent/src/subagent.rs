//! Sub-agent factory: bounded, isolated child runs of the agent loop.
//!
//! Each spawn claims a slot without waiting, runs a fresh conversation
//! (its own session id, its own message history) and records a summary in
//! the completed-sessions history. Capacity is a hard ceiling: a request
//! that finds every slot taken is rejected immediately, never queued.

use std::collections::VecDeque;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Instant;

use chrono::Utc;
use futures::FutureExt;
use nestclaw_config::AppConfig;
pub use nestclaw_core::agent::DEFAULT_MAX_CONCURRENT;
use nestclaw_core::agent::{
    AgentFinishReason, AgentRequest, SUBAGENT_SESSION_PREFIX, SubAgentRequest, SubAgentResult,
};
use nestclaw_core::bus::MessageBus;
use nestclaw_core::error::Error;
use nestclaw_core::event::SubAgentCompletedEvent;
use nestclaw_core::provider::Provider;
use nestclaw_core::tool::ToolRegistry;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::loop_runner::AgentLoop;

/// Spawns sub-agent runs under a concurrency ceiling.
///
/// Share it behind an `Arc`; all methods take `&self`.
pub struct SubAgentFactory {
    agent: AgentLoop,
    max_concurrent: usize,
    active: AtomicUsize,
    completed: Mutex<VecDeque<SubAgentResult>>,
    history_limit: Option<usize>,
}

/// Holds one claimed slot. Dropping it releases the slot, so the count is
/// restored on every exit path, including a dropped `spawn` future.
struct SlotGuard<'a> {
    active: &'a AtomicUsize,
}

impl Drop for SlotGuard<'_> {
    fn drop(&mut self) {
        self.active.fetch_sub(1, Ordering::AcqRel);
    }
}

impl SubAgentFactory {
    /// Create a factory that runs children on `agent`.
    ///
    /// A `max_concurrent` of zero rejects every spawn.
    pub fn new(agent: AgentLoop, max_concurrent: usize) -> Self {
        Self {
            agent,
            max_concurrent,
            active: AtomicUsize::new(0),
            completed: Mutex::new(VecDeque::new()),
            history_limit: None,
        }
    }

    /// Build the child agent loop and ceiling from `[subagents]` settings.
    pub fn from_config(
        provider: Arc<dyn Provider>,
        tools: Arc<ToolRegistry>,
        bus: MessageBus,
        config: &AppConfig,
    ) -> Self {
        let agent = AgentLoop::from_config(provider, tools, bus, config)
            .with_max_iterations(config.subagents.max_iterations);
        let factory = Self::new(agent, config.subagents.max_concurrent);
        match config.subagents.history_limit {
            Some(limit) => factory.with_history_limit(limit),
            None => factory,
        }
    }

    /// Keep only the `limit` most recent completed sessions.
    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = Some(limit);
        self
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Runs currently holding a slot.
    pub fn active_count(&self) -> usize {
        self.active.load(Ordering::Acquire)
    }

    /// Snapshot of settled runs, oldest first.
    pub fn completed_sessions(&self) -> Vec<SubAgentResult> {
        self.completed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .cloned()
            .collect()
    }

    pub fn completed_count(&self) -> usize {
        self.completed.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Run `request` as an isolated sub-agent.
    ///
    /// Returns `Err(CapacityExceeded)` without running anything when every
    /// slot is taken, and `Err(Cancelled)` when `cancel` fires. Every other
    /// outcome, including provider failure, is an `Ok` result that is also
    /// appended to the completed-sessions history.
    pub async fn spawn(&self, request: SubAgentRequest, cancel: &CancellationToken) -> Result<SubAgentResult, Error> {
        let slot = self.try_claim_slot().ok_or_else(|| {
            warn!(max_concurrent = self.max_concurrent, "Sub-agent capacity exhausted");
            Error::CapacityExceeded {
                max_concurrent: self.max_concurrent,
            }
        })?;

        let session_id = format!("{SUBAGENT_SESSION_PREFIX}{}", uuid::Uuid::new_v4());
        let model = request.model_or_default().to_string();
        info!(
            session_id = %session_id,
            model = %model,
            active = self.active_count(),
            "Spawning sub-agent"
        );

        let started = Instant::now();
        let agent_request = AgentRequest::new(model, request.initial_messages());
        let outcome = AssertUnwindSafe(self.agent.run(agent_request, cancel))
            .catch_unwind()
            .await;

        let result = match outcome {
            Ok(Ok(run)) => match run.finish_reason {
                AgentFinishReason::Stop => SubAgentResult {
                    session_id,
                    success: true,
                    content: run.content,
                    error: None,
                },
                _ => SubAgentResult {
                    session_id,
                    success: false,
                    content: run.content,
                    error: Some(format!("{} reached", describe(run.finish_reason))),
                },
            },
            Ok(Err(Error::Cancelled)) => {
                info!(session_id = %session_id, "Sub-agent cancelled");
                return Err(Error::Cancelled);
            }
            Ok(Err(e)) => SubAgentResult {
                session_id,
                success: false,
                content: String::new(),
                error: Some(e.to_string()),
            },
            Err(_) => SubAgentResult {
                session_id,
                success: false,
                content: String::new(),
                error: Some("sub-agent run panicked".into()),
            },
        };

        let duration_ms = started.elapsed().as_millis() as u64;
        if result.success {
            info!(session_id = %result.session_id, duration_ms, "Sub-agent completed");
        } else {
            warn!(
                session_id = %result.session_id,
                duration_ms,
                error = result.error.as_deref().unwrap_or_default(),
                "Sub-agent failed"
            );
        }

        self.record(result.clone());
        // Subscribers see a settled run, so they may spawn on this factory.
        drop(slot);
        self.agent
            .bus()
            .publish(SubAgentCompletedEvent {
                session_id: result.session_id.clone(),
                success: result.success,
                duration_ms,
                timestamp: Utc::now(),
            })
            .await;

        Ok(result)
    }

    fn try_claim_slot(&self) -> Option<SlotGuard<'_>> {
        let max = self.max_concurrent;
        self.active
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |n| (n < max).then_some(n + 1))
            .ok()
            .map(|_| SlotGuard { active: &self.active })
    }

    fn record(&self, result: SubAgentResult) {
        let mut completed = self.completed.lock().unwrap_or_else(PoisonError::into_inner);
        completed.push_back(result);
        if let Some(limit) = self.history_limit {
            while completed.len() > limit {
                if let Some(evicted) = completed.pop_front() {
                    debug!(session_id = %evicted.session_id, "Evicted completed sub-agent session");
                }
            }
        }
    }
}

fn describe(reason: AgentFinishReason) -> &'static str {
    match reason {
        AgentFinishReason::MaxIterations => "max iterations",
        AgentFinishReason::Failed => "failure",
        AgentFinishReason::Stop => "stop",
    }
}
