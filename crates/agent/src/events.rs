//! UI-facing events emitted while `AgenticLoop::execute` runs (spec §6).
//!
//! These are distinct from `pulse_agent_core::StreamEvent`: a `StreamEvent`
//! is what the provider hands the loop mid-stream, an `AgentEvent` is what
//! the loop hands back out to whatever UI is watching the session. The loop
//! translates one into the other (and adds events of its own, like
//! `ToolStart`/`ToolEnd`, that have no provider-stream equivalent).

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// One event in a session's timeline, in emission order.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentEvent {
    pub seq: u64,
    pub timestamp: i64,
    pub session_id: String,
    pub kind: AgentEventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEventKind {
    Content {
        text: String,
    },
    Thinking {
        text: String,
    },
    ToolStart {
        tool_use_id: String,
        name: String,
        input: Value,
    },
    ToolEnd {
        tool_use_id: String,
        name: String,
        is_error: bool,
        /// `true` when the gate short-circuited this call from cached facts
        /// rather than actually invoking the executor.
        cached: bool,
    },
    ApprovalNeeded {
        tool_use_id: String,
        name: String,
    },
    Question {
        question_id: String,
        payload: Value,
    },
    Error {
        message: String,
    },
    Done {
        turns: usize,
        tool_calls: usize,
    },
}

/// Sink for events published to a session's timeline. `EventBus` is the
/// built-in broadcast implementation; callers needing a single synchronous
/// callback (the `emit` parameter in spec §4.1) can wrap a closure in
/// `ClosureObserver`.
#[async_trait]
pub trait EventObserver: Send + Sync {
    async fn on_event(&self, event: &AgentEvent) -> Result<(), anyhow::Error>;
}
