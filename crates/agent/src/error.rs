//! Structured error type for the agent crate, covering the taxonomy of
//! recoverable and terminal failures an `AgenticLoop::execute` call can hit.
//!
//! Most variants here are recovered locally and never reach the caller —
//! they exist so the loop's internal control flow (retry once, ignore,
//! compact-and-continue) has a typed error to match on instead of stringly
//! distinguishing cases. Only the terminal variants actually terminate
//! `execute` and surface as a single `error` UI event.

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Structured, serializable error type for the agent crate.
#[derive(Debug, Error, Clone, Serialize, Deserialize)]
#[non_exhaustive]
pub enum AgentError {
    // --- Provider errors ---
    /// Pre-output stream failure, eligible for exactly one same-turn retry.
    #[error("transient provider error: {0}")]
    TransientProvider(String),

    /// Stream failed after visible output was already delivered to the UI;
    /// never retried.
    #[error("provider error after output: {0}")]
    ProviderAfterOutput(String),

    /// Loop-level unrecoverable provider failure (retries exhausted, or a
    /// non-transient error with no prior output).
    #[error("provider error: {0}")]
    Provider(String),

    // --- Tool dispatch ---
    #[error("tool panic in {tool}: {details}")]
    ToolPanic { tool: String, details: String },

    #[error("unknown tool: {0}")]
    UnknownTool(String),

    // --- ask_user / interactive question ---
    #[error("question validation failed: {0}")]
    QuestionValidation(String),

    #[error("ask_user is not available in autonomous mode")]
    AutonomousModeBlocksQuestion,

    // --- Context management ---
    #[error("context overflow could not be recovered by compaction or pruning")]
    ContextOverflow,

    // --- Resolved-resource authorization ---
    #[error("resource not resolved: {resource_id}")]
    ResourceNotResolved { resource_id: String },

    #[error("action '{action}' not allowed on {resource_id}")]
    ActionNotAllowed { resource_id: String, action: String },

    // --- Scheduling ---
    #[error("turn budget exhausted without a final response")]
    TurnBudgetExhausted,

    #[error("budget check rejected the call: {0}")]
    BudgetRejected(String),

    #[error("cancelled")]
    Cancelled,

    // --- Generic internal ---
    #[error("internal error: {0}")]
    Internal(String),
}

impl AgentError {
    /// Whether this error should end the `Execute` call with a single
    /// `error` UI event (spec §7 propagation rule), as opposed to being
    /// recovered internally and never reaching the caller.
    pub fn is_terminal(&self) -> bool {
        !matches!(
            self,
            AgentError::TransientProvider(_) | AgentError::ToolPanic { .. }
        )
    }
}

impl From<anyhow::Error> for AgentError {
    fn from(e: anyhow::Error) -> Self {
        AgentError::Internal(e.to_string())
    }
}

impl From<pulse_agent_core::ProviderError> for AgentError {
    fn from(e: pulse_agent_core::ProviderError) -> Self {
        use pulse_agent_core::ProviderError;
        match e {
            ProviderError::Transient(msg) => AgentError::TransientProvider(msg),
            ProviderError::Cancelled => AgentError::Cancelled,
            ProviderError::Other(msg) => AgentError::Provider(msg),
        }
    }
}

impl From<pulse_agent_core::ExecutorError> for AgentError {
    fn from(e: pulse_agent_core::ExecutorError) -> Self {
        use pulse_agent_core::ExecutorError;
        match e {
            ExecutorError::UnknownTool(name) => AgentError::UnknownTool(name),
            ExecutorError::Other(msg) => AgentError::Internal(msg),
        }
    }
}
