//! Error types for the two external capabilities.

use thiserror::Error;

/// Failures surfaced by a `Provider` implementation.
#[derive(Debug, Error, Clone)]
pub enum ProviderError {
    #[error("transient provider error: {0}")]
    Transient(String),

    #[error("provider error: {0}")]
    Other(String),

    #[error("cancelled")]
    Cancelled,
}

impl ProviderError {
    /// Errors worth a single same-turn retry when no visible output has been
    /// emitted yet (spec §4.1 retry policy, step 2-3).
    pub fn is_transient(&self) -> bool {
        matches!(self, ProviderError::Transient(_))
    }
}

/// Failures surfaced by a `ToolExecutor` implementation itself (as opposed to
/// a tool-level business error, which comes back as `ToolOutcome { is_error: true, .. }`).
#[derive(Debug, Error, Clone)]
pub enum ExecutorError {
    #[error("unknown tool: {0}")]
    UnknownTool(String),

    #[error("executor error: {0}")]
    Other(String),
}
