//! Provider-agnostic vocabulary shared between the Pulse agentic loop and its
//! two external collaborators: the LLM `Provider` and the `ToolExecutor`.
//!
//! Nothing in this crate knows how to actually call a model or run a tool —
//! it only defines the shapes both sides agree on, mirroring the split
//! between a thin core-types crate and the engine that consumes it.

pub mod error;
pub mod message;
pub mod provider;
pub mod tool;

pub use error::{ExecutorError, ProviderError};
pub use message::{Message, MessageId, ToolCall, ToolResult};
pub use provider::{ChatRequest, Provider, StreamEvent};
pub use tool::{ToolDef, ToolExecutor, ToolOutcome, ToolRegistry};
